//! Identifier rules shared by the parser, the compiler and the dictionaries.
//!
//! Table and attribute names are "words": a letter followed by letters, digits
//! or underscores, never ending in an underscore. Parameters are words prefixed
//! by `@`. A handful of words are reserved for pseudo-columns and keywords.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EavError, Result};

lazy_static! {
    static ref WORD: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap();
    static ref PARAM: Regex = Regex::new(r"^@[A-Za-z][A-Za-z0-9_]*$").unwrap();
    static ref PARAM_REF: Regex = Regex::new(r"@[A-Za-z][A-Za-z0-9_]*").unwrap();
}

pub const RESERVED_WORDS: [&str; 10] = [
    "select",
    "from",
    "where",
    "limit",
    "value",
    "id",
    "count",
    "created",
    "lastmodified",
    "relevance",
];

pub const QUERY_OPERATORS: [&str; 8] = ["=", "<>", ">", ">=", "<", "<=", "matches", "like"];

/// Can a value be used for a table or attribute name?
pub fn is_word(word: &str) -> bool {
    WORD.is_match(word) && !word.ends_with('_')
}

/// Can a value be used as the name of a query parameter?
pub fn is_param(param: &str) -> bool {
    PARAM.is_match(param) && !param.ends_with('_')
}

pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

pub fn is_operator(op: &str) -> bool {
    let lower = op.to_lowercase();
    QUERY_OPERATORS.contains(&lower.as_str())
}

pub fn validate_table_name(table: &str, context: &str) -> Result<()> {
    if is_word(table) {
        Ok(())
    } else {
        Err(EavError::validation(format!(
            "Invalid table name: {table} (in: {context})"
        )))
    }
}

pub fn validate_column_name(column: &str, context: &str) -> Result<()> {
    if is_word(column) {
        Ok(())
    } else {
        Err(EavError::validation(format!(
            "Invalid column name: {column} (in: {context})"
        )))
    }
}

pub fn validate_parameter_name(param: &str, context: &str) -> Result<()> {
    if is_param(param) {
        Ok(())
    } else {
        Err(EavError::validation(format!(
            "Invalid parameter name: {param} (in: {context})"
        )))
    }
}

pub fn validate_operator(op: &str, context: &str) -> Result<()> {
    if is_operator(op) {
        Ok(())
    } else {
        Err(EavError::validation(format!(
            "Invalid query operator: {op} (in: {context})"
        )))
    }
}

/// Checks a name about to enter a dictionary: it must be a word and not reserved.
pub fn validate_dictionary_name(kind: &str, name: &str) -> Result<()> {
    if !is_word(name) {
        return Err(EavError::validation(format!("{kind} name is not valid: {name}")));
    }
    if is_reserved(name) {
        return Err(EavError::validation(format!("{kind} name is reserved: {name}")));
    }
    Ok(())
}

/// Make a name usable as a table or column alias: only ASCII letters and
/// digits survive, and the result always starts with a letter.
pub fn clean_name(name: &str) -> String {
    let mut clean: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if !clean.starts_with(|c: char| c.is_ascii_alphabetic()) {
        clean.insert(0, 'a');
    }
    clean
}

/// Splits on spaces, tabs and line breaks, dropping empty tokens.
pub fn tokenize(sql: &str) -> Vec<&str> {
    sql.split([' ', '\n', '\r', '\t'])
        .filter(|token| !token.is_empty())
        .collect()
}

/// Lists the `@name` parameter references of a statement, in order of appearance.
pub fn extract_param_names(sql: &str) -> Vec<String> {
    PARAM_REF
        .find_iter(sql)
        .map(|found| found.as_str().to_string())
        .collect()
}
