use pest::Parser;
use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::{EavError, Result};
use crate::query::{CriteriaSet, Combine, Criterion, Order, Select};
use crate::words;

#[derive(Parser)]
#[grammar = "query.pest"]
struct QueryParser;

/// Parses a statement into a [`Select`], ready for parameters.
///
/// ```
/// let select = eavql::parse("SELECT foo, bar FROM blet WHERE monkey = @something").unwrap();
/// assert_eq!(select.select, vec!["foo", "bar"]);
/// assert_eq!(select.from, "blet");
/// ```
pub fn parse(sql: &str) -> Result<Select> {
    if words::tokenize(sql).is_empty() {
        return Err(EavError::parse("No tokens", sql));
    }
    let statement = QueryParser::parse(Rule::statement, sql)
        .map_err(|e| syntax_error(e, sql))?
        .next()
        .ok_or_else(|| EavError::parse("No statement", sql))?;

    let mut select = Select::default();
    for clause in statement.into_inner() {
        match clause.as_rule() {
            Rule::select_clause => {
                for column in only(clause, Rule::column) {
                    words::validate_column_name(column.as_str(), sql)?;
                    select.select.push(column.as_str().to_string());
                }
            }
            Rule::from_clause => {
                for table in only(clause, Rule::table) {
                    words::validate_table_name(table.as_str(), sql)?;
                    select.from = table.as_str().to_string();
                }
            }
            Rule::where_clause => {
                // only AND groups can be written as text
                let mut group = CriteriaSet::new(Combine::And);
                for criterion in only(clause, Rule::criterion) {
                    group.criteria.push(criterion_of(criterion, sql)?);
                }
                select.where_.push(group);
            }
            Rule::order_clause => {
                for item in only(clause, Rule::order_item) {
                    select.order_by.push(order_of(item, sql)?);
                }
            }
            Rule::limit_clause => {
                for value in only(clause, Rule::limit_value) {
                    // SQLite reads LIMIT as a signed 64-bit integer
                    select.limit = value
                        .as_str()
                        .parse::<i64>()
                        .ok()
                        .and_then(|limit| u64::try_from(limit).ok())
                        .ok_or_else(|| EavError::parse("Invalid LIMIT value", sql))?;
                }
            }
            _ => (),
        }
    }
    Ok(select)
}

fn only(pair: Pair<'_, Rule>, rule: Rule) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(move |p| p.as_rule() == rule)
}

fn criterion_of(pair: Pair<'_, Rule>, sql: &str) -> Result<Criterion> {
    let mut parts = pair.into_inner();
    let (Some(name), Some(op), Some(param)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(EavError::parse("Malformed WHERE criterion", sql));
    };
    words::validate_column_name(name.as_str(), sql)?;
    words::validate_operator(op.as_str(), sql)?;
    words::validate_parameter_name(param.as_str(), sql)?;
    Ok(Criterion::new(
        name.as_str(),
        op.as_str().to_lowercase(),
        param.as_str(),
    ))
}

fn order_of(pair: Pair<'_, Rule>, sql: &str) -> Result<Order> {
    let mut field = None;
    let mut descending = false;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::column => field = Some(part.as_str().to_string()),
            Rule::direction => {
                descending = part
                    .into_inner()
                    .next()
                    .is_some_and(|kw| kw.as_rule() == Rule::kw_desc)
            }
            _ => (),
        }
    }
    let field = field.ok_or_else(|| EavError::parse("Invalid ORDER BY", sql))?;
    words::validate_column_name(&field, sql)?;
    Ok(Order { field, descending })
}

fn syntax_error(error: PestError<Rule>, sql: &str) -> EavError {
    let error = error.renamed_rules(|rule| {
        match rule {
            Rule::kw_select => "SELECT",
            Rule::kw_from => "FROM",
            Rule::kw_where => "WHERE",
            Rule::kw_and => "AND",
            Rule::kw_order => "ORDER",
            Rule::kw_by => "BY",
            Rule::kw_asc => "ASC",
            Rule::kw_desc => "DESC",
            Rule::kw_limit => "LIMIT",
            Rule::column => "column name",
            Rule::table => "table name",
            Rule::operator => "operator",
            Rule::parameter => "parameter name",
            Rule::limit_value => "LIMIT value",
            Rule::EOI => "end of statement",
            _ => "statement",
        }
        .to_string()
    });
    let (line, col) = match error.line_col {
        LineColLocation::Pos((line, col)) => (line, col),
        LineColLocation::Span((line, col), _) => (line, col),
    };
    EavError::Parse {
        message: error.variant.message().into_owned(),
        sql: sql.to_string(),
        line: Some(line),
        col: Some(col),
    }
}
