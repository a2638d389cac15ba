//! Compiles a [`Select`] over virtual columns into physical SQL.
//!
//! Every referenced attribute becomes its own left outer join against the
//! `item_values` view, so items lacking an attribute still come back with a
//! NULL in its place. Attributes and tables the dictionaries do not know are
//! not errors: they project as `NULL` and filter as `1 = 0`.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

use tracing::debug;

use crate::backend::Params;
use crate::error::{EavError, Result};
use crate::keeper::{Intent, Name, Table};
use crate::names::Names;
use crate::query::{Combine, CompiledQuery, Criterion, Select};
use crate::tables::Tables;
use crate::words;

// ------------- SQL AST -------------
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Null,
    CountAll,
    Column(String, &'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    kind: JoinKind,
    source: &'static str,
    alias: String,
    on: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Never,
    TableIs(i64),
    Compare(Expr, String, String),
    Match(String, String),
    Group(Combine, Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
struct OrderTerm {
    key: String,
    descending: bool,
}

#[derive(Debug, Default)]
struct SqlSelect {
    projections: Vec<(Expr, String)>,
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
    order: Vec<OrderTerm>,
    limit: Option<u64>,
}

impl Expr {
    fn render(&self, out: &mut String) {
        match self {
            Expr::Null => out.push_str("NULL"),
            Expr::CountAll => out.push_str("COUNT(*)"),
            Expr::Column(alias, column) => {
                let _ = write!(out, "{alias}.{column}");
            }
        }
    }
}

impl Predicate {
    fn render(&self, out: &mut String) {
        match self {
            Predicate::Never => out.push_str("1 = 0"),
            Predicate::TableIs(id) => {
                let _ = write!(out, "i.tableid = {id}");
            }
            Predicate::Compare(lhs, op, param) => {
                lhs.render(out);
                let _ = write!(out, " {} {param}", op.to_uppercase());
            }
            Predicate::Match(alias, param) => {
                let _ = write!(out, "{alias}.bvalues_fts MATCH {param}");
            }
            Predicate::Group(combine, parts) => {
                out.push('(');
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        let _ = write!(out, " {} ", combine.keyword());
                    }
                    part.render(out);
                }
                out.push(')');
            }
        }
    }
}

impl SqlSelect {
    fn render(&self) -> String {
        let mut sql = String::from("SELECT\n");
        for (idx, (expr, alias)) in self.projections.iter().enumerate() {
            if idx > 0 {
                sql.push_str(",\n");
            }
            expr.render(&mut sql);
            let _ = write!(sql, " AS \"{alias}\"");
        }
        sql.push_str("\nFROM items AS i");
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "JOIN",
                JoinKind::LeftOuter => "LEFT OUTER JOIN",
            };
            let _ = write!(
                sql,
                "\n{kind} {} AS {} ON {}",
                join.source, join.alias, join.on
            );
        }
        sql.push_str("\nWHERE ");
        for (idx, predicate) in self.predicates.iter().enumerate() {
            if idx > 0 {
                sql.push_str("\nAND ");
            }
            predicate.render(&mut sql);
        }
        if !self.order.is_empty() {
            sql.push_str("\nORDER BY ");
            for (idx, term) in self.order.iter().enumerate() {
                if idx > 0 {
                    sql.push_str(", ");
                }
                let direction = if term.descending { "DESC" } else { "ASC" };
                let _ = write!(sql, "{} {direction}", term.key);
            }
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, "\nLIMIT {limit}");
        }
        sql
    }
}

// Hands out SQL aliases derived from virtual names, never the same one twice.
#[derive(Default)]
struct Aliases {
    used: HashSet<String>,
}

impl Aliases {
    fn claim(&mut self, base: &str) -> String {
        let mut alias = base.to_string();
        let mut suffix = 2;
        while !self.used.insert(alias.clone()) {
            alias = format!("{base}{suffix}");
            suffix += 1;
        }
        alias
    }
}

// ------------- Compiler -------------
#[derive(Clone)]
pub struct Compiler {
    tables: Tables,
    names: Names,
}

impl Compiler {
    pub fn new(tables: Tables, names: Names) -> Self {
        Self { tables, names }
    }

    /// Checks the shape of a query before anything is resolved.
    pub fn precheck(query: &Select) -> Result<()> {
        if query.from.is_empty() {
            return Err(EavError::validation("Invalid query, FROM is missing"));
        }
        if query.select.is_empty() {
            return Err(EavError::validation("Invalid query, SELECT is empty"));
        }
        words::validate_table_name(&query.from, "FROM")?;
        if i64::try_from(query.limit).is_err() {
            return Err(EavError::validation(format!(
                "Invalid query, LIMIT is out of range: {}",
                query.limit
            )));
        }
        for column in &query.select {
            words::validate_column_name(column, "SELECT")?;
        }
        for order in &query.order_by {
            if !query.select.contains(&order.field) {
                return Err(EavError::validation(format!(
                    "Invalid query, ORDER BY columns must be present in SELECT column list: {}",
                    order.field
                )));
            }
        }
        for criterion in query.criteria() {
            words::validate_column_name(&criterion.name, "WHERE")?;
            words::validate_operator(&criterion.op, "WHERE")?;
            words::validate_parameter_name(&criterion.param_name, "WHERE")?;
        }
        Ok(())
    }

    pub async fn compile(&self, query: &Select) -> Result<CompiledQuery> {
        Self::precheck(query)?;

        let table = self
            .tables
            .resolve(&query.from, Intent::Lookup, false)
            .await?
            .found();

        // every distinct virtual column, in order of first reference
        let mut referenced: Vec<&str> = Vec::new();
        let columns = query
            .select
            .iter()
            .chain(query.criteria().map(|c| &c.name))
            .chain(query.order_by.iter().map(|o| &o.field));
        for column in columns {
            if !referenced.contains(&column.as_str()) {
                referenced.push(column);
            }
        }

        let mut attributes: HashMap<&str, Arc<Name>> = HashMap::new();
        if let Some(table) = &table {
            for &column in &referenced {
                if words::is_reserved(column) {
                    continue;
                }
                if let Some(name) = self
                    .names
                    .resolve(table.id(), column, Intent::Lookup, false)
                    .await?
                    .found()
                {
                    attributes.insert(column, name);
                }
            }
        }

        let plan = Plan::build(query, table.as_deref(), &referenced, &attributes);
        let sql = plan.render();
        debug!(from = %query.from, sql = %sql, "compiled query");

        let params = query
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect::<Params>();
        Ok(CompiledQuery { sql, params })
    }
}

// Turns a prechecked query plus its resolutions into the SQL AST.
struct Plan;

impl Plan {
    fn build(
        query: &Select,
        table: Option<&Table>,
        referenced: &[&str],
        attributes: &HashMap<&str, Arc<Name>>,
    ) -> SqlSelect {
        let mut out = SqlSelect::default();
        let mut join_aliases = Aliases::default();
        let mut select_aliases = Aliases::default();

        let value_column = match table {
            Some(t) if t.is_numeric() => "numberValue",
            _ => "stringValue",
        };
        if table.is_some() && referenced.iter().any(|c| c.eq_ignore_ascii_case("value")) {
            out.joins.push(Join {
                kind: JoinKind::Inner,
                source: "bvalues",
                alias: join_aliases.claim("bv"),
                on: "bv.id = i.valueid".to_string(),
            });
        }

        let mut attribute_alias: HashMap<&str, String> = HashMap::new();
        for &column in referenced {
            if let Some(name) = attributes.get(column) {
                let alias = join_aliases.claim(&format!("iv{}", words::clean_name(column)));
                out.joins.push(Join {
                    kind: JoinKind::LeftOuter,
                    source: "item_values",
                    on: format!("{alias}.itemid = i.id AND {alias}.nameid = {}", name.id()),
                    alias: alias.clone(),
                });
                attribute_alias.insert(column, alias);
            }
        }

        let column_expr = |column: &str| -> Option<Expr> {
            if let Some(name) = attributes.get(column) {
                let alias = attribute_alias.get(column)?.clone();
                let physical = if name.is_numeric() {
                    "numberValue"
                } else {
                    "stringValue"
                };
                return Some(Expr::Column(alias, physical));
            }
            match column.to_lowercase().as_str() {
                "value" if table.is_some() => Some(Expr::Column("bv".to_string(), value_column)),
                "id" => Some(Expr::Column("i".to_string(), "id")),
                "created" => Some(Expr::Column("i".to_string(), "created")),
                "lastmodified" => Some(Expr::Column("i".to_string(), "lastmodified")),
                _ => None,
            }
        };

        // SELECT
        let mut output_alias: HashMap<&str, String> = HashMap::new();
        for column in &query.select {
            let expr = if column.eq_ignore_ascii_case("count") {
                Expr::CountAll
            } else {
                column_expr(column).unwrap_or(Expr::Null)
            };
            let alias = select_aliases.claim(&words::clean_name(column));
            output_alias.entry(column.as_str()).or_insert_with(|| alias.clone());
            out.projections.push((expr, alias));
        }

        // WHERE
        out.predicates.push(match table {
            Some(t) => Predicate::TableIs(t.id()),
            None => Predicate::Never,
        });
        let mut first_match: Option<String> = None;
        for group in &query.where_ {
            if group.criteria.is_empty() {
                continue;
            }
            let parts = group
                .criteria
                .iter()
                .map(|criterion| {
                    Self::criterion(
                        criterion,
                        table,
                        &attribute_alias,
                        &column_expr,
                        &mut join_aliases,
                        &mut out.joins,
                        &mut first_match,
                    )
                })
                .collect();
            out.predicates.push(Predicate::Group(group.combine, parts));
        }

        // ORDER BY
        for order in &query.order_by {
            if let Some(alias) = output_alias.get(order.field.as_str()) {
                out.order.push(OrderTerm {
                    key: format!("\"{alias}\""),
                    descending: order.descending,
                });
            }
        }
        if query.order_by.is_empty() {
            if let Some(alias) = first_match {
                out.order.push(OrderTerm {
                    key: format!("{alias}.rank"),
                    descending: false,
                });
            }
        }

        out.limit = (query.limit > 0).then_some(query.limit);
        out
    }

    fn criterion(
        criterion: &Criterion,
        table: Option<&Table>,
        attribute_alias: &HashMap<&str, String>,
        column_expr: &dyn Fn(&str) -> Option<Expr>,
        join_aliases: &mut Aliases,
        joins: &mut Vec<Join>,
        first_match: &mut Option<String>,
    ) -> Predicate {
        let column = criterion.name.as_str();
        if criterion.op.eq_ignore_ascii_case("matches") {
            // text search goes through the value's search row, keyed by value id
            let source = if column.eq_ignore_ascii_case("value") {
                match table {
                    Some(t) if !t.is_numeric() => "i".to_string(),
                    _ => return Predicate::Never,
                }
            } else {
                match attribute_alias.get(column) {
                    Some(alias) => alias.clone(),
                    None => return Predicate::Never,
                }
            };
            let alias = join_aliases.claim(&format!("fts{}", words::clean_name(column)));
            joins.push(Join {
                kind: JoinKind::Inner,
                source: "bvalues_fts",
                on: format!("{alias}.rowid = {source}.valueid"),
                alias: alias.clone(),
            });
            first_match.get_or_insert_with(|| alias.clone());
            return Predicate::Match(alias, criterion.param_name.clone());
        }
        match column_expr(column) {
            Some(expr) => Predicate::Compare(expr, criterion.op.clone(), criterion.param_name.clone()),
            None => Predicate::Never,
        }
    }
}
