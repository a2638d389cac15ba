//! Request and response shapes: the structured query a statement parses
//! into, the upsert request, and what comes back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::Params;
use crate::scalar::Scalar;

// ------------- Select -------------
/// `<name> <op> <param_name>`, e.g. `monkey = @something`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub op: String,
    pub param_name: String,
}

impl Criterion {
    pub fn new(name: impl Into<String>, op: impl Into<String>, param_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            param_name: param_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Combine {
    #[default]
    And,
    Or,
}

impl Combine {
    pub fn keyword(&self) -> &'static str {
        match self {
            Combine::And => "AND",
            Combine::Or => "OR",
        }
    }
}

/// A group of criteria joined by one combine mode. Groups are AND-ed together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CriteriaSet {
    pub combine: Combine,
    pub criteria: Vec<Criterion>,
}

impl CriteriaSet {
    pub fn new(combine: Combine) -> Self {
        Self {
            combine,
            criteria: Vec::new(),
        }
    }
    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// A structured query, parsed from text or built by hand.
///
/// `limit` of zero means no limit. Parameter names keep their `@` prefix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Select {
    pub select: Vec<String>,
    pub from: String,
    #[serde(rename = "where")]
    pub where_: Vec<CriteriaSet>,
    pub order_by: Vec<Order>,
    pub limit: u64,
    pub params: BTreeMap<String, Scalar>,
}

impl Select {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.select.push(name.into());
        self
    }
    /// Adds a criterion to the last group, opening an AND group if there is none.
    pub fn filter(mut self, criterion: Criterion) -> Self {
        match self.where_.last_mut() {
            Some(group) => group.criteria.push(criterion),
            None => self.where_.push(CriteriaSet::new(Combine::And).with(criterion)),
        }
        self
    }
    pub fn group(mut self, group: CriteriaSet) -> Self {
        self.where_.push(group);
        self
    }
    pub fn add_order(&mut self, field: impl Into<String>, descending: bool) {
        self.order_by.push(Order {
            field: field.into(),
            descending,
        });
    }
    pub fn order(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.add_order(field, descending);
        self
    }
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }
    /// Sets a parameter value; the `@` is added when missing.
    pub fn add_param(&mut self, name: &str, value: impl Into<Scalar>) {
        let name = if name.starts_with('@') {
            name.to_string()
        } else {
            format!("@{name}")
        };
        self.params.insert(name, value.into());
    }
    pub fn param(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.add_param(name, value);
        self
    }
    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.where_.iter().flat_map(|group| group.criteria.iter())
    }
}

// ------------- Define -------------
/// Upsert request: the item of `table` keyed by `key`, and attribute changes
/// in the order they should be applied. `None` erases an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Define {
    pub table: String,
    pub key: Scalar,
    pub metadata: Vec<(String, Option<Scalar>)>,
}

impl Define {
    pub fn new(table: impl Into<String>, key: impl Into<Scalar>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            metadata: Vec::new(),
        }
    }
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.metadata.push((name.into(), Some(value.into())));
        self
    }
    pub fn erase(mut self, name: impl Into<String>) -> Self {
        self.metadata.push((name.into(), None));
        self
    }
}

// ------------- Get -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub table: String,
    pub values: Vec<Scalar>,
}

/// Attribute name to value, for one item.
pub type Metadata = BTreeMap<String, Scalar>;

/// One entry per requested key (or matched item); `None` when the item does not exist.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetResponse {
    pub metadata: Vec<Option<Metadata>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub tables: BTreeMap<String, Vec<String>>,
}

// ------------- Results -------------
/// Rows of an executed select, NULL cells as `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Scalar>>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Vec<Option<Scalar>>> {
        self.rows.iter()
    }
}

/// Physical SQL plus the bindings it expects.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Params,
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}
