//! The backing-store contract.
//!
//! The dictionaries, the item store and the compiler only ever talk to a
//! [`Backend`]: run a statement with named parameters, get an insert id, a
//! scalar or a fully read row set, and drive one transaction primitive
//! through the nested [`Transaction`] scope.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
pub use rusqlite::types::Value as Cell;
use tracing::{debug, warn};

use crate::error::{EavError, Result};
use crate::scalar::Scalar;

/// Named statement parameters, in binding order. Names carry their `@` prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, Cell)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds (or replaces) a parameter.
    pub fn bind(mut self, name: &str, value: impl Into<Cell>) -> Self {
        self.set(name, value);
        self
    }
    pub fn set(&mut self, name: &str, value: impl Into<Cell>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, Scalar)> for Params {
    fn from_iter<I: IntoIterator<Item = (&'a str, Scalar)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.set(name, value);
        }
        params
    }
}

/// One row of a [`RowSet`], with typed column access.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Cell>);

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn cell(&self, idx: usize) -> Result<&Cell> {
        self.0
            .get(idx)
            .ok_or_else(|| EavError::Persistence(format!("column index out of range: {idx}")))
    }
    pub fn is_null(&self, idx: usize) -> Result<bool> {
        Ok(matches!(self.cell(idx)?, Cell::Null))
    }
    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        match self.cell(idx)? {
            Cell::Integer(i) => Ok(*i),
            Cell::Real(r) if r.fract() == 0.0 => Ok(*r as i64),
            other => Err(EavError::Persistence(format!(
                "column {idx} is not an integer: {other:?}"
            ))),
        }
    }
    pub fn get_f64(&self, idx: usize) -> Result<f64> {
        match self.cell(idx)? {
            Cell::Integer(i) => Ok(*i as f64),
            Cell::Real(r) => Ok(*r),
            other => Err(EavError::Persistence(format!(
                "column {idx} is not a number: {other:?}"
            ))),
        }
    }
    pub fn get_bool(&self, idx: usize) -> Result<bool> {
        Ok(self.get_i64(idx)? != 0)
    }
    pub fn get_text(&self, idx: usize) -> Result<&str> {
        match self.cell(idx)? {
            Cell::Text(s) => Ok(s),
            other => Err(EavError::Persistence(format!(
                "column {idx} is not text: {other:?}"
            ))),
        }
    }
    pub fn get_scalar(&self, idx: usize) -> Result<Option<Scalar>> {
        Ok(Scalar::from_cell(self.cell(idx)?))
    }
    pub fn into_cells(self) -> Vec<Cell> {
        self.0
    }
}

/// A fully read statement result, consumed front to back.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: std::collections::VecDeque<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// Advances the cursor.
    pub fn next_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }
}

impl Iterator for RowSet {
    type Item = Row;
    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }
}

/// Running statements with named parameters.
#[async_trait]
pub trait Statements: Send + Sync {
    /// Runs a non-query statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &Params) -> Result<usize>;
    /// Runs an insert, returning the id of the new row.
    async fn insert(&self, sql: &str, params: &Params) -> Result<i64>;
    /// First column of the first row, `None` when there are no rows or it is NULL.
    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<Cell>>;
    async fn query(&self, sql: &str, params: &Params) -> Result<RowSet>;
}

/// The store as shared by every caller of a session.
///
/// Statements run directly on the backend wait while any [`Transaction`] is
/// alive, so they never end up inside another caller's transaction.
#[async_trait]
pub trait Backend: Statements {
    /// Waits for exclusive use of the store and opens its transaction.
    async fn begin(&self) -> Result<Box<dyn Held>>;
    fn in_transaction(&self) -> bool;

    /// Engine-specific "insert unless the row exists" statement prefix.
    fn insert_ignore(&self) -> &'static str;
    /// Engine-specific expression for the current UTC timestamp.
    fn utc_timestamp(&self) -> &'static str;
}

/// Exclusive use of the store with its transaction open. Dropping it lets
/// the other callers through again.
#[async_trait]
pub trait Held: Statements {
    async fn commit(&self) -> Result<()>;
    /// Rolls back whatever was not committed. Called from scope guards, so it
    /// cannot be async.
    fn release(&self);
}

struct Scope {
    held: Box<dyn Held>,
    depth: AtomicUsize,
}

/// Nested transaction scope over the backend's single transaction primitive.
///
/// [`Transaction::begin`] takes the store for itself; [`Transaction::nested`]
/// opens an inner scope on the same hold and bumps the depth. `commit` is
/// honored only at depth 1. Dropping a scope lowers the depth and releases
/// the transaction when it returns to 0, so an uncommitted outermost scope
/// rolls back on every exit path.
///
/// Statements meant for the transaction go through the scope itself (it
/// implements [`Statements`]). Running them on the backend from the task
/// that holds the scope waits for the scope to end, which it never will.
pub struct Transaction {
    scope: Arc<Scope>,
}

impl Transaction {
    pub async fn begin(backend: &dyn Backend) -> Result<Transaction> {
        let held = backend.begin().await?;
        debug!("transaction begun");
        Ok(Transaction {
            scope: Arc::new(Scope {
                held,
                depth: AtomicUsize::new(1),
            }),
        })
    }

    pub fn nested(&self) -> Transaction {
        self.scope.depth.fetch_add(1, Ordering::SeqCst);
        Transaction {
            scope: Arc::clone(&self.scope),
        }
    }

    pub fn depth(&self) -> usize {
        self.scope.depth.load(Ordering::SeqCst)
    }

    pub async fn commit(&self) -> Result<()> {
        match self.depth() {
            0 => Err(EavError::Invariant(
                "Invalid transaction count (commit): 0".to_string(),
            )),
            1 => {
                debug!("committing transaction");
                self.scope.held.commit().await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Statements for Transaction {
    async fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        self.scope.held.execute(sql, params).await
    }
    async fn insert(&self, sql: &str, params: &Params) -> Result<i64> {
        self.scope.held.insert(sql, params).await
    }
    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<Cell>> {
        self.scope.held.scalar(sql, params).await
    }
    async fn query(&self, sql: &str, params: &Params) -> Result<RowSet> {
        self.scope.held.query(sql, params).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let previous = self
            .scope
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .unwrap_or(0);
        match previous {
            0 => warn!("transaction scope dropped with a zero count"),
            1 => self.scope.held.release(),
            _ => (),
        }
    }
}
