use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, MutexGuard};

// used to keep the one-to-one mapping between values and their assigned identities
use bimap::BiMap;
use seahash::SeaHasher;
use tracing::debug;

use crate::error::{EavError, Result};
use crate::scalar::Scalar;

pub type TableId = i64;
pub type NameId = i64;
pub type ValueId = i64;
pub type ItemId = i64;

pub type KeeperHasher = BuildHasherDefault<SeaHasher>;

// ------------- Resolution -------------
/// Outcome of a dictionary or item lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
}

impl<T> Resolution<T> {
    /// Strict handling: absence becomes a [`EavError::NotFound`] naming `what`.
    pub fn required(self, what: impl AsRef<str>) -> Result<T> {
        match self {
            Resolution::Found(found) => Ok(found),
            Resolution::NotFound => Err(EavError::NotFound(what.as_ref().to_string())),
        }
    }
    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(found) => Some(found),
            Resolution::NotFound => None,
        }
    }
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Resolution::Found(found) => Resolution::Found(f(found)),
            Resolution::NotFound => Resolution::NotFound,
        }
    }
}

/// Whether a get-or-create call may create the missing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Create,
    Lookup,
}

// ------------- Table -------------
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Table {
    id: TableId,
    name: String,
    is_numeric: bool,
}

impl Table {
    pub fn new(id: TableId, name: String, is_numeric: bool) -> Self {
        Self {
            id,
            name,
            is_numeric,
        }
    }
    // getters only, a kept table never changes
    pub fn id(&self) -> TableId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_numeric(&self) -> bool {
        self.is_numeric
    }
}

#[derive(Debug, Default)]
pub struct TableKeeper {
    kept: HashMap<String, Arc<Table>, KeeperHasher>,
    lookup: HashMap<TableId, Arc<Table>, KeeperHasher>,
}

impl TableKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    /// Keeps the table unless one with the same name already is, returning
    /// the kept one.
    pub fn keep(&mut self, table: Table) -> Arc<Table> {
        let kept = Arc::clone(
            self.kept
                .entry(table.name.clone())
                .or_insert_with(|| Arc::new(table)),
        );
        self.lookup.insert(kept.id, Arc::clone(&kept));
        kept
    }
    pub fn get(&self, name: &str) -> Option<Arc<Table>> {
        self.kept.get(name).cloned()
    }
    pub fn lookup(&self, id: TableId) -> Option<Arc<Table>> {
        self.lookup.get(&id).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn clear(&mut self) {
        self.kept.clear();
        self.lookup.clear();
    }
}

// ------------- Name -------------
/// An attribute definition, scoped to one table.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Name {
    id: NameId,
    table_id: TableId,
    name: String,
    is_numeric: bool,
}

impl Name {
    pub fn new(id: NameId, table_id: TableId, name: String, is_numeric: bool) -> Self {
        Self {
            id,
            table_id,
            name,
            is_numeric,
        }
    }
    pub fn id(&self) -> NameId {
        self.id
    }
    pub fn table_id(&self) -> TableId {
        self.table_id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_numeric(&self) -> bool {
        self.is_numeric
    }
}

#[derive(Debug, Default)]
pub struct NameKeeper {
    kept: HashMap<(TableId, String), Arc<Name>, KeeperHasher>,
    lookup: HashMap<NameId, Arc<Name>, KeeperHasher>,
}

impl NameKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn keep(&mut self, name: Name) -> Arc<Name> {
        let kept = Arc::clone(
            self.kept
                .entry((name.table_id, name.name.clone()))
                .or_insert_with(|| Arc::new(name)),
        );
        self.lookup.insert(kept.id, Arc::clone(&kept));
        kept
    }
    pub fn get(&self, table_id: TableId, name: &str) -> Option<Arc<Name>> {
        self.kept.get(&(table_id, name.to_string())).cloned()
    }
    pub fn lookup(&self, id: NameId) -> Option<Arc<Name>> {
        self.lookup.get(&id).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn clear(&mut self) {
        self.kept.clear();
        self.lookup.clear();
    }
}

// ------------- Value -------------
#[derive(Debug, Default)]
pub struct ValueKeeper {
    kept: BiMap<Scalar, ValueId>,
}

impl ValueKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn keep(&mut self, value: Scalar, id: ValueId) {
        self.kept.insert(value, id);
    }
    pub fn get(&self, value: &Scalar) -> Option<ValueId> {
        self.kept.get_by_left(value).copied()
    }
    pub fn lookup(&self, id: ValueId) -> Option<Scalar> {
        self.kept.get_by_right(&id).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn clear(&mut self) {
        self.kept.clear();
    }
}

// ------------- Caches -------------
/// The dictionary caches of one store session.
///
/// Each keeper is locked on its own; no operation needs two of them at once.
/// A cache entry is only ever written after the row it mirrors is known to
/// exist in the store.
#[derive(Debug, Default)]
pub struct Caches {
    tables: Mutex<TableKeeper>,
    names: Mutex<NameKeeper>,
    values: Mutex<ValueKeeper>,
}

fn locked<'a, T>(keeper: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    keeper
        .lock()
        .map_err(|e| EavError::Lock(format!("{what} keeper: {e}")))
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn tables(&self) -> Result<MutexGuard<'_, TableKeeper>> {
        locked(&self.tables, "table")
    }
    pub fn names(&self) -> Result<MutexGuard<'_, NameKeeper>> {
        locked(&self.names, "name")
    }
    pub fn values(&self) -> Result<MutexGuard<'_, ValueKeeper>> {
        locked(&self.values, "value")
    }
    /// Forgets everything. Ids may be reused by the store afterwards.
    pub fn clear(&self) -> Result<()> {
        self.tables()?.clear();
        self.names()?.clear();
        self.values()?.clear();
        debug!("dictionary caches cleared");
        Ok(())
    }
}
