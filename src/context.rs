use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{Backend, Params, Statements, Transaction};
use crate::compile::Compiler;
use crate::config::Settings;
use crate::error::{EavError, Result};
use crate::items::{Item, Items, Slot};
use crate::keeper::{Caches, Intent, ItemId, Resolution, Table};
use crate::names::Names;
use crate::parse::parse;
use crate::persist::SqliteBackend;
use crate::query::{
    CompiledQuery, Define, GetRequest, GetResponse, Metadata, ResultSet, SchemaResponse, Select,
};
use crate::scalar::Scalar;
use crate::tables::Tables;
use crate::values::Values;
use crate::words;

/// A store session: one backend, one set of dictionary caches.
///
/// Sessions are cheap to clone and share everything they own. Two sessions
/// built with separate [`Caches`] never see each other's cache entries.
#[derive(Clone)]
pub struct Context {
    backend: Arc<dyn Backend>,
    caches: Arc<Caches>,
    tables: Tables,
    names: Names,
    values: Values,
    items: Items,
    compiler: Compiler,
}

impl Context {
    pub async fn open(settings: &Settings) -> Result<Self> {
        let backend = SqliteBackend::open(&settings.database).await?;
        info!(path = ?settings.database.path, "store opened");
        Ok(Self::with_backend(
            Arc::new(backend),
            Arc::new(Caches::new()),
            settings,
        ))
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(&Settings::in_memory()).await
    }

    pub fn with_backend(backend: Arc<dyn Backend>, caches: Arc<Caches>, settings: &Settings) -> Self {
        let retry = settings.retry_policy();
        let tables = Tables::new(Arc::clone(&backend), Arc::clone(&caches), retry);
        let names = Names::new(Arc::clone(&backend), Arc::clone(&caches), retry);
        let values = Values::new(
            Arc::clone(&backend),
            Arc::clone(&caches),
            settings.value_retry_policy(),
        );
        let items = Items::new(Arc::clone(&backend), retry);
        let compiler = Compiler::new(tables.clone(), names.clone());
        Self {
            backend,
            caches,
            tables,
            names,
            values,
            items,
            compiler,
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }
    pub fn caches(&self) -> Arc<Caches> {
        Arc::clone(&self.caches)
    }
    pub fn tables(&self) -> &Tables {
        &self.tables
    }
    pub fn names(&self) -> &Names {
        &self.names
    }
    pub fn values(&self) -> &Values {
        &self.values
    }
    pub fn items(&self) -> &Items {
        &self.items
    }

    /// Takes the store for a transaction scope. Until the scope is dropped,
    /// every other operation on this session waits for it; statements meant
    /// for the transaction run through the scope, and inner scopes come from
    /// [`Transaction::nested`].
    pub async fn begin_transaction(&self) -> Result<Transaction> {
        Transaction::begin(self.backend.as_ref()).await
    }

    // ------------- Upsert -------------
    /// Creates or updates the item of `define.table` keyed by `define.key`.
    ///
    /// Tables, names and values are created as needed. Attribute changes are
    /// collected first and applied together; a type mismatch on any attribute
    /// fails the call before a single slot is written.
    pub async fn define(&self, define: &Define) -> Result<ItemId> {
        define.key.check_storable()?;
        let key_numeric = define.key.is_numeric();
        let table = self
            .tables
            .resolve(&define.table, Intent::Create, key_numeric)
            .await?
            .required(format!("table {}", define.table))?;
        if table.is_numeric() != key_numeric {
            warn!(table = table.name(), "key type does not match table");
            return Err(EavError::TypeMismatch {
                name: table.name().to_string(),
                value: define.key.clone(),
                value_numeric: key_numeric,
                name_numeric: table.is_numeric(),
            });
        }
        let key_id = self
            .values
            .get_id(&define.key, Intent::Create)
            .await?
            .required("key value")?;
        let item_id = self
            .items
            .get_or_create_item(table.id(), key_id, Intent::Create)
            .await?
            .required("item")?;

        let mut slots: Vec<Slot> = Vec::with_capacity(define.metadata.len());
        for (name, value) in &define.metadata {
            let Some(value) = value else {
                // erasing an attribute the table never had is a no-op
                if let Resolution::Found(def) = self
                    .names
                    .resolve(table.id(), name, Intent::Lookup, false)
                    .await?
                {
                    slots.push((def.id(), None));
                }
                continue;
            };
            value.check_storable()?;
            let def = self
                .names
                .resolve(table.id(), name, Intent::Create, value.is_numeric())
                .await?
                .required(format!("name {name}"))?;
            if def.is_numeric() != value.is_numeric() {
                warn!(table = table.name(), name, "value type does not match name");
                return Err(EavError::TypeMismatch {
                    name: name.clone(),
                    value: value.clone(),
                    value_numeric: value.is_numeric(),
                    name_numeric: def.is_numeric(),
                });
            }
            let value_id = self
                .values
                .get_id(value, Intent::Create)
                .await?
                .required("attribute value")?;
            slots.push((def.id(), Some(value_id)));
        }

        self.items.set_attributes(item_id, &slots).await?;
        debug!(table = table.name(), item = item_id, "defined");
        Ok(item_id)
    }

    // ------------- Querying -------------
    pub async fn generate_sql(&self, query: &Select) -> Result<CompiledQuery> {
        self.compiler.compile(query).await
    }

    pub async fn exec_select(&self, query: &Select) -> Result<ResultSet> {
        let compiled = self.compiler.compile(query).await?;
        let rows = self.backend.query(&compiled.sql, &compiled.params).await?;
        let columns = rows.columns().to_vec();
        let rows: Vec<Vec<Option<Scalar>>> = rows
            .map(|row| row.into_cells().iter().map(Scalar::from_cell).collect::<Vec<_>>())
            .collect();
        Ok(ResultSet { columns, rows })
    }

    /// First column of the first row.
    pub async fn exec_scalar(&self, query: &Select) -> Result<Option<Scalar>> {
        let results = self.exec_select(query).await?;
        Ok(results
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten()))
    }

    pub async fn exec_scalar_i64(&self, query: &Select) -> Result<Option<i64>> {
        match self.exec_scalar(query).await? {
            None => Ok(None),
            Some(Scalar::Number(n)) if n.fract() == 0.0 => Ok(Some(n as i64)),
            Some(other) => Err(EavError::validation(format!(
                "Query result is not an integer: {other}"
            ))),
        }
    }

    /// The first column of every row.
    pub async fn exec_list(&self, query: &Select) -> Result<Vec<Option<Scalar>>> {
        let results = self.exec_select(query).await?;
        Ok(results
            .rows
            .into_iter()
            .map(|row| row.into_iter().next().flatten())
            .collect())
    }

    /// The first two columns of every row as pairs, in row order.
    pub async fn exec_dict(&self, query: &Select) -> Result<Vec<(Option<Scalar>, Option<Scalar>)>> {
        let results = self.exec_select(query).await?;
        if results.columns.len() < 2 {
            return Err(EavError::validation(
                "Dictionary queries need at least two columns",
            ));
        }
        Ok(results
            .rows
            .into_iter()
            .map(|row| {
                let mut cells = row.into_iter();
                let key = cells.next().flatten();
                let value = cells.next().flatten();
                (key, value)
            })
            .collect())
    }

    pub async fn get_row_id(&self, table: &str, key: impl Into<Scalar>) -> Result<Option<i64>> {
        words::validate_table_name(table, "get_row_id")?;
        let mut select = parse(&format!("SELECT id FROM {table} WHERE value = @value"))?;
        select.add_param("@value", key);
        self.exec_scalar_i64(&select).await
    }

    pub async fn get_row_value(&self, table: &str, id: i64) -> Result<Option<Scalar>> {
        words::validate_table_name(table, "get_row_value")?;
        let mut select = parse(&format!("SELECT value FROM {table} WHERE id = @id"))?;
        select.add_param("@id", id);
        self.exec_scalar(&select).await
    }

    // ------------- Reading items -------------
    /// The attributes of the item keyed by each requested value, `None` for
    /// keys without an item. The table must exist.
    pub async fn get(&self, request: &GetRequest) -> Result<GetResponse> {
        let table = self
            .tables
            .resolve(&request.table, Intent::Lookup, false)
            .await?
            .required(format!("table {}", request.table))?;
        let mut response = GetResponse::default();
        for key in &request.values {
            let item = self.item_of(&table, key).await?;
            let metadata = match item {
                Some(item_id) => Some(self.metadata_of(item_id).await?),
                None => None,
            };
            response.metadata.push(metadata);
        }
        Ok(response)
    }

    /// Runs `query` for its items and returns their attributes, each map
    /// carrying the item's `id` and `value` as well.
    pub async fn query_get(&self, mut query: Select) -> Result<GetResponse> {
        let mut columns = vec!["id".to_string(), "value".to_string()];
        for order in &query.order_by {
            if !columns.contains(&order.field) {
                columns.push(order.field.clone());
            }
        }
        query.select = columns;
        let results = self.exec_select(&query).await?;
        let mut response = GetResponse::default();
        for row in results.rows {
            let mut cells = row.into_iter();
            let (Some(Some(Scalar::Number(id))), Some(Some(value))) = (cells.next(), cells.next())
            else {
                continue;
            };
            let item_id = id as ItemId;
            let mut metadata = self.metadata_of(item_id).await?;
            metadata.insert("id".to_string(), Scalar::Number(id));
            metadata.insert("value".to_string(), value);
            response.metadata.push(Some(metadata));
        }
        Ok(response)
    }

    async fn item_of(&self, table: &Table, key: &Scalar) -> Result<Option<ItemId>> {
        let Some(value_id) = self.values.get_id(key, Intent::Lookup).await?.found() else {
            return Ok(None);
        };
        Ok(self
            .items
            .get_or_create_item(table.id(), value_id, Intent::Lookup)
            .await?
            .found())
    }

    async fn metadata_of(&self, item_id: ItemId) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        for (name_id, value_id) in self.items.get_attributes(item_id).await? {
            let name = self
                .names
                .get_name(name_id)
                .await?
                .required(format!("name {name_id}"))?;
            let value = self
                .values
                .get_value(value_id)
                .await?
                .required(format!("value {value_id}"))?;
            metadata.insert(name.name().to_string(), value);
        }
        Ok(metadata)
    }

    pub async fn get_item(&self, item_id: ItemId) -> Result<Option<Item>> {
        self.items.get_item(item_id).await
    }

    /// A one-line description of an item: table, key and attributes.
    pub async fn summarize(&self, item_id: ItemId) -> Result<String> {
        let item = self
            .items
            .get_item(item_id)
            .await?
            .ok_or_else(|| EavError::NotFound(format!("item {item_id}")))?;
        let table = self
            .tables
            .get_table(item.table_id)
            .await?
            .required(format!("table {}", item.table_id))?;
        let key = self
            .values
            .get_value(item.value_id)
            .await?
            .required(format!("value {}", item.value_id))?;
        let attributes = self
            .metadata_of(item_id)
            .await?
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("{}[{key}] {{{attributes}}}", table.name()))
    }

    // ------------- Removing -------------
    /// Deletes the items keyed by `keys`. Unknown tables and keys are ignored.
    pub async fn delete(&self, table: &str, keys: &[Scalar]) -> Result<()> {
        let Some(table) = self
            .tables
            .resolve(table, Intent::Lookup, false)
            .await?
            .found()
        else {
            return Ok(());
        };
        let mut doomed = Vec::new();
        for key in keys {
            if let Some(item_id) = self.item_of(&table, key).await? {
                doomed.push(item_id);
            }
        }
        self.items.delete_items(&doomed).await?;
        debug!(table = table.name(), deleted = doomed.len(), "deleted items");
        Ok(())
    }

    /// Removes a table with all its attributes and items.
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        self.caches.clear()?;
        let Some(found) = self
            .tables
            .resolve(table, Intent::Lookup, false)
            .await?
            .found()
        else {
            return Ok(());
        };
        let dropped = async {
            self.names.purge_table(found.id()).await?;
            self.items.purge_table(found.id()).await?;
            self.tables.delete(found.id()).await
        }
        .await;
        self.caches.clear()?;
        dropped?;
        info!(table, "dropped table");
        Ok(())
    }

    /// Wipes all items; with `include_dictionaries` also every table, name
    /// and value.
    pub async fn reset(&self, include_dictionaries: bool) -> Result<()> {
        let wiped = async {
            self.items.reset().await?;
            if include_dictionaries {
                self.values.reset().await?;
                self.names.reset().await?;
                self.tables.reset().await?;
            }
            Ok::<(), EavError>(())
        }
        .await;
        self.caches.clear()?;
        wiped?;
        info!(include_dictionaries, "store reset");
        Ok(())
    }

    // ------------- Schema -------------
    /// Table name to attribute names, for one table or all of them.
    pub async fn schema(&self, table: Option<&str>) -> Result<SchemaResponse> {
        let mut sql = String::from(
            "SELECT t.name AS tablename, n.name AS colname \
             FROM tables t JOIN names n ON n.tableid = t.id",
        );
        let mut params = Params::new();
        if let Some(table) = table {
            sql.push_str(" WHERE t.name = @name");
            params.set("@name", table.to_string());
        }
        sql.push_str(" ORDER BY tablename, colname");
        let mut response = SchemaResponse::default();
        for row in self.backend.query(&sql, &params).await? {
            response
                .tables
                .entry(row.get_text(0)?.to_string())
                .or_default()
                .push(row.get_text(1)?.to_string());
        }
        Ok(response)
    }

    /// Creates a table up front. Defining an item creates its table anyway.
    pub async fn create_table(&self, name: &str, is_numeric: bool) -> Result<()> {
        self.tables
            .resolve(name, Intent::Create, is_numeric)
            .await?
            .required(format!("table {name}"))?;
        Ok(())
    }
}
