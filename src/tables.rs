use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Params, Statements};
use crate::error::Result;
use crate::keeper::{Caches, Intent, Resolution, Table, TableId};
use crate::retry::RetryPolicy;
use crate::words;

/// The table dictionary.
#[derive(Clone)]
pub struct Tables {
    backend: Arc<dyn Backend>,
    caches: Arc<Caches>,
    retry: RetryPolicy,
}

impl Tables {
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<Caches>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            caches,
            retry,
        }
    }

    /// Resolves a table by name, creating it with `is_numeric` keys when
    /// `intent` allows and it does not exist yet. An existing table keeps
    /// whatever key type it was created with.
    pub async fn resolve(
        &self,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<Arc<Table>>> {
        words::validate_dictionary_name("Table", name)?;
        if let Some(kept) = self.caches.tables()?.get(name) {
            return Ok(Resolution::Found(kept));
        }
        self.retry
            .run("Tables.get_id", || self.select_or_insert(name, intent, is_numeric))
            .await
    }

    pub async fn get_id(
        &self,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<TableId>> {
        Ok(self.resolve(name, intent, is_numeric).await?.map(|t| t.id()))
    }

    async fn select_or_insert(
        &self,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<Arc<Table>>> {
        let params = Params::new().bind("@name", name.to_string());
        let mut rows = self
            .backend
            .query("SELECT id, isNumeric FROM tables WHERE name = @name", &params)
            .await?;
        if let Some(row) = rows.next_row() {
            let table = Table::new(row.get_i64(0)?, name.to_string(), row.get_bool(1)?);
            return Ok(Resolution::Found(self.caches.tables()?.keep(table)));
        }
        if intent == Intent::Lookup {
            return Ok(Resolution::NotFound);
        }
        let params = params.bind("@isNumeric", is_numeric);
        let id = self
            .backend
            .insert(
                "INSERT INTO tables (name, isNumeric) VALUES (@name, @isNumeric)",
                &params,
            )
            .await?;
        debug!(table = name, id, is_numeric, "created table");
        let table = Table::new(id, name.to_string(), is_numeric);
        Ok(Resolution::Found(self.caches.tables()?.keep(table)))
    }

    /// Looks a table up by id.
    pub async fn get_table(&self, id: TableId) -> Result<Resolution<Arc<Table>>> {
        if let Some(kept) = self.caches.tables()?.lookup(id) {
            return Ok(Resolution::Found(kept));
        }
        let params = Params::new().bind("@id", id);
        let mut rows = self
            .backend
            .query("SELECT name, isNumeric FROM tables WHERE id = @id", &params)
            .await?;
        match rows.next_row() {
            Some(row) => {
                let table = Table::new(id, row.get_text(0)?.to_string(), row.get_bool(1)?);
                Ok(Resolution::Found(self.caches.tables()?.keep(table)))
            }
            None => Ok(Resolution::NotFound),
        }
    }

    /// All table names, in name order.
    pub async fn list(&self) -> Result<Vec<String>> {
        let rows = self
            .backend
            .query("SELECT name FROM tables ORDER BY name", &Params::new())
            .await?;
        rows.map(|row| -> Result<String> { Ok(row.get_text(0)?.to_string()) })
            .collect()
    }

    /// Removes the table row itself. Callers purge its names and items first.
    pub async fn delete(&self, id: TableId) -> Result<()> {
        let params = Params::new().bind("@id", id);
        self.backend
            .execute("DELETE FROM tables WHERE id = @id", &params)
            .await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.backend
            .execute("DELETE FROM tables", &Params::new())
            .await?;
        Ok(())
    }
}
