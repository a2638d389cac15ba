use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Params, Statements};
use crate::error::Result;
use crate::keeper::{Caches, Intent, Name, NameId, Resolution, TableId};
use crate::retry::RetryPolicy;
use crate::words;

/// The attribute dictionary, keyed by (table, name).
#[derive(Clone)]
pub struct Names {
    backend: Arc<dyn Backend>,
    caches: Arc<Caches>,
    retry: RetryPolicy,
}

impl Names {
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<Caches>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            caches,
            retry,
        }
    }

    /// Resolves an attribute of `table_id`. `is_numeric` only matters when
    /// the attribute gets created; callers compare it against the returned
    /// definition to detect type mismatches.
    pub async fn resolve(
        &self,
        table_id: TableId,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<Arc<Name>>> {
        words::validate_dictionary_name("Column", name)?;
        if let Some(kept) = self.caches.names()?.get(table_id, name) {
            return Ok(Resolution::Found(kept));
        }
        self.retry
            .run("Names.get_id", || {
                self.select_or_insert(table_id, name, intent, is_numeric)
            })
            .await
    }

    pub async fn get_id(
        &self,
        table_id: TableId,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<NameId>> {
        Ok(self
            .resolve(table_id, name, intent, is_numeric)
            .await?
            .map(|n| n.id()))
    }

    async fn select_or_insert(
        &self,
        table_id: TableId,
        name: &str,
        intent: Intent,
        is_numeric: bool,
    ) -> Result<Resolution<Arc<Name>>> {
        let params = Params::new()
            .bind("@tableid", table_id)
            .bind("@name", name.to_string());
        let mut rows = self
            .backend
            .query(
                "SELECT id, isNumeric FROM names WHERE tableid = @tableid AND name = @name",
                &params,
            )
            .await?;
        if let Some(row) = rows.next_row() {
            let kept = Name::new(row.get_i64(0)?, table_id, name.to_string(), row.get_bool(1)?);
            return Ok(Resolution::Found(self.caches.names()?.keep(kept)));
        }
        if intent == Intent::Lookup {
            return Ok(Resolution::NotFound);
        }
        let params = params.bind("@isNumeric", is_numeric);
        let id = self
            .backend
            .insert(
                "INSERT INTO names (tableid, name, isNumeric) VALUES (@tableid, @name, @isNumeric)",
                &params,
            )
            .await?;
        debug!(table = table_id, name, id, is_numeric, "created name");
        let kept = Name::new(id, table_id, name.to_string(), is_numeric);
        Ok(Resolution::Found(self.caches.names()?.keep(kept)))
    }

    pub async fn get_name(&self, id: NameId) -> Result<Resolution<Arc<Name>>> {
        if let Some(kept) = self.caches.names()?.lookup(id) {
            return Ok(Resolution::Found(kept));
        }
        let params = Params::new().bind("@id", id);
        let mut rows = self
            .backend
            .query(
                "SELECT tableid, name, isNumeric FROM names WHERE id = @id",
                &params,
            )
            .await?;
        match rows.next_row() {
            Some(row) => {
                let kept = Name::new(
                    id,
                    row.get_i64(0)?,
                    row.get_text(1)?.to_string(),
                    row.get_bool(2)?,
                );
                Ok(Resolution::Found(self.caches.names()?.keep(kept)))
            }
            None => Ok(Resolution::NotFound),
        }
    }

    /// Attribute names of one table, in name order.
    pub async fn list(&self, table_id: TableId) -> Result<Vec<String>> {
        let params = Params::new().bind("@tableid", table_id);
        let rows = self
            .backend
            .query(
                "SELECT name FROM names WHERE tableid = @tableid ORDER BY name",
                &params,
            )
            .await?;
        rows.map(|row| -> Result<String> { Ok(row.get_text(0)?.to_string()) })
            .collect()
    }

    /// Removes every attribute of a table along with the edges that use them.
    pub async fn purge_table(&self, table_id: TableId) -> Result<()> {
        let params = Params::new().bind("@tableid", table_id);
        self.backend
            .execute(
                "DELETE FROM item_attributes WHERE nameid IN \
                 (SELECT id FROM names WHERE tableid = @tableid)",
                &params,
            )
            .await?;
        self.backend
            .execute("DELETE FROM names WHERE tableid = @tableid", &params)
            .await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.backend
            .execute("DELETE FROM names", &Params::new())
            .await?;
        Ok(())
    }
}
