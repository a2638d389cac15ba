use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::backend::{Backend, Params, Statements, Transaction};
use crate::error::{EavError, Result};
use crate::keeper::{Intent, ItemId, NameId, Resolution, TableId, ValueId};
use crate::retry::RetryPolicy;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An EAV "row": the item of one table keyed by one primary value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub table_id: TableId,
    pub value_id: ValueId,
    pub created: NaiveDateTime,
    pub lastmodified: NaiveDateTime,
}

/// An attribute slot change: `None` erases the slot.
pub type Slot = (NameId, Option<ValueId>);

/// The item store: items plus their attribute edges.
#[derive(Clone)]
pub struct Items {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
}

impl Items {
    pub fn new(backend: Arc<dyn Backend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub async fn get_or_create_item(
        &self,
        table_id: TableId,
        value_id: ValueId,
        intent: Intent,
    ) -> Result<Resolution<ItemId>> {
        self.retry
            .run("Items.get_or_create_item", || {
                self.select_or_insert(table_id, value_id, intent)
            })
            .await
    }

    async fn select_or_insert(
        &self,
        table_id: TableId,
        value_id: ValueId,
        intent: Intent,
    ) -> Result<Resolution<ItemId>> {
        let params = Params::new()
            .bind("@tableid", table_id)
            .bind("@valueid", value_id);
        let mut rows = self
            .backend
            .query(
                "SELECT id FROM items WHERE tableid = @tableid AND valueid = @valueid",
                &params,
            )
            .await?;
        if let Some(row) = rows.next_row() {
            return Ok(Resolution::Found(row.get_i64(0)?));
        }
        if intent == Intent::Lookup {
            return Ok(Resolution::NotFound);
        }
        let now = self.backend.utc_timestamp();
        let sql = format!(
            "INSERT INTO items (tableid, valueid, created, lastmodified) \
             VALUES (@tableid, @valueid, {now}, {now})"
        );
        let id = self.backend.insert(&sql, &params).await?;
        debug!(item = id, table = table_id, "created item");
        Ok(Resolution::Found(id))
    }

    pub async fn get_item(&self, item_id: ItemId) -> Result<Option<Item>> {
        let params = Params::new().bind("@id", item_id);
        let mut rows = self
            .backend
            .query(
                "SELECT tableid, valueid, created, lastmodified FROM items WHERE id = @id",
                &params,
            )
            .await?;
        let Some(row) = rows.next_row() else {
            return Ok(None);
        };
        Ok(Some(Item {
            id: item_id,
            table_id: row.get_i64(0)?,
            value_id: row.get_i64(1)?,
            created: parse_timestamp(row.get_text(2)?)?,
            lastmodified: parse_timestamp(row.get_text(3)?)?,
        }))
    }

    /// The attribute slots of an item, by name id.
    pub async fn get_attributes(&self, item_id: ItemId) -> Result<BTreeMap<NameId, ValueId>> {
        let params = Params::new().bind("@itemid", item_id);
        let rows = self
            .backend
            .query(
                "SELECT nameid, valueid FROM item_attributes WHERE itemid = @itemid",
                &params,
            )
            .await?;
        rows.map(|row| -> Result<(NameId, ValueId)> { Ok((row.get_i64(0)?, row.get_i64(1)?)) })
            .collect()
    }

    /// Applies slot changes in the given order, bumping the item's
    /// lastmodified once. Everything lands in one transaction scope, and no
    /// other caller's statement runs while it is open.
    pub async fn set_attributes(&self, item_id: ItemId, slots: &[Slot]) -> Result<()> {
        let scope = Transaction::begin(self.backend.as_ref()).await?;
        let params = Params::new().bind("@itemid", item_id);
        let sql = format!(
            "UPDATE items SET lastmodified = {} WHERE id = @itemid",
            self.backend.utc_timestamp()
        );
        if scope.execute(&sql, &params).await? == 0 {
            return Err(EavError::NotFound(format!("item {item_id}")));
        }
        let insert = format!(
            "{} item_attributes (itemid, nameid, valueid) VALUES (@itemid, @nameid, @valueid)",
            self.backend.insert_ignore()
        );
        for (name_id, value_id) in slots {
            let params = params.clone().bind("@nameid", *name_id);
            scope
                .execute(
                    "DELETE FROM item_attributes WHERE itemid = @itemid AND nameid = @nameid",
                    &params,
                )
                .await?;
            if let Some(value_id) = value_id {
                let params = params.bind("@valueid", *value_id);
                scope.execute(&insert, &params).await?;
            }
        }
        scope.commit().await?;
        debug!(item = item_id, slots = slots.len(), "attributes set");
        Ok(())
    }

    /// Removes the item row. Its attribute edges stay behind until the table
    /// is dropped or the store reset.
    pub async fn delete_item(&self, item_id: ItemId) -> Result<bool> {
        Ok(self.delete_items(&[item_id]).await? > 0)
    }

    /// Removes a batch of item rows in one transaction scope, returning how
    /// many existed.
    pub async fn delete_items(&self, item_ids: &[ItemId]) -> Result<usize> {
        let scope = Transaction::begin(self.backend.as_ref()).await?;
        let mut deleted = 0;
        for item_id in item_ids {
            let params = Params::new().bind("@id", *item_id);
            deleted += scope
                .execute("DELETE FROM items WHERE id = @id", &params)
                .await?;
        }
        scope.commit().await?;
        debug!(requested = item_ids.len(), deleted, "deleted items");
        Ok(deleted)
    }

    /// Deletes every item of a table together with all attribute edges whose
    /// item no longer exists.
    pub async fn purge_table(&self, table_id: TableId) -> Result<()> {
        let params = Params::new().bind("@tableid", table_id);
        self.backend
            .execute(
                "DELETE FROM item_attributes WHERE itemid IN \
                 (SELECT id FROM items WHERE tableid = @tableid)",
                &params,
            )
            .await?;
        self.backend
            .execute("DELETE FROM items WHERE tableid = @tableid", &params)
            .await?;
        let orphans = self
            .backend
            .execute(
                "DELETE FROM item_attributes WHERE itemid NOT IN (SELECT id FROM items)",
                &Params::new(),
            )
            .await?;
        info!(table = table_id, orphans, "purged table items");
        Ok(())
    }

    /// Wipes all items and attribute edges.
    pub async fn reset(&self) -> Result<()> {
        self.backend
            .execute("DELETE FROM item_attributes", &Params::new())
            .await?;
        self.backend
            .execute("DELETE FROM items", &Params::new())
            .await?;
        Ok(())
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|e| EavError::Persistence(format!("bad timestamp {text:?}: {e}")))
}
