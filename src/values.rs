use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, Cell, Params, Statements};
use crate::error::Result;
use crate::keeper::{Caches, Intent, Resolution, ValueId};
use crate::retry::RetryPolicy;
use crate::scalar::Scalar;

/// The value dictionary. Identity is the content: equal scalars share a row.
#[derive(Clone)]
pub struct Values {
    backend: Arc<dyn Backend>,
    caches: Arc<Caches>,
    retry: RetryPolicy,
}

impl Values {
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<Caches>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            caches,
            retry,
        }
    }

    pub async fn get_id(&self, value: &Scalar, intent: Intent) -> Result<Resolution<ValueId>> {
        value.check_storable()?;
        if let Some(id) = self.caches.values()?.get(value) {
            return Ok(Resolution::Found(id));
        }
        self.retry
            .run("Values.get_id", || self.select_or_insert(value, intent))
            .await
    }

    async fn select_or_insert(&self, value: &Scalar, intent: Intent) -> Result<Resolution<ValueId>> {
        let (select, params) = match value {
            Scalar::Number(n) => (
                "SELECT id FROM bvalues WHERE isNumeric = 1 AND numberValue = @numberValue",
                Params::new()
                    .bind("@isNumeric", true)
                    .bind("@numberValue", *n)
                    .bind("@stringValue", Cell::Null),
            ),
            Scalar::Text(s) => (
                "SELECT id FROM bvalues WHERE isNumeric = 0 AND stringValue = @stringValue",
                Params::new()
                    .bind("@isNumeric", false)
                    .bind("@numberValue", 0.0)
                    .bind("@stringValue", s.clone()),
            ),
        };
        if let Some(row) = self.backend.query(select, &params).await?.next_row() {
            let id = row.get_i64(0)?;
            self.caches.values()?.keep(value.clone(), id);
            return Ok(Resolution::Found(id));
        }
        if intent == Intent::Lookup {
            return Ok(Resolution::NotFound);
        }
        // the search index row for text is written by the store along with this one
        let id = self
            .backend
            .insert(
                "INSERT INTO bvalues (isNumeric, numberValue, stringValue) \
                 VALUES (@isNumeric, @numberValue, @stringValue)",
                &params,
            )
            .await?;
        debug!(id, numeric = value.is_numeric(), "created value");
        self.caches.values()?.keep(value.clone(), id);
        Ok(Resolution::Found(id))
    }

    pub async fn get_value(&self, id: ValueId) -> Result<Resolution<Scalar>> {
        if let Some(kept) = self.caches.values()?.lookup(id) {
            return Ok(Resolution::Found(kept));
        }
        let params = Params::new().bind("@id", id);
        let mut rows = self
            .backend
            .query(
                "SELECT isNumeric, numberValue, stringValue FROM bvalues WHERE id = @id",
                &params,
            )
            .await?;
        let Some(row) = rows.next_row() else {
            return Ok(Resolution::NotFound);
        };
        let value = if row.get_bool(0)? {
            Scalar::Number(row.get_f64(1)?)
        } else {
            Scalar::Text(row.get_text(2)?.to_string())
        };
        self.caches.values()?.keep(value.clone(), id);
        Ok(Resolution::Found(value))
    }

    /// Wipes the value dictionary; the search index follows through the store.
    pub async fn reset(&self) -> Result<()> {
        self.backend
            .execute("DELETE FROM bvalues", &Params::new())
            .await?;
        Ok(())
    }
}
