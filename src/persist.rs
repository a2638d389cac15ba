// used for persistence
use rusqlite::{Connection, Statement, ToSql};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as Gate, OwnedMutexGuard};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::backend::{Backend, Cell, Held, Params, Row, RowSet, Statements};
use crate::config::DatabaseSettings;
use crate::error::{EavError, Result};

// ------------- Schema -------------
// The "STRICT" keyword is avoided so that external tools can still open the file.
const SCHEMA: &str = "
    create table if not exists tables (
        id integer primary key autoincrement not null,
        name text not null,
        isNumeric boolean not null,
        constraint unique_table_name unique (
            name
        )
    );
    create table if not exists names (
        id integer primary key autoincrement not null,
        tableid integer not null,
        name text not null,
        isNumeric boolean not null,
        constraint name_in_table foreign key (
            tableid
        ) references tables(id),
        constraint unique_name_in_table unique (
            tableid,
            name
        )
    );
    create table if not exists bvalues (
        id integer primary key autoincrement not null,
        isNumeric boolean not null,
        numberValue real not null,
        stringValue text,
        constraint unique_value unique (
            stringValue,
            numberValue,
            isNumeric
        )
    );
    create index if not exists idx_bvalues_string on bvalues (stringValue, isNumeric, id);
    create index if not exists idx_bvalues_number on bvalues (numberValue, isNumeric, id);
    -- NULL string values never collide under unique_value, so numbers need their own
    create unique index if not exists unique_number_value on bvalues (numberValue) where isNumeric = 1;
    create virtual table if not exists bvalues_fts using fts5 (
        valueid unindexed,
        stringSearchValue
    );
    -- the search row shares the rowid of its value and is written by the same statement
    create trigger if not exists bvalues_fts_insert after insert on bvalues
    when new.isNumeric = 0
    begin
        insert into bvalues_fts (rowid, valueid, stringSearchValue)
        values (new.id, new.id, new.stringValue);
    end;
    create trigger if not exists bvalues_fts_delete after delete on bvalues
    when old.isNumeric = 0
    begin
        delete from bvalues_fts where rowid = old.id;
    end;
    create table if not exists items (
        id integer primary key autoincrement not null,
        tableid integer not null,
        valueid integer not null,
        created timestamp not null,
        lastmodified timestamp not null,
        constraint item_in_table foreign key (
            tableid
        ) references tables(id),
        constraint item_keyed_by_value foreign key (
            valueid
        ) references bvalues(id),
        constraint unique_item unique (
            valueid,
            tableid
        )
    );
    create index if not exists idx_items_created on items (created);
    create index if not exists idx_items_lastmodified on items (lastmodified);
    create table if not exists item_attributes (
        itemid integer not null,
        nameid integer not null,
        valueid integer not null,
        constraint one_slot_per_attribute primary key (
            itemid,
            nameid
        )
    );
    create view if not exists item_values as
        select ia.itemid as itemid,
               ia.nameid as nameid,
               v.id as valueid,
               v.isNumeric as isNumeric,
               v.numberValue as numberValue,
               v.stringValue as stringValue
          from item_attributes ia
          join bvalues v
            on v.id = ia.valueid;
";

// ------------- Persistence -------------
// The connection, shared by the backend and whoever holds it.
#[derive(Clone)]
struct SqliteConn(Arc<Mutex<Connection>>);

impl SqliteConn {
    async fn with_conn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.0);
        spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| EavError::Lock(format!("sqlite connection: {e}")))?;
            func(&guard)
        })
        .await?
    }

    // Binds only the parameters the statement actually references, so callers
    // may pass a superset (the compiler drops criteria on unknown columns).
    fn bind(statement: &mut Statement<'_>, params: &Params) -> Result<()> {
        for (name, value) in params.iter() {
            if let Some(idx) = statement.parameter_index(name)? {
                statement.raw_bind_parameter(idx, value as &dyn ToSql)?;
            }
        }
        Ok(())
    }

    async fn batch(&self, sql: &'static str) -> Result<()> {
        self.with_conn(move |conn| Ok(conn.execute_batch(sql)?)).await
    }

    fn is_autocommit(&self) -> bool {
        self.0
            .lock()
            .map(|conn| conn.is_autocommit())
            .unwrap_or(true)
    }

    fn rollback(&self) {
        match self.0.lock() {
            Ok(conn) => {
                if !conn.is_autocommit() {
                    debug!("rolling back uncommitted transaction");
                    if let Err(err) = conn.execute_batch("ROLLBACK") {
                        warn!(error = %err, "rollback failed");
                    }
                }
            }
            Err(err) => warn!(error = %err, "cannot release transaction, connection poisoned"),
        }
    }
}

#[async_trait]
impl Statements for SqliteConn {
    async fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        let sql = sql.to_string();
        let params = params.clone();
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            Self::bind(&mut statement, &params)?;
            Ok(statement.raw_execute()?)
        })
        .await
    }

    async fn insert(&self, sql: &str, params: &Params) -> Result<i64> {
        let sql = sql.to_string();
        let params = params.clone();
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            Self::bind(&mut statement, &params)?;
            statement.raw_execute()?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<Cell>> {
        let sql = sql.to_string();
        let params = params.clone();
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            Self::bind(&mut statement, &params)?;
            let mut rows = statement.raw_query();
            match rows.next()? {
                Some(row) => match row.get::<_, Cell>(0)? {
                    Cell::Null => Ok(None),
                    cell => Ok(Some(cell)),
                },
                None => Ok(None),
            }
        })
        .await
    }

    async fn query(&self, sql: &str, params: &Params) -> Result<RowSet> {
        let sql = sql.to_string();
        let params = params.clone();
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            Self::bind(&mut statement, &params)?;
            let columns: Vec<String> = statement
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let width = columns.len();
            let mut collected = Vec::new();
            let mut rows = statement.raw_query();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(width);
                for idx in 0..width {
                    cells.push(row.get::<_, Cell>(idx)?);
                }
                collected.push(Row::new(cells));
            }
            Ok(RowSet::new(columns, collected))
        })
        .await
    }
}

/// [`Backend`] over a single rusqlite connection.
///
/// Every call hops onto the blocking pool and holds the connection lock only
/// for the duration of that one statement. The gate is taken for one
/// statement by plain calls and for a whole transaction by [`Backend::begin`].
#[derive(Clone)]
pub struct SqliteBackend {
    conn: SqliteConn,
    gate: Arc<Gate<()>>,
}

impl SqliteBackend {
    pub async fn open(settings: &DatabaseSettings) -> Result<Self> {
        let settings = settings.clone();
        let conn = spawn_blocking(move || -> Result<Connection> {
            let conn = match &settings.path {
                Some(path) => {
                    let conn = Connection::open(path)?;
                    // journal_mode answers with the mode actually in effect
                    let mode: String = conn.pragma_update_and_check(
                        None,
                        "journal_mode",
                        &settings.journal_mode,
                        |row| row.get(0),
                    )?;
                    debug!(path = %path, journal_mode = %mode, "opened database file");
                    conn.pragma_update(None, "synchronous", &settings.synchronous)?;
                    conn
                }
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;
        debug!("schema ready");
        Ok(Self {
            conn: SqliteConn(Arc::new(Mutex::new(conn))),
            gate: Arc::new(Gate::new(())),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(&crate::config::Settings::in_memory().database).await
    }
}

#[async_trait]
impl Statements for SqliteBackend {
    async fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        let _turn = self.gate.lock().await;
        self.conn.execute(sql, params).await
    }

    async fn insert(&self, sql: &str, params: &Params) -> Result<i64> {
        let _turn = self.gate.lock().await;
        self.conn.insert(sql, params).await
    }

    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<Cell>> {
        let _turn = self.gate.lock().await;
        self.conn.scalar(sql, params).await
    }

    async fn query(&self, sql: &str, params: &Params) -> Result<RowSet> {
        let _turn = self.gate.lock().await;
        self.conn.query(sql, params).await
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn begin(&self) -> Result<Box<dyn Held>> {
        let turn = Arc::clone(&self.gate).lock_owned().await;
        self.conn.batch("BEGIN").await?;
        Ok(Box::new(SqliteHeld {
            conn: self.conn.clone(),
            _turn: turn,
        }))
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn insert_ignore(&self) -> &'static str {
        "INSERT OR IGNORE INTO"
    }

    fn utc_timestamp(&self) -> &'static str {
        "DATETIME('now')"
    }
}

// The connection with its transaction open; the gate stays taken until drop.
struct SqliteHeld {
    conn: SqliteConn,
    _turn: OwnedMutexGuard<()>,
}

#[async_trait]
impl Statements for SqliteHeld {
    async fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        self.conn.execute(sql, params).await
    }
    async fn insert(&self, sql: &str, params: &Params) -> Result<i64> {
        self.conn.insert(sql, params).await
    }
    async fn scalar(&self, sql: &str, params: &Params) -> Result<Option<Cell>> {
        self.conn.scalar(sql, params).await
    }
    async fn query(&self, sql: &str, params: &Params) -> Result<RowSet> {
        self.conn.query(sql, params).await
    }
}

#[async_trait]
impl Held for SqliteHeld {
    async fn commit(&self) -> Result<()> {
        self.conn.batch("COMMIT").await
    }

    fn release(&self) {
        self.conn.rollback();
    }
}

impl Drop for SqliteHeld {
    fn drop(&mut self) {
        // covers holds that never reached a scope guard
        self.conn.rollback();
    }
}
