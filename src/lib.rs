//! eavql – schema-less entity-attribute-value tables over SQLite.
//!
//! Callers never declare columns. Every table is a set of *items*, each
//! identified by its primary value (a string or a number), and an item
//! carries whatever named attributes have been written to it. Writing a
//! value under a new attribute name silently extends the schema.
//!
//! Storage is normalized into a few dictionary tables:
//! * `tables` – table names and whether their keys are numeric.
//! * `names` – attribute definitions per table, each fixed to numeric or text on first write.
//! * `bvalues` – every distinct value, stored once, with a full-text index over strings.
//! * `items` and `item_attributes` – the EAV facts themselves.
//!
//! The dictionaries are fronted by "keeper" caches (see the [`keeper`]
//! module) owned by a [`context::Context`], so separate sessions in one
//! process stay isolated.
//!
//! ## Modules
//! * [`context`] – The session handle: upserts, queries, deletes, schema.
//! * [`parse`] – Parser for the query language (grammar in `query.pest`).
//! * [`compile`] – Turns a [`query::Select`] into physical SQL, one join per attribute.
//! * [`tables`], [`names`], [`values`], [`items`] – Dictionary and item store access.
//! * [`backend`] / [`persist`] – The store contract and its SQLite implementation.
//! * [`config`] – Settings from defaults, an optional file and `EAVQL__*` variables.
//!
//! ## Query Language
//! ```text
//! SELECT <cols> FROM <table>
//!   [WHERE <col> <op> @<param> [AND ...]]
//!   [ORDER BY <col> [ASC|DESC] [, ...]]
//!   [LIMIT <n>]
//! ```
//! Operators are `= <> > >= < <= like matches`. The pseudo-columns `value`,
//! `id`, `count`, `created` and `lastmodified` are always available; `matches`
//! runs a full-text search and orders by relevance unless an explicit
//! ORDER BY is given.
//!
//! ## Quick Start
//! ```
//! use eavql::{Context, Define, parse};
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ctx = Context::open_in_memory().await.unwrap();
//! ctx.define(&Define::new("fun", "some").set("num", 42).set("str", "foobar"))
//!     .await
//!     .unwrap();
//! let mut select = parse("SELECT value, num FROM fun WHERE str = @str").unwrap();
//! select.add_param("@str", "foobar");
//! let results = ctx.exec_select(&select).await.unwrap();
//! assert_eq!(results.len(), 1);
//! # });
//! ```

pub mod backend;
pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod items;
pub mod keeper;
pub mod names;
pub mod parse;
pub mod persist;
pub mod query;
pub mod retry;
pub mod scalar;
pub mod tables;
pub mod values;
pub mod words;

pub use backend::{Backend, Statements, Transaction};
pub use config::Settings;
pub use context::Context;
pub use error::{EavError, Result};
pub use keeper::{Intent, Resolution};
pub use parse::parse;
pub use query::{
    Combine, CriteriaSet, Criterion, Define, GetRequest, GetResponse, Order, ResultSet,
    SchemaResponse, Select,
};
pub use scalar::Scalar;
