//! # data-lineage
//!
//! Binds SQL transformation statements against a metadata catalog and records column-level
//! lineage for every pipeline run.
//!
//! # Features
//!
//! - Resolve tables and columns through CTEs, derived tables, joins and subqueries, with
//!   default-schema lookup and case-insensitive unquoted identifiers.
//! - Extract `source column -> target column` edges from INSERT, CREATE TABLE AS,
//!   CREATE VIEW, UPDATE and MERGE statements.
//! - Record a job execution and its edges atomically in a catalog session.
//! - Run catalog scans on a background worker pool with cancellable jobs.
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::NaiveDateTime;
//! use data_lineage::{
//!     catalog::{CatalogDefinition, CatalogGateway, CatalogReader, InMemoryCatalog},
//!     config::SqlDialect,
//!     parser::parse,
//!     recorder::record_run,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     env_logger::init();
//!
//!     let definition: CatalogDefinition = toml::from_str(
//!         r#"
//!         [[sources]]
//!         name = "pg"
//!         default_schema = "public"
//!
//!         [[sources.schemas]]
//!         name = "public"
//!         tables = [
//!             { name = "orders", columns = ["id", "customer_id", "total"] },
//!             { name = "order_summary", columns = ["order_id", "amount"] },
//!         ]
//!         "#,
//!     )?;
//!     let catalog = InMemoryCatalog::from_definition(&definition)?;
//!     let source = catalog
//!         .begin()?
//!         .get_source_by_name("pg")?
//!         .ok_or_else(|| anyhow::anyhow!("source pg missing"))?;
//!
//!     let sql = "insert into order_summary (order_id, amount) select id, total from orders";
//!     let statements = parse(sql, "summarize_orders", SqlDialect::Postgres)?;
//!     let started_at: NaiveDateTime = "2021-01-01T00:00:00".parse()?;
//!     let ended_at: NaiveDateTime = "2021-01-01T00:01:00".parse()?;
//!     let run = record_run(
//!         &catalog,
//!         "summarize_orders",
//!         source.id,
//!         &statements,
//!         started_at,
//!         ended_at,
//!     )?;
//!
//!     for edge in &run.edges {
//!         println!("{} -> {}", edge.source.fqdn, edge.target.fqdn);
//!     }
//!     Ok(())
//! }
//! ```
mod arena;
pub mod binder;
pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod lineage;
pub mod parser;
pub mod recorder;
pub mod scan;
pub mod service;
pub mod test_utils;

pub use arena::{Arena, ArenaIndex};
pub use error::{Error, ErrorKind, Result};
