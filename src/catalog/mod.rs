//! Catalog records and the capability traits used to read and write them.
//!
//! The storage/transaction engine behind a catalog lives elsewhere; this module only fixes
//! the shape of the records and the session contract. [`InMemoryCatalog`] is the reference
//! gateway used by the binary and the tests.

mod definition;
mod memory;

pub use definition::{CatalogDefinition, SchemaDefinition, SourceDefinition, TableDefinition};
pub use memory::{InMemoryCatalog, InMemorySession};

use std::fmt::Display;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};

use crate::error::{Error, Result};

macro_rules! catalog_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

catalog_id!(SourceId);
catalog_id!(SchemaId);
catalog_id!(TableId);
catalog_id!(ColumnId);
catalog_id!(JobId);
catalog_id!(JobExecutionId);
catalog_id!(ColumnLineageId);

/// Dotted path locating a catalog entity, e.g. `pg.public.orders.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fqdn(pub Vec<String>);

impl Fqdn {
    pub fn child(&self, name: &str) -> Fqdn {
        let mut parts = self.0.clone();
        parts.push(name.to_owned());
        Fqdn(parts)
    }
}

impl Display for Fqdn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub host: Option<String>,
}

impl Source {
    pub fn fqdn(&self) -> Fqdn {
        Fqdn(vec![self.name.clone()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub source_id: SourceId,
    pub name: String,
    pub fqdn: Fqdn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub schema_id: SchemaId,
    pub name: String,
    pub fqdn: Fqdn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub table_id: TableId,
    pub name: String,
    /// Position within the owning table; wildcards expand in this order.
    pub sort_order: usize,
    pub fqdn: Fqdn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_id: SourceId,
    pub name: String,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobExecutionStatus {
    Queued,
    Started,
    Success,
    Failure,
    Cancelled,
}

impl JobExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobExecutionStatus::Success | JobExecutionStatus::Failure | JobExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobExecutionId,
    pub job_id: JobId,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub status: JobExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJobExecution {
    pub job_id: JobId,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub status: JobExecutionStatus,
}

/// A directed column-to-column lineage edge attributed to one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLineage {
    pub id: ColumnLineageId,
    pub source_id: ColumnId,
    pub target_id: ColumnId,
    pub job_execution_id: JobExecutionId,
}

/// An edge joined with its columns, its producing execution and that execution's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageRecord {
    pub edge: ColumnLineage,
    pub source: Column,
    pub target: Column,
    pub job_execution: JobExecution,
    pub job: Job,
}

pub trait CatalogReader {
    fn get_source(&self, id: SourceId) -> Result<Source>;
    fn get_source_by_name(&self, name: &str) -> Result<Option<Source>>;

    /// Schemas of a source ordered by name.
    fn get_schemas(&self, source_id: SourceId) -> Result<Vec<Schema>>;
    fn get_schema_by_name(&self, source_id: SourceId, name: &str) -> Result<Option<Schema>>;
    fn get_default_schema(&self, source_id: SourceId) -> Result<Option<Schema>>;

    /// Tables of a schema ordered by name.
    fn get_tables(&self, schema_id: SchemaId) -> Result<Vec<Table>>;
    fn get_table(&self, id: TableId) -> Result<Table>;
    fn get_table_by_name(&self, schema_id: SchemaId, name: &str) -> Result<Option<Table>>;

    /// Columns of a table in their declared order.
    fn get_columns(&self, table_id: TableId) -> Result<Vec<Column>>;
    fn get_column(&self, id: ColumnId) -> Result<Column>;

    fn get_job(&self, id: JobId) -> Result<Job>;
    fn get_job_by_name(&self, source_id: SourceId, name: &str) -> Result<Option<Job>>;
    fn get_job_execution(&self, id: JobExecutionId) -> Result<JobExecution>;

    /// Lineage edges, optionally restricted to the given jobs, in insertion order.
    fn get_column_lineages(&self, job_ids: Option<&[JobId]>) -> Result<Vec<LineageRecord>>;
}

pub trait CatalogWriter {
    fn add_source(&mut self, name: &str, host: Option<&str>) -> Result<Source>;
    fn add_schema(&mut self, source_id: SourceId, name: &str) -> Result<Schema>;
    fn set_default_schema(&mut self, source_id: SourceId, schema_id: SchemaId) -> Result<()>;
    fn add_table(&mut self, schema_id: SchemaId, name: &str) -> Result<Table>;
    /// Appends a column after the existing columns of the table.
    fn add_column(&mut self, table_id: TableId, name: &str) -> Result<Column>;
    fn delete_column(&mut self, id: ColumnId) -> Result<()>;

    fn create_job(&mut self, source_id: SourceId, name: &str) -> Result<Job>;
    fn create_job_execution(&mut self, execution: NewJobExecution) -> Result<JobExecution>;
    fn create_column_lineage(
        &mut self,
        source_id: ColumnId,
        target_id: ColumnId,
        job_execution_id: JobExecutionId,
    ) -> Result<ColumnLineage>;
}

/// One transactional unit of work against the catalog.
///
/// Reads observe a consistent snapshot taken when the session began plus the session's own
/// writes. Nothing is visible to other sessions before [`CatalogSession::commit`].
pub trait CatalogSession: CatalogReader + CatalogWriter {
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self);

    fn upsert_schema(&mut self, source_id: SourceId, name: &str) -> Result<Schema> {
        match self.get_schema_by_name(source_id, name)? {
            Some(schema) => Ok(schema),
            None => self.add_schema(source_id, name),
        }
    }

    fn upsert_table(&mut self, schema_id: SchemaId, name: &str) -> Result<Table> {
        match self.get_table_by_name(schema_id, name)? {
            Some(table) => Ok(table),
            None => self.add_table(schema_id, name),
        }
    }

    fn upsert_column(&mut self, table_id: TableId, name: &str) -> Result<Column> {
        match self
            .get_columns(table_id)?
            .into_iter()
            .find(|column| column.name == name)
        {
            Some(column) => Ok(column),
            None => self.add_column(table_id, name),
        }
    }
}

pub trait CatalogGateway: Send + Sync {
    type Session: CatalogSession;

    fn begin(&self) -> Result<Self::Session>;
}

/// Scoped acquisition of a catalog session.
///
/// The session is rolled back when the guard is dropped unless [`ManagedSession::commit`]
/// succeeded first, so every early return leaves the catalog untouched.
pub struct ManagedSession<S: CatalogSession> {
    session: S,
    finished: bool,
}

impl<S: CatalogSession> ManagedSession<S> {
    pub fn begin<G: CatalogGateway<Session = S>>(gateway: &G) -> Result<Self> {
        Ok(Self {
            session: gateway.begin()?,
            finished: false,
        })
    }

    /// Commits the session. The guard stays usable for reading what was committed.
    pub fn commit(&mut self) -> Result<()> {
        self.session.commit()?;
        self.finished = true;
        Ok(())
    }
}

impl<S: CatalogSession> std::ops::Deref for ManagedSession<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<S: CatalogSession> std::ops::DerefMut for ManagedSession<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl<S: CatalogSession> Drop for ManagedSession<S> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("Rolling back unfinished catalog session.");
            self.session.rollback();
        }
    }
}

pub(crate) fn not_registered(what: &str, id: impl Display) -> Error {
    Error::semantic(format!("{} `{}` is not registered in the catalog.", what, id))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_job_execution_status_round_trip() {
        for status in JobExecutionStatus::iter() {
            let displayed = status.to_string();
            assert_eq!(JobExecutionStatus::from_str(&displayed).unwrap(), status);

            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", displayed));
            assert_eq!(
                serde_json::from_str::<JobExecutionStatus>(&json).unwrap(),
                status
            );
        }
        assert_eq!(JobExecutionStatus::Failure.to_string(), "FAILURE");
        assert!(JobExecutionStatus::from_str("DONE").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobExecutionStatus::Queued.is_terminal());
        assert!(!JobExecutionStatus::Started.is_terminal());
        assert!(JobExecutionStatus::Success.is_terminal());
        assert!(JobExecutionStatus::Failure.is_terminal());
        assert!(JobExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_fqdn_display() {
        let table = Fqdn(vec!["pg".to_owned(), "public".to_owned(), "orders".to_owned()]);
        assert_eq!(table.child("id").to_string(), "pg.public.orders.id");
    }
}
