use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{
    CatalogDefinition, CatalogGateway, CatalogReader, CatalogSession, CatalogWriter, Column,
    ColumnId, ColumnLineage, ColumnLineageId, Job, JobExecution, JobExecutionId, JobId,
    LineageRecord, NewJobExecution, Schema, SchemaId, Source, SourceId, Table, TableId,
    not_registered,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
struct CatalogState {
    sources: IndexMap<SourceId, Source>,
    schemas: IndexMap<SchemaId, Schema>,
    default_schemas: IndexMap<SourceId, SchemaId>,
    tables: IndexMap<TableId, Table>,
    columns: IndexMap<ColumnId, Column>,
    jobs: IndexMap<JobId, Job>,
    job_executions: IndexMap<JobExecutionId, JobExecution>,
    column_lineages: Vec<ColumnLineage>,
}

/// A write buffered by a session and replayed against the shared state at commit.
#[derive(Debug, Clone)]
enum Mutation {
    AddSource(Source),
    AddSchema(Schema),
    SetDefaultSchema(SourceId, SchemaId),
    AddTable(Table),
    AddColumn(Column),
    DeleteColumn(ColumnId),
    AddJob(Job),
    AddJobExecution(JobExecution),
    AddColumnLineage(ColumnLineage),
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::semantic(format!("{} name cannot be empty.", what)));
    }
    Ok(())
}

impl CatalogState {
    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::AddSource(source) => {
                check_name("Source", &source.name)?;
                if self.sources.values().any(|s| s.name == source.name) {
                    return Err(Error::semantic(format!(
                        "Source `{}` already exists.",
                        source.name
                    )));
                }
                self.sources.insert(source.id, source.clone());
            }
            Mutation::AddSchema(schema) => {
                check_name("Schema", &schema.name)?;
                if !self.sources.contains_key(&schema.source_id) {
                    return Err(not_registered("Source", schema.source_id));
                }
                if self
                    .schemas
                    .values()
                    .any(|s| s.source_id == schema.source_id && s.name == schema.name)
                {
                    return Err(Error::semantic(format!(
                        "Schema `{}` already exists.",
                        schema.fqdn
                    )));
                }
                self.schemas.insert(schema.id, schema.clone());
            }
            Mutation::SetDefaultSchema(source_id, schema_id) => {
                let schema = self
                    .schemas
                    .get(schema_id)
                    .ok_or_else(|| not_registered("Schema", schema_id))?;
                if schema.source_id != *source_id {
                    return Err(Error::semantic(format!(
                        "Schema `{}` does not belong to source {}.",
                        schema.fqdn, source_id
                    )));
                }
                self.default_schemas.insert(*source_id, *schema_id);
            }
            Mutation::AddTable(table) => {
                check_name("Table", &table.name)?;
                if !self.schemas.contains_key(&table.schema_id) {
                    return Err(not_registered("Schema", table.schema_id));
                }
                if self
                    .tables
                    .values()
                    .any(|t| t.schema_id == table.schema_id && t.name == table.name)
                {
                    return Err(Error::semantic(format!(
                        "Table `{}` already exists.",
                        table.fqdn
                    )));
                }
                self.tables.insert(table.id, table.clone());
            }
            Mutation::AddColumn(column) => {
                check_name("Column", &column.name)?;
                if !self.tables.contains_key(&column.table_id) {
                    return Err(not_registered("Table", column.table_id));
                }
                if self
                    .columns
                    .values()
                    .any(|c| c.table_id == column.table_id && c.name == column.name)
                {
                    return Err(Error::semantic(format!(
                        "Column `{}` already exists.",
                        column.fqdn
                    )));
                }
                self.columns.insert(column.id, column.clone());
            }
            Mutation::DeleteColumn(column_id) => {
                if self.columns.shift_remove(column_id).is_none() {
                    return Err(Error::ColumnNotFound(format!("id {}", column_id)));
                }
            }
            Mutation::AddJob(job) => {
                check_name("Job", &job.name)?;
                if !self.sources.contains_key(&job.source_id) {
                    return Err(not_registered("Source", job.source_id));
                }
                if self
                    .jobs
                    .values()
                    .any(|j| j.source_id == job.source_id && j.name == job.name)
                {
                    return Err(Error::semantic(format!(
                        "Job `{}` already exists for source {}.",
                        job.name, job.source_id
                    )));
                }
                self.jobs.insert(job.id, job.clone());
            }
            Mutation::AddJobExecution(execution) => {
                if !self.jobs.contains_key(&execution.job_id) {
                    return Err(not_registered("Job", execution.job_id));
                }
                if execution.ended_at < execution.started_at {
                    return Err(Error::semantic(format!(
                        "Job execution ends ({}) before it starts ({}).",
                        execution.ended_at, execution.started_at
                    )));
                }
                self.job_executions.insert(execution.id, execution.clone());
            }
            Mutation::AddColumnLineage(edge) => {
                for column_id in [edge.source_id, edge.target_id] {
                    if !self.columns.contains_key(&column_id) {
                        return Err(Error::ColumnNotFound(format!("id {}", column_id)));
                    }
                }
                if !self.job_executions.contains_key(&edge.job_execution_id) {
                    return Err(not_registered("Job execution", edge.job_execution_id));
                }
                self.column_lineages.push(edge.clone());
            }
        }
        Ok(())
    }

    /// Applies a session's mutations in order.
    ///
    /// A job committed by another session under the same source and name since this session
    /// began is reused: the session's own job is dropped and its executions are attached to the
    /// existing one.
    fn replay(&mut self, mutations: &[Mutation]) -> Result<()> {
        let mut reused: HashMap<JobId, JobId> = HashMap::new();
        for mutation in mutations {
            match mutation {
                Mutation::AddJob(job) => {
                    let existing = self
                        .jobs
                        .values()
                        .find(|j| j.source_id == job.source_id && j.name == job.name)
                        .map(|j| j.id);
                    if let Some(existing) = existing {
                        log::debug!(
                            "Reusing job `{}` ({}) committed concurrently.",
                            job.name,
                            existing
                        );
                        reused.insert(job.id, existing);
                        continue;
                    }
                }
                Mutation::AddJobExecution(execution) => {
                    if let Some(job_id) = reused.get(&execution.job_id) {
                        self.apply(&Mutation::AddJobExecution(JobExecution {
                            job_id: *job_id,
                            ..execution.clone()
                        }))?;
                        continue;
                    }
                }
                _ => {}
            }
            self.apply(mutation)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<CatalogState>,
    next_id: AtomicI64,
    offline: AtomicBool,
}

impl Shared {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::CatalogUnavailable(
                "in-memory catalog is offline".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Reference [`CatalogGateway`] keeping the whole catalog in memory.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    shared: Arc<Shared>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definition(definition: &CatalogDefinition) -> Result<Self> {
        let catalog = Self::new();
        let mut session = catalog.begin()?;
        definition.apply(&mut session)?;
        session.commit()?;
        Ok(catalog)
    }

    /// Simulates losing the connection to the metadata store.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }
}

impl CatalogGateway for InMemoryCatalog {
    type Session = InMemorySession;

    fn begin(&self) -> Result<Self::Session> {
        self.shared.check_online()?;
        Ok(InMemorySession {
            shared: Arc::clone(&self.shared),
            snapshot: self.shared.state.read().clone(),
            mutations: vec![],
        })
    }
}

pub struct InMemorySession {
    shared: Arc<Shared>,
    snapshot: CatalogState,
    mutations: Vec<Mutation>,
}

impl InMemorySession {
    fn write(&mut self, mutation: Mutation) -> Result<()> {
        self.snapshot.apply(&mutation)?;
        self.mutations.push(mutation);
        Ok(())
    }
}

impl CatalogReader for InMemorySession {
    fn get_source(&self, id: SourceId) -> Result<Source> {
        self.snapshot
            .sources
            .get(&id)
            .cloned()
            .ok_or_else(|| not_registered("Source", id))
    }

    fn get_source_by_name(&self, name: &str) -> Result<Option<Source>> {
        Ok(self
            .snapshot
            .sources
            .values()
            .find(|source| source.name == name)
            .cloned())
    }

    fn get_schemas(&self, source_id: SourceId) -> Result<Vec<Schema>> {
        let mut schemas = self
            .snapshot
            .schemas
            .values()
            .filter(|schema| schema.source_id == source_id)
            .cloned()
            .collect::<Vec<_>>();
        schemas.sort_by(|s1, s2| s1.name.cmp(&s2.name));
        Ok(schemas)
    }

    fn get_schema_by_name(&self, source_id: SourceId, name: &str) -> Result<Option<Schema>> {
        Ok(self
            .snapshot
            .schemas
            .values()
            .find(|schema| schema.source_id == source_id && schema.name == name)
            .cloned())
    }

    fn get_default_schema(&self, source_id: SourceId) -> Result<Option<Schema>> {
        Ok(self
            .snapshot
            .default_schemas
            .get(&source_id)
            .and_then(|schema_id| self.snapshot.schemas.get(schema_id))
            .cloned())
    }

    fn get_tables(&self, schema_id: SchemaId) -> Result<Vec<Table>> {
        let mut tables = self
            .snapshot
            .tables
            .values()
            .filter(|table| table.schema_id == schema_id)
            .cloned()
            .collect::<Vec<_>>();
        tables.sort_by(|t1, t2| t1.name.cmp(&t2.name));
        Ok(tables)
    }

    fn get_table(&self, id: TableId) -> Result<Table> {
        self.snapshot
            .tables
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(format!("id {}", id)))
    }

    fn get_table_by_name(&self, schema_id: SchemaId, name: &str) -> Result<Option<Table>> {
        Ok(self
            .snapshot
            .tables
            .values()
            .find(|table| table.schema_id == schema_id && table.name == name)
            .cloned())
    }

    fn get_columns(&self, table_id: TableId) -> Result<Vec<Column>> {
        let mut columns = self
            .snapshot
            .columns
            .values()
            .filter(|column| column.table_id == table_id)
            .cloned()
            .collect::<Vec<_>>();
        columns.sort_by_key(|column| column.sort_order);
        Ok(columns)
    }

    fn get_column(&self, id: ColumnId) -> Result<Column> {
        self.snapshot
            .columns
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(format!("id {}", id)))
    }

    fn get_job(&self, id: JobId) -> Result<Job> {
        self.snapshot
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| not_registered("Job", id))
    }

    fn get_job_by_name(&self, source_id: SourceId, name: &str) -> Result<Option<Job>> {
        Ok(self
            .snapshot
            .jobs
            .values()
            .find(|job| job.source_id == source_id && job.name == name)
            .cloned())
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<JobExecution> {
        self.snapshot
            .job_executions
            .get(&id)
            .cloned()
            .ok_or_else(|| not_registered("Job execution", id))
    }

    fn get_column_lineages(&self, job_ids: Option<&[JobId]>) -> Result<Vec<LineageRecord>> {
        let job_filter = job_ids.map(|ids| ids.iter().copied().collect::<HashSet<_>>());
        let mut records = vec![];
        for edge in &self.snapshot.column_lineages {
            let job_execution = self.get_job_execution(edge.job_execution_id)?;
            if job_filter
                .as_ref()
                .is_some_and(|filter| !filter.contains(&job_execution.job_id))
            {
                continue;
            }
            // Edges are a historical record: columns deleted since are skipped, not errors.
            let (Some(source), Some(target)) = (
                self.snapshot.columns.get(&edge.source_id),
                self.snapshot.columns.get(&edge.target_id),
            ) else {
                continue;
            };
            records.push(LineageRecord {
                edge: edge.clone(),
                source: source.clone(),
                target: target.clone(),
                job: self.get_job(job_execution.job_id)?,
                job_execution,
            });
        }
        Ok(records)
    }
}

impl CatalogWriter for InMemorySession {
    fn add_source(&mut self, name: &str, host: Option<&str>) -> Result<Source> {
        let source = Source {
            id: SourceId(self.shared.next_id()),
            name: name.to_owned(),
            host: host.map(str::to_owned),
        };
        self.write(Mutation::AddSource(source.clone()))?;
        Ok(source)
    }

    fn add_schema(&mut self, source_id: SourceId, name: &str) -> Result<Schema> {
        let source = self.get_source(source_id)?;
        let schema = Schema {
            id: SchemaId(self.shared.next_id()),
            source_id,
            name: name.to_owned(),
            fqdn: source.fqdn().child(name),
        };
        self.write(Mutation::AddSchema(schema.clone()))?;
        Ok(schema)
    }

    fn set_default_schema(&mut self, source_id: SourceId, schema_id: SchemaId) -> Result<()> {
        self.write(Mutation::SetDefaultSchema(source_id, schema_id))
    }

    fn add_table(&mut self, schema_id: SchemaId, name: &str) -> Result<Table> {
        let schema = self
            .snapshot
            .schemas
            .get(&schema_id)
            .cloned()
            .ok_or_else(|| not_registered("Schema", schema_id))?;
        let table = Table {
            id: TableId(self.shared.next_id()),
            schema_id,
            name: name.to_owned(),
            fqdn: schema.fqdn.child(name),
        };
        self.write(Mutation::AddTable(table.clone()))?;
        Ok(table)
    }

    fn add_column(&mut self, table_id: TableId, name: &str) -> Result<Column> {
        let table = self.get_table(table_id)?;
        let sort_order = self
            .snapshot
            .columns
            .values()
            .filter(|column| column.table_id == table_id)
            .map(|column| column.sort_order + 1)
            .max()
            .unwrap_or(0);
        let column = Column {
            id: ColumnId(self.shared.next_id()),
            table_id,
            name: name.to_owned(),
            sort_order,
            fqdn: table.fqdn.child(name),
        };
        self.write(Mutation::AddColumn(column.clone()))?;
        Ok(column)
    }

    fn delete_column(&mut self, id: ColumnId) -> Result<()> {
        self.write(Mutation::DeleteColumn(id))
    }

    fn create_job(&mut self, source_id: SourceId, name: &str) -> Result<Job> {
        let job = Job {
            id: JobId(self.shared.next_id()),
            source_id,
            name: name.to_owned(),
        };
        self.write(Mutation::AddJob(job.clone()))?;
        Ok(job)
    }

    fn create_job_execution(&mut self, execution: NewJobExecution) -> Result<JobExecution> {
        let execution = JobExecution {
            id: JobExecutionId(self.shared.next_id()),
            job_id: execution.job_id,
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            status: execution.status,
        };
        self.write(Mutation::AddJobExecution(execution.clone()))?;
        Ok(execution)
    }

    fn create_column_lineage(
        &mut self,
        source_id: ColumnId,
        target_id: ColumnId,
        job_execution_id: JobExecutionId,
    ) -> Result<ColumnLineage> {
        let edge = ColumnLineage {
            id: ColumnLineageId(self.shared.next_id()),
            source_id,
            target_id,
            job_execution_id,
        };
        self.write(Mutation::AddColumnLineage(edge.clone()))?;
        Ok(edge)
    }
}

impl CatalogSession for InMemorySession {
    fn commit(&mut self) -> Result<()> {
        self.shared.check_online()?;
        let mut state = self.shared.state.write();
        // Replay on a copy so a failing mutation leaves the shared state untouched.
        let mut next = state.clone();
        next.replay(&self.mutations)?;
        *state = next;
        log::debug!("Committed {} catalog mutations.", self.mutations.len());
        self.mutations.clear();
        self.snapshot = state.clone();
        Ok(())
    }

    fn rollback(&mut self) {
        if !self.mutations.is_empty() {
            log::debug!("Discarding {} catalog mutations.", self.mutations.len());
        }
        self.mutations.clear();
        self.snapshot = self.shared.state.read().clone();
    }
}
