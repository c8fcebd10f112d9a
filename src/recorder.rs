use chrono::NaiveDateTime;
use sqlparser::ast::Statement;

use crate::{
    binder::bind_statement,
    catalog::{
        CatalogGateway, CatalogReader, CatalogWriter, Job, JobExecution, JobExecutionStatus,
        ManagedSession, NewJobExecution, SourceId,
    },
    error::{Error, Result},
    lineage::{LineageEdge, extract_lineage},
};

/// What one recorded run persisted.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub job: Job,
    pub execution: JobExecution,
    pub edges: Vec<LineageEdge>,
}

/// Records one run of the job `job_name` over `source_id`.
///
/// All statements are bound and their lineage extracted before anything is written. The job
/// (created on first use), a successful execution and one lineage row per edge are then
/// committed in a single session: either everything is persisted or nothing is.
pub fn record_run<G: CatalogGateway>(
    gateway: &G,
    job_name: &str,
    source_id: SourceId,
    statements: &[Statement],
    started_at: NaiveDateTime,
    ended_at: NaiveDateTime,
) -> Result<RunRecord> {
    if ended_at < started_at {
        return Err(Error::semantic(format!(
            "Execution of `{}` ends ({}) before it starts ({}).",
            job_name, ended_at, started_at
        )));
    }

    let mut session = ManagedSession::begin(gateway)?;
    let source = session.get_source(source_id)?;

    let mut edges = vec![];
    for statement in statements {
        let bound = bind_statement(&*session, &source, statement)?;
        edges.extend(extract_lineage(&bound)?);
    }

    let job = match session.get_job_by_name(source.id, job_name)? {
        Some(job) => job,
        None => {
            log::info!("Creating job `{}` for source `{}`.", job_name, source.name);
            session.create_job(source.id, job_name)?
        }
    };
    let execution = session.create_job_execution(NewJobExecution {
        job_id: job.id,
        started_at,
        ended_at,
        status: JobExecutionStatus::Success,
    })?;
    for edge in &edges {
        session.create_column_lineage(edge.source.id, edge.target.id, execution.id)?;
    }
    session.commit()?;
    // A concurrent first run may have created the job; the commit then attached this
    // execution to that job instead.
    let execution = session.get_job_execution(execution.id)?;
    let job = session.get_job(execution.job_id)?;

    log::info!(
        "Recorded execution {} of job `{}` with {} lineage edges.",
        execution.id,
        job.name,
        edges.len()
    );
    Ok(RunRecord {
        job,
        execution,
        edges,
    })
}
