//! Transport-independent entry points: what an HTTP or CLI front end calls.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    binder::bind_query_summary,
    catalog::{
        CatalogGateway, CatalogReader, JobExecution, JobExecutionId, JobExecutionStatus, JobId,
        ManagedSession, SourceId,
    },
    config::SqlDialect,
    error::{Error, Result},
    graph::LineageGraph,
    lineage::LineageEdge,
    parser,
    recorder::record_run,
};

const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalyzeRequest {
    pub query: String,
    /// Job name; the job is created on first use.
    pub name: String,
    /// ISO-8601 `YYYY-MM-DDTHH:MM:SS`.
    pub start_time: String,
    pub end_time: String,
    pub source_id: SourceId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub select_tables: Vec<String>,
    pub select_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobExecutionSummary {
    pub id: JobExecutionId,
    pub job_id: JobId,
    pub started_at: String,
    pub ended_at: String,
    pub status: JobExecutionStatus,
}

impl From<&JobExecution> for JobExecutionSummary {
    fn from(execution: &JobExecution) -> Self {
        Self {
            id: execution.id,
            job_id: execution.job_id,
            started_at: execution.started_at.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
            ended_at: execution.ended_at.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
            status: execution.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub source: String,
    pub target: String,
}

impl From<&LineageEdge> for EdgeSummary {
    fn from(edge: &LineageEdge) -> Self {
        Self {
            source: edge.source.fqdn.to_string(),
            target: edge.target.fqdn.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeSummary {
    pub execution: JobExecutionSummary,
    pub edges: Vec<EdgeSummary>,
}

pub struct LineageService<G: CatalogGateway> {
    gateway: G,
    dialect: SqlDialect,
}

impl<G: CatalogGateway> LineageService<G> {
    pub fn new(gateway: G, dialect: SqlDialect) -> Self {
        Self { gateway, dialect }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Lists the tables read and the columns produced by `query`, without recording anything.
    pub fn parse(&self, query: &str, source_id: SourceId) -> Result<ParseSummary> {
        let statements = parser::parse(query, "parse", self.dialect)?;
        let session = ManagedSession::begin(&self.gateway)?;
        let source = session.get_source(source_id)?;

        let mut summary = ParseSummary::default();
        for statement in &statements {
            let query_summary = bind_query_summary(&*session, &source, statement)?;
            for table in query_summary.tables {
                let name = table.fqdn.to_string();
                if !summary.select_tables.contains(&name) {
                    summary.select_tables.push(name);
                }
            }
            summary.select_columns.extend(query_summary.columns);
        }
        Ok(summary)
    }

    /// Parses, binds and records one job run; see [`record_run`].
    pub fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeSummary> {
        let started_at = parse_timestamp(&request.start_time)?;
        let ended_at = parse_timestamp(&request.end_time)?;
        let statements = parser::parse(&request.query, &request.name, self.dialect)?;
        let record = record_run(
            &self.gateway,
            &request.name,
            request.source_id,
            &statements,
            started_at,
            ended_at,
        )?;
        Ok(AnalyzeSummary {
            execution: JobExecutionSummary::from(&record.execution),
            edges: record.edges.iter().map(EdgeSummary::from).collect(),
        })
    }

    /// Recorded lineage, optionally restricted to some jobs, as a node/edge graph.
    pub fn lineage_graph(&self, job_ids: Option<&[JobId]>) -> Result<LineageGraph> {
        let session = ManagedSession::begin(&self.gateway)?;
        let records = session.get_column_lineages(job_ids)?;
        Ok(LineageGraph::from_records(&records))
    }
}

/// Accepts `YYYY-MM-DDTHH:MM:SS` (fractional seconds allowed) or the display format.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    value
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(value, DISPLAY_TIMESTAMP_FORMAT))
        .map_err(|_| {
            Error::semantic(format!(
                "Invalid timestamp `{}`, expected YYYY-MM-DDTHH:MM:SS.",
                value
            ))
        })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_parse_timestamp() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        assert_eq!(parse_timestamp("2021-03-04T05:06:07").unwrap(), expected);
        assert_eq!(parse_timestamp("2021-03-04 05:06:07").unwrap(), expected);
        assert!(matches!(
            parse_timestamp("04/03/2021"),
            Err(Error::Semantic(_))
        ));
    }

    #[test]
    fn test_execution_summary_format() {
        let started_at = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let execution = JobExecution {
            id: JobExecutionId(7),
            job_id: JobId(3),
            started_at,
            ended_at: started_at + chrono::Duration::minutes(1),
            status: JobExecutionStatus::Success,
        };
        let summary = serde_json::to_value(JobExecutionSummary::from(&execution)).unwrap();
        assert_eq!(
            summary,
            serde_json::json!({
                "id": 7,
                "job_id": 3,
                "started_at": "2021-01-01 00:00:00",
                "ended_at": "2021-01-01 00:01:00",
                "status": "SUCCESS",
            })
        );
    }
}
