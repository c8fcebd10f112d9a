use std::sync::Barrier;

use chrono::NaiveDateTime;
use data_lineage::{
    Error, ErrorKind,
    catalog::{
        CatalogDefinition, CatalogGateway, CatalogReader, InMemoryCatalog, InMemorySession,
        JobExecutionStatus, JobId, SourceId,
    },
    config::SqlDialect,
    graph::NodeKind,
    parser::parse,
    recorder::record_run,
    service::{AnalyzeRequest, LineageService},
};

const CATALOG: &str = r#"
[[sources]]
name = "pg"
default_schema = "public"

[[sources.schemas]]
name = "public"
tables = [
    { name = "orders", columns = ["id", "customer_id", "total"] },
    { name = "order_summary", columns = ["order_id", "amount"] },
]
"#;

const SUMMARY_SQL: &str =
    "insert into order_summary (order_id, amount) select o.id, o.total from orders o";

fn catalog() -> (InMemoryCatalog, SourceId) {
    let definition: CatalogDefinition = toml::from_str(CATALOG).unwrap();
    let catalog = InMemoryCatalog::from_definition(&definition).unwrap();
    let source = catalog
        .begin()
        .unwrap()
        .get_source_by_name("pg")
        .unwrap()
        .unwrap();
    (catalog, source.id)
}

fn ts(value: &str) -> NaiveDateTime {
    value.parse().unwrap()
}

fn assert_nothing_recorded(catalog: &InMemoryCatalog, source_id: SourceId, job_name: &str) {
    let session = catalog.begin().unwrap();
    assert_eq!(session.get_job_by_name(source_id, job_name).unwrap(), None);
    assert!(session.get_column_lineages(None).unwrap().is_empty());
}

#[test]
fn test_record_run_persists_execution_and_edges() {
    let (catalog, source_id) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();

    let run = record_run(
        &catalog,
        "summarize",
        source_id,
        &statements,
        ts("2021-01-01T00:00:00"),
        ts("2021-01-01T00:01:00"),
    )
    .unwrap();
    assert_eq!(run.execution.status, JobExecutionStatus::Success);
    assert_eq!(run.execution.job_id, run.job.id);
    assert_eq!(run.edges.len(), 2);

    let session = catalog.begin().unwrap();
    let records = session.get_column_lineages(None).unwrap();
    let recorded = records
        .iter()
        .map(|r| {
            (
                r.source.fqdn.to_string(),
                r.target.fqdn.to_string(),
                r.job.name.clone(),
                r.job_execution.id,
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        recorded,
        vec![
            (
                "pg.public.orders.id".to_owned(),
                "pg.public.order_summary.order_id".to_owned(),
                "summarize".to_owned(),
                run.execution.id,
            ),
            (
                "pg.public.orders.total".to_owned(),
                "pg.public.order_summary.amount".to_owned(),
                "summarize".to_owned(),
                run.execution.id,
            ),
        ]
    );
    assert_eq!(
        session.get_job_execution(run.execution.id).unwrap(),
        run.execution
    );
}

#[test]
fn test_job_is_reused_across_runs() {
    let (catalog, source_id) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();
    let record = |start: &str, end: &str| {
        record_run(&catalog, "summarize", source_id, &statements, ts(start), ts(end)).unwrap()
    };

    let first = record("2021-01-01T00:00:00", "2021-01-01T00:01:00");
    let second = record("2021-01-02T00:00:00", "2021-01-02T00:01:00");
    assert_eq!(first.job.id, second.job.id);
    assert_ne!(first.execution.id, second.execution.id);

    let session = catalog.begin().unwrap();
    assert_eq!(session.get_column_lineages(None).unwrap().len(), 4);
}

/// Holds every session at `begin` until both runs have one, so neither sees the other's job.
struct LockstepCatalog {
    inner: InMemoryCatalog,
    barrier: Barrier,
}

impl CatalogGateway for LockstepCatalog {
    type Session = InMemorySession;

    fn begin(&self) -> data_lineage::Result<InMemorySession> {
        let session = self.inner.begin()?;
        self.barrier.wait();
        Ok(session)
    }
}

#[test]
fn test_concurrent_first_runs_share_the_job() {
    let (catalog, source_id) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();
    let lockstep = LockstepCatalog {
        inner: catalog.clone(),
        barrier: Barrier::new(2),
    };

    let runs = std::thread::scope(|scope| {
        let handles = ["2021-01-01T00:00:00", "2021-01-02T00:00:00"].map(|start| {
            let lockstep = &lockstep;
            let statements = &statements;
            scope.spawn(move || {
                record_run(lockstep, "summarize", source_id, statements, ts(start), ts(start))
            })
        });
        handles.map(|handle| handle.join().unwrap().unwrap())
    });

    assert_eq!(runs[0].job, runs[1].job);
    for run in &runs {
        assert_eq!(run.execution.job_id, run.job.id);
    }
    let session = catalog.begin().unwrap();
    let job = session.get_job_by_name(source_id, "summarize").unwrap().unwrap();
    assert_eq!(runs[0].job, job);
    assert_eq!(
        session
            .get_column_lineages(Some([job.id].as_slice()))
            .unwrap()
            .len(),
        4
    );
}

#[test]
fn test_failed_binding_records_nothing() {
    let (catalog, source_id) = catalog();
    // The first statement is valid; the second references a missing column.
    let statements = parse(
        "insert into order_summary (order_id) select id from orders; \
         insert into order_summary (amount) select totl from orders",
        "broken",
        SqlDialect::Postgres,
    )
    .unwrap();

    let err = record_run(
        &catalog,
        "broken",
        source_id,
        &statements,
        ts("2021-01-01T00:00:00"),
        ts("2021-01-01T00:01:00"),
    )
    .unwrap_err();
    assert_eq!(err, Error::ColumnNotFound("totl".to_owned()));
    assert_nothing_recorded(&catalog, source_id, "broken");
}

#[test]
fn test_end_before_start_is_rejected() {
    let (catalog, source_id) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();

    let err = record_run(
        &catalog,
        "summarize",
        source_id,
        &statements,
        ts("2021-01-01T00:01:00"),
        ts("2021-01-01T00:00:00"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SemanticError);
    assert_nothing_recorded(&catalog, source_id, "summarize");
}

#[test]
fn test_unknown_source_is_rejected() {
    let (catalog, _) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();

    let err = record_run(
        &catalog,
        "summarize",
        SourceId(9999),
        &statements,
        ts("2021-01-01T00:00:00"),
        ts("2021-01-01T00:01:00"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SemanticError);
}

#[test]
fn test_unavailable_catalog() {
    let (catalog, source_id) = catalog();
    let statements = parse(SUMMARY_SQL, "summarize", SqlDialect::Postgres).unwrap();
    catalog.set_offline(true);

    let err = record_run(
        &catalog,
        "summarize",
        source_id,
        &statements,
        ts("2021-01-01T00:00:00"),
        ts("2021-01-01T00:01:00"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogUnavailable);

    catalog.set_offline(false);
    assert_nothing_recorded(&catalog, source_id, "summarize");
}

#[test]
fn test_service_analyze_and_graph() {
    let (catalog, source_id) = catalog();
    let service = LineageService::new(catalog, SqlDialect::Postgres);

    let summary = service
        .analyze(&AnalyzeRequest {
            query: SUMMARY_SQL.to_owned(),
            name: "summarize".to_owned(),
            start_time: "2021-01-01T00:00:00".to_owned(),
            end_time: "2021-01-01T00:01:00".to_owned(),
            source_id,
        })
        .unwrap();
    assert_eq!(summary.execution.started_at, "2021-01-01 00:00:00");
    assert_eq!(summary.execution.ended_at, "2021-01-01 00:01:00");
    assert_eq!(summary.execution.status, JobExecutionStatus::Success);
    assert_eq!(summary.edges.len(), 2);
    assert_eq!(summary.edges[0].source, "pg.public.orders.id");
    assert_eq!(summary.edges[0].target, "pg.public.order_summary.order_id");

    let graph = service.lineage_graph(None).unwrap();
    // Two source columns, one task and two target columns.
    assert_eq!(graph.nodes.len(), 5);
    assert_eq!(graph.edges.len(), 4);
    assert_eq!(
        graph
            .nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Task)
            .map(|node| node.name.as_str())
            .collect::<Vec<_>>(),
        vec!["summarize"]
    );
    let task_id = format!("task:{}", summary.execution.job_id);
    assert!(graph.edges.iter().all(|e| e.source == task_id || e.target == task_id));

    let same_job = service
        .lineage_graph(Some([summary.execution.job_id].as_slice()))
        .unwrap();
    assert_eq!(same_job, graph);
    let no_job = service.lineage_graph(Some([JobId(9999)].as_slice())).unwrap();
    assert!(no_job.nodes.is_empty());
}

#[test]
fn test_graph_merges_runs_of_a_job() {
    let (catalog, source_id) = catalog();
    let service = LineageService::new(catalog, SqlDialect::Postgres);
    let request = AnalyzeRequest {
        query: SUMMARY_SQL.to_owned(),
        name: "summarize".to_owned(),
        start_time: "2021-01-01T00:00:00".to_owned(),
        end_time: "2021-01-01T00:01:00".to_owned(),
        source_id,
    };
    let first = service.analyze(&request).unwrap();
    let second = service
        .analyze(&AnalyzeRequest {
            start_time: "2021-01-02T00:00:00".to_owned(),
            end_time: "2021-01-02T00:01:00".to_owned(),
            ..request
        })
        .unwrap();
    assert_ne!(first.execution.id, second.execution.id);
    assert_eq!(first.execution.job_id, second.execution.job_id);

    let graph = service.lineage_graph(None).unwrap();
    let tasks = graph
        .nodes
        .iter()
        .filter(|node| node.kind == NodeKind::Task)
        .map(|node| node.id.clone())
        .collect::<Vec<_>>();
    assert_eq!(tasks, vec![format!("task:{}", first.execution.job_id)]);
    assert_eq!(graph.nodes.len(), 5);
    // Edges are kept per recorded lineage row.
    assert_eq!(graph.edges.len(), 8);
}

#[test]
fn test_service_rejects_bad_requests() {
    let (catalog, source_id) = catalog();
    let service = LineageService::new(catalog, SqlDialect::Postgres);
    let request = AnalyzeRequest {
        query: SUMMARY_SQL.to_owned(),
        name: "summarize".to_owned(),
        start_time: "yesterday".to_owned(),
        end_time: "2021-01-01T00:01:00".to_owned(),
        source_id,
    };
    assert_eq!(
        service.analyze(&request).unwrap_err().kind(),
        ErrorKind::SemanticError
    );

    let request = AnalyzeRequest {
        query: "insert into order_summary selec id from orders".to_owned(),
        start_time: "2021-01-01T00:00:00".to_owned(),
        ..request
    };
    assert_eq!(
        service.analyze(&request).unwrap_err().kind(),
        ErrorKind::SyntaxError
    );
    assert_nothing_recorded(service.gateway(), source_id, "summarize");
}

#[test]
fn test_service_parse_summary() {
    let (catalog, source_id) = catalog();
    let service = LineageService::new(catalog, SqlDialect::Postgres);

    let summary = service
        .parse("select o.id, o.total as amount from orders o", source_id)
        .unwrap();
    assert_eq!(summary.select_tables, vec!["pg.public.orders"]);
    assert_eq!(summary.select_columns, vec!["id", "amount"]);
}
