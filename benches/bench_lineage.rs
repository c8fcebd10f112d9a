use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use data_lineage::{
    binder::bind_statement,
    catalog::{CatalogGateway, CatalogReader, InMemoryCatalog, Source},
    config::SqlDialect,
    lineage::extract_lineage,
    parser::parse,
    test_utils::{TEST_SOURCE, load_lineage_tests},
};
use sqlparser::ast::Statement;

struct Case {
    catalog: InMemoryCatalog,
    source: Source,
    statements: Vec<Statement>,
}

fn extract_lineage_tests(cases: &[Case]) {
    for case in cases {
        let Ok(session) = case.catalog.begin() else {
            continue;
        };
        for statement in &case.statements {
            if let Ok(bound) = bind_statement(&session, &case.source, statement) {
                let _ = extract_lineage(&bound);
            }
        }
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let test_lineage_data = load_lineage_tests().expect("Cannot parse test cases defined in toml");

    let mut cases = vec![];
    for test in test_lineage_data.tests.iter().filter(|t| t.error.is_none()) {
        let catalog = InMemoryCatalog::from_definition(&test.catalog_definition())
            .unwrap_or_else(|err| panic!("Could not build catalog due to: {:?}", &err));
        let source = catalog
            .begin()
            .and_then(|session| session.get_source_by_name(TEST_SOURCE))
            .ok()
            .flatten()
            .expect("Test source is always defined");
        let statements = parse(&test.sql, &test.name, SqlDialect::Postgres)
            .unwrap_or_else(|err| panic!("Could not parse sql due to: {:?}", &err));
        cases.push(Case {
            catalog,
            source,
            statements,
        });
    }

    c.bench_function("bench lineage tests", |b| {
        b.iter(|| extract_lineage_tests(black_box(&cases)))
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(100);
    targets = criterion_benchmark
);
criterion_main!(benches);
