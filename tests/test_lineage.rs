use data_lineage::{
    Result,
    binder::bind_statement,
    catalog::{CatalogGateway, CatalogReader, InMemoryCatalog},
    config::SqlDialect,
    lineage::{LineageEdge, extract_lineage},
    parser::parse,
    test_utils::{TEST_SOURCE, TestLineage, edge_label, load_lineage_tests},
};

fn run_lineage(test: &TestLineage) -> Result<Vec<LineageEdge>> {
    let catalog = InMemoryCatalog::from_definition(&test.catalog_definition())?;
    let session = catalog.begin()?;
    let source = session
        .get_source_by_name(TEST_SOURCE)?
        .expect("Test source is always defined");

    let mut edges = vec![];
    for statement in parse(&test.sql, &test.name, SqlDialect::Postgres)? {
        let bound = bind_statement(&session, &source, &statement)?;
        edges.extend(extract_lineage(&bound)?);
    }
    Ok(edges)
}

#[test]
fn test_lineage() {
    let test_lineage_data =
        load_lineage_tests().expect("Cannot parse test cases defined in toml");

    for test in test_lineage_data.tests {
        println!("Testing lineage for `{}`: {}", test.name, test.sql);
        let lineage = run_lineage(&test);
        match (&test.error, lineage) {
            (None, Ok(edges)) => {
                let edges = edges.iter().map(edge_label).collect::<Vec<_>>();
                assert_eq!(edges, test.edges, "Wrong lineage for `{}`", test.name);
            }
            (Some(kind), Err(err)) => {
                println!("Rejected as expected: {}", err);
                assert_eq!(
                    &err.kind().to_string(),
                    kind,
                    "Wrong error for `{}`: {}",
                    test.name,
                    err
                );
            }
            (None, Err(err)) => panic!("Could not extract lineage for `{}`: {}", test.name, err),
            (Some(kind), Ok(edges)) => panic!(
                "Expected {} for `{}`, got edges {:?}",
                kind,
                test.name,
                edges.iter().map(edge_label).collect::<Vec<_>>()
            ),
        }
    }
}

#[test]
fn test_lineage_is_deterministic() {
    let test_lineage_data =
        load_lineage_tests().expect("Cannot parse test cases defined in toml");

    for test in test_lineage_data.tests.iter().filter(|t| t.error.is_none()) {
        let first = run_lineage(test).unwrap();
        let second = run_lineage(test).unwrap();
        assert_eq!(first, second, "Lineage of `{}` changed between runs", test.name);
    }
}
