use data_lineage::{
    Error,
    binder::{Binder, BoundBody, BoundExpr, Name, bind_query_summary, bind_statement},
    catalog::{CatalogDefinition, CatalogGateway, CatalogReader, InMemoryCatalog, Source},
    config::SqlDialect,
    parser::parse,
};

const CATALOG: &str = r#"
[[sources]]
name = "pg"
default_schema = "public"

[[sources.schemas]]
name = "public"
tables = [
    { name = "orders", columns = ["id", "customer_id", "total"] },
    { name = "customers", columns = ["id", "name"] },
    { name = "t", columns = ["a", "b"] },
]

[[sources.schemas]]
name = "staging"
tables = [
    { name = "orders", columns = ["id", "raw"] },
    { name = "events", columns = ["id", "payload"] },
]
"#;

fn catalog() -> (InMemoryCatalog, Source) {
    let definition: CatalogDefinition = toml::from_str(CATALOG).unwrap();
    let catalog = InMemoryCatalog::from_definition(&definition).unwrap();
    let source = catalog
        .begin()
        .unwrap()
        .get_source_by_name("pg")
        .unwrap()
        .unwrap();
    (catalog, source)
}

fn names(reference: &str) -> Vec<Name> {
    reference.split('.').map(Name::parse).collect()
}

fn bind(catalog: &InMemoryCatalog, source: &Source, sql: &str) -> data_lineage::Result<BoundBody> {
    let session = catalog.begin()?;
    let statement = parse(sql, "test", SqlDialect::Postgres)?.remove(0);
    Ok(bind_statement(&session, source, &statement)?.body)
}

#[test]
fn test_resolve_table_search_order() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let mut binder = Binder::new(&session, &source);

    let table = binder.resolve_table(&names("orders")).unwrap();
    assert_eq!(table.fqdn.to_string(), "pg.public.orders");

    let table = binder.resolve_table(&names("events")).unwrap();
    assert_eq!(table.fqdn.to_string(), "pg.staging.events");

    let table = binder.resolve_table(&names("staging.orders")).unwrap();
    assert_eq!(table.fqdn.to_string(), "pg.staging.orders");

    let table = binder.resolve_table(&names("pg.staging.orders")).unwrap();
    assert_eq!(table.fqdn.to_string(), "pg.staging.orders");

    assert_eq!(
        binder.resolve_table(&names("other.public.orders")),
        Err(Error::TableNotFound("other.public.orders".to_owned()))
    );
    assert_eq!(
        binder.resolve_table(&names("public.events")),
        Err(Error::TableNotFound("public.events".to_owned()))
    );
}

#[test]
fn test_resolve_table_identifier_case() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let mut binder = Binder::new(&session, &source);

    assert!(binder.resolve_table(&names("ORDERS")).is_ok());
    assert!(binder.resolve_table(&names("\"orders\"")).is_ok());
    assert!(matches!(
        binder.resolve_table(&names("\"Orders\"")),
        Err(Error::TableNotFound(_))
    ));
}

#[test]
fn test_qualified_column_resolution_is_stable() {
    let (catalog, source) = catalog();
    let sql = "select o.id from orders o join customers c on c.id = o.customer_id";

    let resolved_id = || {
        let session = catalog.begin().unwrap();
        let statement = parse(sql, "test", SqlDialect::Postgres).unwrap().remove(0);
        let bound = bind_statement(&session, &source, &statement).unwrap();
        match &bound.body {
            BoundBody::Query(query) => match &query.branches[0][0].expr {
                BoundExpr::Column(column_ref) => bound.catalog_column(*column_ref).unwrap().clone(),
                other => panic!("Expected a column, got {:?}", other),
            },
            other => panic!("Expected a query, got {:?}", other),
        }
    };

    let first = resolved_id();
    let second = resolved_id();
    assert_eq!(first.fqdn.to_string(), "pg.public.orders.id");
    assert_eq!(first.id, second.id);
}

#[test]
fn test_ambiguous_column_names_its_tables() {
    let (catalog, source) = catalog();
    let err = bind(
        &catalog,
        &source,
        "select id from orders o join customers c on c.id = o.customer_id",
    )
    .unwrap_err();
    match err {
        Error::Semantic(msg) => {
            assert!(msg.contains("ambiguous"), "{}", msg);
            assert!(msg.contains("[o, c]"), "{}", msg);
        }
        other => panic!("Expected a semantic error, got {:?}", other),
    }
}

#[test]
fn test_outer_scope_is_searched_after_inner() {
    let (catalog, source) = catalog();
    // `id` is found in the subquery's own scope first, so it is not ambiguous.
    let body = bind(
        &catalog,
        &source,
        "select total, (select max(id) from customers) from orders",
    );
    assert!(body.is_ok());

    // `total` only exists in the outer scope.
    let body = bind(
        &catalog,
        &source,
        "select id, (select max(total) from customers) from orders",
    );
    assert!(body.is_ok());
}

#[test]
fn test_missing_names() {
    let (catalog, source) = catalog();
    assert_eq!(
        bind(&catalog, &source, "select idd from orders").unwrap_err(),
        Error::ColumnNotFound("idd".to_owned())
    );
    assert_eq!(
        bind(&catalog, &source, "select o.idd from orders o").unwrap_err(),
        Error::ColumnNotFound("o.idd".to_owned())
    );
    assert_eq!(
        bind(&catalog, &source, "select x.id from orders o").unwrap_err(),
        Error::TableNotFound("x".to_owned())
    );
    assert_eq!(
        bind(&catalog, &source, "select id from nowhere").unwrap_err(),
        Error::TableNotFound("nowhere".to_owned())
    );
}

#[test]
fn test_wildcard_lists_merged_columns_first() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let statement = parse(
        "select * from orders join customers using (id)",
        "test",
        SqlDialect::Postgres,
    )
    .unwrap()
    .remove(0);
    let bound = bind_statement(&session, &source, &statement).unwrap();
    assert_eq!(
        bound.output_columns(),
        vec!["id", "customer_id", "total", "name"]
    );
}

#[test]
fn test_qualified_wildcard() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let statement = parse(
        "select c.*, o.total from orders o join customers c on c.id = o.customer_id",
        "test",
        SqlDialect::Postgres,
    )
    .unwrap()
    .remove(0);
    let bound = bind_statement(&session, &source, &statement).unwrap();
    assert_eq!(bound.output_columns(), vec!["id", "name", "total"]);
}

#[test]
fn test_wildcard_without_from() {
    let (catalog, source) = catalog();
    assert!(matches!(
        bind(&catalog, &source, "select *"),
        Err(Error::Semantic(_))
    ));
}

#[test]
fn test_table_alias_renames_columns() {
    let (catalog, source) = catalog();
    assert!(bind(&catalog, &source, "select i, c from orders as o(i, c)").is_ok());
    assert_eq!(
        bind(&catalog, &source, "select customer_id from orders as o(i, c)").unwrap_err(),
        Error::ColumnNotFound("customer_id".to_owned())
    );
    assert!(matches!(
        bind(&catalog, &source, "select 1 from customers as c(a, b, z)"),
        Err(Error::Semantic(_))
    ));
}

#[test]
fn test_cte_shadows_catalog_table() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let statement = parse(
        "with orders as (select 1 as one) select one from orders",
        "test",
        SqlDialect::Postgres,
    )
    .unwrap()
    .remove(0);
    let summary = bind_query_summary(&session, &source, &statement).unwrap();
    assert!(summary.tables.is_empty());
    assert_eq!(summary.columns, vec!["one"]);
}

#[test]
fn test_union_width_mismatch() {
    let (catalog, source) = catalog();
    assert!(matches!(
        bind(&catalog, &source, "select id from orders union select id, name from customers"),
        Err(Error::Semantic(_))
    ));
}

#[test]
fn test_query_summary_lists_read_tables() {
    let (catalog, source) = catalog();
    let session = catalog.begin().unwrap();
    let statement = parse(
        "insert into t select o.id, c.name as customer from orders o join customers c on c.id = o.customer_id",
        "test",
        SqlDialect::Postgres,
    )
    .unwrap()
    .remove(0);
    let summary = bind_query_summary(&session, &source, &statement).unwrap();
    assert_eq!(
        summary
            .tables
            .iter()
            .map(|t| t.fqdn.to_string())
            .collect::<Vec<_>>(),
        vec!["pg.public.orders", "pg.public.customers"]
    );
    assert_eq!(summary.columns, vec!["id", "customer"]);
}
