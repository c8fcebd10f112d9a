use std::{collections::BTreeMap, fmt::Display};

use serde::Deserialize;

use crate::{
    catalog::{CatalogDefinition, SchemaDefinition, SourceDefinition, TableDefinition},
    lineage::LineageEdge,
};

pub const LINEAGE_TESTS_FILE: &str = "tests/lineage_tests.toml";
pub const TEST_SOURCE: &str = "pg";
pub const TEST_DEFAULT_SCHEMA: &str = "public";

#[derive(Deserialize, Debug, Clone)]
pub struct TestTable {
    /// `schema.table`
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestLineage {
    pub name: String,
    pub sql: String,
    pub tables: Vec<TestTable>,
    /// `schema.table.column -> schema.table.column`, in extraction order.
    #[serde(default)]
    pub edges: Vec<String>,
    /// Expected `ErrorKind` name when the statement must be rejected.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestLineageData {
    pub tests: Vec<TestLineage>,
}

impl Display for TestLineageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl TestLineage {
    /// One source `pg` whose default schema is `public`, holding the fixture's tables.
    pub fn catalog_definition(&self) -> CatalogDefinition {
        let mut schemas: BTreeMap<String, Vec<TableDefinition>> = BTreeMap::new();
        schemas.entry(TEST_DEFAULT_SCHEMA.to_owned()).or_default();
        for table in &self.tables {
            let (schema, name) = table
                .name
                .split_once('.')
                .unwrap_or((TEST_DEFAULT_SCHEMA, table.name.as_str()));
            schemas
                .entry(schema.to_owned())
                .or_default()
                .push(TableDefinition {
                    name: name.to_owned(),
                    columns: table.columns.clone(),
                });
        }
        CatalogDefinition {
            sources: vec![SourceDefinition {
                name: TEST_SOURCE.to_owned(),
                host: None,
                default_schema: Some(TEST_DEFAULT_SCHEMA.to_owned()),
                schemas: schemas
                    .into_iter()
                    .map(|(name, tables)| SchemaDefinition { name, tables })
                    .collect(),
            }],
        }
    }
}

pub fn load_lineage_tests() -> anyhow::Result<TestLineageData> {
    let content = std::fs::read_to_string(LINEAGE_TESTS_FILE)?;
    Ok(toml::from_str(&content)?)
}

/// Renders an edge without the source prefix, e.g. `public.s.x -> public.t.a`.
pub fn edge_label(edge: &LineageEdge) -> String {
    let strip = |parts: &[String]| parts.get(1..).unwrap_or_default().join(".");
    format!(
        "{} -> {}",
        strip(&edge.source.fqdn.0),
        strip(&edge.target.fqdn.0)
    )
}
