use serde::{Deserialize, Serialize};

use super::{CatalogSession, Source};
use crate::error::Result;

/// Declarative description of catalog metadata, e.g. loaded from a JSON or TOML file.
///
/// ```toml
/// [[sources]]
/// name = "pg"
/// default_schema = "public"
///
/// [[sources.schemas]]
/// name = "public"
///
/// [[sources.schemas.tables]]
/// name = "orders"
/// columns = ["id", "total"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDefinition {
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub default_schema: Option<String>,
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<String>,
}

impl CatalogDefinition {
    /// Upserts every source, schema, table and column into the session.
    ///
    /// Existing entities keep their identifiers; new columns are appended after existing ones.
    pub fn apply<S: CatalogSession>(&self, session: &mut S) -> Result<Vec<Source>> {
        let mut sources = vec![];
        for source_def in &self.sources {
            sources.push(source_def.apply(session)?);
        }
        Ok(sources)
    }

    pub fn source(&self, name: &str) -> Option<&SourceDefinition> {
        self.sources.iter().find(|source| source.name == name)
    }
}

impl SourceDefinition {
    pub fn apply<S: CatalogSession>(&self, session: &mut S) -> Result<Source> {
        let source = match session.get_source_by_name(&self.name)? {
            Some(source) => source,
            None => session.add_source(&self.name, self.host.as_deref())?,
        };

        for schema_def in &self.schemas {
            let schema = session.upsert_schema(source.id, &schema_def.name)?;
            for table_def in &schema_def.tables {
                let table = session.upsert_table(schema.id, &table_def.name)?;
                for column_name in &table_def.columns {
                    session.upsert_column(table.id, column_name)?;
                }
            }
        }

        if let Some(default_schema) = &self.default_schema {
            let schema = session.upsert_schema(source.id, default_schema)?;
            session.set_default_schema(source.id, schema.id)?;
        }

        log::debug!(
            "Applied definition of source `{}` ({} schemas).",
            self.name,
            self.schemas.len()
        );
        Ok(source)
    }
}
