use std::fmt::Debug;

use async_trait::async_trait;
use serde::Deserialize;

use crate::catalog::{
    CatalogDefinition, CatalogGateway, CatalogReader, ManagedSession, SourceId,
};

/// Credentials of the live database whose metadata a scan reads.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionInfo {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("user", &self.user)
            .field("password", &"********")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Reads the metadata of a live database and upserts it into the catalog.
#[async_trait]
pub trait CatalogScanner: Send + Sync {
    async fn scan(&self, connection: &ConnectionInfo, source_id: SourceId) -> anyhow::Result<()>;
}

/// Scans from a fixed [`CatalogDefinition`] instead of a live connection.
///
/// The definition entry whose name matches the registered source is upserted; a source the
/// definition does not describe fails like an unreachable database would.
pub struct CatalogDefinitionScanner<G: CatalogGateway> {
    gateway: G,
    definition: CatalogDefinition,
}

impl<G: CatalogGateway> CatalogDefinitionScanner<G> {
    pub fn new(gateway: G, definition: CatalogDefinition) -> Self {
        Self {
            gateway,
            definition,
        }
    }
}

#[async_trait]
impl<G: CatalogGateway> CatalogScanner for CatalogDefinitionScanner<G> {
    async fn scan(&self, connection: &ConnectionInfo, source_id: SourceId) -> anyhow::Result<()> {
        let mut session = ManagedSession::begin(&self.gateway)?;
        let source = session.get_source(source_id)?;
        let source_def = self.definition.source(&source.name).ok_or_else(|| {
            anyhow::anyhow!(
                "Cannot connect to {}:{}/{} for source `{}`.",
                connection.host,
                connection.port,
                connection.database,
                source.name
            )
        })?;
        source_def.apply(&mut *session)?;
        session.commit()?;
        log::debug!("Scanned source `{}` from its definition.", source.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let connection = ConnectionInfo {
            user: "etl".to_owned(),
            password: "hunter2".to_owned(),
            database: "warehouse".to_owned(),
            host: "db.internal".to_owned(),
            port: 5432,
        };
        let debug = format!("{:?}", connection);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("warehouse"));
    }
}
