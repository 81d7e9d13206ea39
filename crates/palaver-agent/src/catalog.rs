//! Cached view of the live database schema.

use crate::error::AgentError;
use palaver_db::Database;
use palaver_db::introspect::SchemaDescriptor;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Serves schema descriptors to the pipeline. Introspection runs once and
/// the result is cached until `refresh` is called, so steady-state requests
/// never touch `sqlite_schema`.
pub struct SchemaCatalog {
    db: Arc<Database>,
    cached: RwLock<Option<Arc<SchemaDescriptor>>>,
}

impl SchemaCatalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cached: RwLock::new(None),
        }
    }

    pub async fn describe(&self) -> Result<Arc<SchemaDescriptor>, AgentError> {
        if let Some(schema) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }
        self.refresh().await
    }

    /// Re-introspects the database and replaces the cached descriptor.
    pub async fn refresh(&self) -> Result<Arc<SchemaDescriptor>, AgentError> {
        let db = Arc::clone(&self.db);
        let schema = tokio::task::spawn_blocking(move || db.describe_schema())
            .await
            .map_err(|e| {
                AgentError::CatalogUnavailable(format!("introspection task failed: {}", e))
            })?
            .map_err(|e| AgentError::CatalogUnavailable(e.to_string()))?;

        let schema = Arc::new(schema);
        info!("Schema catalog refreshed: {} tables", schema.tables.len());
        *self.cached.write().await = Some(Arc::clone(&schema));
        Ok(schema)
    }
}
