//! Bounded execution of validated statements.

use crate::error::AgentError;
use palaver_db::Database;
use palaver_db::introspect::QueryTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Runs a validated statement with a wall-clock timeout and a hard row
/// ceiling. Both bounds hold regardless of what the statement itself
/// asked for.
pub async fn execute_query(
    db: Arc<Database>,
    sql: String,
    row_ceiling: usize,
    timeout_ms: u64,
) -> Result<QueryTable, AgentError> {
    let task = tokio::task::spawn_blocking(move || db.run_read_only_query(&sql, row_ceiling));
    match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
        Ok(joined) => joined
            .map_err(|e| AgentError::ExecutionError(format!("execution task failed: {}", e)))?
            .map_err(|e| AgentError::ExecutionError(e.to_string())),
        Err(_) => {
            // the blocking task keeps running detached until SQLite finishes;
            // the connection lock frees when it does
            warn!("Query execution exceeded {}ms budget", timeout_ms);
            Err(AgentError::ExecutionTimeout)
        }
    }
}
