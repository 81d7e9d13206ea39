//! HTTP surface: user, group and message endpoints plus the
//! natural-language question endpoint backed by the query agent.

pub mod ask;
pub mod groups;
pub mod messages;
pub mod users;

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use palaver_agent::QueryAgent;
use palaver_db::Database;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub agent: QueryAgent,
}

pub type AppState = Arc<AppStateInner>;

/// SQLite's CURRENT_TIMESTAMP stores "YYYY-MM-DD HH:MM:SS" with no zone
/// marker; treat it as UTC. RFC 3339 strings parse directly.
pub(crate) fn parse_sqlite_timestamp(raw: &str, entity: &str, id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on {} {}: {}", raw, entity, id, e);
            DateTime::default()
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use palaver_agent::completion::CompletionOptions;
    use palaver_agent::{AgentConfig, CompletionError, CompletionProvider};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Completion stub that replays a fixed script.
    pub struct Scripted {
        responses: Mutex<VecDeque<Result<String, CompletionError>>>,
    }

    impl Scripted {
        pub fn new(responses: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(
            &self,
            _prompt: &str,
            _opts: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".into())))
        }
    }

    /// In-memory state with a scripted completion backend.
    pub fn test_state(responses: Vec<Result<String, CompletionError>>) -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let agent = QueryAgent::new(
            Arc::clone(&db),
            Arc::new(Scripted::new(responses)),
            AgentConfig::default(),
        );
        Arc::new(AppStateInner { db, agent })
    }
}
