use thiserror::Error;

/// Everything that can go wrong between receiving a question and
/// returning an answer.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("schema catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("query generation timed out")]
    GenerationTimeout,

    #[error("query generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("no SQL statement found in the model output")]
    NoQueryFound,

    #[error("unknown {kind} '{name}'")]
    UnknownReference { kind: &'static str, name: String },

    #[error("not a single read-only query: {0}")]
    NotReadOnly(String),

    #[error("SQL syntax error: {0}")]
    SyntaxError(String),

    #[error("no valid query after {attempts} regeneration attempts: {reason}")]
    UnresolvableQuery { attempts: u32, reason: String },

    #[error("query execution timed out")]
    ExecutionTimeout,

    #[error("query execution failed: {0}")]
    ExecutionError(String),
}

impl AgentError {
    /// Stable machine-readable code for API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::CatalogUnavailable(_) => "CatalogUnavailable",
            AgentError::GenerationTimeout => "GenerationTimeout",
            AgentError::GenerationUnavailable(_) => "GenerationUnavailable",
            AgentError::NoQueryFound => "NoQueryFound",
            AgentError::UnknownReference { .. } => "UnknownReference",
            AgentError::NotReadOnly(_) => "NotReadOnly",
            AgentError::SyntaxError(_) => "SyntaxError",
            AgentError::UnresolvableQuery { .. } => "UnresolvableQuery",
            AgentError::ExecutionTimeout => "ExecutionTimeout",
            AgentError::ExecutionError(_) => "ExecutionError",
        }
    }

    /// Validation rejections feed the regeneration loop instead of failing
    /// the request outright.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownReference { .. }
                | AgentError::NotReadOnly(_)
                | AgentError::SyntaxError(_)
        )
    }
}
