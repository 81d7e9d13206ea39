//! Natural-language query agent.
//!
//! Turns a question about chat data into a single validated read-only SQL
//! statement, executes it against the live database, and composes a
//! plain-language answer. The pipeline is a bounded generate-validate-retry
//! loop; nothing the model produces reaches the database without passing
//! validation first.

pub mod catalog;
pub mod completion;
pub mod compose;
pub mod config;
pub mod error;
pub mod execute;
pub mod generate;
pub mod pipeline;
pub mod prompt;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use catalog::SchemaCatalog;
pub use completion::{ChatClient, CompletionError, CompletionProvider};
pub use config::AgentConfig;
pub use error::AgentError;
pub use pipeline::{Answer, QueryAgent};
