//! The request pipeline: resolve schema, build prompt, generate, validate,
//! execute, compose. Validation rejections feed a bounded regeneration
//! loop; every other failure propagates unchanged.

use crate::catalog::SchemaCatalog;
use crate::completion::{CompletionOptions, CompletionProvider};
use crate::compose;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::execute;
use crate::generate;
use crate::prompt;
use crate::validate;
use palaver_db::Database;
use std::sync::Arc;
use tracing::{debug, info, warn};

const GENERATION_TEMPERATURE: f32 = 0.0;
const SUMMARY_TEMPERATURE: f32 = 0.2;

/// A composed answer plus the evidence that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    /// The validated statement that was executed.
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// True when the tabular fallback answered instead of the summarizer.
    pub degraded: bool,
}

pub struct QueryAgent {
    db: Arc<Database>,
    catalog: SchemaCatalog,
    provider: Arc<dyn CompletionProvider>,
    config: AgentConfig,
}

impl QueryAgent {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn CompletionProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&db)),
            db,
            provider,
            config,
        }
    }

    /// Re-introspects the database so the next question sees current tables.
    pub async fn refresh_schema(&self) -> Result<(), AgentError> {
        self.catalog.refresh().await.map(|_| ())
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, AgentError> {
        debug!("Stage Received: {:?}", question);
        let schema = self.catalog.describe().await?;
        debug!("Stage SchemaResolved: {} tables", schema.tables.len());

        let base_prompt = prompt::build_prompt(question, &schema, self.config.max_prompt_chars);
        debug!("Stage PromptBuilt: {} chars", base_prompt.len());

        let gen_opts = self.options(GENERATION_TEMPERATURE);
        let mut prompt_text = base_prompt.clone();
        let mut attempts: u32 = 0;
        let validated = loop {
            let candidate =
                generate::generate_statement(self.provider.as_ref(), &prompt_text, &gen_opts)
                    .await?;
            debug!("Stage Generated (attempt {}): {}", attempts, candidate);

            match validate::validate_statement(&candidate, &schema, self.config.row_ceiling) {
                Ok(validated) => break validated,
                Err(err) if err.is_rejection() => {
                    warn!("Stage Rejected (attempt {}): {}", attempts, err);
                    if attempts >= self.config.retry_bound {
                        return Err(AgentError::UnresolvableQuery {
                            attempts,
                            reason: err.to_string(),
                        });
                    }
                    attempts += 1;
                    prompt_text =
                        prompt::build_retry_prompt(&base_prompt, &candidate, &err.to_string());
                }
                Err(err) => return Err(err),
            }
        };
        debug!(
            "Stage Validated{}: {}",
            if validated.limit_injected { " (row cap added)" } else { "" },
            validated.sql
        );

        let table = execute::execute_query(
            Arc::clone(&self.db),
            validated.sql.clone(),
            self.config.row_ceiling,
            self.config.exec_timeout_ms,
        )
        .await?;
        debug!("Stage Executed: {} rows", table.rows.len());

        let composed = compose::compose_answer(
            self.provider.as_ref(),
            question,
            &table,
            &self.options(SUMMARY_TEMPERATURE),
        )
        .await;
        info!(
            "Question answered with {} rows{}",
            table.rows.len(),
            if composed.degraded { " (degraded)" } else { "" }
        );

        Ok(Answer {
            answer: composed.answer,
            sql: validated.sql,
            columns: table.columns,
            rows: table.rows,
            degraded: composed.degraded,
        })
    }

    fn options(&self, temperature: f32) -> CompletionOptions {
        CompletionOptions {
            model: self.config.model.clone(),
            temperature,
            timeout_ms: self.config.completion_timeout_ms,
        }
    }
}
