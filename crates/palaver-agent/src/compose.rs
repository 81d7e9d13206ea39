//! Answer composition. A summarization call turns the result table into a
//! plain-language sentence; when that call fails, a deterministic tabular
//! rendering answers instead. Composition never fails a request that
//! executed successfully.

use crate::completion::{CompletionOptions, CompletionProvider};
use palaver_db::introspect::QueryTable;
use tracing::warn;

const SUMMARY_HEADER: &str = "Answer the question in one or two plain sentences using only the \
result table below. Do not invent values that are not in the table.";

const EMPTY_RESULT_ANSWER: &str = "No matching data was found for this question.";

/// The final answer text plus whether the tabular fallback was used.
#[derive(Debug, Clone)]
pub struct Composed {
    pub answer: String,
    pub degraded: bool,
}

pub async fn compose_answer(
    provider: &dyn CompletionProvider,
    question: &str,
    table: &QueryTable,
    opts: &CompletionOptions,
) -> Composed {
    if table.rows.is_empty() {
        return Composed {
            answer: EMPTY_RESULT_ANSWER.to_string(),
            degraded: false,
        };
    }

    let prompt = summary_prompt(question, table);
    match provider.complete(&prompt, opts).await {
        Ok(text) => {
            let answer = text.trim().to_string();
            if answer.is_empty() {
                warn!("AnswerCompositionDegraded: summarizer returned empty text");
                Composed {
                    answer: degraded_answer(table),
                    degraded: true,
                }
            } else {
                Composed {
                    answer,
                    degraded: false,
                }
            }
        }
        Err(err) => {
            warn!("AnswerCompositionDegraded: falling back to tabular answer: {}", err);
            Composed {
                answer: degraded_answer(table),
                degraded: true,
            }
        }
    }
}

fn summary_prompt(question: &str, table: &QueryTable) -> String {
    format!(
        "{}\n\nQuestion: {}\n\nResult table:\n{}\nAnswer:",
        SUMMARY_HEADER,
        question,
        render_table(table)
    )
}

fn degraded_answer(table: &QueryTable) -> String {
    format!("Here is what the query returned:\n{}", render_table(table))
}

fn render_table(table: &QueryTable) -> String {
    let mut out = String::new();
    out.push_str(&table.columns.join(" | "));
    out.push('\n');
    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(render_value).collect();
        out.push_str(&cells.join(" | "));
        out.push('\n');
    }
    if table.truncated {
        out.push_str("(result truncated)\n");
    }
    out
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
