//! Statement generation: completion transport retry plus extraction of a
//! single SQL statement from free-form model output.

use crate::completion::{CompletionError, CompletionOptions, CompletionProvider};
use crate::error::AgentError;
use std::time::Duration;
use tracing::{debug, warn};

const TRANSPORT_ATTEMPTS: u32 = 3;
const BACKOFF_START_MS: u64 = 250;

/// Produces one SQL statement candidate for the prompt. Transport failures
/// are retried; a completion with no recognizable statement is not.
pub async fn generate_statement(
    provider: &dyn CompletionProvider,
    prompt: &str,
    opts: &CompletionOptions,
) -> Result<String, AgentError> {
    let raw = complete_with_retry(provider, prompt, opts).await?;
    match extract_statement(&raw) {
        Some(sql) => {
            debug!("Extracted statement: {}", sql);
            Ok(sql)
        }
        None => {
            warn!("Completion contained no usable statement: {}", raw.trim());
            Err(AgentError::NoQueryFound)
        }
    }
}

/// Calls the completion backend, retrying transport failures with doubling
/// backoff. Retries cover transport only; what the model says is never
/// retried here.
async fn complete_with_retry(
    provider: &dyn CompletionProvider,
    prompt: &str,
    opts: &CompletionOptions,
) -> Result<String, AgentError> {
    let mut attempt = 1;
    let mut backoff = Duration::from_millis(BACKOFF_START_MS);
    loop {
        match provider.complete(prompt, opts).await {
            Ok(raw) => return Ok(raw),
            Err(err) if attempt < TRANSPORT_ATTEMPTS => {
                warn!(
                    "Completion attempt {}/{} failed: {}",
                    attempt, TRANSPORT_ATTEMPTS, err
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(CompletionError::Timeout) => return Err(AgentError::GenerationTimeout),
            Err(CompletionError::Unavailable(msg)) => {
                return Err(AgentError::GenerationUnavailable(msg));
            }
        }
    }
}

/// Pulls one SQL statement out of model output. Fenced code blocks are
/// preferred; otherwise the scan starts at the first SELECT or WITH and
/// stops at the first semicolon.
fn extract_statement(output: &str) -> Option<String> {
    if let Some(block) = first_fenced_block(output) {
        if let Some(stmt) = statement_in(block) {
            return Some(stmt);
        }
    }
    statement_in(output)
}

fn statement_in(text: &str) -> Option<String> {
    let start = keyword_start(text)?;
    let tail = &text[start..];
    let stmt = match tail.find(';') {
        Some(end) => &tail[..end],
        None => tail,
    };
    let stmt = stmt.trim().trim_end_matches('`').trim();
    if stmt.is_empty() {
        None
    } else {
        Some(stmt.to_string())
    }
}

/// Earliest word-boundary SELECT, or WITH when a SELECT follows it.
fn keyword_start(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let select = find_word(&lower, "select");
    let with = find_word(&lower, "with");
    match (with, select) {
        (Some(w), Some(s)) if w < s => Some(w),
        (_, Some(s)) => Some(s),
        _ => None,
    }
}

fn find_word(lower: &str, word: &str) -> Option<usize> {
    let bytes = lower.as_bytes();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();
        let head_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let tail_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if head_ok && tail_ok {
            return Some(start);
        }
        from = end;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // the rest of the opening line is a language tag like `sql`
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    match body.find("```") {
        Some(close) => Some(&body[..close]),
        None => Some(body),
    }
}
