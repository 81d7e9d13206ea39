//! Scripted completion provider shared across pipeline tests.

use crate::completion::{CompletionError, CompletionOptions, CompletionProvider};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Plays back a fixed sequence of completion results and counts calls.
pub(crate) struct Scripted {
    responses: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: AtomicU32,
}

impl Scripted {
    pub(crate) fn new(responses: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for Scripted {
    async fn complete(
        &self,
        _prompt: &str,
        _opts: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CompletionError::Unavailable("script exhausted".into())))
    }
}
