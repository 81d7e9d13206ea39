/// Tunable knobs for the query pipeline. Read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier sent with every completion request.
    pub model: String,
    /// Upper bound on prompt size, in characters. Schema listings are
    /// truncated to fit.
    pub max_prompt_chars: usize,
    /// Hard cap on rows returned by any generated query.
    pub row_ceiling: usize,
    /// Wall-clock budget for executing a validated statement, in ms.
    pub exec_timeout_ms: u64,
    /// Wall-clock budget for a single completion request, in ms.
    pub completion_timeout_ms: u64,
    /// How many times a rejected statement may be regenerated before the
    /// request fails.
    pub retry_bound: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".into(),
            max_prompt_chars: 6000,
            row_ceiling: 200,
            exec_timeout_ms: 2000,
            completion_timeout_ms: 20_000,
            retry_bound: 2,
        }
    }
}
