//! C10 — LLM Gateway.
//!
//! Grounded heavily on `llm/simple_external.rs` (SSE parsing loop,
//! per-provider endpoint dispatch, error-body previews) and this file's own
//! previous incarnation (`LLMProvider` trait, `GenerationConfig`,
//! tool-calling types), narrowed to this engine's backend set
//! (`LocalOpenAIServer`, `CloudChatCompletions`, `CloudReasoning`,
//! `OnDeviceExtractive`, `SystemLanguageModel`, `Mock`) with token budgeting,
//! overflow retry, and fallback-chain logic added — the base crate treats
//! each provider as a standalone manager mode with no retry/fallback concept
//! of its own.

pub mod backends;
pub mod streaming;

use crate::error::EngineError;
use crate::tools::ToolHandler;
pub use streaming::{StreamSink, TerminalGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<usize>,
    pub stop: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: Some(0.95),
            top_k: None,
            stop: Vec::new(),
        }
    }
}

/// The result of one `generate` call.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_generated: usize,
    pub ttft_ms: Option<u64>,
    pub total_time_ms: u64,
    pub model_name: String,
    pub tool_calls_made: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone)]
pub enum ChatResponse {
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

/// Per-backend state machine: every backend transitions
/// `Idle -> Streaming -> (Complete | Failed)`, and the streaming sink
/// observes a terminal marker on every exit from `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Idle,
    Streaming,
    Complete,
    Failed,
}

/// Polymorphic LLM backend capability set. Dispatch is tagged via the
/// concrete backend types in
/// `backends.rs`, not inheritance.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn model_name(&self) -> &str;
    fn context_window(&self) -> usize;

    /// True for small on-device windows that need token budgeting.
    fn is_tiny_ondevice(&self) -> bool {
        false
    }

    /// True for hosted/cloud backends, which get the largest context budget.
    fn is_cloud(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool;

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError>;

    /// Chat with tool schemas; default flattens messages into a prompt and
    /// ignores tools (mirrors the base crate's `LLMProvider::chat` default).
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse, EngineError> {
        let prompt = flatten_messages(messages);
        let response = self.generate(&prompt, None, config, None).await?;
        Ok(ChatResponse::Content(response.text))
    }
}

fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| m.content.as_ref().map(|c| format!("{:?}: {}", m.role, c)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_overflow_error(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("context") && (lower.contains("exceed") || lower.contains("too long") || lower.contains("overflow"))
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Uniform `generate`/fallback entry point. Holds an ordered
/// list of backends (primary first); on failure, tries each fallback in
/// turn, surfacing the *original* error only if every backend fails.
pub struct LlmGateway {
    backends: Vec<Box<dyn LlmBackend>>,
    tool_handler: Option<Arc<dyn ToolHandler>>,
    max_tool_iterations: usize,
}

impl LlmGateway {
    pub fn new(backends: Vec<Box<dyn LlmBackend>>) -> Self {
        Self {
            backends,
            tool_handler: None,
            max_tool_iterations: 6,
        }
    }

    pub fn with_tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handler = Some(handler);
        self
    }

    /// Generate a completion, streaming through `sink` if present, with
    /// token budgeting, one overflow retry per backend, and a fallback chain
    /// across backends. Exactly one terminal marker is emitted regardless of
    /// which backend (if any) ultimately succeeds.
    pub async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);

        if self.backends.is_empty() {
            guard.finish(true);
            return Err(EngineError::ModelUnavailable);
        }

        let mut last_err = EngineError::ModelUnavailable;
        for backend in &self.backends {
            match self.generate_on_backend(backend.as_ref(), prompt, context, config, &guard).await {
                Ok(mut response) => {
                    response.tool_calls_made = crate::tools::take_tool_call_count();
                    guard.finish(true);
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(model = backend.model_name(), error = %e, "backend generation failed, trying fallback");
                    last_err = e;
                }
            }
        }

        let _ = crate::tools::take_tool_call_count();
        guard.finish(true);
        Err(last_err)
    }

    async fn generate_on_backend(
        &self,
        backend: &dyn LlmBackend,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        guard: &TerminalGuard<'_>,
    ) -> Result<GenerationResponse, EngineError> {
        if !backend.is_available().await {
            return Err(EngineError::ModelUnavailable);
        }

        let budgeted = budget_tokens(backend, prompt, context, config);

        match backend.generate(prompt, context, &budgeted, Some(guard)).await {
            Ok(r) => Ok(r),
            Err(EngineError::GenerationFailed(reason)) if is_overflow_error(&reason) => {
                tracing::info!(model = backend.model_name(), "context exceeded, retrying with reduced budget");
                let retry_max_tokens = (budgeted.max_tokens / 2).max(512);
                let retry_limit = context.map(|c| c.len() / 2).unwrap_or(0).max(800);
                let retry_context = context.map(|c| truncate_chars(c, retry_limit));
                let mut retry_config = budgeted.clone();
                retry_config.max_tokens = retry_max_tokens;
                backend
                    .generate(prompt, retry_context.as_deref(), &retry_config, Some(guard))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Chat-with-tools loop: sends `messages` + the tool handler's schemas to
    /// the primary backend, executes any requested tool calls, feeds results
    /// back, and repeats until a text response or the iteration cap is hit.
    pub async fn generate_with_tools(
        &self,
        mut messages: Vec<ChatMessage>,
        config: &GenerationConfig,
    ) -> Result<(String, usize), EngineError> {
        let backend = self.backends.first().ok_or(EngineError::ModelUnavailable)?;
        let schemas = self
            .tool_handler
            .as_ref()
            .map(|h| h.schemas())
            .unwrap_or_default();

        let mut tool_calls_made = 0;
        for _ in 0..self.max_tool_iterations {
            match backend.chat(&messages, &schemas, config).await? {
                ChatResponse::Content(text) => return Ok((text, tool_calls_made)),
                ChatResponse::ToolCalls(calls) => {
                    let Some(handler) = &self.tool_handler else {
                        return Ok((
                            "I attempted to use a tool but none is available.".to_string(),
                            tool_calls_made,
                        ));
                    };
                    messages.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: None,
                        tool_calls: Some(calls.clone()),
                        tool_call_id: None,
                        name: None,
                    });
                    for call in calls {
                        let result = handler.call(&call.name, &call.arguments).await;
                        tool_calls_made += 1;
                        messages.push(ChatMessage::tool_result(call.id, call.name, result));
                    }
                }
            }
        }

        Ok((
            "I was unable to complete the task within the allowed number of tool calls.".to_string(),
            tool_calls_made,
        ))
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.model_name().to_string()).collect()
    }

    /// Context-budget category of the primary (first) backend, used by the
    /// orchestrator to pick `ContextConfig::max_chars_*` (spec.md §4.9).
    pub fn primary_context_category(&self) -> ContextCategory {
        match self.backends.first() {
            Some(b) if b.is_tiny_ondevice() => ContextCategory::TinyOnDevice,
            Some(b) if b.is_cloud() => ContextCategory::Cloud,
            _ => ContextCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextCategory {
    Cloud,
    TinyOnDevice,
    Other,
}

/// Token budgeting for small on-device windows: if the
/// estimated prompt size plus a safety margin would exceed the window,
/// cap `max_tokens` accordingly. `chars/4` approximates token count
///.
fn budget_tokens(
    backend: &dyn LlmBackend,
    prompt: &str,
    context: Option<&str>,
    config: &GenerationConfig,
) -> GenerationConfig {
    let mut cfg = config.clone();
    if !backend.is_tiny_ondevice() {
        return cfg;
    }

    const SAFETY: usize = 400;
    let window = backend.context_window();
    let estimated_prompt_tokens =
        (prompt.len() + context.map(|c| c.len()).unwrap_or(0)) / 4;

    if estimated_prompt_tokens + SAFETY > window {
        let budget = window.saturating_sub(SAFETY).saturating_sub(estimated_prompt_tokens);
        cfg.max_tokens = cfg.max_tokens.min(budget.max(128));
    }
    cfg
}

pub fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

pub fn to_duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyThenOverflowBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for FlakyThenOverflowBackend {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn context_window(&self) -> usize {
            4000
        }
        fn is_tiny_ondevice(&self) -> bool {
            true
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn generate(
            &self,
            _prompt: &str,
            _context: Option<&str>,
            config: &GenerationConfig,
            _sink: Option<&dyn StreamSink>,
        ) -> Result<GenerationResponse, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Err(EngineError::GenerationFailed("context length exceeded".to_string()))
            } else {
                Ok(GenerationResponse {
                    text: format!("ok with max_tokens={}", config.max_tokens),
                    tokens_generated: 10,
                    ttft_ms: Some(5),
                    total_time_ms: 10,
                    model_name: "flaky".to_string(),
                    tool_calls_made: 0,
                })
            }
        }
    }

    struct AlwaysFailBackend;

    #[async_trait]
    impl LlmBackend for AlwaysFailBackend {
        fn model_name(&self) -> &str {
            "always-fail"
        }
        fn context_window(&self) -> usize {
            4000
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn generate(
            &self,
            _prompt: &str,
            _context: Option<&str>,
            _config: &GenerationConfig,
            _sink: Option<&dyn StreamSink>,
        ) -> Result<GenerationResponse, EngineError> {
            Err(EngineError::GenerationFailed("backend unreachable".to_string()))
        }
    }

    struct MockOkBackend;

    #[async_trait]
    impl LlmBackend for MockOkBackend {
        fn model_name(&self) -> &str {
            "mock-ok"
        }
        fn context_window(&self) -> usize {
            8192
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn generate(
            &self,
            _prompt: &str,
            _context: Option<&str>,
            _config: &GenerationConfig,
            _sink: Option<&dyn StreamSink>,
        ) -> Result<GenerationResponse, EngineError> {
            Ok(GenerationResponse {
                text: "fallback answer".to_string(),
                tokens_generated: 3,
                ttft_ms: None,
                total_time_ms: 1,
                model_name: "mock-ok".to_string(),
                tool_calls_made: 0,
            })
        }
    }

    struct CountingSink {
        deltas: std::sync::Mutex<Vec<String>>,
        terminals: std::sync::Mutex<Vec<bool>>,
    }

    impl StreamSink for CountingSink {
        fn on_delta(&self, delta: &str) {
            self.deltas.lock().unwrap().push(delta.to_string());
        }
        fn on_terminal(&self, is_final: bool) {
            self.terminals.lock().unwrap().push(is_final);
        }
    }

    #[tokio::test]
    async fn overflow_retry_halves_max_tokens() {
        let gateway = LlmGateway::new(vec![Box::new(FlakyThenOverflowBackend {
            calls: AtomicUsize::new(0),
        })]);
        let config = GenerationConfig {
            max_tokens: 2000,
            ..Default::default()
        };
        let response = gateway.generate("prompt", Some("context"), &config, None).await.unwrap();
        assert!(response.text.contains("max_tokens=1000"));
    }

    #[tokio::test]
    async fn fallback_chain_tries_next_backend_on_failure() {
        let gateway = LlmGateway::new(vec![Box::new(AlwaysFailBackend), Box::new(MockOkBackend)]);
        let response = gateway.generate("hi", None, &GenerationConfig::default(), None).await.unwrap();
        assert_eq!(response.text, "fallback answer");
    }

    #[tokio::test]
    async fn exhausted_fallback_chain_surfaces_original_error() {
        let gateway = LlmGateway::new(vec![Box::new(AlwaysFailBackend)]);
        let err = gateway.generate("hi", None, &GenerationConfig::default(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn streaming_sink_receives_exactly_one_terminal_marker() {
        let sink = CountingSink {
            deltas: std::sync::Mutex::new(vec![]),
            terminals: std::sync::Mutex::new(vec![]),
        };
        let gateway = LlmGateway::new(vec![Box::new(AlwaysFailBackend)]);
        let _ = gateway.generate("hi", None, &GenerationConfig::default(), Some(&sink)).await;
        assert_eq!(sink.terminals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_backend_list_surfaces_model_unavailable() {
        let gateway = LlmGateway::new(vec![]);
        let err = gateway.generate("hi", None, &GenerationConfig::default(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable));
    }

    #[test]
    fn primary_context_category_reflects_first_backend() {
        let tiny = LlmGateway::new(vec![Box::new(FlakyThenOverflowBackend { calls: AtomicUsize::new(0) })]);
        assert_eq!(tiny.primary_context_category(), ContextCategory::TinyOnDevice);

        let other = LlmGateway::new(vec![Box::new(MockOkBackend)]);
        assert_eq!(other.primary_context_category(), ContextCategory::Other);

        let empty = LlmGateway::new(vec![]);
        assert_eq!(empty.primary_context_category(), ContextCategory::Other);
    }
}
