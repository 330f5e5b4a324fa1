//! C10 concrete backends.
//!
//! The SSE byte-buffering loop and HTML-error-page sniffing are grounded on
//! `llm/simple_external.rs::openai_stream`/`parse_json_response`; reduced to
//! the fixed backend set (`LocalOpenAIServer`, `CloudChatCompletions`,
//! `CloudReasoning`, `OnDeviceExtractive`, `SystemLanguageModel`, `Mock`) and
//! wired through `super::streaming` for frame parsing instead of a
//! hand-rolled inline match.

use super::streaming::{parse_sse_payload, Frame, StreamSink, TerminalGuard};
use super::{GenerationConfig, GenerationResponse, LlmBackend};
use crate::error::EngineError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::json;
use std::time::{Duration, Instant};

const CLOUD_TIMEOUT_NON_STREAMING: Duration = Duration::from_secs(120);
const CLOUD_TIMEOUT_STREAMING: Duration = Duration::from_secs(300);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(120);
const HEALTH_TIMEOUT: Duration = Duration::from_millis(2500);

fn is_local_host(base_url: &str) -> bool {
    base_url.contains("localhost") || base_url.contains("127.0.0.1") || base_url.contains("::1")
}

fn to_generation_error<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::GenerationFailed(e.to_string())
}

/// OpenAI-compatible local server: `POST {base}/v1/chat/completions`.
/// Non-localhost hosts are always reported unavailable.
pub struct LocalOpenAIServer {
    base_url: String,
    model: String,
    context_window: usize,
    client: Client,
}

impl LocalOpenAIServer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, context_window: usize) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            context_window,
            client: Client::builder()
                .timeout(LOCAL_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with this configuration"),
        }
    }
}

#[async_trait]
impl LlmBackend for LocalOpenAIServer {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn is_tiny_ondevice(&self) -> bool {
        self.context_window <= 4096
    }

    async fn is_available(&self) -> bool {
        if !is_local_host(&self.base_url) {
            return false;
        }
        let health_client = match Client::builder().timeout(HEALTH_TIMEOUT).build() {
            Ok(c) => c,
            Err(_) => return false,
        };
        if let Ok(resp) = health_client.get(format!("{}/v1/models", self.base_url)).send().await {
            if (resp.status().as_u16()) < 500 {
                return true;
            }
        }
        matches!(
            health_client.get(&self.base_url).send().await,
            Ok(resp) if resp.status().as_u16() < 500
        )
    }

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let full_prompt = match context {
            Some(c) => format!("{}\n\n{}", c, prompt),
            None => prompt.to_string(),
        };

        let request = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": full_prompt}],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stop": config.stop,
            "stream": true,
        });

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(to_generation_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return Err(EngineError::GenerationFailed(format!(
                "local server returned HTTP {}: {}",
                status, preview
            )));
        }

        let guard = TerminalGuard::new(sink);
        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut previous_snapshot = String::new();
        let mut text = String::new();
        let mut first_token_at: Option<Instant> = None;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(to_generation_error)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.is_empty() || !line.starts_with("data: ") {
                    continue;
                }
                let payload = &line[6..];
                match parse_sse_payload(payload, &mut previous_snapshot) {
                    Frame::Delta(delta) => {
                        if first_token_at.is_none() {
                            first_token_at = Some(Instant::now());
                        }
                        guard.delta(&delta);
                        text.push_str(&delta);
                    }
                    Frame::Done => {
                        guard.finish(true);
                        return Ok(GenerationResponse {
                            text: text.clone(),
                            tokens_generated: text.split_whitespace().count(),
                            ttft_ms: first_token_at.map(|t| t.duration_since(started).as_millis() as u64),
                            total_time_ms: started.elapsed().as_millis() as u64,
                            model_name: self.model.clone(),
                            tool_calls_made: 0,
                        });
                    }
                    Frame::Ignored => {}
                }
            }
        }

        guard.finish(true);
        Ok(GenerationResponse {
            text: text.clone(),
            tokens_generated: text.split_whitespace().count(),
            ttft_ms: first_token_at.map(|t| t.duration_since(started).as_millis() as u64),
            total_time_ms: started.elapsed().as_millis() as u64,
            model_name: self.model.clone(),
            tool_calls_made: 0,
        })
    }
}

/// Hosted chat-completions API (e.g. `POST {base}/v1/chat/completions` with
/// bearer auth). Grounded on `simple_external.rs`'s
/// `openai_compatible_generate` shape, non-streaming for simplicity.
pub struct CloudChatCompletions {
    endpoint: String,
    api_key: String,
    model: String,
    context_window: usize,
    client: Client,
}

impl CloudChatCompletions {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, context_window: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            context_window,
            client: Client::builder()
                .timeout(CLOUD_TIMEOUT_NON_STREAMING)
                .build()
                .expect("reqwest client construction cannot fail with this configuration"),
        }
    }
}

#[async_trait]
impl LlmBackend for CloudChatCompletions {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn is_cloud(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);
        let full_prompt = match context {
            Some(c) => format!("{}\n\n{}", c, prompt),
            None => prompt.to_string(),
        };

        let request = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": full_prompt}],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "stream": false,
        });

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(to_generation_error)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(to_generation_error)?;

        if !status.is_success() {
            let reason = body["error"]["message"].as_str().unwrap_or("unknown error").to_string();
            if status.as_u16() == 400 && reason.to_lowercase().contains("context") {
                guard.finish(true);
                return Err(EngineError::GenerationFailed(format!("context length exceeded: {}", reason)));
            }
            guard.finish(true);
            return Err(EngineError::GenerationFailed(reason));
        }

        let text = body["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
        guard.delta(&text);
        guard.finish(true);

        Ok(GenerationResponse {
            text: text.clone(),
            tokens_generated: text.split_whitespace().count(),
            ttft_ms: None,
            total_time_ms: started.elapsed().as_millis() as u64,
            model_name: self.model.clone(),
            tool_calls_made: 0,
        })
    }
}

/// Reasoning-model Responses API: `POST /v1/responses`,
/// `reasoning.effort`, `previous_response_id` chaining for multi-turn calls.
pub struct CloudReasoning {
    endpoint: String,
    api_key: String,
    model: String,
    effort: String,
    context_window: usize,
    client: Client,
    previous_response_id: parking_lot::Mutex<Option<String>>,
}

impl CloudReasoning {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        effort: impl Into<String>,
        context_window: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            effort: effort.into(),
            context_window,
            client: Client::builder()
                .timeout(CLOUD_TIMEOUT_NON_STREAMING)
                .build()
                .expect("reqwest client construction cannot fail with this configuration"),
            previous_response_id: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl LlmBackend for CloudReasoning {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn is_cloud(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);
        let full_prompt = match context {
            Some(c) => format!("{}\n\n{}", c, prompt),
            None => prompt.to_string(),
        };

        let mut request = json!({
            "model": self.model,
            "input": full_prompt,
            "max_output_tokens": config.max_tokens,
            "reasoning": {"effort": self.effort},
        });

        if let Some(prev_id) = self.previous_response_id.lock().clone() {
            request["previous_response_id"] = json!(prev_id);
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(to_generation_error)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(to_generation_error)?;

        if !status.is_success() {
            let reason = body["error"]["message"].as_str().unwrap_or("unknown error").to_string();
            guard.finish(true);
            return Err(EngineError::GenerationFailed(reason));
        }

        if let Some(id) = body["id"].as_str() {
            *self.previous_response_id.lock() = Some(id.to_string());
        }

        let text = body["output_text"].as_str().unwrap_or_default().to_string();
        guard.delta(&text);
        guard.finish(true);

        Ok(GenerationResponse {
            text: text.clone(),
            tokens_generated: text.split_whitespace().count(),
            ttft_ms: None,
            total_time_ms: started.elapsed().as_millis() as u64,
            model_name: self.model.clone(),
            tool_calls_made: 0,
        })
    }
}

/// Tiny on-device extractive fallback. Returns the most query-relevant
/// sentence(s) from the supplied context verbatim rather than generating
/// new text — always available, zero network, zero model weights.
pub struct OnDeviceExtractive;

#[async_trait]
impl LlmBackend for OnDeviceExtractive {
    fn model_name(&self) -> &str {
        "on-device-extractive"
    }

    fn context_window(&self) -> usize {
        2000
    }

    fn is_tiny_ondevice(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        _config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);
        let started = Instant::now();

        let Some(context) = context.filter(|c| !c.trim().is_empty()) else {
            guard.finish(true);
            return Err(EngineError::RetrievalEmpty);
        };

        let query_terms: Vec<String> = prompt
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 2)
            .collect();

        let best_sentence = context
            .split(['.', '\n'])
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .max_by_key(|sentence| {
                let lower = sentence.to_lowercase();
                query_terms.iter().filter(|t| lower.contains(t.as_str())).count()
            })
            .unwrap_or_else(|| context.trim());

        let text = best_sentence.trim().to_string();
        guard.delta(&text);
        guard.finish(true);

        Ok(GenerationResponse {
            text: text.clone(),
            tokens_generated: text.split_whitespace().count(),
            ttft_ms: Some(0),
            total_time_ms: started.elapsed().as_millis() as u64,
            model_name: "on-device-extractive".to_string(),
            tool_calls_made: 0,
        })
    }
}

/// Platform-provided system language model (capability-detected, no network
/// call of its own) — a thin adapter over a caller-supplied closure so the
/// engine does not depend on any one OS's ML framework.
pub struct SystemLanguageModel {
    model_name: String,
    context_window: usize,
    available: bool,
    responder: Box<dyn Fn(&str, Option<&str>) -> Result<String, String> + Send + Sync>,
}

impl SystemLanguageModel {
    pub fn new(
        model_name: impl Into<String>,
        context_window: usize,
        available: bool,
        responder: Box<dyn Fn(&str, Option<&str>) -> Result<String, String> + Send + Sync>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            context_window,
            available,
            responder,
        }
    }
}

#[async_trait]
impl LlmBackend for SystemLanguageModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(
        &self,
        prompt: &str,
        context: Option<&str>,
        _config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);
        let started = Instant::now();
        match (self.responder)(prompt, context) {
            Ok(text) => {
                guard.delta(&text);
                guard.finish(true);
                Ok(GenerationResponse {
                    text: text.clone(),
                    tokens_generated: text.split_whitespace().count(),
                    ttft_ms: None,
                    total_time_ms: started.elapsed().as_millis() as u64,
                    model_name: self.model_name.clone(),
                    tool_calls_made: 0,
                })
            }
            Err(reason) => {
                guard.finish(true);
                Err(EngineError::GenerationFailed(reason))
            }
        }
    }
}

/// Deterministic test backend.
pub struct Mock {
    pub model_name: String,
    pub response: String,
    pub available: bool,
}

impl Mock {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            model_name: "mock".to_string(),
            response: response.into(),
            available: true,
        }
    }
}

#[async_trait]
impl LlmBackend for Mock {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn context_window(&self) -> usize {
        8192
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(
        &self,
        _prompt: &str,
        _context: Option<&str>,
        _config: &GenerationConfig,
        sink: Option<&dyn StreamSink>,
    ) -> Result<GenerationResponse, EngineError> {
        let guard = TerminalGuard::new(sink);
        guard.delta(&self.response);
        guard.finish(true);
        Ok(GenerationResponse {
            text: self.response.clone(),
            tokens_generated: self.response.split_whitespace().count(),
            ttft_ms: Some(1),
            total_time_ms: 1,
            model_name: self.model_name.clone(),
            tool_calls_made: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_localhost_base_url_is_rejected() {
        assert!(!is_local_host("https://example.com:8080"));
        assert!(is_local_host("http://localhost:8080"));
        assert!(is_local_host("http://127.0.0.1:1234"));
    }

    #[tokio::test]
    async fn mock_backend_is_available_and_generates_deterministically() {
        let backend = Mock::new("hello there");
        assert!(backend.is_available().await);
        let resp = backend
            .generate("q", None, &GenerationConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(resp.text, "hello there");
    }

    #[tokio::test]
    async fn extractive_backend_picks_term_overlapping_sentence() {
        let backend = OnDeviceExtractive;
        let context = "Cats are independent. The mitochondrion is the powerhouse of the cell. Dogs bark a lot.";
        let resp = backend
            .generate("what is the powerhouse of the cell", Some(context), &GenerationConfig::default(), None)
            .await
            .unwrap();
        assert!(resp.text.contains("mitochondrion"));
    }

    #[tokio::test]
    async fn extractive_backend_errors_on_empty_context() {
        let backend = OnDeviceExtractive;
        let err = backend
            .generate("q", None, &GenerationConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RetrievalEmpty));
    }
}
