use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use council_models::config::{LlmBackend, LlmConfig};
use tracing::info;

use crate::claude_cli::{check_cli_available, ClaudeInvocation};
use crate::error::LlmError;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Text-completion collaborator. Mockable for testing.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Shells out to the `claude` CLI.
///
/// The CLI has no token limit flag, so `max_tokens` is carried in the
/// system prompt as a length hint.
pub struct ClaudeCliClient {
    timeout: Duration,
}

impl ClaudeCliClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LlmClient for ClaudeCliClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let system_prompt = format!(
            "{}\n\nKeep the reply under {} tokens.",
            request.system_prompt, request.max_tokens
        );
        ClaudeInvocation {
            system_prompt: &system_prompt,
            prompt: &request.prompt,
            model: &request.model,
            timeout: self.timeout,
        }
        .run()
        .await
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if check_cli_available().await {
            Ok(())
        } else {
            Err(LlmError::Unavailable("claude CLI not found on PATH".to_string()))
        }
    }
}

/// Backend that never answers. Agents fall back to their templates.
pub struct OfflineLlm;

#[async_trait]
impl LlmClient for OfflineLlm {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("offline backend".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Err(LlmError::Unavailable("offline backend".to_string()))
    }
}

/// Pick the LLM backend once at startup.
pub fn select_llm(config: &LlmConfig) -> Arc<dyn LlmClient> {
    info!(backend = ?config.backend, model = %config.model, "Selected LLM backend");
    match config.backend {
        LlmBackend::ClaudeCli => Arc::new(ClaudeCliClient::new(Duration::from_secs(
            config.timeout_seconds,
        ))),
        LlmBackend::Offline => Arc::new(OfflineLlm),
    }
}
