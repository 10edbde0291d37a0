//! Text-generation boundary.
//!
//! The scorer talks to a language model only through [`TextGenerator`]:
//! given a prompt (and optionally a system prompt) it returns free-form text
//! or fails. The service is untrusted for latency, so every call made by the
//! evaluators goes through [`generate_with_deadline`].
//!
//! [`OpenAiClient`] is the production implementation: a blocking client for
//! any OpenAI-compatible `/chat/completions` endpoint.

pub mod extract;

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use extract::extract_json;

/// Errors from the text-generation boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("no API key found in ${env}")]
    #[diagnostic(
        code(poet::llm::missing_api_key),
        help("Export the key, e.g. `export {env}=sk-...`, or point `llm.api_key_env` at another variable.")
    )]
    MissingApiKey { env: String },

    #[error("text generation request failed: {message}")]
    #[diagnostic(
        code(poet::llm::request_failed),
        help("Check the endpoint URL, the API key, and that the model name is served.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse generation response: {message}")]
    #[diagnostic(
        code(poet::llm::parse_error),
        help("The endpoint returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("text generation timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(poet::llm::timeout),
        help("Increase `batch.llm_timeout_secs` or use a faster model.")
    )]
    Timeout { timeout_ms: u64 },
}

/// An opaque text-generation capability.
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`, optionally steered by `system`.
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}

/// Run one generation call with a hard deadline.
///
/// The call runs on a helper thread; if it has not answered within `timeout`
/// the caller gets [`LlmError::Timeout`] and the helper is left to finish on
/// its own. A generator that panics is reported as a failed request.
pub fn generate_with_deadline(
    generator: &Arc<dyn TextGenerator>,
    prompt: &str,
    system: Option<&str>,
    timeout: Duration,
) -> Result<String, LlmError> {
    let (tx, rx) = mpsc::channel();
    let generator = Arc::clone(generator);
    let prompt = prompt.to_string();
    let system = system.map(str::to_string);

    std::thread::Builder::new()
        .name("poet-llm-call".into())
        .spawn(move || {
            let _ = tx.send(generator.generate(&prompt, system.as_deref()));
        })
        .map_err(|e| LlmError::RequestFailed {
            message: format!("failed to spawn call thread: {e}"),
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(LlmError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(LlmError::RequestFailed {
            message: "generation thread exited without a response".into(),
        }),
    }
}

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the API, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Transport timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum completion length.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "google/gemini-2.5-pro".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 600,
            temperature: 0.1,
            max_tokens: 4000,
        }
    }
}

impl LlmConfig {
    /// Apply `OPENAI_BASE_URL` and `OPENAI_MODEL` overrides from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if !model.trim().is_empty() {
                self.model = model;
            }
        }
        self
    }

    /// Cap the transport timeout at `deadline` so abandoned calls end with it.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.timeout_secs = self.timeout_secs.min(deadline.as_secs().max(1));
        self
    }
}

/// Blocking client for OpenAI-compatible chat-completion endpoints.
pub struct OpenAiClient {
    config: LlmConfig,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl OpenAiClient {
    /// Create a client, reading the API key from `config.api_key_env`.
    ///
    /// A missing key is not an error here; every `generate` call reports it.
    pub fn new(config: LlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(config: LlmConfig, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config,
            api_key,
            agent,
        }
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl TextGenerator for OpenAiClient {
    fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey {
                env: self.config.api_key_env.clone(),
            })?;

        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system.filter(|s| !s.is_empty()) {
            messages.push(serde_json::json!({ "role": "system", "content": sys }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let body_str = serde_json::to_string(&body).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        tracing::debug!(model = %self.config.model, prompt_len = prompt.len(), "text generation request");

        let resp = self
            .agent
            .post(&self.endpoint())
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {api_key}"))
            .send_string(&body_str)
            .map_err(|e: ureq::Error| LlmError::RequestFailed {
                message: e.to_string(),
            })?;

        let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;

        let json: serde_json::Value =
            serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
                message: e.to_string(),
            })?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'choices[0].message.content' field".into(),
            })
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl TextGenerator for Echo {
        fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            Ok(prompt.to_uppercase())
        }
    }

    struct Sleepy(Duration);

    impl TextGenerator for Sleepy {
        fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            std::thread::sleep(self.0);
            Ok("late".into())
        }
    }

    struct Panicky;

    impl TextGenerator for Panicky {
        fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            panic!("boom");
        }
    }

    #[test]
    fn deadline_passes_result_through() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Echo);
        let out = generate_with_deadline(&generator, "hi", None, Duration::from_secs(5)).unwrap();
        assert_eq!(out, "HI");
    }

    #[test]
    fn deadline_expires_on_slow_generator() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Sleepy(Duration::from_millis(500)));
        let err =
            generate_with_deadline(&generator, "hi", None, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, LlmError::Timeout { timeout_ms: 20 }));
    }

    #[test]
    fn panicking_generator_is_a_failed_request() {
        let generator: Arc<dyn TextGenerator> = Arc::new(Panicky);
        let err = generate_with_deadline(&generator, "hi", None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[test]
    fn missing_api_key_returns_error() {
        let client = OpenAiClient::with_api_key(LlmConfig::default(), None);
        let err = client.generate("test", None).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey { ref env } if env == "OPENAI_API_KEY"));
    }

    #[test]
    fn unreachable_endpoint_returns_error() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:1".into(), // unreachable port
            timeout_secs: 2,
            ..Default::default()
        };
        let client = OpenAiClient::with_api_key(config, Some("sk-test".into()));
        let result = client.generate("test", Some("system"));
        assert!(matches!(result, Err(LlmError::RequestFailed { .. })));
    }

    #[test]
    fn deadline_caps_transport_timeout() {
        let config = LlmConfig::default().with_deadline(Duration::from_secs(120));
        assert_eq!(config.timeout_secs, 120);
        let config = LlmConfig {
            timeout_secs: 30,
            ..Default::default()
        };
        assert_eq!(config.with_deadline(Duration::from_secs(120)).timeout_secs, 30);
        assert_eq!(LlmConfig::default().with_deadline(Duration::ZERO).timeout_secs, 1);
    }

    #[test]
    fn default_config_values() {
        let config = LlmConfig::default();
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.temperature, 0.1);
    }

    #[test]
    fn debug_hides_api_key() {
        let client = OpenAiClient::with_api_key(LlmConfig::default(), Some("sk-secret".into()));
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("has_api_key: true"));
    }
}
