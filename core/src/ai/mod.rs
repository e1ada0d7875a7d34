pub mod prompt;
pub mod response;

use crate::config::LlmOptions;
use log::warn;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

const ERROR_SNIPPET_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to model endpoint failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("model response carried no text")]
    MissingContent,
}

impl LlmError {
    /// Endpoint missing or method not allowed: the server has no chat route.
    pub fn is_unsupported_route(&self) -> bool {
        matches!(self, LlmError::Http { status, .. } if *status == 404 || *status == 405)
    }
}

/// Which OpenAI-compatible route carries the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Chat,
    Completions,
    /// Chat first, completions once the server rejects the chat route.
    #[default]
    Auto,
}

/// Prompt template used on the completions route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFormat {
    ChatMl,
    Llama3,
}

impl PromptFormat {
    pub fn for_model(model: &str) -> Self {
        let lowered = model.to_ascii_lowercase();
        if ["qwen", "chatml", "hermes"]
            .iter()
            .any(|family| lowered.contains(family))
        {
            PromptFormat::ChatMl
        } else {
            PromptFormat::Llama3
        }
    }

    pub fn render(&self, system: &str, user: &str) -> String {
        match self {
            PromptFormat::ChatMl => format!(
                "<|im_start|>system\n{system}<|im_end|>\n<|im_start|>user\n{user}<|im_end|>\n<|im_start|>assistant\n"
            ),
            PromptFormat::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n{user}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
            ),
        }
    }

    pub fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            PromptFormat::ChatMl => &["<|im_end|>"],
            PromptFormat::Llama3 => &["<|eot_id|>"],
        }
    }
}

/// Anything that turns a system + user prompt into model text.
#[allow(async_fn_in_trait)]
pub trait CompletionBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

/// OpenAI-compatible HTTP client (LM Studio, llama.cpp server, vLLM, ...).
#[derive(Debug)]
pub struct LlmClient {
    http: Client,
    options: LlmOptions,
    completions_only: AtomicBool,
}

impl LlmClient {
    pub fn new(options: LlmOptions, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        let completions_only = options.compat == TransportMode::Completions;
        Ok(Self {
            http,
            options,
            completions_only: AtomicBool::new(completions_only),
        })
    }

    pub fn options(&self) -> &LlmOptions {
        &self.options
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/{route}", self.options.base_url.trim_end_matches('/'))
    }

    fn sampling_params(&self, body: &mut Map<String, Value>, extra_stop: &[&str]) {
        let options = &self.options;
        if let Some(temperature) = options.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = options.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if let Some(top_k) = options.top_k {
            body.insert("top_k".into(), json!(top_k));
        }
        if let Some(max_tokens) = options.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(penalty) = options.repetition_penalty {
            body.insert("repetition_penalty".into(), json!(penalty));
        }
        let stop: Vec<&str> = options
            .stop
            .iter()
            .map(String::as_str)
            .chain(extra_stop.iter().copied())
            .collect();
        if !stop.is_empty() {
            body.insert("stop".into(), json!(stop));
        }
    }

    async fn post(&self, route: &str, body: Value) -> Result<Value, LlmError> {
        let mut request = self.http.post(self.endpoint(route)).json(&body);
        if let Some(key) = self.options.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                message: extract_error_message(status, &body_text),
            });
        }
        Ok(response.json::<Value>().await?)
    }

    pub async fn complete_chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let messages = if self.options.supports_system_role {
            json!([
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ])
        } else {
            json!([{ "role": "user", "content": format!("{system}\n\n{user}") }])
        };
        let mut body = Map::new();
        body.insert("model".into(), json!(self.options.model));
        body.insert("messages".into(), messages);
        self.sampling_params(&mut body, &[]);

        let payload = self.post("chat/completions", Value::Object(body)).await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(LlmError::MissingContent)
    }

    pub async fn complete_text(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let format = PromptFormat::for_model(&self.options.model);
        let mut body = Map::new();
        body.insert("model".into(), json!(self.options.model));
        body.insert("prompt".into(), json!(format.render(system, user)));
        self.sampling_params(&mut body, format.stop_tokens());

        let payload = self.post("completions", Value::Object(body)).await?;
        payload
            .pointer("/choices/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(LlmError::MissingContent)
    }
}

impl CompletionBackend for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        if self.completions_only.load(Ordering::Relaxed) {
            return self.complete_text(system, user).await;
        }
        match self.complete_chat(system, user).await {
            Err(err) if self.options.compat == TransportMode::Auto && err.is_unsupported_route() => {
                warn!("chat route unavailable ({err}); switching to completions");
                self.completions_only.store(true, Ordering::Relaxed);
                self.complete_text(system, user).await
            }
            other => other,
        }
    }
}

fn extract_error_message(status: StatusCode, body_text: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body_text) {
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    let trimmed = body_text.trim();
    if trimmed.chars().count() > ERROR_SNIPPET_CHARS {
        let snippet: String = trimmed.chars().take(ERROR_SNIPPET_CHARS).collect();
        format!("{snippet}... (status {})", status.as_u16())
    } else {
        trimmed.to_string()
    }
}
