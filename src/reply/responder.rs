use crate::config::ReplyConfig;
use crate::credentials::{ServiceConfig, ensure_success, http_client};
use crate::error::{Result, TalkbackError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const SERVICE: &str = "response";

/// Trait for turning the user's words into a reply.
pub trait Responder: Send + Sync {
    /// Generate a reply to `prompt`. A blank reply is returned as-is.
    fn respond(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

impl<T: Responder> Responder for Arc<T> {
    fn respond(&self, prompt: &str) -> Result<String> {
        (**self).respond(prompt)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    model: &'a str,
    stream: bool,
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(serde::Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
    }
}

/// Single-turn `/chat/completions` client; no history is kept.
pub struct ChatResponder {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatResponder {
    pub fn new(service: &ServiceConfig, config: &ReplyConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(service, SERVICE)?,
            url: service.chat_url(),
            api_key: service.api_key().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            model: &self.model,
            stream: false,
            temperature: self.temperature,
        }
    }
}

impl Responder for ChatResponder {
    fn respond(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, "Requesting reply");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;

        let body: ChatResponse = ensure_success(SERVICE, response)?
            .json()
            .map_err(|e| TalkbackError::transport(SERVICE, format!("Invalid response: {}", e)))?;

        Ok(body.into_text())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Mock responder for testing
#[derive(Debug, Clone)]
pub struct MockResponder {
    reply: String,
    should_fail: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self {
            reply: "mock reply".to_string(),
            should_fail: false,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder for MockResponder {
    fn respond(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.should_fail {
            return Err(TalkbackError::transport(SERVICE, "HTTP 503: unavailable"));
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
