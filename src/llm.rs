//! Chat-completions client used by the repair loop.
//!
//! Requests are retried up to a fixed attempt budget with a hard per-attempt
//! deadline. Each request runs on its own task; when the deadline expires
//! the task handle is dropped and the hung request is left to finish (or
//! rot) in the background while the next attempt starts. After the budget
//! is spent the round proceeds without a model response rather than
//! aborting the batch.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const REQUEST_ATTEMPTS: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Token accounting as reported by the API for one completed call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One successful model turn: the trimmed reply text plus its token bill.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// Seam between the search loop and the network. The loop only needs one
/// operation, and tests substitute scripted models through it.
#[allow(async_fn_in_trait)]
pub trait ChatModel {
    /// Run one conversation turn. `None` means every attempt failed; the
    /// caller records an internal-error round and moves on.
    async fn chat(&self, messages: &[ChatMessage], temperature: f64) -> Option<ChatReply>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyContent,
}

#[derive(Deserialize)]
struct ReplyContent {
    // Some providers return null content on empty replies.
    content: Option<String>,
}

fn completions_url(api_base: &str) -> String {
    format!("{}/chat/completions", api_base.trim_end_matches('/'))
}

fn reply_from(parsed: ChatResponse) -> ChatReply {
    let usage = parsed.usage.unwrap_or_default();
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    ChatReply { content, usage }
}

/// Send one prepared request and parse the reply. Free-standing so the
/// future owns everything it touches and can outlive the watchdog.
async fn send_request(request: reqwest::RequestBuilder) -> Result<ChatReply, String> {
    let response = request
        .send()
        .await
        .map_err(|e| format!("Request failed: {}", e))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(format!("API error {}: {}", status, text));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse response: {}", e))?;

    Ok(reply_from(parsed))
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    attempts: u32,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        Self::with_limits(api_base, api_key, model, REQUEST_ATTEMPTS, REQUEST_TIMEOUT)
    }

    fn with_limits(
        api_base: &str,
        api_key: &str,
        model: &str,
        attempts: u32,
        request_timeout: Duration,
    ) -> Self {
        OpenAiClient {
            client: reqwest::Client::new(),
            url: completions_url(api_base),
            api_key: api_key.to_string(),
            model: model.to_string(),
            attempts,
            request_timeout,
        }
    }

    fn build_request(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
    }
}

impl ChatModel for OpenAiClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f64) -> Option<ChatReply> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature,
        };

        for attempt in 1..=self.attempts {
            info!(attempt, model = %self.model, "sending chat request");

            // The request runs on its own task. On expiry the timeout drops
            // the join handle, which detaches the task: a hung request is
            // abandoned, not cancelled mid-flight.
            let pending = tokio::spawn(send_request(self.build_request(&request)));
            match tokio::time::timeout(self.request_timeout, pending).await {
                Ok(Ok(Ok(reply))) => {
                    info!(
                        attempt,
                        prompt_tokens = reply.usage.prompt_tokens,
                        completion_tokens = reply.usage.completion_tokens,
                        "chat request succeeded"
                    );
                    return Some(reply);
                }
                Ok(Ok(Err(err))) => warn!(attempt, error = %err, "chat request failed"),
                Ok(Err(err)) => warn!(attempt, error = %err, "chat request task failed"),
                Err(_) => warn!(attempt, "chat request timed out, abandoning it"),
            }
        }

        warn!(
            attempts = self.attempts,
            "all chat attempts failed, continuing without a response"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("a").role, "system");
        assert_eq!(ChatMessage::user("b").role, "user");
        assert_eq!(ChatMessage::assistant("c").role, "assistant");
    }

    #[test]
    fn request_serializes_model_messages_and_temperature() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 1.0,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
        assert_eq!(value["temperature"], 1.0);
    }

    #[test]
    fn reply_content_is_trimmed() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"  fixed code \n"}}],
                "usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        )
        .expect("parse");
        let reply = reply_from(parsed);
        assert_eq!(reply.content, "fixed code");
        assert_eq!(reply.usage.prompt_tokens, 10);
        assert_eq!(reply.usage.total_tokens, 15);
    }

    #[test]
    fn null_content_and_missing_usage_are_tolerated() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).expect("parse");
        let reply = reply_from(parsed);
        assert_eq!(reply.content, "");
        assert_eq!(reply.usage.total_tokens, 0);
    }

    #[test]
    fn empty_choices_yield_an_empty_reply() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert_eq!(reply_from(parsed).content, "");
    }

    #[test]
    fn base_url_normalization_tolerates_trailing_slash() {
        assert_eq!(
            completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn watchdog_abandons_a_hung_request_and_returns_none() {
        use std::time::Instant;

        // Bound but never accepted: the handshake completes in the kernel
        // backlog and a response never comes, so every attempt must hit its
        // deadline rather than error out early.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = OpenAiClient::with_limits(
            &format!("http://{addr}/v1"),
            "test-key",
            "test-model",
            2,
            Duration::from_millis(50),
        );

        let start = Instant::now();
        let reply = client.chat(&[ChatMessage::user("hi")], 1.0).await;

        assert!(reply.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
