//! OpenAI-compatible streaming chat-completion transport.
//!
//! Posts the conversation with `stream: true` and decodes the server-sent
//! `data:` lines into chunks until `[DONE]`, the end of the body, or a cancel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use artigen_core::client::{ChatChunk, CompletionClient, StreamSender, stream_channel};
use artigen_core::config::ApiConfig;
use artigen_core::models::{ChatRole, ContextMessage};
use artigen_core::{CompletionRequest, Error, StreamHandle};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompts::PromptLibrary;

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: Vec<ContextMessage>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk(ChatChunk),
    Done,
}

/// Splits a byte stream into `data:` events. Lines may straddle reads,
/// including in the middle of a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode a final line that arrived without a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.pending);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Decode one SSE line. Comments, blank lines, other fields and malformed
/// payloads yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => Some(SseEvent::Chunk(chunk)),
        Err(err) => {
            debug!("Skipping malformed stream line: {err}");
            None
        }
    }
}

/// Full request URL for a configured base URL.
fn endpoint(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.ends_with("/chat/completions") {
        url.to_string()
    } else {
        format!("{url}/chat/completions")
    }
}

/// Describe a non-success response, preferring the API's own message.
fn describe_http_error(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .ok()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("request failed")
            )
        })
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    key: String,
    model: String,
    prompts: Arc<PromptLibrary>,
}

impl OpenAiClient {
    pub fn new(api: &ApiConfig, prompts: PromptLibrary) -> anyhow::Result<Self> {
        // No total timeout: a long generation may stream for minutes.
        let idle = Duration::from_secs(api.timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(idle)
            .read_timeout(idle)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint(&api.url),
            key: api.key.clone(),
            model: api.model.clone(),
            prompts: Arc::new(prompts),
        })
    }

    /// System prompt, prior turns, then the user message.
    fn messages(&self, request: &CompletionRequest) -> Vec<ContextMessage> {
        let mut messages = Vec::with_capacity(request.context.len() + 2);
        messages.push(ContextMessage {
            role: ChatRole::System,
            content: self.prompts.system_prompt(&request.prompt_key).to_string(),
        });
        messages.extend(request.context.iter().cloned());
        messages.push(ContextMessage {
            role: ChatRole::User,
            content: request.user_text.clone(),
        });
        messages
    }
}

impl CompletionClient for OpenAiClient {
    fn start(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = artigen_core::Result<StreamHandle>> + Send {
        let body = RequestBody {
            model: &self.model,
            messages: self.messages(&request),
            stream: true,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
        };
        let call = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.key)
            .json(&body);
        let module_id = request.module_id;

        async move {
            debug!(module = %module_id, "sending completion request");
            let response = call
                .send()
                .await
                .map_err(|err| Error::Transport(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Transport(describe_http_error(status, &text)));
            }

            let (sender, handle) = stream_channel();
            tokio::spawn(pump(response, sender));
            Ok(handle)
        }
    }
}

enum StreamEnd {
    Finished,
    Aborted,
    Failed(String),
    ConsumerGone,
}

/// Forward the response body until it ends or the consumer cancels.
async fn pump(response: reqwest::Response, sender: StreamSender) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    let end = 'read: loop {
        let next = tokio::select! {
            () = sender.cancelled() => break 'read StreamEnd::Aborted,
            next = body.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => break StreamEnd::Failed(err.to_string()),
            None => {
                if let Some(SseEvent::Chunk(chunk)) = decoder.finish() {
                    sender.chunk(chunk);
                }
                break StreamEnd::Finished;
            }
        };
        for event in decoder.feed(&bytes) {
            match event {
                SseEvent::Done => break 'read StreamEnd::Finished,
                SseEvent::Chunk(chunk) => {
                    if !sender.chunk(chunk) {
                        break 'read StreamEnd::ConsumerGone;
                    }
                }
            }
        }
    };

    match end {
        StreamEnd::Finished => sender.complete(false),
        StreamEnd::Aborted => {
            debug!("stream cancelled");
            sender.complete(true);
        }
        StreamEnd::Failed(description) => {
            warn!("stream failed: {description}");
            sender.fail(description);
        }
        StreamEnd::ConsumerGone => debug!("stream consumer went away"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(event: &SseEvent) -> Option<&str> {
        match event {
            SseEvent::Chunk(chunk) => chunk.content(),
            SseEvent::Done => None,
        }
    }

    #[test]
    fn parses_data_lines() {
        let event = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#)
            .expect("event");
        assert_eq!(content(&event), Some("Hi"));
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line("data:[DONE]\r"), Some(SseEvent::Done));
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: message"), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
    }

    #[test]
    fn decoder_handles_split_lines_and_utf8() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n\ndata: [DONE]\n";
        let bytes = line.as_bytes();
        let split = line.find('é').expect("accent") + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let events = decoder.feed(&bytes[split..]);
        assert_eq!(events.len(), 2);
        assert_eq!(content(&events[0]), Some("héllo"));
        assert_eq!(events[1], SseEvent::Done);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder
            .feed(br#"data: {"choices":[{"delta":{"content":"end"}}]}"#)
            .is_empty());
        let event = decoder.finish().expect("event");
        assert_eq!(content(&event), Some("end"));
    }

    #[test]
    fn endpoint_appends_path_once() {
        assert_eq!(
            endpoint("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn http_errors_prefer_api_message() {
        let status = reqwest::StatusCode::UNAUTHORIZED;
        assert_eq!(
            describe_http_error(status, r#"{"error":{"message":"Invalid API key"}}"#),
            "Invalid API key"
        );
        assert_eq!(
            describe_http_error(status, "<html>"),
            "HTTP 401: Unauthorized"
        );
    }

    /// Serve one streaming response, sending each line after `gap`.
    async fn slow_sse_server(lines: Vec<String>, gap: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
                )
                .await
                .expect("head");
            for line in lines {
                tokio::time::sleep(gap).await;
                socket.write_all(line.as_bytes()).await.expect("line");
                socket.flush().await.expect("flush");
            }
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn slow_stream_outlives_the_idle_timeout() {
        let lines = ["Here", " is", " the", " chart"]
            .iter()
            .map(|text| {
                format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\n\n")
            })
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();
        // Five gaps of 400ms run past the one second timeout in total.
        let url = slow_sse_server(lines, Duration::from_millis(400)).await;
        let api = ApiConfig {
            url,
            key: "k".to_string(),
            model: "m".to_string(),
            timeout_secs: 1,
            ..ApiConfig::default()
        };
        let client = OpenAiClient::new(&api, PromptLibrary::default()).expect("client");
        let request = CompletionRequest {
            module_id: "echarts".to_string(),
            prompt_key: "echarts".to_string(),
            user_text: "Chart".to_string(),
            context: Vec::new(),
            options: artigen_core::client::CompletionOptions::default(),
        };

        let mut handle = client.start(request).await.expect("start");
        let mut text = String::new();
        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            match event {
                artigen_core::TransportEvent::Delta(chunk) => {
                    text.push_str(chunk.content().unwrap_or_default());
                }
                other => terminal = Some(other),
            }
        }
        assert_eq!(text, "Here is the chart");
        assert_eq!(
            terminal,
            Some(artigen_core::TransportEvent::Complete { aborted: false })
        );
    }

    #[test]
    fn messages_wrap_context_with_system_and_user() {
        let api = ApiConfig {
            url: "https://api.example.com/v1".to_string(),
            key: "k".to_string(),
            model: "m".to_string(),
            ..ApiConfig::default()
        };
        let client = OpenAiClient::new(&api, PromptLibrary::default()).expect("client");
        let request = CompletionRequest {
            module_id: "swot".to_string(),
            prompt_key: "swot".to_string(),
            user_text: "Analyse".to_string(),
            context: vec![ContextMessage {
                role: ChatRole::Assistant,
                content: "Earlier".to_string(),
            }],
            options: artigen_core::client::CompletionOptions::default(),
        };

        let messages = client.messages(&request);
        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [ChatRole::System, ChatRole::Assistant, ChatRole::User]);
        assert_eq!(messages[2].content, "Analyse");
    }
}
