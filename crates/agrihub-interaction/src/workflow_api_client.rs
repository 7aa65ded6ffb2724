//! WorkflowApiClient - streaming REST client for the conversational AI
//! backend.
//!
//! Opens one streaming call per query and pumps the backend's line protocol
//! into a channel of [`StreamEvent`]s. Configuration priority: explicit
//! builder values > environment variables.

use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use agrihub_core::error::{Result, SearchError};
use agrihub_core::stream::{AnswerTransport, QueryRequest, StreamEvent};

use crate::wire;

const DEFAULT_BASE_URL: &str = "https://ai.agrihub.cn/v1";
/// Bounded so a stalled consumer applies backpressure to the reader task
/// instead of buffering the whole stream.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Streaming client for the AI answer backend.
#[derive(Clone)]
pub struct WorkflowApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl WorkflowApiClient {
    /// Creates a new client with the provided API key against the default
    /// backend endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// `AGRIHUB_AI_API_KEY` is required; `AGRIHUB_AI_BASE_URL` overrides the
    /// default endpoint.
    pub fn try_from_env() -> Result<Self> {
        let api_key = env::var("AGRIHUB_AI_API_KEY").map_err(|_| {
            SearchError::config("AGRIHUB_AI_API_KEY not found in environment variables")
        })?;

        let mut client = Self::new(api_key);
        if let Ok(base_url) = env::var("AGRIHUB_AI_BASE_URL") {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }

    /// Overrides the backend endpoint after construction.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn chat_messages_url(&self) -> String {
        format!("{}/chat-messages", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    query: &'a str,
    inputs: &'a HashMap<String, serde_json::Value>,
    response_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    user: &'a str,
}

#[async_trait]
impl AnswerTransport for WorkflowApiClient {
    async fn send_message(&self, request: &QueryRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = ChatMessageRequest {
            query: &request.query,
            inputs: &request.inputs,
            response_mode: "streaming",
            conversation_id: request.conversation_id.as_deref(),
            user: &request.user,
        };

        let response = self
            .client
            .post(self.chat_messages_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| SearchError::transport(format!("AI backend request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SearchError::transport(format!(
                "AI backend returned {status}: {body_text}"
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(Box::pin(byte_stream));
        let lines = FramedRead::new(reader, LinesCodec::new());
        tokio::spawn(pump_lines(lines, tx));
        Ok(rx)
    }
}

/// Reads protocol lines until the stream ends or a terminal error event is
/// emitted. Closing the channel is the completion signal; `Error` is sent at
/// most once and nothing follows it.
async fn pump_lines<R>(mut lines: FramedRead<R, LinesCodec>, tx: mpsc::Sender<StreamEvent>)
where
    R: AsyncRead + Unpin + Send,
{
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if let Some(event) = wire::parse_line(&line) {
                    let terminal = event.is_error();
                    if tx.send(event).await.is_err() {
                        tracing::debug!("event consumer dropped, stopping stream pump");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream read failed mid-turn");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: format!("stream read failed: {e}"),
                    })
                    .await;
                return;
            }
        }
    }
}
