//! Push transport
//!
//! `PushTransport` is the seam between connection management and the wire.
//! `SseTransport` is the production implementation over reqwest.

use super::sse::SseDecoder;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use std::collections::VecDeque;
use std::time::Duration;

/// Stream of raw push payloads
pub type MessageStream = BoxStream<'static, Result<String, TransportError>>;

/// Transport failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    /// Session missing or expired
    #[error("unauthorized (status {0})")]
    Unauthorized(u16),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("SSE frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("stream closed")]
    Closed,
}

impl TransportError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

/// Opens one logical push connection
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Resolves once the connection is open
    async fn open(&self) -> Result<MessageStream, TransportError>;
}

/// SSE over HTTP
pub struct SseTransport {
    client: Client,
    url: String,
    token: Option<String>,
    idle_timeout: Option<Duration>,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token: None,
            idle_timeout: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn open(&self) -> Result<MessageStream, TransportError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        tracing::debug!(url = %self.url, "SSE stream opened");

        let body = Box::pin(response.bytes_stream());
        let idle_timeout = self.idle_timeout;
        let state = (body, SseDecoder::new(), VecDeque::<String>::new(), false);

        let messages = stream::unfold(state, move |(mut body, mut decoder, mut ready, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(message) = ready.pop_front() {
                    return Some((Ok(message), (body, decoder, ready, false)));
                }

                let next = match idle_timeout {
                    Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            return Some((
                                Err(TransportError::IdleTimeout(limit)),
                                (body, decoder, ready, true),
                            ))
                        }
                    },
                    None => body.next().await,
                };

                match next {
                    Some(Ok(chunk)) => match decoder.feed(&chunk) {
                        Ok(messages) => ready.extend(messages),
                        Err(e) => return Some((Err(e), (body, decoder, ready, true))),
                    },
                    Some(Err(e)) => {
                        return Some((Err(TransportError::Http(e)), (body, decoder, ready, true)))
                    }
                    None => return None,
                }
            }
        });

        Ok(messages.boxed())
    }
}
