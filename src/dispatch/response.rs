//! Successful replies and their streaming/buffered classification.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::DispatchError;
use crate::config::StreamConfig;
use crate::stream::{Framing, ReconciledStream};

/// Reconciled body of a streaming reply.
pub type ReplyStream = ReconciledStream<BoxStream<'static, Result<Bytes, reqwest::Error>>>;

const STREAMING_TYPES: &[&str] = &[
    "application/x-ndjson",
    "application/jsonl",
    "application/stream+json",
    "text/event-stream",
    "text/plain",
];

/// A reply the backend accepted (2xx). Non-success statuses never reach here.
pub struct DispatchResponse {
    inner: reqwest::Response,
    stream: StreamConfig,
    cancellation: CancellationToken,
    request_id: Uuid,
}

/// Buffered or streaming body, chosen by `Content-Type`.
pub enum Reply {
    Json(serde_json::Value),
    Stream(ReplyStream),
}

impl DispatchResponse {
    pub(crate) fn new(
        inner: reqwest::Response,
        stream: StreamConfig,
        cancellation: CancellationToken,
        request_id: Uuid,
    ) -> Self {
        Self {
            inner,
            stream,
            cancellation,
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
    }

    pub fn is_stream(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| STREAMING_TYPES.contains(&ct.as_str()))
    }

    pub async fn bytes(self) -> Result<Bytes, DispatchError> {
        let cancellation = self.cancellation.clone();
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(DispatchError::Cancelled),
            body = self.inner.bytes() => body.map_err(|e| DispatchError::Transient(e.to_string())),
        }
    }

    pub async fn text(self) -> Result<String, DispatchError> {
        let body = self.bytes().await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| DispatchError::MalformedResponse(format!("body is not UTF-8: {e}")))
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, DispatchError> {
        let body = self.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| DispatchError::MalformedResponse(format!("body is not valid JSON: {e}")))
    }

    /// Reconcile the body as a chunked stream, regardless of `Content-Type`.
    pub fn into_stream(self) -> ReplyStream {
        let framing = match self.content_type().as_deref() {
            Some("text/event-stream") => Framing::Sse,
            _ => Framing::Ndjson,
        };
        debug!(request_id = %self.request_id, ?framing, "Consuming streaming reply");
        ReconciledStream::with_framing(self.inner.bytes_stream().boxed(), self.stream, framing)
            .with_cancellation(self.cancellation)
    }

    /// Streaming content types go through the reconciler; anything else must
    /// be a single JSON document.
    pub async fn into_reply(self) -> Result<Reply, DispatchError> {
        if self.is_stream() {
            Ok(Reply::Stream(self.into_stream()))
        } else {
            Ok(Reply::Json(self.json().await?))
        }
    }
}

impl std::fmt::Debug for DispatchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchResponse")
            .field("status", &self.status())
            .field("content_type", &self.content_type())
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

fn media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_ascii_lowercase()
}
