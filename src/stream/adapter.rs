//! Pull-based stream over a reconciled byte body.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::reconciler::{FinalMessage, Framing, StreamItem, StreamReconciler};
use crate::config::StreamConfig;

/// Errors surfaced while pulling a reconciled stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The body broke off mid-stream.
    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("Stream cancelled")]
    Cancelled,

    /// The stream ended without a final message.
    #[error("Stream ended without a final message")]
    Incomplete,
}

pin_project! {
    /// Yields deltas as lines complete, then exactly one
    /// [`StreamItem::Final`], then ends. Not restartable.
    pub struct ReconciledStream<S> {
        #[pin]
        body: S,
        reconciler: StreamReconciler,
        pending: VecDeque<StreamItem>,
        cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
        done: bool,
    }
}

impl<S, E> ReconciledStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    pub fn new(body: S, config: StreamConfig) -> Self {
        Self::with_reconciler(body, StreamReconciler::new(config))
    }

    pub fn with_framing(body: S, config: StreamConfig, framing: Framing) -> Self {
        Self::with_reconciler(body, StreamReconciler::new(config).with_framing(framing))
    }

    fn with_reconciler(body: S, reconciler: StreamReconciler) -> Self {
        Self {
            body,
            reconciler,
            pending: VecDeque::new(),
            cancelled: None,
            done: false,
        }
    }

    /// End the stream with [`StreamError::Cancelled`] once `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = Some(Box::pin(token.cancelled_owned()));
        self
    }

    /// Drain the stream, discarding deltas, and return the final message.
    pub async fn final_message(self) -> Result<FinalMessage, StreamError> {
        let mut this = std::pin::pin!(self);
        while let Some(item) = this.next().await {
            if let StreamItem::Final(message) = item? {
                return Ok(message);
            }
        }
        Err(StreamError::Incomplete)
    }
}

impl<S, E> Stream for ReconciledStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<StreamItem, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            if let Some(cancelled) = this.cancelled.as_mut() {
                if cancelled.as_mut().poll(cx).is_ready() {
                    *this.done = true;
                    return Poll::Ready(Some(Err(StreamError::Cancelled)));
                }
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.reconciler.feed(&chunk));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(StreamError::Transport(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.pending.extend(this.reconciler.finish());
                    *this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_yields_deltas_then_final() {
        let body = chunks(&[
            "{\"content\":\"Hel\"}\n",
            "{\"content\":\"lo\"}\n",
            "{\"conversation_id\":\"c-1\"}\n",
        ]);
        let items: Vec<_> = ReconciledStream::new(body, StreamConfig::default())
            .collect()
            .await;

        let items: Vec<StreamItem> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![
                StreamItem::Delta("Hel".into()),
                StreamItem::Delta("lo".into()),
                StreamItem::Final(FinalMessage {
                    text: "Hello".into(),
                    id: Some("c-1".into()),
                    produced: true,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_ends_after_final() {
        let mut stream = ReconciledStream::new(chunks(&["x"]), StreamConfig::default());
        assert_eq!(stream.next().await, Some(Ok(StreamItem::Delta("x".into()))));
        assert!(matches!(stream.next().await, Some(Ok(StreamItem::Final(_)))));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"content\":\"a\"}\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"{\"content\":\"b\"}\n")),
        ]);
        let mut stream = ReconciledStream::new(body, StreamConfig::default());
        assert_eq!(stream.next().await, Some(Ok(StreamItem::Delta("a".into()))));
        assert!(matches!(stream.next().await, Some(Err(StreamError::Transport(_)))));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_final_message_helper() {
        let message = ReconciledStream::new(chunks(&[]), StreamConfig::default())
            .final_message()
            .await
            .unwrap();
        assert!(message.is_empty_response());
    }

    #[tokio::test]
    async fn test_cancellation_stops_pending_stream() {
        let token = CancellationToken::new();
        let body = chunks(&["{\"content\":\"a\"}\n"]).chain(stream::pending());
        let mut stream = ReconciledStream::new(body, StreamConfig::default())
            .with_cancellation(token.clone());

        assert_eq!(stream.next().await, Some(Ok(StreamItem::Delta("a".into()))));
        token.cancel();
        assert_eq!(stream.next().await, Some(Err(StreamError::Cancelled)));
        assert_eq!(stream.next().await, None);
    }
}
