//! Reconciliation of chunked generative responses.
//!
//! [`StreamReconciler`] is the synchronous core; [`ReconciledStream`] wraps a
//! byte stream in it and exposes the result as a lazy `Stream`.

pub mod adapter;
pub mod reconciler;

pub use adapter::{ReconciledStream, StreamError};
pub use reconciler::{FinalMessage, Framing, StreamItem, StreamReconciler};
