//! Wire formats for delivering analysis results.
//!
//! `sse` holds the server side (event frames and the synchronous body),
//! `client` the consumer side used by the CLI and by tests.

pub mod client;
pub mod sse;

pub use client::{AnalysisView, SseDecoder, StreamError};
pub use sse::{StreamErrorBody, StreamEvent, SyncResponse};
