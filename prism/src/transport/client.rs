//! Client-side consumption of the event stream.

use std::collections::BTreeMap;
use thiserror::Error;

use super::sse::{StreamErrorBody, StreamEvent};
use crate::error::ErrorKind;
use crate::model::{AggregateResult, AnalysisKind, WorkerCompletion};

/// Shown while no server-originated status text is available.
pub const WORKING_INDICATOR: &str = "Working…";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream for {correlation_id} closed without a final result")]
    ClosedWithoutFinal { correlation_id: String },

    #[error("server reported {code:?}: {message}")]
    Server { code: ErrorKind, message: String },

    #[error("malformed {event} event: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One decoded `event:`/`data:` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    /// Typed event, None for event names this client does not know.
    pub fn parse(&self) -> Result<Option<StreamEvent>, StreamError> {
        StreamEvent::parse(&self.event, &self.data).map_err(|source| StreamError::Malformed {
            event: self.event.clone(),
            source,
        })
    }
}

/// Incremental `text/event-stream` decoder. Feed it chunks as they arrive;
/// comment lines (heartbeats) are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// View of one analysis request as seen by a client. Events for other
/// correlation ids are ignored.
#[derive(Debug, Clone)]
pub struct AnalysisView {
    correlation_id: String,
    status_text: Option<String>,
    completed: BTreeMap<AnalysisKind, WorkerCompletion>,
    final_result: Option<AggregateResult>,
    error: Option<StreamErrorBody>,
}

impl AnalysisView {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status_text: None,
            completed: BTreeMap::new(),
            final_result: None,
            error: None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Apply an event; returns false when it belongs to another request or
    /// arrives after the stream already ended.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if event.correlation_id() != self.correlation_id || self.is_closed() {
            return false;
        }
        match event {
            StreamEvent::Progress(p) => {
                if !p.message.trim().is_empty() {
                    self.status_text = Some(p.message);
                }
            }
            StreamEvent::WorkerComplete(c) => {
                self.completed.insert(c.kind, c);
            }
            StreamEvent::Error(e) => self.error = Some(e),
            StreamEvent::FinalResult(r) => self.final_result = Some(*r),
        }
        true
    }

    /// Latest status text sent by the server, or the generic indicator.
    pub fn status_line(&self) -> &str {
        self.status_text.as_deref().unwrap_or(WORKING_INDICATOR)
    }

    pub fn completed(&self) -> impl Iterator<Item = &WorkerCompletion> {
        self.completed.values()
    }

    pub fn is_closed(&self) -> bool {
        self.final_result.is_some() || self.error.is_some()
    }

    /// Consume the view once the stream has ended.
    pub fn finish(self) -> Result<AggregateResult, StreamError> {
        if let Some(e) = self.error {
            return Err(StreamError::Server {
                code: e.code,
                message: e.message,
            });
        }
        self.final_result.ok_or(StreamError::ClosedWithoutFinal {
            correlation_id: self.correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OverallStatus, Phase, ProgressEvent};
    use chrono::Utc;

    fn progress(id: &str, message: &str) -> StreamEvent {
        StreamEvent::Progress(ProgressEvent {
            correlation_id: id.into(),
            kind: None,
            phase: Phase::Working,
            message: message.into(),
            at: Utc::now(),
        })
    }

    fn final_result(id: &str) -> StreamEvent {
        StreamEvent::FinalResult(Box::new(AggregateResult {
            correlation_id: id.into(),
            status: OverallStatus::Success,
            results: BTreeMap::new(),
            citations: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 1,
        }))
    }

    #[test]
    fn decoder_handles_split_chunks_and_heartbeats() {
        let frame = progress("c1", "Searching").encode().unwrap();
        let (a, b) = frame.split_at(10);
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(":\n\n").is_empty());
        assert!(decoder.push(a).is_empty());
        let frames = decoder.push(b);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "progress");
        match frames[0].parse().unwrap() {
            Some(StreamEvent::Progress(p)) => assert_eq!(p.message, "Searching"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decoder_joins_multiline_data_and_crlf() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push("event: x\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames, vec![SseFrame { event: "x".into(), data: "a\nb".into() }]);
        assert!(frames[0].parse().unwrap().is_none());
    }

    #[test]
    fn view_ignores_foreign_ids_and_never_invents_text() {
        let mut view = AnalysisView::new("mine");
        assert_eq!(view.status_line(), WORKING_INDICATOR);
        assert!(!view.apply(progress("theirs", "Reading 3 sources")));
        assert_eq!(view.status_line(), WORKING_INDICATOR);
        assert!(view.apply(progress("mine", "Reading 5 sources")));
        assert_eq!(view.status_line(), "Reading 5 sources");
        assert!(view.apply(progress("mine", "  ")));
        assert_eq!(view.status_line(), "Reading 5 sources");
    }

    #[test]
    fn view_requires_final_result() {
        let mut view = AnalysisView::new("c9");
        view.apply(progress("c9", "Running"));
        match view.finish() {
            Err(StreamError::ClosedWithoutFinal { correlation_id }) => assert_eq!(correlation_id, "c9"),
            other => panic!("unexpected {other:?}"),
        }

        let mut view = AnalysisView::new("c9");
        assert!(view.apply(final_result("c9")));
        assert!(!view.apply(progress("c9", "late")));
        assert_eq!(view.finish().unwrap().status, OverallStatus::Success);
    }
}
