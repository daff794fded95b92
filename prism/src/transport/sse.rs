use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::citations::Citation;
use crate::error::{ErrorDetail, ErrorKind, RequestError};
use crate::model::{
    AggregateResult, AnalysisEvent, AnalysisKind, OverallStatus, ProgressEvent, WorkerCompletion, WorkerStatus,
};
use crate::normalize::NormalizedPayload;

/// Body of the connection-fatal `error` event and of synchronous error
/// responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorBody {
    pub correlation_id: String,
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_types: Option<Vec<String>>,
}

impl StreamErrorBody {
    pub fn from_request_error(correlation_id: &str, err: &RequestError) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            code: err.kind(),
            message: err.to_string(),
            valid_types: err.valid_types().map(<[String]>::to_vec),
        }
    }
}

/// One server-sent event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Progress(ProgressEvent),
    WorkerComplete(WorkerCompletion),
    Error(StreamErrorBody),
    FinalResult(Box<AggregateResult>),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Progress(_) => "progress",
            StreamEvent::WorkerComplete(_) => "worker_complete",
            StreamEvent::Error(_) => "error",
            StreamEvent::FinalResult(_) => "final_result",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            StreamEvent::Progress(p) => &p.correlation_id,
            StreamEvent::WorkerComplete(c) => &c.correlation_id,
            StreamEvent::Error(e) => &e.correlation_id,
            StreamEvent::FinalResult(r) => &r.correlation_id,
        }
    }

    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            StreamEvent::Progress(p) => serde_json::to_string(p),
            StreamEvent::WorkerComplete(c) => serde_json::to_string(c),
            StreamEvent::Error(e) => serde_json::to_string(e),
            StreamEvent::FinalResult(r) => serde_json::to_string(r),
        }
    }

    /// `event: <name>\ndata: <json>\n\n`. The JSON is single-line.
    pub fn encode(&self) -> serde_json::Result<String> {
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), self.data()?))
    }

    /// Inverse of `name` + `data`.
    pub fn parse(name: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let event = match name {
            "progress" => StreamEvent::Progress(serde_json::from_str(data)?),
            "worker_complete" => StreamEvent::WorkerComplete(serde_json::from_str(data)?),
            "error" => StreamEvent::Error(serde_json::from_str(data)?),
            "final_result" => StreamEvent::FinalResult(Box::new(serde_json::from_str(data)?)),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl From<AnalysisEvent> for StreamEvent {
    fn from(event: AnalysisEvent) -> Self {
        match event {
            AnalysisEvent::Progress(p) => StreamEvent::Progress(p),
            AnalysisEvent::WorkerComplete(c) => StreamEvent::WorkerComplete(c),
            AnalysisEvent::FinalResult(r) => StreamEvent::FinalResult(r),
        }
    }
}

/// Synchronous response body. Every map is keyed by type id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub correlation_id: String,
    pub status: OverallStatus,
    /// Normalized payload per type; failed types carry the empty shape
    pub results: BTreeMap<AnalysisKind, NormalizedPayload>,
    pub statuses: BTreeMap<AnalysisKind, WorkerStatus>,
    pub citations: BTreeMap<AnalysisKind, Vec<Citation>>,
    /// Request-wide deduplicated citations, in completion order
    pub all_citations: Vec<Citation>,
    pub errors: BTreeMap<AnalysisKind, ErrorDetail>,
    pub duration_ms: u64,
}

impl From<AggregateResult> for SyncResponse {
    fn from(aggregate: AggregateResult) -> Self {
        let mut results = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        let mut citations = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (kind, result) in aggregate.results {
            statuses.insert(kind, result.status);
            citations.insert(kind, result.citations);
            if let Some(error) = result.error {
                errors.insert(kind, error);
            }
            results.insert(kind, result.normalized);
        }
        Self {
            correlation_id: aggregate.correlation_id,
            status: aggregate.status,
            results,
            statuses,
            citations,
            all_citations: aggregate.citations,
            errors,
            duration_ms: aggregate.duration_ms,
        }
    }
}
