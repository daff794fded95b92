//! Request, result and event types shared by the coordinator and transport.

use chrono::{DateTime, Utc};
use common::SearchConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::citations::Citation;
use crate::error::ErrorDetail;
use crate::normalize::NormalizedPayload;

/// Analysis dimension. The lowercase name is the type id used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Jargon,
    Viewpoints,
    FactCheck,
    Bias,
    Timeline,
    Expert,
    Pulse,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 7] = [
        AnalysisKind::Jargon,
        AnalysisKind::Viewpoints,
        AnalysisKind::FactCheck,
        AnalysisKind::Bias,
        AnalysisKind::Timeline,
        AnalysisKind::Expert,
        AnalysisKind::Pulse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::Jargon => "jargon",
            AnalysisKind::Viewpoints => "viewpoints",
            AnalysisKind::FactCheck => "factcheck",
            AnalysisKind::Bias => "bias",
            AnalysisKind::Timeline => "timeline",
            AnalysisKind::Expert => "expert",
            AnalysisKind::Pulse => "pulse",
        }
    }

    /// Human readable name used in status text.
    pub fn label(self) -> &'static str {
        match self {
            AnalysisKind::Jargon => "terminology",
            AnalysisKind::Viewpoints => "alternative viewpoints",
            AnalysisKind::FactCheck => "fact check",
            AnalysisKind::Bias => "bias analysis",
            AnalysisKind::Timeline => "timeline",
            AnalysisKind::Expert => "expert opinion",
            AnalysisKind::Pulse => "social pulse",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        AnalysisKind::ALL
            .into_iter()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| s.to_string())
    }
}

/// Delivery mode requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Stream,
    #[default]
    Sync,
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Inbound analysis request, identical for both delivery modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
    pub article_url: Option<String>,
    pub article_text: Option<String>,
    #[serde(default)]
    pub requested_types: Vec<String>,
    /// Search overrides keyed by type id
    #[serde(default)]
    pub per_type_config: BTreeMap<String, SearchConfig>,
    /// Caller identity used for quota accounting
    pub user: Option<String>,
    #[serde(default)]
    pub mode: Mode,
}

impl AnalysisRequest {
    pub fn from_text(text: impl Into<String>, types: &[AnalysisKind]) -> Self {
        Self {
            correlation_id: new_correlation_id(),
            article_url: None,
            article_text: Some(text.into()),
            requested_types: types.iter().map(|k| k.as_str().to_string()).collect(),
            per_type_config: BTreeMap::new(),
            user: None,
            mode: Mode::Sync,
        }
    }

    pub fn from_url(url: impl Into<String>, types: &[AnalysisKind]) -> Self {
        Self {
            article_url: Some(url.into()),
            article_text: None,
            ..Self::from_text(String::new(), types)
        }
    }
}

/// Per-type lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Degraded,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkerStatus::Pending | WorkerStatus::Running)
    }
}

/// Outcome of one requested type inside an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub status: WorkerStatus,
    pub raw: Option<Value>,
    pub normalized: NormalizedPayload,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub error: Option<ErrorDetail>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkerResult {
    pub fn pending(kind: AnalysisKind) -> Self {
        Self {
            kind,
            status: WorkerStatus::Pending,
            raw: None,
            normalized: NormalizedPayload::empty(kind),
            citations: Vec::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// pending -> running. Returns false for any other starting state.
    pub fn start(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != WorkerStatus::Pending {
            return false;
        }
        self.status = WorkerStatus::Running;
        self.started_at = Some(at);
        true
    }

    /// Move to a terminal status. A result that is already terminal is left
    /// untouched and false is returned.
    pub fn finish(&mut self, status: WorkerStatus, error: Option<ErrorDetail>, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        self.finished_at = Some(at);
        true
    }
}

/// Request-level outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

impl OverallStatus {
    /// `success` when every type succeeded, `failed` when every type failed,
    /// `partial` otherwise. Degraded and timed-out types are not failures here.
    pub fn from_statuses<I: IntoIterator<Item = WorkerStatus>>(statuses: I) -> Self {
        let (mut total, mut succeeded, mut failed) = (0usize, 0usize, 0usize);
        for status in statuses {
            total += 1;
            match status {
                WorkerStatus::Succeeded => succeeded += 1,
                WorkerStatus::Failed => failed += 1,
                _ => {}
            }
        }
        if total > 0 && succeeded == total {
            OverallStatus::Success
        } else if failed == total {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        }
    }
}

/// Final snapshot of a request; one entry per requested type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub correlation_id: String,
    pub status: OverallStatus,
    pub results: BTreeMap<AnalysisKind, WorkerResult>,
    /// All citations of the request, deduplicated in completion order
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Accepted,
    Queued,
    Running,
    Working,
    Completed,
    Finalizing,
}

/// Transient progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub correlation_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AnalysisKind>,
    pub phase: Phase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Payload of a `worker_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCompletion {
    pub correlation_id: String,
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub status: WorkerStatus,
    pub payload: NormalizedPayload,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub error: Option<ErrorDetail>,
}

impl WorkerCompletion {
    pub fn from_result(correlation_id: &str, result: &WorkerResult) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            kind: result.kind,
            status: result.status,
            payload: result.normalized.clone(),
            citations: result.citations.clone(),
            error: result.error.clone(),
        }
    }
}

/// Everything the coordinator emits for a request, in emission order.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Progress(ProgressEvent),
    WorkerComplete(WorkerCompletion),
    FinalResult(Box<AggregateResult>),
}

impl AnalysisEvent {
    pub fn correlation_id(&self) -> &str {
        match self {
            AnalysisEvent::Progress(p) => &p.correlation_id,
            AnalysisEvent::WorkerComplete(c) => &c.correlation_id,
            AnalysisEvent::FinalResult(r) => &r.correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_type_ids() {
        for kind in AnalysisKind::ALL {
            assert_eq!(kind.as_str().parse::<AnalysisKind>(), Ok(kind));
        }
        assert_eq!(" Bias ".parse::<AnalysisKind>(), Ok(AnalysisKind::Bias));
        assert!("astrology".parse::<AnalysisKind>().is_err());
        let json = serde_json::to_string(&AnalysisKind::FactCheck).unwrap();
        assert_eq!(json, "\"factcheck\"");
    }

    #[test]
    fn terminal_status_never_regresses() {
        let mut result = WorkerResult::pending(AnalysisKind::Jargon);
        let now = Utc::now();
        assert!(result.start(now));
        assert!(!result.start(now));
        assert!(!result.finish(WorkerStatus::Running, None, now));
        assert!(result.finish(WorkerStatus::Succeeded, None, now));
        assert!(!result.finish(WorkerStatus::Failed, None, now));
        assert_eq!(result.status, WorkerStatus::Succeeded);
    }

    #[test]
    fn overall_status_rules() {
        use WorkerStatus::*;
        assert_eq!(OverallStatus::from_statuses([Succeeded, Succeeded]), OverallStatus::Success);
        assert_eq!(OverallStatus::from_statuses([Succeeded, Failed]), OverallStatus::Partial);
        assert_eq!(OverallStatus::from_statuses([Succeeded, Degraded]), OverallStatus::Partial);
        assert_eq!(OverallStatus::from_statuses([Failed, Failed]), OverallStatus::Failed);
        assert_eq!(OverallStatus::from_statuses([Failed, TimedOut]), OverallStatus::Partial);
        assert_eq!(OverallStatus::from_statuses([Degraded, Degraded]), OverallStatus::Partial);
    }

    #[test]
    fn request_defaults() {
        let req: AnalysisRequest = serde_json::from_str(
            r#"{"article_text": "hello", "requested_types": ["bias"]}"#,
        )
        .unwrap();
        assert_eq!(req.mode, Mode::Sync);
        assert!(!req.correlation_id.is_empty());
        assert!(req.per_type_config.is_empty());
    }
}
