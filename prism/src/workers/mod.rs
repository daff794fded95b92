//! Analysis workers.
//!
//! A worker turns article text (plus the normalized output of its upstream
//! types) into one structured model call and hands the raw answer back to the
//! coordinator. Workers never retry and never normalize.

use chrono::{DateTime, Utc};
use common::SearchConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::citations::RawCitation;
use crate::error::WorkerError;
use crate::model::AnalysisKind;
use crate::normalize::NormalizedPayload;

pub mod prompt;
pub mod prompts;

pub use prompt::PromptWorker;

/// Raw structured output of one invocation, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    pub payload: Value,
    pub citations: Vec<RawCitation>,
}

impl RawOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            citations: Vec::new(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<RawCitation>) -> Self {
        self.citations = citations;
        self
    }
}

#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> AnalysisKind;

    async fn invoke(&self, ctx: WorkerContext) -> Result<RawOutput, WorkerError>;
}

/// Messages from a running worker task to its coordinator, in send order.
#[derive(Debug)]
pub enum WorkerSignal {
    Started {
        kind: AnalysisKind,
        at: DateTime<Utc>,
    },
    Status {
        kind: AnalysisKind,
        text: String,
    },
    Finished {
        kind: AnalysisKind,
        outcome: Result<RawOutput, WorkerError>,
    },
}

/// Handle through which a worker publishes intermediate status strings.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    kind: AnalysisKind,
    tx: Option<mpsc::UnboundedSender<WorkerSignal>>,
}

impl StatusReporter {
    pub(crate) fn new(kind: AnalysisKind, tx: mpsc::UnboundedSender<WorkerSignal>) -> Self {
        Self { kind, tx: Some(tx) }
    }

    /// Reporter that drops everything, for invoking a worker outside a coordinator.
    pub fn detached(kind: AnalysisKind) -> Self {
        Self { kind, tx: None }
    }

    pub fn report(&self, text: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(WorkerSignal::Status {
                kind: self.kind,
                text: text.into(),
            });
        }
    }
}

/// Everything a worker needs for one invocation.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub correlation_id: String,
    pub article: Arc<str>,
    /// Normalized output of the dependencies that succeeded
    pub upstream: BTreeMap<AnalysisKind, NormalizedPayload>,
    /// Per-request search overrides for this type
    pub search: SearchConfig,
    pub deadline: Instant,
    pub status: StatusReporter,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    /// Standalone context with no upstream input and a detached reporter.
    pub fn standalone(kind: AnalysisKind, article: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            article: article.into(),
            upstream: BTreeMap::new(),
            search: SearchConfig::default(),
            deadline: Instant::now() + timeout,
            status: StatusReporter::detached(kind),
            cancel: CancellationToken::new(),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
