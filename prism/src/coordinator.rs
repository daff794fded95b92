//! Per-request coordination.
//!
//! A `Coordinator` is shared by every request the process serves. Each call
//! to [`Coordinator::run`] validates the request, resolves the article,
//! reserves quota, then drives the dependency-ordered worker plan to a
//! terminal `AggregateResult`, streaming events to an [`EventSink`] on the
//! way. The concurrency budget (a semaphore) is the only state shared across
//! requests.

use chrono::Utc;
use common::{Config, CoordinatorConfig, SearchConfig};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::citations::{self, CitationSet};
use crate::error::{ErrorDetail, ErrorKind, RequestError, WorkerError};
use crate::extraction::{ArticleExtractor, HttpExtractor};
use crate::llm::ModelService;
use crate::model::{
    AggregateResult, AnalysisEvent, AnalysisKind, AnalysisRequest, OverallStatus, Phase, ProgressEvent,
    WorkerCompletion, WorkerResult, WorkerStatus,
};
use crate::normalize;
use crate::quota::{self, QuotaService, Unlimited};
use crate::registry::{self, DispatchPlan, WorkerRegistry};
use crate::workers::{RawOutput, StatusReporter, Worker, WorkerContext, WorkerSignal};

/// Destination of the events of one request.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AnalysisEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink for callers that only want the returned aggregate.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// False once the receiving side is gone.
    fn send(&self, event: AnalysisEvent) -> bool {
        match &self.tx {
            Some(tx) => tx.send(event).is_ok(),
            None => true,
        }
    }
}

/// Event emission for one request. Nothing is emitted once the request is
/// cancelled; a vanished receiver cancels the request.
struct Emitter {
    correlation_id: String,
    sink: EventSink,
    cancel: CancellationToken,
}

impl Emitter {
    fn emit(&self, event: AnalysisEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if !self.sink.send(event) {
            info!(correlation_id = %self.correlation_id, "event receiver dropped, cancelling request");
            self.cancel.cancel();
        }
    }

    fn progress(&self, kind: Option<AnalysisKind>, phase: Phase, message: impl Into<String>) {
        self.emit(AnalysisEvent::Progress(ProgressEvent {
            correlation_id: self.correlation_id.clone(),
            kind,
            phase,
            message: message.into(),
            at: Utc::now(),
        }));
    }

    fn completed(&self, result: &WorkerResult) {
        self.emit(AnalysisEvent::WorkerComplete(WorkerCompletion::from_result(
            &self.correlation_id,
            result,
        )));
    }
}

/// Counts a request as active for as long as its future lives.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct Coordinator {
    registry: Arc<WorkerRegistry>,
    budget: Arc<Semaphore>,
    budget_size: u32,
    quota: Arc<dyn QuotaService>,
    extractor: Option<Arc<dyn ArticleExtractor>>,
    request_deadline: Duration,
    citation_cap: Option<usize>,
    active: AtomicUsize,
}

impl Coordinator {
    pub fn new(registry: Arc<WorkerRegistry>, config: &CoordinatorConfig) -> Self {
        let budget_size = config.max_concurrency.max(1);
        Self {
            registry,
            budget: Arc::new(Semaphore::new(budget_size as usize)),
            budget_size,
            quota: Arc::new(Unlimited),
            extractor: None,
            request_deadline: config.request_deadline(),
            citation_cap: config.citation_cap,
            active: AtomicUsize::new(0),
        }
    }

    /// Coordinator wired the way `config` describes: default registry,
    /// HTTP extractor and the configured quota service.
    pub fn from_config(config: &Config, model: Arc<dyn ModelService>) -> anyhow::Result<Self> {
        let registry = registry::default_registry(model, config)?;
        let extractor = HttpExtractor::new(&config.extraction)?;
        Ok(Self::new(Arc::new(registry), &config.coordinator)
            .with_quota(Arc::from(quota::from_config(&config.quota)))
            .with_extractor(Arc::new(extractor)))
    }

    pub fn with_quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArticleExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn budget_size(&self) -> u32 {
        self.budget_size
    }

    /// Permits currently held by running workers, across all requests.
    pub fn permits_in_use(&self) -> usize {
        (self.budget_size as usize).saturating_sub(self.budget.available_permits())
    }

    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Drive one request to completion.
    ///
    /// Request-level failures (validation, extraction, quota, cancellation)
    /// return `Err` and are never emitted through `sink`; the transport
    /// decides how to surface them. On `Ok`, the last event sent was the
    /// `FinalResult` carrying the same aggregate.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<AggregateResult, RequestError> {
        let _active = ActiveGuard::enter(&self.active);
        let outcome = self.run_inner(request, sink, cancel).await;
        if let Err(e) = &outcome {
            warn!(kind = ?e.kind(), "analysis request rejected: {}", e);
        }
        outcome
    }

    async fn run_inner(
        &self,
        request: AnalysisRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<AggregateResult, RequestError> {
        let kinds = self.registry.validate_types(&request.requested_types)?;
        let search = self.search_overrides(&request.per_type_config)?;
        let plan = self.registry.plan(&kinds)?;

        let article = self.resolve_article(&request, &cancel).await?;

        self.quota
            .check_and_reserve(request.user.as_deref(), &kinds)
            .await
            .map_err(|e| RequestError::QuotaExceeded(e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(RequestError::Cancelled);
        }

        info!(
            correlation_id = %request.correlation_id,
            types = kinds.len(),
            article_chars = article.chars().count(),
            "analysis request accepted"
        );
        let emitter = Emitter {
            correlation_id: request.correlation_id.clone(),
            sink,
            cancel: cancel.clone(),
        };
        emitter.progress(None, Phase::Accepted, format!("Analyzing {} dimension(s)", kinds.len()));

        self.execute(&plan, article.into(), search, emitter).await
    }

    fn search_overrides(
        &self,
        per_type: &BTreeMap<String, SearchConfig>,
    ) -> Result<BTreeMap<AnalysisKind, SearchConfig>, RequestError> {
        let mut out = BTreeMap::new();
        let mut unknown = Vec::new();
        for (type_id, config) in per_type {
            match self.registry.resolve(type_id) {
                Ok(descriptor) => {
                    out.insert(descriptor.kind, config.clone());
                }
                Err(_) => unknown.push(type_id.clone()),
            }
        }
        if unknown.is_empty() {
            Ok(out)
        } else {
            Err(RequestError::UnknownTypes {
                unknown,
                valid: self.registry.type_ids(),
            })
        }
    }

    async fn resolve_article(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<String, RequestError> {
        if let Some(text) = request.article_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(text.to_string());
        }
        let url = request
            .article_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(RequestError::MissingArticle)?;
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| RequestError::Precondition("no article extractor configured".to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(RequestError::Cancelled),
            text = extractor.extract(url) => text.map_err(|e| RequestError::Precondition(e.to_string())),
        }
    }

    async fn execute(
        &self,
        plan: &DispatchPlan,
        article: Arc<str>,
        search: BTreeMap<AnalysisKind, SearchConfig>,
        emitter: Emitter,
    ) -> Result<AggregateResult, RequestError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.request_deadline;
        let worker_cancel = emitter.cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerSignal>();

        let mut run = RunState {
            plan,
            results: plan.order().into_iter().map(|k| (k, WorkerResult::pending(k))).collect(),
            waiting: plan.deps.iter().map(|(k, d)| (*k, d.len())).collect(),
            citations: CitationSet::new(self.citation_cap),
        };
        let mut tasks = JoinSet::new();

        for kind in plan.order() {
            let waiting_on: Vec<&str> = plan.dependencies(kind).map(AnalysisKind::as_str).collect();
            let message = if waiting_on.is_empty() {
                format!("Queued {}", kind.label())
            } else {
                format!("Waiting for {}", waiting_on.join(", "))
            };
            emitter.progress(Some(kind), Phase::Queued, message);
        }

        let ready: Vec<AnalysisKind> = run.waiting.iter().filter(|(_, n)| **n == 0).map(|(k, _)| *k).collect();
        for kind in ready {
            self.dispatch(&mut tasks, kind, &run, &article, &search, deadline, &tx, &emitter, &worker_cancel);
        }

        while !run.all_terminal() {
            tokio::select! {
                biased;

                _ = emitter.cancel.cancelled() => {
                    info!(correlation_id = %emitter.correlation_id, "analysis request cancelled");
                    worker_cancel.cancel();
                    tasks.abort_all();
                    return Err(RequestError::Cancelled);
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        correlation_id = %emitter.correlation_id,
                        deadline_ms = self.request_deadline.as_millis() as u64,
                        "request deadline reached"
                    );
                    worker_cancel.cancel();
                    tasks.abort_all();
                    let detail = ErrorDetail::new(
                        ErrorKind::Timeout,
                        format!("request deadline of {:?} elapsed", self.request_deadline),
                    );
                    for result in run.results.values_mut() {
                        if result.finish(WorkerStatus::TimedOut, Some(detail.clone()), Utc::now()) {
                            emitter.completed(result);
                        }
                    }
                }

                Some(signal) = rx.recv() => match signal {
                    WorkerSignal::Started { kind, at } => {
                        if let Some(result) = run.results.get_mut(&kind) {
                            if result.start(at) {
                                emitter.progress(Some(kind), Phase::Running, format!("Running {}", kind.label()));
                            }
                        }
                    }
                    WorkerSignal::Status { kind, text } => {
                        if run.results.get(&kind).is_some_and(|r| !r.status.is_terminal()) {
                            emitter.progress(Some(kind), Phase::Working, text);
                        }
                    }
                    WorkerSignal::Finished { kind, outcome } => {
                        if let Some(status) = run.record(kind, outcome) {
                            self.after_finish(kind, status, &mut run, &mut tasks, &article, &search, deadline, &tx, &emitter, &worker_cancel, started);
                        }
                    }
                },

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(correlation_id = %emitter.correlation_id, "worker task panicked: {}", e);
                        }
                    }
                }
            }
        }

        worker_cancel.cancel();
        if emitter.cancel.is_cancelled() {
            return Err(RequestError::Cancelled);
        }

        let status = OverallStatus::from_statuses(run.results.values().map(|r| r.status));
        emitter.progress(None, Phase::Finalizing, "Finalizing results");
        let aggregate = AggregateResult {
            correlation_id: emitter.correlation_id.clone(),
            status,
            results: run.results,
            citations: run.citations.into_vec(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            correlation_id = %aggregate.correlation_id,
            status = ?aggregate.status,
            citations = aggregate.citations.len(),
            elapsed_ms = aggregate.duration_ms,
            "analysis complete"
        );
        emitter.emit(AnalysisEvent::FinalResult(Box::new(aggregate.clone())));
        Ok(aggregate)
    }

    #[allow(clippy::too_many_arguments)]
    fn after_finish(
        &self,
        kind: AnalysisKind,
        status: WorkerStatus,
        run: &mut RunState<'_>,
        tasks: &mut JoinSet<()>,
        article: &Arc<str>,
        search: &BTreeMap<AnalysisKind, SearchConfig>,
        deadline: Instant,
        tx: &mpsc::UnboundedSender<WorkerSignal>,
        emitter: &Emitter,
        cancel: &CancellationToken,
        started: Instant,
    ) {
        if let Some(result) = run.results.get(&kind) {
            info!(
                correlation_id = %emitter.correlation_id,
                kind = %kind,
                status = ?status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "worker finished"
            );
            emitter.completed(result);
        }
        if status == WorkerStatus::Succeeded {
            for next in run.unblock(kind) {
                self.dispatch(tasks, next, run, article, search, deadline, tx, emitter, cancel);
            }
        } else {
            for blocked in run.fail_dependents(kind) {
                if let Some(result) = run.results.get(&blocked) {
                    emitter.completed(result);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        tasks: &mut JoinSet<()>,
        kind: AnalysisKind,
        run: &RunState<'_>,
        article: &Arc<str>,
        search: &BTreeMap<AnalysisKind, SearchConfig>,
        deadline: Instant,
        tx: &mpsc::UnboundedSender<WorkerSignal>,
        emitter: &Emitter,
        cancel: &CancellationToken,
    ) {
        let (Some(worker), Some(descriptor)) = (self.registry.worker(kind), self.registry.descriptor(kind)) else {
            return;
        };
        let upstream = run
            .plan
            .dependencies(kind)
            .filter_map(|dep| run.results.get(&dep).map(|r| (dep, r.normalized.clone())))
            .collect();
        let job = Job {
            kind,
            worker,
            permits: descriptor.weight.clamp(1, self.budget_size),
            timeout: descriptor.timeout,
            budget: self.budget.clone(),
            tx: tx.clone(),
            template: WorkerContext {
                correlation_id: emitter.correlation_id.clone(),
                article: article.clone(),
                upstream,
                search: search.get(&kind).cloned().unwrap_or_default(),
                deadline,
                status: StatusReporter::new(kind, tx.clone()),
                cancel: cancel.child_token(),
            },
        };
        debug!(correlation_id = %emitter.correlation_id, kind = %kind, "dispatching worker");
        tasks.spawn(job.run());
    }
}

/// One worker invocation, owned by its task.
struct Job {
    kind: AnalysisKind,
    worker: Arc<dyn Worker>,
    permits: u32,
    timeout: Duration,
    budget: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<WorkerSignal>,
    /// Context handed to the worker; its deadline is the request deadline
    /// and is tightened to the per-call timeout once a permit is held
    template: WorkerContext,
}

impl Job {
    async fn run(self) {
        let Job {
            kind,
            worker,
            permits,
            timeout,
            budget,
            tx,
            mut template,
        } = self;
        let cancel = template.cancel.clone();
        let finished = FinishGuard {
            kind,
            tx: Some(tx.clone()),
        };

        let acquired = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = budget.acquire_many_owned(permits) => permit.ok(),
        };
        let Some(_permit) = acquired else {
            finished.send(Err(WorkerError::Cancelled));
            return;
        };

        let _ = tx.send(WorkerSignal::Started { kind, at: Utc::now() });
        template.deadline = template.deadline.min(Instant::now() + timeout);
        let limit = template.remaining();

        let outcome: Result<RawOutput, WorkerError> = tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            res = tokio::time::timeout(limit, worker.invoke(template)) => {
                res.unwrap_or(Err(WorkerError::Timeout(limit)))
            }
        };
        finished.send(outcome);
    }
}

/// Delivers the `Finished` signal of a job exactly once. A job whose task
/// unwinds reports `Panicked` from `Drop`.
struct FinishGuard {
    kind: AnalysisKind,
    tx: Option<mpsc::UnboundedSender<WorkerSignal>>,
}

impl FinishGuard {
    fn send(mut self, outcome: Result<RawOutput, WorkerError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerSignal::Finished { kind: self.kind, outcome });
        }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        // Aborted tasks are dropped without unwinding and report nothing
        if !std::thread::panicking() {
            return;
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerSignal::Finished {
                kind: self.kind,
                outcome: Err(WorkerError::Panicked),
            });
        }
    }
}

/// Mutable per-request bookkeeping. Only the coordinator loop touches it.
struct RunState<'a> {
    plan: &'a DispatchPlan,
    results: BTreeMap<AnalysisKind, WorkerResult>,
    /// Unfinished in-request dependencies per type
    waiting: BTreeMap<AnalysisKind, usize>,
    citations: CitationSet,
}

impl RunState<'_> {
    fn all_terminal(&self) -> bool {
        self.results.values().all(|r| r.status.is_terminal())
    }

    /// Store a worker outcome. None when the type was already terminal.
    fn record(&mut self, kind: AnalysisKind, outcome: Result<RawOutput, WorkerError>) -> Option<WorkerStatus> {
        let result = self.results.get_mut(&kind)?;
        if result.status.is_terminal() {
            return None;
        }
        let now = Utc::now();
        if result.started_at.is_none() {
            result.started_at = Some(now);
        }

        let (status, error) = match outcome {
            Ok(raw) => {
                let (normalized, ok) = normalize::normalize(kind, &raw.payload);
                result.normalized = normalized;
                result.raw = Some(raw.payload);
                result.citations = citations::aggregate(&[raw.citations], None);
                self.citations.extend(result.citations.iter().cloned());
                if ok {
                    (WorkerStatus::Succeeded, None)
                } else {
                    (
                        WorkerStatus::Degraded,
                        Some(ErrorDetail::new(
                            ErrorKind::NormalizationError,
                            format!("{kind} output could not be mapped to its schema"),
                        )),
                    )
                }
            }
            Err(e) => {
                let status = match e {
                    WorkerError::ModelOutput(_) => WorkerStatus::Degraded,
                    WorkerError::Timeout(_) => WorkerStatus::TimedOut,
                    _ => WorkerStatus::Failed,
                };
                (status, Some(e.detail()))
            }
        };
        result.finish(status, error, now);
        Some(status)
    }

    /// Dependents of `kind` that have no unfinished dependency left.
    fn unblock(&mut self, kind: AnalysisKind) -> Vec<AnalysisKind> {
        let mut ready = Vec::new();
        for next in self.plan.dependents.get(&kind).into_iter().flatten() {
            if let Some(n) = self.waiting.get_mut(next) {
                *n = n.saturating_sub(1);
                let pending = self.results.get(next).is_some_and(|r| r.status == WorkerStatus::Pending);
                if *n == 0 && pending {
                    ready.push(*next);
                }
            }
        }
        ready
    }

    /// Mark every pending transitive dependent of `kind` as failed.
    fn fail_dependents(&mut self, kind: AnalysisKind) -> Vec<AnalysisKind> {
        let mut failed = Vec::new();
        for dependent in self.plan.transitive_dependents(kind) {
            let Some(result) = self.results.get_mut(&dependent) else {
                continue;
            };
            let detail = ErrorDetail::new(
                ErrorKind::DependencyFailed,
                format!("{dependent} depends on {kind}, which did not succeed"),
            );
            if result.finish(WorkerStatus::Failed, Some(detail), Utc::now()) {
                failed.push(dependent);
            }
        }
        failed
    }
}
