use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{delete, get, post, routes, Build, Rocket, State};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::Config;

use crate::coordinator::{Coordinator, EventSink};
use crate::error::{ErrorKind, RequestError};
use crate::model::{AnalysisKind, AnalysisRequest};
use crate::transport::{StreamErrorBody, StreamEvent, SyncResponse};

const HEARTBEAT: Duration = Duration::from_secs(15);

struct ActiveEntry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct ActiveTable {
    next_generation: u64,
    entries: HashMap<String, ActiveEntry>,
}

/// Cancellation handles of the requests currently in flight.
#[derive(Clone, Default)]
pub struct ActiveRequests {
    inner: Arc<Mutex<ActiveTable>>,
}

impl ActiveRequests {
    fn lock(&self) -> std::sync::MutexGuard<'_, ActiveTable> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `correlation_id` for a new request; None while another request
    /// uses it. The id is released when the returned registration drops.
    pub fn register(&self, correlation_id: &str) -> Option<Registration> {
        let mut table = self.lock();
        if table.entries.contains_key(correlation_id) {
            return None;
        }
        table.next_generation += 1;
        let generation = table.next_generation;
        let token = CancellationToken::new();
        table.entries.insert(
            correlation_id.to_string(),
            ActiveEntry {
                generation,
                token: token.clone(),
            },
        );
        Some(Registration {
            active: self.clone(),
            correlation_id: correlation_id.to_string(),
            generation,
            token,
        })
    }

    /// Cancel and forget a request. False when nothing was running under that id.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        match self.lock().entries.remove(correlation_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().entries.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `correlation_id` only if it still belongs to `generation`.
    fn release(&self, correlation_id: &str, generation: u64) {
        let mut table = self.lock();
        if table
            .entries
            .get(correlation_id)
            .is_some_and(|e| e.generation == generation)
        {
            table.entries.remove(correlation_id);
        }
    }
}

/// Ownership of one correlation id in [`ActiveRequests`].
pub struct Registration {
    active: ActiveRequests,
    correlation_id: String,
    generation: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.active.release(&self.correlation_id, self.generation);
    }
}

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub coordinator: Arc<Coordinator>,
    pub active: ActiveRequests,
}

impl AppState {
    pub fn new(config: Arc<Config>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            started_at: Utc::now(),
            config,
            coordinator,
            active: ActiveRequests::default(),
        }
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: i64,
    active_requests: usize,
    concurrency_budget: u32,
    permits_in_use: usize,
}

#[derive(Serialize)]
struct TypeInfo {
    #[serde(rename = "type")]
    kind: AnalysisKind,
    label: &'static str,
    depends_on: Vec<AnalysisKind>,
    timeout_seconds: u64,
    weight: u32,
}

type ApiError = (Status, Json<StreamErrorBody>);

fn http_status(kind: ErrorKind) -> Status {
    match kind {
        ErrorKind::ValidationError => Status::BadRequest,
        ErrorKind::PreconditionError => Status::UnprocessableEntity,
        ErrorKind::QuotaExceededError => Status::TooManyRequests,
        ErrorKind::Cancelled | ErrorKind::TransportError => Status::new(499),
        _ => Status::InternalServerError,
    }
}

fn api_error(correlation_id: &str, err: &RequestError) -> ApiError {
    (
        http_status(err.kind()),
        Json(StreamErrorBody::from_request_error(correlation_id, err)),
    )
}

fn to_event(event: &StreamEvent) -> Option<Event> {
    match event.data() {
        Ok(data) => Some(Event::data(data).event(event.name())),
        Err(e) => {
            error!(correlation_id = %event.correlation_id(), "failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime and load of the shared worker budget.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        active_requests: state.coordinator.active_requests(),
        concurrency_budget: state.coordinator.budget_size(),
        permits_in_use: state.coordinator.permits_in_use(),
    })
}

#[get("/api/v1/types")]
async fn list_types(state: &State<AppState>) -> Json<Vec<TypeInfo>> {
    let types = state
        .coordinator
        .registry()
        .descriptors()
        .map(|d| TypeInfo {
            kind: d.kind,
            label: d.kind.label(),
            depends_on: d.depends_on.iter().copied().collect(),
            timeout_seconds: d.timeout.as_secs(),
            weight: d.weight,
        })
        .collect();
    Json(types)
}

/// Synchronous mode: one JSON body once every requested type is terminal.
#[post("/api/v1/analyze", format = "json", data = "<body>")]
async fn analyze(state: &State<AppState>, body: Json<AnalysisRequest>) -> Result<Json<SyncResponse>, ApiError> {
    let request = body.into_inner();
    let correlation_id = request.correlation_id.clone();
    let registration = state.active.register(&correlation_id).ok_or_else(|| {
        api_error(&correlation_id, &RequestError::DuplicateCorrelationId(correlation_id.clone()))
    })?;

    let outcome = state
        .coordinator
        .run(request, EventSink::discard(), registration.token())
        .await;
    drop(registration);

    match outcome {
        Ok(aggregate) => Ok(Json(SyncResponse::from(aggregate))),
        Err(e) => Err(api_error(&correlation_id, &e)),
    }
}

/// Progressive mode. Request-level failures become a single `error` event;
/// dropping the connection cancels the request.
#[post("/api/v1/analyze/stream", format = "json", data = "<body>")]
fn analyze_stream(state: &State<AppState>, body: Json<AnalysisRequest>) -> EventStream![] {
    let request = body.into_inner();
    let correlation_id = request.correlation_id.clone();
    let coordinator = state.coordinator.clone();
    let registered = state.active.register(&correlation_id);

    EventStream! {
        if let Some(registration) = registered {
            let _disconnect = registration.token().drop_guard();
            let (sink, mut rx) = EventSink::channel();

            let handle = tokio::spawn(async move {
                let cancel = registration.token();
                coordinator.run(request, sink, cancel).await
            });

            while let Some(event) = rx.recv().await {
                if let Some(event) = to_event(&StreamEvent::from(event)) {
                    yield event;
                }
            }

            match handle.await {
                Ok(Err(RequestError::Cancelled)) | Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    let body = StreamErrorBody::from_request_error(&correlation_id, &e);
                    if let Some(event) = to_event(&StreamEvent::Error(body)) {
                        yield event;
                    }
                }
                Err(e) => error!(correlation_id = %correlation_id, "analysis task failed: {}", e),
            }
        } else {
            let err = RequestError::DuplicateCorrelationId(correlation_id.clone());
            let body = StreamErrorBody::from_request_error(&correlation_id, &err);
            if let Some(event) = to_event(&StreamEvent::Error(body)) {
                yield event;
            }
        }
    }
    .heartbeat(HEARTBEAT)
}

#[delete("/api/v1/analyze/<correlation_id>")]
async fn cancel_analysis(state: &State<AppState>, correlation_id: &str) -> Status {
    if state.active.cancel(correlation_id) {
        info!(correlation_id = %correlation_id, "analysis cancelled by client");
        Status::Accepted
    } else {
        Status::NotFound
    }
}

/// Rocket instance with managed state and every route mounted, bound to
/// `[server]` address and port.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", state.config.server.address.clone()))
        .merge(("port", state.config.server.port));

    rocket::custom(figment).manage(state).mount(
        "/",
        routes![health, status, list_types, analyze, analyze_stream, cancel_analysis],
    )
}

/// Build and launch the Rocket server. Blocks until Rocket shuts down.
pub async fn launch_rocket(state: AppState) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_releases_its_id_on_drop() {
        let active = ActiveRequests::default();
        let first = active.register("req-1").unwrap();
        assert!(active.register("req-1").is_none());
        drop(first);
        assert!(active.is_empty());
        assert!(active.register("req-1").is_some());
    }

    #[test]
    fn stale_registration_keeps_reused_id() {
        let active = ActiveRequests::default();
        let old = active.register("req-1").unwrap();
        let old_token = old.token();

        assert!(active.cancel("req-1"));
        assert!(old_token.is_cancelled());

        // same id claimed again before the cancelled request winds down
        let new = active.register("req-1").unwrap();
        drop(old);
        assert!(active.contains("req-1"));
        assert!(!new.token().is_cancelled());

        drop(new);
        assert!(!active.contains("req-1"));
        assert!(!active.cancel("req-1"));
    }
}
