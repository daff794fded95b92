use common::{Config, CoordinatorConfig};
use prism::coordinator::Coordinator;
use prism::error::WorkerError;
use prism::model::{AnalysisKind, OverallStatus, WorkerStatus};
use prism::registry::{WorkerDescriptor, WorkerRegistry};
use prism::server::{build_rocket, AppState};
use prism::transport::{AnalysisView, SseDecoder};
use prism::workers::{RawOutput, Worker, WorkerContext};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct CannedWorker {
    kind: AnalysisKind,
    payload: Option<Value>,
}

#[async_trait::async_trait]
impl Worker for CannedWorker {
    fn kind(&self) -> AnalysisKind {
        self.kind
    }

    async fn invoke(&self, _ctx: WorkerContext) -> Result<RawOutput, WorkerError> {
        match &self.payload {
            Some(payload) => Ok(RawOutput::new(payload.clone())),
            None => Err(WorkerError::Unauthorized("bad key".into())),
        }
    }
}

async fn client() -> Client {
    let registry = WorkerRegistry::new()
        .with_worker(
            WorkerDescriptor::new(AnalysisKind::Jargon, Duration::from_secs(2)),
            Arc::new(CannedWorker {
                kind: AnalysisKind::Jargon,
                payload: Some(json!({"terms": [{"term": "Quorum", "definition": "Minimum attendance"}]})),
            }),
        )
        .with_worker(
            WorkerDescriptor::new(AnalysisKind::Bias, Duration::from_secs(2)),
            Arc::new(CannedWorker {
                kind: AnalysisKind::Bias,
                payload: None,
            }),
        );
    let coordinator = Coordinator::new(Arc::new(registry), &CoordinatorConfig::default());
    let state = AppState::new(Arc::new(Config::default()), Arc::new(coordinator));
    Client::tracked(build_rocket(state)).await.unwrap()
}

fn body(types: &[&str]) -> String {
    json!({
        "correlation_id": "req-1",
        "article_text": "The council met to vote on the harbor plan.",
        "requested_types": types,
    })
    .to_string()
}

#[rocket::async_test]
async fn health_and_types() {
    let client = client().await;

    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "OK");

    let response = client.get("/api/v1/types").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let types: Value = response.into_json().await.unwrap();
    let ids: Vec<&str> = types
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["type"].as_str())
        .collect();
    assert_eq!(ids, vec!["jargon", "bias"]);

    let response = client.get("/api/v1/status").dispatch().await;
    let status: Value = response.into_json().await.unwrap();
    assert_eq!(status["active_requests"], 0);
    assert_eq!(status["permits_in_use"], 0);
}

#[rocket::async_test]
async fn sync_analysis_returns_every_type() {
    let client = client().await;
    let response = client
        .post("/api/v1/analyze")
        .header(ContentType::JSON)
        .body(body(&["jargon", "bias"]))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let result: Value = response.into_json().await.unwrap();
    assert_eq!(result["correlation_id"], "req-1");
    assert_eq!(result["status"], "partial");
    assert_eq!(result["statuses"]["jargon"], "succeeded");
    assert_eq!(result["statuses"]["bias"], "failed");
    assert_eq!(result["errors"]["bias"]["kind"], "Unauthorized");

    // type id -> normalized payload
    assert_eq!(result["results"]["jargon"]["terms"][0]["term"], "Quorum");
    assert!(result["results"]["jargon"].get("raw").is_none());
    assert_eq!(result["results"]["bias"]["type"], "bias");

    // type id -> citations
    assert!(result["citations"].is_object());
    assert_eq!(result["citations"]["jargon"], json!([]));
    assert!(result["all_citations"].is_array());
}

#[rocket::async_test]
async fn unknown_type_is_a_bad_request() {
    let client = client().await;
    let response = client
        .post("/api/v1/analyze")
        .header(ContentType::JSON)
        .body(body(&["jargon", "horoscope"]))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let error: Value = response.into_json().await.unwrap();
    assert_eq!(error["code"], "ValidationError");
    assert_eq!(error["valid_types"], json!(["jargon", "bias"]));
}

#[rocket::async_test]
async fn stream_ends_with_final_result() {
    let client = client().await;
    let response = client
        .post("/api/v1/analyze/stream")
        .header(ContentType::JSON)
        .body(body(&["jargon", "bias"]))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::EventStream));
    let text = response.into_string().await.unwrap();
    let frames = SseDecoder::new().push(&text);
    let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
    assert!(names.contains(&"progress"));
    assert_eq!(names.iter().filter(|n| **n == "worker_complete").count(), 2);
    assert_eq!(names.last(), Some(&"final_result"));

    let mut view = AnalysisView::new("req-1");
    for frame in &frames {
        if let Some(event) = frame.parse().unwrap() {
            view.apply(event);
        }
    }
    assert!(view.is_closed());
    assert_eq!(view.completed().count(), 2);
    let aggregate = view.finish().unwrap();
    assert_eq!(aggregate.status, OverallStatus::Partial);
    assert_eq!(aggregate.results[&AnalysisKind::Jargon].status, WorkerStatus::Succeeded);
}

#[rocket::async_test]
async fn stream_reports_request_errors_as_one_event() {
    let client = client().await;
    let response = client
        .post("/api/v1/analyze/stream")
        .header(ContentType::JSON)
        .body(body(&[]))
        .dispatch()
        .await;

    let text = response.into_string().await.unwrap();
    let frames = SseDecoder::new().push(&text);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, "error");
    assert!(frames[0].data.contains("ValidationError"));
}

#[rocket::async_test]
async fn cancelling_unknown_request_is_not_found() {
    let client = client().await;
    let response = client.delete("/api/v1/analyze/nothing-running").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}
