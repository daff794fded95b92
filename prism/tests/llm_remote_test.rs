use common::SearchConfig;
use prism::error::WorkerError;
use prism::llm::remote::RemoteModelService;
use prism::llm::{ModelCall, ModelService};
use prism::model::AnalysisKind;
use prism::normalize::{normalize, NormalizedPayload};
use prism::workers::prompts;
use serde_json::json;
use std::time::Duration;

fn call(timeout: Duration) -> ModelCall {
    ModelCall {
        prompt: "Test prompt".to_string(),
        schema_name: "jargon_analysis".to_string(),
        schema: json!({"type": "object", "required": ["terms"]}),
        search: SearchConfig::default(),
        timeout,
        model: None,
    }
}

fn chat_body(content: &str) -> String {
    json!({
        "model": "sonar",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
    .to_string()
}

async fn error_for_status(status: usize) -> WorkerError {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "nope"}}"#)
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let err = service.call(call(Duration::from_secs(5))).await.unwrap_err();
    mock.assert_async().await;
    err
}

#[tokio::test]
async fn test_remote_service_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let body = json!({
        "model": "sonar",
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "```json\n{\"terms\": [{\"term\": \"QE\", \"definition\": \"Quantitative easing\"}]}\n```",
                "annotations": [
                    {"type": "url_citation", "url_citation": {"url": "https://c.org/3", "title": "C"}}
                ]
            },
            "finish_reason": "stop"
        }],
        "citations": ["https://a.org/1"],
        "search_results": [{"url": "https://b.org/2", "title": "B"}],
        "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
    });
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(mockito::Matcher::PartialJson(json!({
            "model": "sonar",
            "response_format": {"type": "json_schema", "json_schema": {"name": "jargon_analysis"}}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let reply = service.call(call(Duration::from_secs(5))).await.unwrap();

    assert_eq!(reply.content["terms"][0]["term"], "QE");
    let urls: Vec<&str> = reply.citations.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.org/1", "https://b.org/2", "https://c.org/3"]);
    assert_eq!(reply.citations[1].title.as_deref(), Some("B"));
    assert_eq!(reply.usage.total_tokens, 150);
    assert_eq!(reply.model, "sonar");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_service_status_classification() {
    assert!(matches!(error_for_status(429).await, WorkerError::RateLimited(_)));
    assert!(matches!(error_for_status(401).await, WorkerError::Unauthorized(_)));
    assert!(matches!(error_for_status(403).await, WorkerError::Unauthorized(_)));
    assert!(matches!(error_for_status(503).await, WorkerError::TransientNetwork(_)));
    assert!(matches!(error_for_status(400).await, WorkerError::ModelOutput(_)));
}

#[tokio::test]
async fn test_remote_service_rejects_schema_mismatch() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_body("{\"words\": []}"))
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let err = service.call(call(Duration::from_secs(5))).await.unwrap_err();
    match err {
        WorkerError::ModelOutput(msg) => assert!(msg.contains("terms")),
        other => panic!("expected ModelOutput, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_service_accepts_flat_bias_answer() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_body(
            r#"{"bias": "Center-Left", "bias_score": -0.4, "explanation": "Leans on one side's sources."}"#,
        ))
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let mut request = call(Duration::from_secs(5));
    request.schema_name = prompts::schema_name(AnalysisKind::Bias);
    request.schema = prompts::schema(AnalysisKind::Bias);

    let reply = service.call(request).await.unwrap();
    let (payload, recognized) = normalize(AnalysisKind::Bias, &reply.content);
    assert!(recognized);
    match payload {
        NormalizedPayload::Bias(bias) => {
            assert_eq!(bias.overall.label, "center_left");
            assert!((bias.overall.score + 0.4).abs() < 1e-9);
            assert!(bias.axes.contains_key("political"));
        }
        other => panic!("expected a bias payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_service_rejects_prose() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_body("I could not find anything relevant."))
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let err = service.call(call(Duration::from_secs(5))).await.unwrap_err();
    assert!(matches!(err, WorkerError::ModelOutput(_)));
}

#[tokio::test]
async fn test_remote_service_timeout() {
    let mut server = mockito::Server::new_async().await;

    // Mock slow response
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let service = RemoteModelService::new(server.url(), "fake-api-key", "sonar");
    let result = service.call(call(Duration::from_secs(1))).await;

    assert!(matches!(result, Err(WorkerError::Timeout(_))));
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    // Nothing listens on port 9 locally
    let service = RemoteModelService::new("http://127.0.0.1:9/v1/chat/completions", "k", "sonar");
    let err = service.call(call(Duration::from_secs(5))).await.unwrap_err();
    assert!(matches!(err, WorkerError::TransientNetwork(_)));
}
