use common::SearchConfig;
use std::sync::Arc;
use tracing::debug;

use super::{prompts, RawOutput, Worker, WorkerContext};
use crate::citations;
use crate::error::WorkerError;
use crate::llm::{ModelCall, ModelService};
use crate::model::AnalysisKind;

/// Worker that answers with a single schema-constrained model call.
pub struct PromptWorker {
    kind: AnalysisKind,
    model: Arc<dyn ModelService>,
    model_name: Option<String>,
    search: SearchConfig,
}

impl PromptWorker {
    pub fn new(kind: AnalysisKind, model: Arc<dyn ModelService>) -> Self {
        Self {
            kind,
            model,
            model_name: None,
            search: SearchConfig::default(),
        }
    }

    pub fn with_model(mut self, model_name: Option<String>) -> Self {
        self.model_name = model_name;
        self
    }

    /// Search defaults for this type; per-request overrides win.
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn build_call(&self, ctx: &WorkerContext) -> ModelCall {
        ModelCall {
            prompt: prompts::build_prompt(self.kind, &ctx.article, &ctx.upstream),
            schema_name: prompts::schema_name(self.kind),
            schema: prompts::schema(self.kind),
            search: self.search.merged(&ctx.search),
            timeout: ctx.remaining(),
            model: self.model_name.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Worker for PromptWorker {
    fn kind(&self) -> AnalysisKind {
        self.kind
    }

    async fn invoke(&self, ctx: WorkerContext) -> Result<RawOutput, WorkerError> {
        let call = self.build_call(&ctx);
        if call.search.enabled.unwrap_or(true) {
            ctx.status
                .report(format!("Searching sources for {}…", self.kind.label()));
        }

        let reply = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(WorkerError::Cancelled),
            reply = self.model.call(call) => reply?,
        };

        let mut found = reply.citations;
        found.extend(citations::from_payload(&reply.content));
        if !found.is_empty() {
            ctx.status.report(format!("Reading {} sources…", found.len()));
        }
        debug!(
            correlation_id = %ctx.correlation_id,
            kind = %self.kind,
            model = %reply.model,
            tokens = reply.usage.total_tokens,
            "worker answer received"
        );

        Ok(RawOutput::new(reply.content).with_citations(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::RawCitation;
    use crate::llm::{ModelReply, UsageMetadata};
    use crate::workers::{StatusReporter, WorkerSignal};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Recorder {
        calls: Mutex<Vec<ModelCall>>,
    }

    #[async_trait::async_trait]
    impl ModelService for Recorder {
        async fn call(&self, request: ModelCall) -> Result<ModelReply, WorkerError> {
            self.calls.lock().unwrap().push(request);
            Ok(ModelReply {
                content: json!({"terms": [], "sources": ["https://a.org/x"]}),
                citations: vec![RawCitation::new("https://b.org/y")],
                usage: UsageMetadata::default(),
                model: "fake".into(),
            })
        }
    }

    #[tokio::test]
    async fn reports_status_and_merges_citations() {
        let recorder = Arc::new(Recorder { calls: Mutex::new(Vec::new()) });
        let worker = PromptWorker::new(AnalysisKind::Jargon, recorder.clone())
            .with_search(SearchConfig { recency: Some("month".into()), ..Default::default() });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = WorkerContext::standalone(AnalysisKind::Jargon, "Some text", Duration::from_secs(5));
        ctx.status = StatusReporter::new(AnalysisKind::Jargon, tx);
        ctx.search = SearchConfig { recency: Some("week".into()), ..Default::default() };

        let out = worker.invoke(ctx).await.unwrap();
        assert_eq!(out.citations.len(), 2);

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].search.recency.as_deref(), Some("week"));
        assert_eq!(calls[0].schema_name, "jargon_analysis");
        drop(calls);

        let mut texts = Vec::new();
        while let Ok(WorkerSignal::Status { text, .. }) = rx.try_recv() {
            texts.push(text);
        }
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("Searching sources"));
        assert!(texts[1].starts_with("Reading 2 sources"));
    }

    #[tokio::test]
    async fn observes_cancellation() {
        struct Never;
        #[async_trait::async_trait]
        impl ModelService for Never {
            async fn call(&self, _: ModelCall) -> Result<ModelReply, WorkerError> {
                std::future::pending().await
            }
        }
        let worker = PromptWorker::new(AnalysisKind::Bias, Arc::new(Never));
        let ctx = WorkerContext::standalone(AnalysisKind::Bias, "t", Duration::from_secs(5));
        ctx.cancel.cancel();
        let err = worker.invoke(ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }
}
