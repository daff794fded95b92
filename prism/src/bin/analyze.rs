/*
prism-analyze - one-shot analysis from the command line
Runs a single request in-process and prints every event as a server-sent event frame.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use prism::coordinator::{Coordinator, EventSink};
use prism::llm;
use prism::model::{AnalysisKind, AnalysisRequest, Mode};
use prism::transport::{AnalysisView, StreamErrorBody, StreamEvent};

#[derive(Parser, Debug)]
#[command(name = "prism-analyze", about = "Analyze one article and stream the events to stdout")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Article URL to fetch and extract
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    url: Option<String>,

    /// File holding already extracted article text
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Comma separated analysis types (default: all)
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Caller identity for quota accounting
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays a clean event stream
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = Config::load(args.config.as_deref()).await?;
    let model = llm::create_model_service(config.llm.as_ref())?;
    let coordinator = Arc::new(Coordinator::from_config(&config, model)?);

    let article_text = match &args.file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read article file: {}", path.display()))?,
        ),
        None => None,
    };
    let requested_types = if args.types.is_empty() {
        AnalysisKind::ALL.iter().map(|k| k.as_str().to_string()).collect()
    } else {
        args.types.iter().map(|t| t.trim().to_string()).collect()
    };

    let request = AnalysisRequest {
        correlation_id: uuid::Uuid::new_v4().to_string(),
        article_url: args.url.clone(),
        article_text,
        requested_types,
        per_type_config: Default::default(),
        user: args.user.clone(),
        mode: Mode::Stream,
    };
    let correlation_id = request.correlation_id.clone();
    info!(correlation_id = %correlation_id, "starting analysis");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received, cancelling analysis");
            ctrl_c.cancel();
        }
    });

    let (sink, mut rx) = EventSink::channel();
    let runner = coordinator.clone();
    let handle = tokio::spawn(async move { runner.run(request, sink, cancel).await });

    let mut view = AnalysisView::new(correlation_id.clone());
    while let Some(event) = rx.recv().await {
        let event = StreamEvent::from(event);
        print!("{}", event.encode()?);
        view.apply(event);
    }

    if let Err(e) = handle.await.context("analysis task failed")? {
        let event = StreamEvent::Error(StreamErrorBody::from_request_error(&correlation_id, &e));
        print!("{}", event.encode()?);
        view.apply(event);
    }

    let aggregate = view.finish()?;
    info!(status = ?aggregate.status, elapsed_ms = aggregate.duration_ms, "analysis finished");
    Ok(())
}
