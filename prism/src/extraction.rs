//! Article extraction collaborator.

use common::ExtractionConfig;
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str = "Prism/0.1.0";
const CONTENT_SELECTORS: &[&str] = &["article", "main", ".post-content", ".entry-content", "#content"];
const WRAP_WIDTH: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid article URL {0}")]
    InvalidUrl(String),

    #[error("failed to fetch article: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("article fetch failed with status {0}")]
    Status(reqwest::StatusCode),

    #[error("article text too short ({found} chars, need {required})")]
    TooShort { found: usize, required: usize },
}

#[async_trait::async_trait]
pub trait ArticleExtractor: Send + Sync {
    async fn extract(&self, article_url: &str) -> Result<String, ExtractionError>;
}

/// Fetches the page over HTTP and pulls out the main text.
pub struct HttpExtractor {
    client: Client,
    min_chars: usize,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone().unwrap_or_else(|| USER_AGENT.to_string()))
            .build()?;
        Ok(Self {
            client,
            min_chars: config.min_chars,
        })
    }
}

#[async_trait::async_trait]
impl ArticleExtractor for HttpExtractor {
    async fn extract(&self, article_url: &str) -> Result<String, ExtractionError> {
        let url = Url::parse(article_url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ExtractionError::InvalidUrl(article_url.to_string()))?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status(status));
        }
        let html = response.text().await?;
        let text = extract_from_html(&html, &url, self.min_chars)?;
        info!(url = %url, chars = text.chars().count(), "article extracted");
        Ok(text)
    }
}

/// Main text of an HTML page: readability first, then well-known content
/// containers, then every paragraph.
pub fn extract_from_html(html: &str, url: &Url, min_chars: usize) -> Result<String, ExtractionError> {
    let mut best = String::new();
    for candidate in [readability_text(html, url), selector_text(html), paragraph_text(html)]
        .into_iter()
        .flatten()
    {
        let candidate = candidate.trim().to_string();
        if candidate.chars().count() >= min_chars {
            return Ok(candidate);
        }
        if candidate.len() > best.len() {
            best = candidate;
        }
    }

    Err(ExtractionError::TooShort {
        found: best.chars().count(),
        required: min_chars,
    })
}

fn readability_text(html: &str, url: &Url) -> Option<String> {
    let mut reader = Cursor::new(html.as_bytes());
    match readability::extractor::extract(&mut reader, url) {
        Ok(product) => Some(to_text(&product.content).unwrap_or(product.text)),
        Err(e) => {
            warn!(url = %url, "readability failed: {}", e);
            None
        }
    }
}

fn selector_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    CONTENT_SELECTORS.iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str).ok()?;
        let element = document.select(&selector).next()?;
        let text = to_text(&element.html()).filter(|t| !t.trim().is_empty())?;
        debug!(selector = %selector_str, chars = text.len(), "content container matched");
        Some(text)
    })
}

fn paragraph_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("p").ok()?;
    let joined: String = document
        .select(&selector)
        .map(|p| p.html())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() {
        return None;
    }
    to_text(&joined)
}

fn to_text(html: &str) -> Option<String> {
    html2text::from_read(html.as_bytes(), WRAP_WIDTH).ok()
}
