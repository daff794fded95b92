use common::ExtractionConfig;
use prism::extraction::{ArticleExtractor, ExtractionError, HttpExtractor};

const ARTICLE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Harbor expansion approved</title></head>
<body>
  <nav><a href="/">Home</a> <a href="/world">World</a></nav>
  <article>
    <h1>Harbor expansion approved</h1>
    <p>The city council in Reykjavik voted on Monday to approve a long debated expansion of the old harbor, ending nearly a decade of planning disputes between fishing cooperatives and developers.</p>
    <p>Supporters argue the project will bring cruise traffic and new jobs, while opponents warn that dredging could damage spawning grounds that local fishermen have relied on for generations.</p>
    <p>Construction is expected to begin next spring, with the first berths opening in two years according to the harbor authority.</p>
  </article>
  <footer>Copyright Example News</footer>
</body>
</html>"#;

fn extractor() -> HttpExtractor {
    HttpExtractor::new(&ExtractionConfig {
        timeout_seconds: 5,
        ..ExtractionConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn extracts_article_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/news/harbor")
        .match_header("user-agent", "Prism/0.1.0")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(ARTICLE_PAGE)
        .create_async()
        .await;

    let text = extractor()
        .extract(&format!("{}/news/harbor", server.url()))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(text.contains("Reykjavik"));
    assert!(text.contains("spawning"));
    assert!(!text.contains("Copyright"));
}

#[tokio::test]
async fn error_status_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/gone")
        .with_status(404)
        .create_async()
        .await;

    let err = extractor()
        .extract(&format!("{}/gone", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractionError::Status(s) if s.as_u16() == 404));
}

#[tokio::test]
async fn short_page_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/stub")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body><p>Subscribe to read.</p></body></html>")
        .create_async()
        .await;

    let err = extractor()
        .extract(&format!("{}/stub", server.url()))
        .await
        .unwrap_err();
    match err {
        ExtractionError::TooShort { found, required } => {
            assert!(found < required);
            assert_eq!(required, 200);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn non_http_urls_are_invalid() {
    for url in ["not a url", "ftp://example.com/article", "file:///etc/passwd"] {
        let err = extractor().extract(url).await.unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidUrl(_)), "{url}");
    }
}
