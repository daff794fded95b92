//! Citation normalization and deduplication.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use url::Url;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid", "si",
];

/// Source reference as reported by a worker, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCitation {
    pub url: String,
    pub title: Option<String>,
}

impl RawCitation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    pub fn titled(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
        }
    }
}

/// Normalized citation. Identity is `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Citation {
    /// None when the URL cannot be parsed as an http(s) address.
    pub fn from_raw(raw: &RawCitation) -> Option<Self> {
        let url = parse_web_url(&raw.url)?;
        let domain = display_domain(&url)?;
        Some(Citation {
            url: normalized(url),
            domain,
            title: raw
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }
}

/// Canonical form used as the dedup key: scheme, lower-cased host and path,
/// with the fragment and tracking parameters removed.
pub fn normalize_url(raw: &str) -> Option<String> {
    parse_web_url(raw).map(normalized)
}

fn parse_web_url(raw: &str) -> Option<Url> {
    let raw = trim_trailing_punctuation(raw.trim());
    if raw.is_empty() {
        return None;
    }
    let url = match Url::parse(raw) {
        Ok(url) => url,
        // Models regularly drop the scheme ("reuters.com/world/...")
        Err(url::ParseError::RelativeUrlWithoutBase) if looks_like_host(raw) => {
            Url::parse(&format!("https://{raw}")).ok()?
        }
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

/// Strip sentence punctuation glued to the end of a URL. A closing paren
/// only goes when it has no opening partner, so `/wiki/Mercury_(planet)`
/// keeps its own.
fn trim_trailing_punctuation(mut raw: &str) -> &str {
    loop {
        raw = raw.trim_end_matches(['.', ',', ';']);
        match raw.strip_suffix(')') {
            Some(rest) if raw.matches(')').count() > raw.matches('(').count() => raw = rest,
            _ => return raw,
        }
    }
}

fn looks_like_host(raw: &str) -> bool {
    let host = raw.split('/').next().unwrap_or_default();
    host.contains('.') && !host.contains(' ') && !host.starts_with('.')
}

fn normalized(mut url: Url) -> String {
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "utm" || key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn display_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Incremental, order-preserving citation set.
#[derive(Debug, Clone, Default)]
pub struct CitationSet {
    index: HashMap<String, usize>,
    items: Vec<Citation>,
    cap: Option<usize>,
}

impl CitationSet {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            ..Default::default()
        }
    }

    /// Add one citation; returns true when it was new.
    pub fn insert(&mut self, citation: Citation) -> bool {
        if let Some(&pos) = self.index.get(&citation.url) {
            let existing = &mut self.items[pos];
            if existing.title.is_none() {
                existing.title = citation.title;
            }
            return false;
        }
        if self.cap.is_some_and(|cap| self.items.len() >= cap) {
            return false;
        }
        self.index.insert(citation.url.clone(), self.items.len());
        self.items.push(citation);
        true
    }

    pub fn extend_raw<'a, I>(&mut self, raw: I)
    where
        I: IntoIterator<Item = &'a RawCitation>,
    {
        for citation in raw.into_iter().filter_map(Citation::from_raw) {
            self.insert(citation);
        }
    }

    pub fn extend<I: IntoIterator<Item = Citation>>(&mut self, citations: I) {
        for citation in citations {
            self.insert(citation);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Citation] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Citation> {
        self.items
    }
}

/// Merge citation lists, dropping duplicates and unparseable URLs while
/// keeping first-seen order across the lists.
pub fn aggregate(lists: &[Vec<RawCitation>], cap: Option<usize>) -> Vec<Citation> {
    let mut set = CitationSet::new(cap);
    for list in lists {
        set.extend_raw(list);
    }
    set.into_vec()
}

const URL_KEYS: &[&str] = &["url", "link", "source_url", "href"];
const LIST_KEYS: &[&str] = &["sources", "citations", "references", "links"];
const MAX_DEPTH: usize = 6;

/// Source references embedded in a worker payload: `url`-like fields of
/// nested objects (titled by a sibling `title`/`name`) and string entries of
/// `sources`-like arrays. Unparseable entries are left for `aggregate` to drop.
pub fn from_payload(payload: &Value) -> Vec<RawCitation> {
    let mut found = Vec::new();
    collect(payload, 0, &mut found);
    found
}

fn collect(value: &Value, depth: usize, out: &mut Vec<RawCitation>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(obj) => {
            collect_object(obj, out);
            for child in obj.values() {
                collect(child, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn collect_object(obj: &Map<String, Value>, out: &mut Vec<RawCitation>) {
    let title = ["title", "name"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    for key in URL_KEYS {
        if let Some(url) = obj.get(*key).and_then(Value::as_str) {
            out.push(RawCitation {
                url: url.to_string(),
                title: title.clone(),
            });
        }
    }
    for key in LIST_KEYS {
        if let Some(Value::Array(items)) = obj.get(*key) {
            out.extend(items.iter().filter_map(Value::as_str).map(RawCitation::new));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_tracking_variants_in_first_seen_order() {
        let lists = vec![
            vec![RawCitation::new("https://a.com/x?utm=1")],
            vec![
                RawCitation::new("https://a.com/x?utm=2"),
                RawCitation::new("https://b.com/y"),
            ],
        ];

        let out = aggregate(&lists, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url, "https://a.com/x");
        assert_eq!(out[0].domain, "a.com");
        assert_eq!(out[1].url, "https://b.com/y");
        assert_eq!(out[1].domain, "b.com");
    }

    #[test]
    fn keeps_parentheses_that_belong_to_the_path() {
        assert_eq!(
            normalize_url("https://en.wikipedia.org/wiki/Mercury_(planet)").as_deref(),
            Some("https://en.wikipedia.org/wiki/Mercury_(planet)")
        );
        assert_eq!(
            normalize_url("https://en.wikipedia.org/wiki/Mercury_(planet)).").as_deref(),
            Some("https://en.wikipedia.org/wiki/Mercury_(planet)")
        );
        assert_eq!(normalize_url("https://a.com/x).").as_deref(), Some("https://a.com/x"));
        assert_eq!(normalize_url("https://a.com/x,").as_deref(), Some("https://a.com/x"));
    }

    #[test]
    fn keeps_meaningful_query_parameters() {
        assert_eq!(
            normalize_url("https://news.example.com/article?id=42&utm_source=x&fbclid=abc#top").as_deref(),
            Some("https://news.example.com/article?id=42")
        );
    }

    #[test]
    fn lowercases_host_and_trims_trailing_slash() {
        assert_eq!(
            normalize_url("https://WWW.Reuters.com/world/").as_deref(),
            Some("https://www.reuters.com/world")
        );
        assert_eq!(normalize_url("https://reuters.com/").as_deref(), Some("https://reuters.com/"));
    }

    #[test]
    fn drops_unparseable_and_non_web_urls() {
        let lists = vec![vec![
            RawCitation::new("not a url"),
            RawCitation::new("mailto:desk@example.com"),
            RawCitation::new(""),
            RawCitation::new("apnews.com/article/abc"),
        ]];
        let out = aggregate(&lists, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://apnews.com/article/abc");
    }

    #[test]
    fn display_domain_strips_www() {
        let c = Citation::from_raw(&RawCitation::titled("https://www.bbc.co.uk/news", " BBC ")).unwrap();
        assert_eq!(c.domain, "bbc.co.uk");
        assert_eq!(c.title.as_deref(), Some("BBC"));
    }

    #[test]
    fn later_title_fills_missing_one() {
        let lists = vec![
            vec![RawCitation::new("https://a.com/x")],
            vec![RawCitation::titled("https://a.com/x?utm_medium=rss", "A story")],
        ];
        let out = aggregate(&lists, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title.as_deref(), Some("A story"));
    }

    #[test]
    fn finds_urls_nested_in_payloads() {
        let payload = serde_json::json!({
            "claims": [
                {"claim": "c", "sources": ["https://a.org/1", "not a url"]},
                {"claim": "d", "source": {"url": "https://b.org/2", "title": "B"}}
            ],
            "notable_posts": [{"platform": "x", "link": "https://c.org/3"}]
        });
        let found = from_payload(&payload);
        let urls: Vec<&str> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.org/1", "not a url", "https://b.org/2", "https://c.org/3"]);
        assert_eq!(found[2].title.as_deref(), Some("B"));
        assert_eq!(aggregate(&[found], None).len(), 3);
    }

    #[test]
    fn cap_bounds_output() {
        let list: Vec<RawCitation> = (0..10)
            .map(|i| RawCitation::new(format!("https://site{i}.org/p")))
            .collect();
        let out = aggregate(&[list], Some(3));
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].domain, "site2.org");
    }
}
