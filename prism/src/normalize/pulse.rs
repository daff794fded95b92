//! Social-discourse pulse: how the story is being discussed online.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_present, number, string_list, text, unit_score, value_number, value_text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn from_text(label: &str) -> Sentiment {
        let l = label.to_lowercase();
        if l.contains("mixed") || l.contains("polarized") || l.contains("divided") {
            Sentiment::Mixed
        } else if l.contains("negative") || l.contains("critical") || l.contains("angry") {
            Sentiment::Negative
        } else if l.contains("positive") || l.contains("supportive") || l.contains("favorable") {
            Sentiment::Positive
        } else {
            Sentiment::Neutral
        }
    }

    fn from_score(score: f64) -> Sentiment {
        if score > 0.2 {
            Sentiment::Positive
        } else if score < -0.2 {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }

    fn score(self) -> f64 {
        match self {
            Sentiment::Positive => 0.6,
            Sentiment::Negative => -0.6,
            Sentiment::Neutral | Sentiment::Mixed => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsePayload {
    pub schema_version: u32,
    pub overall_sentiment: Sentiment,
    /// -1.0 ..= 1.0
    pub sentiment_score: f64,
    #[serde(default)]
    pub themes: Vec<PulseTheme>,
    #[serde(default)]
    pub notable_posts: Vec<NotablePost>,
    #[serde(default)]
    pub summary: String,
}

impl Default for PulsePayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            overall_sentiment: Sentiment::Neutral,
            sentiment_score: 0.0,
            themes: Vec::new(),
            notable_posts: Vec::new(),
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseTheme {
    pub theme: String,
    pub sentiment: Sentiment,
    /// Fraction of the discussion, 0.0 ..= 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotablePost {
    pub platform: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<PulsePayload> {
    let sentiment_field = first_present(obj, &["overall_sentiment", "sentiment", "mood", "tone"]);
    let themes_field = first_present(obj, &["themes", "topics", "trending_topics", "key_themes", "discussions"]);
    let posts_field = first_present(obj, &["notable_posts", "posts", "highlights", "reactions"]);
    let summary = text(obj, &["summary", "overview", "pulse_summary"]);
    let top_score = number(obj, &["sentiment_score", "score"]).map(unit_score);

    if sentiment_field.is_none()
        && top_score.is_none()
        && themes_field.is_none()
        && posts_field.is_none()
        && summary.is_none()
    {
        return None;
    }
    if themes_field.is_some_and(|v| !v.is_array()) || posts_field.is_some_and(|v| !v.is_array()) {
        return None;
    }

    // sentiment may be a label, a number, or {"label": .., "score": ..}
    let (mut label, mut score) = match sentiment_field {
        Some(Value::Object(o)) => (
            text(o, &["label", "overall", "sentiment"]).map(|l| Sentiment::from_text(&l)),
            number(o, &["score", "value"]).map(unit_score),
        ),
        Some(other) => match value_number(other) {
            Some(n) => (None, Some(unit_score(n))),
            None => (value_text(other).map(|l| Sentiment::from_text(&l)), None),
        },
        None => (None, None),
    };
    if score.is_none() {
        score = top_score;
    }
    if label.is_none() {
        label = score.map(Sentiment::from_score);
    }
    let overall_sentiment = label.unwrap_or_default();
    let sentiment_score = score.unwrap_or_else(|| overall_sentiment.score());

    Some(PulsePayload {
        schema_version: SCHEMA_VERSION,
        overall_sentiment,
        sentiment_score,
        themes: themes_field.map(themes_from).unwrap_or_default(),
        notable_posts: posts_field.map(posts_from).unwrap_or_default(),
        summary: summary.unwrap_or_default(),
    })
}

fn themes_from(value: &Value) -> Vec<PulseTheme> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(o) => Some(PulseTheme {
                theme: text(o, &["theme", "topic", "name", "label"])?,
                sentiment: text(o, &["sentiment", "tone"])
                    .map(|s| Sentiment::from_text(&s))
                    .unwrap_or_default(),
                share: number(o, &["share", "percentage", "proportion", "volume_share"]).map(share),
            }),
            other => value_text(other).map(|theme| PulseTheme {
                theme,
                sentiment: Sentiment::Neutral,
                share: None,
            }),
        })
        .collect()
}

fn share(raw: f64) -> f64 {
    let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
    (fraction.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

fn posts_from(value: &Value) -> Vec<NotablePost> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|o| {
            Some(NotablePost {
                platform: text(o, &["platform", "source", "site", "network"]).unwrap_or_default(),
                summary: text(o, &["summary", "content", "text", "post"])?,
                url: string_list(first_present(o, &["url", "link"])).into_iter().next(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(raw: Value) -> Option<PulsePayload> {
        normalize(raw.as_object().unwrap())
    }

    #[test]
    fn label_and_score_fill_each_other() {
        let p = run(json!({"sentiment": "Largely negative"})).unwrap();
        assert_eq!(p.overall_sentiment, Sentiment::Negative);
        assert_eq!(p.sentiment_score, -0.6);

        let p = run(json!({"sentiment_score": 0.45})).unwrap();
        assert_eq!(p.overall_sentiment, Sentiment::Positive);

        let p = run(json!({"sentiment": {"label": "mixed", "score": "-0.1"}})).unwrap();
        assert_eq!(p.overall_sentiment, Sentiment::Mixed);
        assert_eq!(p.sentiment_score, -0.1);
    }

    #[test]
    fn themes_and_posts() {
        let p = run(json!({
            "topics": [{"topic": "prices", "sentiment": "critical", "percentage": 40}, "housing"],
            "posts": [{"platform": "Reddit", "content": "Thread on rents", "link": "https://reddit.com/r/x"},
                      {"platform": "X"}],
            "summary": "Heated"
        }))
        .unwrap();
        assert_eq!(p.themes.len(), 2);
        assert_eq!(p.themes[0].share, Some(0.4));
        assert_eq!(p.themes[0].sentiment, Sentiment::Negative);
        assert_eq!(p.notable_posts.len(), 1);
        assert_eq!(p.notable_posts[0].url.as_deref(), Some("https://reddit.com/r/x"));
        assert_eq!(p.overall_sentiment, Sentiment::Neutral);
    }

    #[test]
    fn wrong_collection_shape_is_rejected() {
        assert!(run(json!({"themes": "prices"})).is_none());
        assert!(run(json!({"irrelevant": 1})).is_none());
    }
}
