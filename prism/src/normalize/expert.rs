//! Expert opinion on the article's claims.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_present, text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Supports,
    Opposes,
    Neutral,
    Mixed,
}

impl Stance {
    pub fn from_text(stance: &str) -> Stance {
        let s = stance.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| s.contains(n));
        if has(&["mixed", "nuanced", "ambivalent", "cautious", "partial"]) {
            Stance::Mixed
        } else if has(&["oppos", "disagree", "critic", "against", "skeptic", "reject", "negative"]) {
            Stance::Opposes
        } else if has(&["support", "agree", "endorse", "favo", "positive"]) {
            Stance::Supports
        } else {
            Stance::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertPayload {
    pub schema_version: u32,
    pub opinions: Vec<ExpertOpinion>,
}

impl Default for ExpertPayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            opinions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertOpinion {
    pub expert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    pub stance: Stance,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<ExpertPayload> {
    let list = first_present(obj, &["opinions", "experts", "expert_opinions", "items"])?;
    let Value::Array(items) = list else {
        return None;
    };

    let opinions = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|o| {
            let expert = text(o, &["expert", "name", "who", "person"]);
            let summary = text(o, &["summary", "opinion", "quote", "view", "position", "statement"]);
            if expert.is_none() && summary.is_none() {
                return None;
            }
            Some(ExpertOpinion {
                expert: expert.unwrap_or_default(),
                credentials: text(o, &["credentials", "affiliation", "title", "role", "expertise"]),
                stance: text(o, &["stance", "position_on_claims", "agreement", "sentiment"])
                    .map(|s| Stance::from_text(&s))
                    .unwrap_or(Stance::Neutral),
                summary: summary.unwrap_or_default(),
                source: text(o, &["source", "url", "source_url", "link"]),
            })
        })
        .collect();

    Some(ExpertPayload {
        schema_version: SCHEMA_VERSION,
        opinions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stances() {
        assert_eq!(Stance::from_text("Strongly disagrees"), Stance::Opposes);
        assert_eq!(Stance::from_text("agrees"), Stance::Supports);
        assert_eq!(Stance::from_text("cautiously optimistic"), Stance::Mixed);
        assert_eq!(Stance::from_text("supports"), Stance::Supports);
        assert_eq!(Stance::from_text("no comment"), Stance::Neutral);
    }

    #[test]
    fn reads_expert_list() {
        let raw = json!({"experts": [
            {"name": "Dr. Ana Ruiz", "affiliation": "MIT", "quote": "The model is sound", "stance": "agrees",
             "url": "https://mit.edu/ruiz"},
            {"role": "economist"}
        ]});
        let p = normalize(raw.as_object().unwrap()).unwrap();
        assert_eq!(p.opinions.len(), 1);
        assert_eq!(p.opinions[0].credentials.as_deref(), Some("MIT"));
        assert_eq!(p.opinions[0].stance, Stance::Supports);
        assert_eq!(p.opinions[0].source.as_deref(), Some("https://mit.edu/ruiz"));
    }
}
