//! Terminology explanations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::{first_present, text, value_text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JargonPayload {
    pub schema_version: u32,
    pub terms: Vec<Term>,
}

impl Default for JargonPayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            terms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<JargonPayload> {
    let candidates: Vec<Term> = match first_present(obj, &["terms", "jargon", "glossary", "items"])? {
        Value::Array(items) => items.iter().filter_map(term_from_item).collect(),
        // {"term": "definition", ...}
        Value::Object(map) => map
            .iter()
            .filter_map(|(term, def)| {
                Some(Term {
                    term: term.trim().to_string(),
                    definition: value_text(def)?,
                    context: None,
                })
            })
            .filter(|t| !t.term.is_empty())
            .collect(),
        _ => return None,
    };

    let mut seen = HashSet::new();
    let terms = candidates
        .into_iter()
        .filter(|t| seen.insert(t.term.to_lowercase()))
        .collect();

    Some(JargonPayload {
        schema_version: SCHEMA_VERSION,
        terms,
    })
}

fn term_from_item(item: &Value) -> Option<Term> {
    match item {
        Value::Object(o) => Some(Term {
            term: text(o, &["term", "word", "phrase", "name", "acronym"])?,
            definition: text(o, &["definition", "explanation", "meaning", "description"]).unwrap_or_default(),
            context: text(o, &["context", "usage", "example", "in_article"]),
        }),
        // "Term: definition" / "Term - definition"
        Value::String(s) => {
            let (term, definition) = s
                .split_once(':')
                .or_else(|| s.split_once(" - "))
                .unwrap_or((s.as_str(), ""));
            let term = term.trim();
            (!term.is_empty()).then(|| Term {
                term: term.to_string(),
                definition: definition.trim().to_string(),
                context: None,
            })
        }
        _ => None,
    }
}
