//! Prompt templates and answer schemas, one pair per analysis type.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::model::AnalysisKind;
use crate::normalize::NormalizedPayload;

/// Article text beyond this many characters is cut before prompting.
pub const MAX_ARTICLE_CHARS: usize = 12_000;

pub fn schema_name(kind: AnalysisKind) -> String {
    format!("{}_analysis", kind.as_str())
}

fn instructions(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Jargon => {
            "Identify specialist terms, acronyms and jargon in the article that a general reader \
             may not know. For each, give a plain-language definition and how it is used in the article."
        }
        AnalysisKind::Viewpoints => {
            "Search for credible perspectives on the article's subject that the article does not \
             represent. For each viewpoint, name who holds it, summarize the argument, list its \
             supporting points and cite the sources you found."
        }
        AnalysisKind::FactCheck => {
            "Extract the article's key factual claims and verify each one against current, reliable \
             sources. Give a verdict (true, mostly_true, mixed, mostly_false, false, misleading, \
             unverified), a short explanation and the sources used."
        }
        AnalysisKind::Bias => {
            "Assess the article's bias. Give an overall label and score between -1 and 1, then score \
             each axis (political, sensationalism, source_diversity, framing) the same way with a \
             short explanation. List concrete indicators quoted from the text."
        }
        AnalysisKind::Timeline => {
            "Build a chronological timeline of the events that led to the story, using dated \
             sources. Each entry has a date, a one-sentence description and why it matters."
        }
        AnalysisKind::Expert => {
            "Find what recognized experts have said about the article's subject and claims. For each \
             expert give name, credentials, stance (supports, opposes, neutral, mixed), a summary of \
             their view and a source link."
        }
        AnalysisKind::Pulse => {
            "Describe how the story is being discussed on social platforms and forums right now: \
             overall sentiment with a score between -1 and 1, the main themes with their sentiment \
             and share of discussion, and a few notable posts with links."
        }
    }
}

/// JSON schema the model answer must satisfy.
pub fn schema(kind: AnalysisKind) -> Value {
    let sources = json!({"type": "array", "items": {"type": "string"}});
    match kind {
        AnalysisKind::Jargon => json!({
            "type": "object",
            "required": ["terms"],
            "properties": {
                "terms": {"type": "array", "items": {
                    "type": "object",
                    "required": ["term", "definition"],
                    "properties": {
                        "term": {"type": "string"},
                        "definition": {"type": "string"},
                        "context": {"type": "string"}
                    }
                }}
            }
        }),
        AnalysisKind::Viewpoints => json!({
            "type": "object",
            "required": ["viewpoints"],
            "properties": {
                "viewpoints": {"type": "array", "items": {
                    "type": "object",
                    "required": ["perspective", "summary"],
                    "properties": {
                        "perspective": {"type": "string"},
                        "summary": {"type": "string"},
                        "supporting_points": {"type": "array", "items": {"type": "string"}},
                        "sources": sources
                    }
                }}
            }
        }),
        AnalysisKind::FactCheck => json!({
            "type": "object",
            "required": ["claims"],
            "properties": {
                "claims": {"type": "array", "items": {
                    "type": "object",
                    "required": ["claim", "verdict"],
                    "properties": {
                        "claim": {"type": "string"},
                        "verdict": {"type": "string"},
                        "explanation": {"type": "string"},
                        "sources": sources
                    }
                }},
                "overall_reliability": {"type": "string"}
            }
        }),
        AnalysisKind::Bias => {
            let axis = json!({
                "type": "object",
                "required": ["label", "score"],
                "properties": {
                    "label": {"type": "string"},
                    "score": {"type": "number", "minimum": -1, "maximum": 1},
                    "explanation": {"type": "string"}
                }
            });
            // Older answers are flat (`bias`, `bias_score`) or nest `dimensions`;
            // the normalizer folds them all into `overall` + `axes`.
            let accepted: Vec<Value> = [
                "overall",
                "overall_bias",
                "axes",
                "dimensions",
                "bias",
                "leaning",
                "bias_score",
            ]
            .iter()
            .map(|key| json!({"required": [key]}))
            .collect();
            json!({
                "type": "object",
                "anyOf": accepted,
                "properties": {
                    "overall": axis,
                    "axes": {"type": "object", "additionalProperties": axis},
                    "indicators": {"type": "array", "items": {"type": "string"}},
                    "summary": {"type": "string"}
                }
            })
        }
        AnalysisKind::Timeline => json!({
            "type": "object",
            "required": ["events"],
            "properties": {
                "events": {"type": "array", "items": {
                    "type": "object",
                    "required": ["date", "description"],
                    "properties": {
                        "date": {"type": "string"},
                        "description": {"type": "string"},
                        "significance": {"type": "string"}
                    }
                }}
            }
        }),
        AnalysisKind::Expert => json!({
            "type": "object",
            "required": ["opinions"],
            "properties": {
                "opinions": {"type": "array", "items": {
                    "type": "object",
                    "required": ["expert", "summary"],
                    "properties": {
                        "expert": {"type": "string"},
                        "credentials": {"type": "string"},
                        "stance": {"type": "string", "enum": ["supports", "opposes", "neutral", "mixed"]},
                        "summary": {"type": "string"},
                        "source": {"type": "string"}
                    }
                }}
            }
        }),
        AnalysisKind::Pulse => json!({
            "type": "object",
            "required": ["overall_sentiment"],
            "properties": {
                "overall_sentiment": {"type": "string", "enum": ["positive", "negative", "neutral", "mixed"]},
                "sentiment_score": {"type": "number", "minimum": -1, "maximum": 1},
                "themes": {"type": "array", "items": {
                    "type": "object",
                    "required": ["theme"],
                    "properties": {
                        "theme": {"type": "string"},
                        "sentiment": {"type": "string"},
                        "share": {"type": "number"}
                    }
                }},
                "notable_posts": {"type": "array", "items": {
                    "type": "object",
                    "properties": {
                        "platform": {"type": "string"},
                        "summary": {"type": "string"},
                        "url": {"type": "string"}
                    }
                }},
                "summary": {"type": "string"}
            }
        }),
    }
}

/// Deterministic prompt: same inputs, same bytes.
pub fn build_prompt(
    kind: AnalysisKind,
    article: &str,
    upstream: &BTreeMap<AnalysisKind, NormalizedPayload>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a careful news analyst.\n");
    prompt.push_str(instructions(kind));
    prompt.push_str("\nAnswer with a single JSON object matching the provided schema. Do not add prose.\n");
    prompt.push_str("Keep the article's language for quoted material.\n");

    for (dep, payload) in upstream {
        let rendered = serde_json::to_string(payload).unwrap_or_default();
        prompt.push_str(&format!("\nEARLIER {} RESULT:\n{}\n", dep.label().to_uppercase(), rendered));
    }

    prompt.push_str("\nARTICLE:\n");
    if article.chars().count() > MAX_ARTICLE_CHARS {
        prompt.extend(article.chars().take(MAX_ARTICLE_CHARS));
        prompt.push_str("\n[article truncated]");
    } else {
        prompt.push_str(article);
    }
    prompt.push('\n');
    prompt
}
