//! Bias analysis.
//!
//! Two payload generations exist in the wild:
//!
//! - v1 (flat): `{"bias": "left", "bias_score": -0.6, "explanation": "..."}`
//! - v2 (nested): `{"overall": {...}, "dimensions": {"political": {...}, "sensationalism": {...}}}`
//!
//! Both are folded into the v2 canonical shape: an `overall` axis, a map of
//! named axes, indicators and a summary. A v1 payload becomes `overall` plus a
//! single `political` axis.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{first_present, number, snake_key, string_list, text, unit_score, value_number, value_text};

pub const SCHEMA_VERSION: u32 = 2;

const POLITICAL: &str = "political";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasAxis {
    pub label: String,
    /// -1.0 (left / low) ..= 1.0 (right / high)
    pub score: f64,
    #[serde(default)]
    pub explanation: String,
}

impl Default for BiasAxis {
    fn default() -> Self {
        Self {
            label: "unknown".to_string(),
            score: 0.0,
            explanation: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasPayload {
    pub schema_version: u32,
    pub overall: BiasAxis,
    #[serde(default)]
    pub axes: BTreeMap<String, BiasAxis>,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl Default for BiasPayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            overall: BiasAxis::default(),
            axes: BTreeMap::new(),
            indicators: Vec::new(),
            summary: String::new(),
        }
    }
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<BiasPayload> {
    // {"bias": {...nested...}} wraps a whole payload one level down
    if let Some(Value::Object(inner)) = obj.get("bias") {
        return normalize(inner);
    }

    let explicit_overall = match first_present(obj, &["overall", "overall_bias"]) {
        Some(Value::Object(o)) => Some(axis_from_object(o)),
        Some(other) => axis_from_scalar(other),
        None => None,
    };
    let flat = flat_axis(obj);

    let mut axes = match first_present(obj, &["axes", "dimensions", "multi_axis", "bias_dimensions"]) {
        Some(Value::Object(map)) => axes_from_map(map),
        Some(Value::Array(items)) => axes_from_list(items),
        Some(_) => return None,
        None => BTreeMap::new(),
    };

    if explicit_overall.is_none() && flat.is_none() && axes.is_empty() {
        return None;
    }

    if let Some(flat) = &flat {
        axes.entry(POLITICAL.to_string()).or_insert_with(|| flat.clone());
    }

    let overall = explicit_overall
        .or(flat)
        .or_else(|| axes.get(POLITICAL).cloned())
        .unwrap_or_else(|| mean_axis(&axes));

    let summary = text(obj, &["summary", "overall_assessment"]).unwrap_or_else(|| overall.explanation.clone());

    Some(BiasPayload {
        schema_version: SCHEMA_VERSION,
        overall,
        axes,
        indicators: string_list(first_present(
            obj,
            &["indicators", "bias_indicators", "loaded_language", "examples"],
        )),
        summary,
    })
}

/// v1 flat fields, if any are present.
fn flat_axis(obj: &Map<String, Value>) -> Option<BiasAxis> {
    let label = text(obj, &["bias", "leaning", "political_leaning", "bias_label", "label", "rating"])
        .filter(|l| value_number(&Value::String(l.clone())).is_none())
        .map(|l| snake_key(&l));
    let score = number(obj, &["bias_score", "leaning_score", "score"]).map(unit_score);
    if label.is_none() && score.is_none() {
        return None;
    }
    Some(complete_axis(
        label,
        score,
        text(obj, &["explanation", "reasoning", "rationale"]),
    ))
}

fn axis_from_object(o: &Map<String, Value>) -> BiasAxis {
    complete_axis(
        text(o, &["label", "leaning", "rating", "bias", "level"]).map(|l| snake_key(&l)),
        number(o, &["score", "value", "rating_score", "bias_score"]).map(unit_score),
        text(o, &["explanation", "reasoning", "rationale", "evidence", "summary"]),
    )
}

fn axis_from_scalar(value: &Value) -> Option<BiasAxis> {
    match value_number(value) {
        Some(score) => Some(complete_axis(None, Some(unit_score(score)), None)),
        None => value_text(value).map(|l| complete_axis(Some(snake_key(&l)), None, None)),
    }
}

fn axes_from_map(map: &Map<String, Value>) -> BTreeMap<String, BiasAxis> {
    map.iter()
        .filter_map(|(name, v)| {
            let axis = match v {
                Value::Object(o) => axis_from_object(o),
                other => axis_from_scalar(other)?,
            };
            let key = snake_key(name);
            (!key.is_empty()).then_some((key, axis))
        })
        .collect()
}

fn axes_from_list(items: &[Value]) -> BTreeMap<String, BiasAxis> {
    items
        .iter()
        .filter_map(|item| {
            let o = item.as_object()?;
            let name = text(o, &["axis", "dimension", "name", "type"])?;
            Some((snake_key(&name), axis_from_object(o)))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Fill whichever of label/score is missing from the other.
fn complete_axis(label: Option<String>, score: Option<f64>, explanation: Option<String>) -> BiasAxis {
    let (label, score) = match (label, score) {
        (Some(l), Some(s)) => (l, s),
        (Some(l), None) => {
            let s = score_for_label(&l);
            (l, s)
        }
        (None, Some(s)) => (label_for_score(s).to_string(), s),
        (None, None) => ("unknown".to_string(), 0.0),
    };
    BiasAxis {
        label,
        score,
        explanation: explanation.unwrap_or_default(),
    }
}

fn score_for_label(label: &str) -> f64 {
    match label {
        "far_left" | "left" | "strongly_left" | "liberal" | "progressive" => -0.8,
        "lean_left" | "center_left" | "left_leaning" | "left_center" | "slightly_left" => -0.4,
        "lean_right" | "center_right" | "right_leaning" | "right_center" | "slightly_right" => 0.4,
        "far_right" | "right" | "strongly_right" | "conservative" => 0.8,
        "high" => 0.8,
        "moderate" | "medium" => 0.4,
        _ => 0.0,
    }
}

fn label_for_score(score: f64) -> &'static str {
    if score <= -0.6 {
        "left"
    } else if score <= -0.2 {
        "lean_left"
    } else if score < 0.2 {
        "center"
    } else if score < 0.6 {
        "lean_right"
    } else {
        "right"
    }
}

fn mean_axis(axes: &BTreeMap<String, BiasAxis>) -> BiasAxis {
    if axes.is_empty() {
        return BiasAxis::default();
    }
    let mean = axes.values().map(|a| a.score).sum::<f64>() / axes.len() as f64;
    complete_axis(None, Some(unit_score(mean)), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(raw: Value) -> Option<BiasPayload> {
        normalize(raw.as_object().unwrap())
    }

    #[test]
    fn flat_v1_payload_becomes_overall_and_political_axis() {
        let p = run(json!({
            "bias": "Center-Left",
            "bias_score": -0.4,
            "explanation": "Sources skew toward one party",
            "indicators": ["loaded adjectives"]
        }))
        .unwrap();
        assert_eq!(p.schema_version, SCHEMA_VERSION);
        assert_eq!(p.overall.label, "center_left");
        assert_eq!(p.overall.score, -0.4);
        assert_eq!(p.axes[POLITICAL], p.overall);
        assert_eq!(p.indicators, vec!["loaded adjectives"]);
        assert_eq!(p.summary, "Sources skew toward one party");
    }

    #[test]
    fn nested_v2_payload_maps_each_axis() {
        let p = run(json!({
            "dimensions": {
                "Political": {"leaning": "right", "score": 7, "reasoning": "framing"},
                "Sensationalism": {"level": "high", "score": 0.9},
                "source diversity": 0.2
            },
            "summary": "Slanted coverage"
        }))
        .unwrap();
        assert_eq!(p.axes.len(), 3);
        assert_eq!(p.axes["political"].score, 0.4);
        assert_eq!(p.axes["sensationalism"].label, "high");
        assert_eq!(p.axes["source_diversity"].score, 0.2);
        // no explicit overall: political axis stands in
        assert_eq!(p.overall, p.axes["political"]);
        assert_eq!(p.summary, "Slanted coverage");
    }

    #[test]
    fn wrapped_payload_and_axis_lists() {
        let p = run(json!({"bias": {
            "overall": {"label": "Center", "score": 0},
            "axes": [{"axis": "framing", "score": -0.5}, {"score": 1}]
        }}))
        .unwrap();
        assert_eq!(p.overall.label, "center");
        assert_eq!(p.axes.len(), 1);
        assert_eq!(p.axes["framing"].label, "lean_left");
    }

    #[test]
    fn overall_falls_back_to_axis_mean() {
        let p = run(json!({"axes": {"framing": -0.6, "tone": 0.2}})).unwrap();
        assert_eq!(p.overall.score, -0.2);
        assert_eq!(p.overall.label, "lean_left");
    }

    #[test]
    fn label_only_gets_a_score() {
        let p = run(json!({"leaning": "Right"})).unwrap();
        assert_eq!(p.overall.score, 0.8);
    }

    #[test]
    fn unusable_payloads() {
        assert!(run(json!({"dimensions": "left"})).is_none());
        assert!(run(json!({"notes": "nothing here"})).is_none());
    }
}
