//! Schema normalization.
//!
//! Workers hand back whatever JSON the model produced. Each analysis type owns
//! a versioned mapping from that loose JSON into one canonical payload; the
//! mapping functions are pure and never panic. When a payload cannot be used
//! the type's empty shape is returned together with `ok = false`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::llm::extract_json_from_text;
use crate::model::AnalysisKind;

pub mod bias;
pub mod expert;
pub mod factcheck;
pub mod jargon;
pub mod pulse;
pub mod timeline;
pub mod viewpoints;

pub use bias::{BiasAxis, BiasPayload};
pub use expert::{ExpertOpinion, ExpertPayload, Stance};
pub use factcheck::{CheckedClaim, FactCheckPayload, Verdict};
pub use jargon::{JargonPayload, Term};
pub use pulse::{NotablePost, PulsePayload, PulseTheme, Sentiment};
pub use timeline::{TimelineEvent, TimelinePayload};
pub use viewpoints::{Viewpoint, ViewpointsPayload};

/// Canonical payload, tagged by type id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NormalizedPayload {
    Jargon(JargonPayload),
    Viewpoints(ViewpointsPayload),
    FactCheck(FactCheckPayload),
    Bias(BiasPayload),
    Timeline(TimelinePayload),
    Expert(ExpertPayload),
    Pulse(PulsePayload),
}

impl NormalizedPayload {
    /// Default shape for a type, used whenever no usable content exists.
    pub fn empty(kind: AnalysisKind) -> Self {
        match kind {
            AnalysisKind::Jargon => NormalizedPayload::Jargon(JargonPayload::default()),
            AnalysisKind::Viewpoints => NormalizedPayload::Viewpoints(ViewpointsPayload::default()),
            AnalysisKind::FactCheck => NormalizedPayload::FactCheck(FactCheckPayload::default()),
            AnalysisKind::Bias => NormalizedPayload::Bias(BiasPayload::default()),
            AnalysisKind::Timeline => NormalizedPayload::Timeline(TimelinePayload::default()),
            AnalysisKind::Expert => NormalizedPayload::Expert(ExpertPayload::default()),
            AnalysisKind::Pulse => NormalizedPayload::Pulse(PulsePayload::default()),
        }
    }

    pub fn kind(&self) -> AnalysisKind {
        match self {
            NormalizedPayload::Jargon(_) => AnalysisKind::Jargon,
            NormalizedPayload::Viewpoints(_) => AnalysisKind::Viewpoints,
            NormalizedPayload::FactCheck(_) => AnalysisKind::FactCheck,
            NormalizedPayload::Bias(_) => AnalysisKind::Bias,
            NormalizedPayload::Timeline(_) => AnalysisKind::Timeline,
            NormalizedPayload::Expert(_) => AnalysisKind::Expert,
            NormalizedPayload::Pulse(_) => AnalysisKind::Pulse,
        }
    }

    pub fn schema_version(&self) -> u32 {
        match self {
            NormalizedPayload::Jargon(p) => p.schema_version,
            NormalizedPayload::Viewpoints(p) => p.schema_version,
            NormalizedPayload::FactCheck(p) => p.schema_version,
            NormalizedPayload::Bias(p) => p.schema_version,
            NormalizedPayload::Timeline(p) => p.schema_version,
            NormalizedPayload::Expert(p) => p.schema_version,
            NormalizedPayload::Pulse(p) => p.schema_version,
        }
    }
}

/// Map a raw worker payload onto the canonical shape of `kind`.
pub fn normalize(kind: AnalysisKind, raw: &Value) -> (NormalizedPayload, bool) {
    let Some(obj) = coerce_object(raw) else {
        return (NormalizedPayload::empty(kind), false);
    };
    let obj = obj.as_ref();

    let normalized = match kind {
        AnalysisKind::Jargon => jargon::normalize(obj).map(NormalizedPayload::Jargon),
        AnalysisKind::Viewpoints => viewpoints::normalize(obj).map(NormalizedPayload::Viewpoints),
        AnalysisKind::FactCheck => factcheck::normalize(obj).map(NormalizedPayload::FactCheck),
        AnalysisKind::Bias => bias::normalize(obj).map(NormalizedPayload::Bias),
        AnalysisKind::Timeline => timeline::normalize(obj).map(NormalizedPayload::Timeline),
        AnalysisKind::Expert => expert::normalize(obj).map(NormalizedPayload::Expert),
        AnalysisKind::Pulse => pulse::normalize(obj).map(NormalizedPayload::Pulse),
    };

    match normalized {
        Some(payload) => (payload, true),
        None => (NormalizedPayload::empty(kind), false),
    }
}

/// Objects pass through; bare arrays are wrapped under `items`; strings are
/// parsed when they contain a JSON document.
fn coerce_object(raw: &Value) -> Option<Cow<'_, Map<String, Value>>> {
    match raw {
        Value::Object(map) => Some(Cow::Borrowed(map)),
        Value::Array(items) => Some(Cow::Owned(wrap_items(items.clone()))),
        Value::String(text) => {
            let json = extract_json_from_text(text)?;
            match serde_json::from_str::<Value>(&json).ok()? {
                Value::Object(map) => Some(Cow::Owned(map)),
                Value::Array(items) => Some(Cow::Owned(wrap_items(items))),
                _ => None,
            }
        }
        _ => None,
    }
}

fn wrap_items(items: Vec<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("items".to_string(), Value::Array(items));
    map
}

// Field helpers shared by the per-type mappings.

/// First non-null value among `keys`.
pub(crate) fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

/// First non-empty string (or number rendered as text) among `keys`.
pub(crate) fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(value_text)
}

pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First numeric value among `keys`; accepts numbers and numeric strings
/// such as "0.4", "7/10" or "65%".
pub(crate) fn number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(value_number)
}

pub(crate) fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let s = s.trim();
            if let Some((num, den)) = s.split_once('/') {
                let (num, den) = (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?);
                return (den != 0.0).then(|| num / den * 10.0).filter(|f| f.is_finite());
            }
            if let Some(pct) = s.strip_suffix('%') {
                return pct.trim().parse::<f64>().ok().filter(|f| f.is_finite());
            }
            s.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Strings from a list, a single string, or objects carrying a url/title/name.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(o) => text(o, &["url", "link", "title", "name", "text"]),
                other => value_text(other),
            })
            .collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Rescale a score to [-1, 1]. Values on 0..10, -10..10 or 0..100 scales are
/// mapped onto the unit range; anything else is clamped.
pub(crate) fn unit_score(raw: f64) -> f64 {
    let scaled = if raw.abs() <= 1.0 {
        raw
    } else if (0.0..=10.0).contains(&raw) {
        (raw - 5.0) / 5.0
    } else if (-10.0..=10.0).contains(&raw) {
        raw / 10.0
    } else if (0.0..=100.0).contains(&raw) {
        (raw - 50.0) / 50.0
    } else {
        raw
    };
    let clamped = scaled.clamp(-1.0, 1.0);
    // two decimals keeps repeated normalization stable
    (clamped * 100.0).round() / 100.0
}

/// "Center-Left " -> "center_left"
pub(crate) fn snake_key(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
