//! Claim-by-claim fact checking.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_present, string_list, text, value_text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    True,
    MostlyTrue,
    Mixed,
    MostlyFalse,
    False,
    Misleading,
    Unverified,
}

impl Verdict {
    /// Map free-text ratings ("Mostly accurate", "Pants on fire") to a verdict.
    pub fn from_rating(rating: &str) -> Verdict {
        let r = rating.to_lowercase().replace(['_', '-'], " ");
        let has = |needles: &[&str]| needles.iter().any(|n| r.contains(n));

        if has(&["mostly true", "mostly accurate", "largely true", "mostly correct", "largely accurate"]) {
            Verdict::MostlyTrue
        } else if has(&["mostly false", "largely false", "mostly inaccurate", "mostly incorrect"]) {
            Verdict::MostlyFalse
        } else if has(&["misleading", "out of context", "exaggerat", "cherry"]) {
            Verdict::Misleading
        } else if has(&["mixed", "half true", "partly", "partially", "mixture"]) {
            Verdict::Mixed
        } else if has(&[
            "unverif",
            "not verified",
            "unsupported",
            "not supported",
            "unconfirmed",
            "not confirmed",
            "unsubstantiated",
            "not substantiated",
            "unproven",
            "unclear",
            "insufficient",
            "unknown",
            "cannot",
            "no evidence",
        ]) {
            // negated forms come before the plain "verified"/"supported" below
            Verdict::Unverified
        } else if has(&["false", "incorrect", "inaccurate", "pants on fire", "fake", "wrong", "not true", "not accurate", "not correct", "debunked"]) {
            Verdict::False
        } else if has(&["true", "accurate", "correct", "verified", "confirmed", "supported"]) {
            Verdict::True
        } else {
            Verdict::Unverified
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckPayload {
    pub schema_version: u32,
    pub claims: Vec<CheckedClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_reliability: Option<String>,
}

impl Default for FactCheckPayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            claims: Vec::new(),
            overall_reliability: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedClaim {
    pub claim: String,
    pub verdict: Verdict,
    pub explanation: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<FactCheckPayload> {
    let list = first_present(obj, &["claims", "fact_checks", "factchecks", "checks", "items"])?;
    let Value::Array(items) = list else {
        return None;
    };

    Some(FactCheckPayload {
        schema_version: SCHEMA_VERSION,
        claims: items.iter().filter_map(claim_from_item).collect(),
        overall_reliability: text(
            obj,
            &["overall_reliability", "overall_assessment", "reliability", "summary"],
        ),
    })
}

fn claim_from_item(item: &Value) -> Option<CheckedClaim> {
    let o = item.as_object()?;
    let claim = text(o, &["claim", "statement", "text", "assertion"])?;
    let verdict = match first_present(o, &["verdict", "rating", "status", "conclusion", "assessment", "accuracy"]) {
        Some(Value::Bool(true)) => Verdict::True,
        Some(Value::Bool(false)) => Verdict::False,
        Some(other) => value_text(other)
            .map(|r| Verdict::from_rating(&r))
            .unwrap_or(Verdict::Unverified),
        None => Verdict::Unverified,
    };

    Some(CheckedClaim {
        claim,
        verdict,
        explanation: text(o, &["explanation", "analysis", "reasoning", "details", "evidence"]).unwrap_or_default(),
        sources: string_list(first_present(o, &["sources", "citations", "references", "source"])),
    })
}
