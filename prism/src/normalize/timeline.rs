//! Chronology of events leading up to the article.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_present, text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePayload {
    pub schema_version: u32,
    pub events: Vec<TimelineEvent>,
}

impl Default for TimelinePayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Free-form date as given ("2024-03-01", "March 2024", "1998")
    pub date: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<TimelinePayload> {
    let list = first_present(obj, &["events", "timeline", "milestones", "chronology", "items"])?;
    let Value::Array(items) = list else {
        return None;
    };

    // model order is kept; dates are too irregular to sort reliably
    let events = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|o| {
            Some(TimelineEvent {
                date: text(o, &["date", "when", "time", "year", "period"]).unwrap_or_default(),
                description: text(o, &["description", "event", "title", "what", "summary"])?,
                significance: text(o, &["significance", "importance", "impact", "relevance"]),
            })
        })
        .collect();

    Some(TimelinePayload {
        schema_version: SCHEMA_VERSION,
        events,
    })
}
