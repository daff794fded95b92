//! Alternative viewpoints on the article's subject.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_present, string_list, text, value_text};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewpointsPayload {
    pub schema_version: u32,
    pub viewpoints: Vec<Viewpoint>,
}

impl Default for ViewpointsPayload {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            viewpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewpoint {
    pub perspective: String,
    pub summary: String,
    #[serde(default)]
    pub supporting_points: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

pub(super) fn normalize(obj: &Map<String, Value>) -> Option<ViewpointsPayload> {
    let list = first_present(
        obj,
        &["viewpoints", "perspectives", "alternative_viewpoints", "alternatives", "items"],
    )?;
    let Value::Array(items) = list else {
        return None;
    };

    let viewpoints = items.iter().filter_map(viewpoint_from_item).collect();
    Some(ViewpointsPayload {
        schema_version: SCHEMA_VERSION,
        viewpoints,
    })
}

fn viewpoint_from_item(item: &Value) -> Option<Viewpoint> {
    let Value::Object(o) = item else {
        return value_text(item).map(|summary| Viewpoint {
            perspective: String::new(),
            summary,
            supporting_points: Vec::new(),
            sources: Vec::new(),
        });
    };

    let perspective = text(o, &["perspective", "viewpoint", "title", "stakeholder", "group", "name"]);
    let summary = text(o, &["summary", "argument", "description", "explanation", "position"]);
    if perspective.is_none() && summary.is_none() {
        return None;
    }

    Some(Viewpoint {
        perspective: perspective.unwrap_or_default(),
        summary: summary.unwrap_or_default(),
        supporting_points: string_list(first_present(
            o,
            &["supporting_points", "key_points", "arguments", "points"],
        )),
        sources: string_list(first_present(o, &["sources", "citations", "references", "source"])),
    })
}
