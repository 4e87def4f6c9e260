// diagnostics/template.rs
// Detector template model. Persisted as JSON (snake_case fields) both in
// the embedded builtin set and the user's custom store.

use crate::severity::{self, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    #[serde(deserialize_with = "severity::lenient")]
    pub severity: Severity,
    pub detector: DetectorTemplate,
}

/// Type-tagged detector parameters. The type tag is deliberately an open
/// string at the data layer; the engine's dispatch is the closed set, and
/// unknown types simply compile to no processors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorTemplate {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub comparison: String,
    pub min_consecutive: i64,
    pub min_switches: i64,
    pub min_gap: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_attribute_equals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_object_equals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_instance_contains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_instance_regex: Vec<String>,
    pub filter: TemplateFilter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateFilter {
    pub logic: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TemplateCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateCondition {
    pub field: String,
    pub op: String,
    pub value: String,
}

/// Canonical form applied to every template on load, upsert and import.
pub fn normalize_template(mut t: DiagnosticTemplate) -> DiagnosticTemplate {
    t.id = t.id.trim().to_string();
    t.name = t.name.trim().to_string();
    t.description = t.description.trim().to_string();
    if t.detector.kind.trim().is_empty() {
        t.detector.kind = "threshold_sustained".to_string();
    } else {
        t.detector.kind = t.detector.kind.trim().to_string();
    }
    if t.detector.filter.logic.trim().is_empty() {
        t.detector.filter.logic = "and".to_string();
    }
    if t.detector.min_consecutive <= 0 {
        t.detector.min_consecutive = 6;
    }
    t
}
