// diagnostics/finding.rs
// Finding wire types and the coarse report-key routing for the UI.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Pane routing tag for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKey {
    Cpu,
    Memory,
    Numa,
    Network,
    Storage,
    Power,
    Vsan,
    Other,
}

impl ReportKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKey::Cpu => "cpu",
            ReportKey::Memory => "memory",
            ReportKey::Numa => "numa",
            ReportKey::Network => "network",
            ReportKey::Storage => "storage",
            ReportKey::Power => "power",
            ReportKey::Vsan => "vsan",
            ReportKey::Other => "other",
        }
    }

    /// Best-effort routing from an attribute label.
    pub fn infer_from_attribute(attr: &str) -> ReportKey {
        let l = attr.to_ascii_lowercase();
        if l.contains("cpu") || l.contains("vcpu") || l.contains("% ready") || l.contains("% costop")
        {
            ReportKey::Cpu
        } else if l.contains("memory") || l.contains("swap") || l.contains("group memory") {
            ReportKey::Memory
        } else if l.contains("numa") {
            ReportKey::Numa
        } else if l.contains("network") || l.contains("net") {
            ReportKey::Network
        } else if l.contains("disk") || l.contains("storage") || l.contains("latency") {
            ReportKey::Storage
        } else if l.contains("power") || l.contains("pstate") || l.contains("watts") {
            ReportKey::Power
        } else if l.contains("vsan") {
            ReportKey::Vsan
        } else {
            ReportKey::Other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticFinding {
    pub template_id: String,
    pub template_name: String,
    pub title: String,
    pub severity: Severity,
    pub report_key: ReportKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<String>,
    /// Unix milliseconds. A streak that was still open at end-of-file has
    /// no end timestamp; the field is omitted rather than zeroed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRunResponse {
    pub findings: Vec<DiagnosticFinding>,
    pub templates: usize,
    pub rows_scanned: u64,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
