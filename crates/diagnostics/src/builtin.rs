// diagnostics/builtin.rs
// Read-only detector definitions embedded at build time from templates/.

use crate::store::StoreError;
use crate::template::{normalize_template, DiagnosticTemplate};

/// One entry per JSON document under `templates/`.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "disk_adapter_driver_latency_high.json",
        include_str!("../templates/disk_adapter_driver_latency_high.json"),
    ),
    (
        "disk_adapter_failed_reads_high.json",
        include_str!("../templates/disk_adapter_failed_reads_high.json"),
    ),
    (
        "exclusive_affinity.json",
        include_str!("../templates/exclusive_affinity.json"),
    ),
    ("high_costop.json", include_str!("../templates/high_costop.json")),
    ("high_ready.json", include_str!("../templates/high_ready.json")),
    (
        "low_numa_local.json",
        include_str!("../templates/low_numa_local.json"),
    ),
    (
        "memory_overcommit_high.json",
        include_str!("../templates/memory_overcommit_high.json"),
    ),
    (
        "network_outbound_drop_high.json",
        include_str!("../templates/network_outbound_drop_high.json"),
    ),
    (
        "numa_imbalance.json",
        include_str!("../templates/numa_imbalance.json"),
    ),
    ("numa_zigzag.json", include_str!("../templates/numa_zigzag.json")),
    (
        "storage_latency.json",
        include_str!("../templates/storage_latency.json"),
    ),
];

/// Parse and validate the embedded template set. A malformed builtin is a
/// packaging defect and fails startup.
pub fn load_builtin_templates() -> Result<Vec<DiagnosticTemplate>, StoreError> {
    let mut out = Vec::with_capacity(BUILTIN_TEMPLATES.len());
    for (name, raw) in BUILTIN_TEMPLATES {
        let t: DiagnosticTemplate = serde_json::from_str(raw)
            .map_err(|err| StoreError::InvalidTemplate(format!("{}: {}", name, err)))?;
        if t.id.trim().is_empty() || t.name.trim().is_empty() || t.detector.kind.trim().is_empty()
        {
            return Err(StoreError::InvalidTemplate(format!(
                "{}: missing required fields",
                name
            )));
        }
        out.push(normalize_template(t));
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtins_parse_and_cover_every_detector_family() {
        let templates = load_builtin_templates().unwrap();
        assert_eq!(templates.len(), 11);

        let kinds: HashSet<&str> = templates
            .iter()
            .map(|t| t.detector.kind.as_str())
            .collect();
        for kind in [
            "high_ready",
            "high_costop",
            "storage_latency",
            "low_numa_local",
            "memory_overcommit_high",
            "network_outbound_drop_high",
            "disk_adapter_failed_reads_high",
            "disk_adapter_driver_latency_high",
            "numa_zigzag",
            "numa_imbalance",
            "exclusive_affinity",
        ] {
            assert!(kinds.contains(kind), "missing builtin for {}", kind);
        }
    }

    #[test]
    fn test_builtin_ids_are_unique_and_not_custom() {
        let templates = load_builtin_templates().unwrap();
        let mut seen = HashSet::new();
        for t in &templates {
            assert!(seen.insert(t.id.clone()), "duplicate id {}", t.id);
            assert!(
                !t.id.starts_with("custom."),
                "builtin id {} uses the custom prefix",
                t.id
            );
            assert!(t.enabled);
        }
    }

    #[test]
    fn test_builtins_are_normalized() {
        for t in load_builtin_templates().unwrap() {
            assert_eq!(t.detector.filter.logic, "and");
            assert!(t.detector.min_consecutive > 0);
        }
    }
}
