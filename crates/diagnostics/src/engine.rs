// diagnostics/engine.rs
// Template compilation into row processors, plus the single streaming pass
// that feeds them.

use crate::filter::{
    contains_any_fold, excluded_by_name, excluded_by_regex, matches_filter,
    matches_included_attribute, matches_included_object,
};
use crate::finding::{DiagnosticRunResponse, ReportKey};
use crate::processors::{
    AffinityProcessor, DominanceSwitchProcessor, RangeImbalanceProcessor, RowProcessor,
    ThresholdProcessor,
};
use crate::template::DiagnosticTemplate;
use esx_core::{decode_line, parse_column, parse_time_or_millis, CoreError, DataFile, ParsedColumn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Instant;

const READ_BUFFER: usize = 4 * 1024 * 1024;

/// Sustained-threshold detector family. Each carries a default threshold
/// and the builtin attribute substring its columns must match.
const THRESHOLD_KINDS: [&str; 9] = [
    "threshold_sustained",
    "high_ready",
    "high_costop",
    "storage_latency",
    "low_numa_local",
    "memory_overcommit_high",
    "network_outbound_drop_high",
    "disk_adapter_failed_reads_high",
    "disk_adapter_driver_latency_high",
];

/// Examine the parsed columns once per selected template and build the
/// processors that will ingest rows. Templates with no eligible columns are
/// silently dropped.
pub fn compile_processors(
    templates: &[DiagnosticTemplate],
    cols: &[ParsedColumn],
) -> Vec<Box<dyn RowProcessor>> {
    let mut processors: Vec<Box<dyn RowProcessor>> = Vec::new();
    for t in templates {
        match t.detector.kind.as_str() {
            kind if THRESHOLD_KINDS.contains(&kind) => {
                if let Some(p) = compile_threshold(t, kind, cols) {
                    processors.push(Box::new(p));
                }
            }
            "numa_zigzag" | "zigzag_switch" => {
                if let Some(p) = compile_dominance(t, cols) {
                    processors.push(Box::new(p));
                }
            }
            "exclusive_affinity" => {
                if let Some(p) = compile_affinity(t, cols) {
                    processors.push(Box::new(p));
                }
            }
            "numa_imbalance" | "dominance_imbalance" => {
                if let Some(p) = compile_imbalance(t, cols) {
                    processors.push(Box::new(p));
                }
            }
            other => {
                tracing::debug!(template = %t.id, kind = other, "unknown detector type, skipping");
            }
        }
    }
    processors
}

fn compile_threshold(
    t: &DiagnosticTemplate,
    kind: &str,
    cols: &[ParsedColumn],
) -> Option<ThresholdProcessor> {
    let d = &t.detector;
    let mut compare_less = d.comparison.trim().eq_ignore_ascii_case("less");
    let mut threshold = d.threshold;
    let min_consecutive = if d.min_consecutive > 0 {
        d.min_consecutive as u64
    } else {
        6
    };
    if threshold <= 0.0 {
        threshold = match kind {
            "high_ready" => 5.0,
            "high_costop" => 3.0,
            "storage_latency" => 20.0,
            "low_numa_local" => {
                compare_less = true;
                85.0
            }
            "memory_overcommit_high" => 100.0,
            "network_outbound_drop_high" => 1.0,
            "disk_adapter_failed_reads_high" => 5.0,
            "disk_adapter_driver_latency_high" => 30.0,
            _ => threshold,
        };
    }

    let mut indexes = Vec::new();
    let mut labels = Vec::new();
    let mut attribute = String::new();
    let mut report_key = ReportKey::Cpu;
    for c in cols {
        let l = c.attribute_label.to_ascii_lowercase();
        let matched = match kind {
            "threshold_sustained" => {
                report_key = ReportKey::Other;
                true
            }
            "high_ready" => {
                report_key = ReportKey::Cpu;
                l.contains("% ready")
            }
            "high_costop" => {
                report_key = ReportKey::Cpu;
                l.contains("% costop")
            }
            "storage_latency" => {
                report_key = ReportKey::Storage;
                l.contains("latency")
            }
            "low_numa_local" => {
                report_key = ReportKey::Numa;
                l.contains("group memory: numa % local")
            }
            "memory_overcommit_high" => {
                report_key = ReportKey::Memory;
                l.contains("memory: memory overcommit (1 minute avg)")
            }
            "network_outbound_drop_high" => {
                report_key = ReportKey::Network;
                l.contains("network port: % outbound packets dropped")
            }
            "disk_adapter_failed_reads_high" => {
                report_key = ReportKey::Storage;
                l.contains("failed reads/sec")
            }
            "disk_adapter_driver_latency_high" => {
                report_key = ReportKey::Storage;
                l.contains("average driver millisec/command")
            }
            _ => false,
        };
        if !matched
            || !matches_filter(c, &d.filter)
            || !matches_included_attribute(&c.attribute_label, &d.include_attribute_equals)
            || !matches_included_object(&c.object, &d.include_object_equals)
            || excluded_by_name(&c.instance, &d.exclude_instance_contains)
            || excluded_by_regex(&c.instance, &d.exclude_instance_regex)
        {
            continue;
        }
        indexes.push(c.idx);
        labels.push(c.instance.clone());
        if attribute.is_empty() {
            attribute = c.attribute_label.clone();
        }
    }
    if indexes.is_empty() {
        return None;
    }
    if report_key == ReportKey::Other && !attribute.is_empty() {
        report_key = ReportKey::infer_from_attribute(&attribute);
    }
    Some(ThresholdProcessor::new(
        t.clone(),
        report_key,
        attribute,
        compare_less,
        indexes,
        labels,
        threshold,
        min_consecutive,
    ))
}

fn compile_dominance(
    t: &DiagnosticTemplate,
    cols: &[ParsedColumn],
) -> Option<DominanceSwitchProcessor> {
    let d = &t.detector;
    let mut indexes = Vec::new();
    for c in cols {
        if !d.filter.conditions.is_empty() {
            if !matches_filter(c, &d.filter) {
                continue;
            }
        } else if !(contains_any_fold(&c.attribute_label, &["numa"])
            && contains_any_fold(&c.attribute_label, &["load", "% used", "% processor time"]))
        {
            continue;
        }
        indexes.push(c.idx);
    }
    if indexes.len() < 2 {
        return None;
    }
    let min_switches = if d.min_switches > 0 {
        d.min_switches as u64
    } else {
        6
    };
    let min_gap = if d.min_gap > 0.0 { d.min_gap } else { 3.0 };
    Some(DominanceSwitchProcessor::new(
        t.clone(),
        indexes,
        min_switches,
        min_gap,
    ))
}

fn compile_affinity(t: &DiagnosticTemplate, cols: &[ParsedColumn]) -> Option<AffinityProcessor> {
    let mut indexes = Vec::new();
    let mut labels = Vec::new();
    for c in cols {
        if contains_any_fold(&c.attribute_label, &["exclusive affinity"]) {
            indexes.push(c.idx);
            labels.push(c.instance.clone());
        }
    }
    if indexes.is_empty() {
        return None;
    }
    Some(AffinityProcessor::new(t.clone(), indexes, labels))
}

fn compile_imbalance(
    t: &DiagnosticTemplate,
    cols: &[ParsedColumn],
) -> Option<RangeImbalanceProcessor> {
    let d = &t.detector;
    let mut indexes = Vec::new();
    let mut labels = Vec::new();
    for c in cols {
        if !d.filter.conditions.is_empty() {
            if !matches_filter(c, &d.filter) {
                continue;
            }
        } else if !(c.object.eq_ignore_ascii_case("Numa Node")
            && c.counter.eq_ignore_ascii_case("% Processor Time"))
        {
            continue;
        }
        indexes.push(c.idx);
        labels.push(format!("Numa Node {}", c.instance));
    }
    if indexes.len() < 2 {
        return None;
    }
    let high = if d.high_threshold > 0.0 {
        d.high_threshold
    } else {
        80.0
    };
    let low = if d.low_threshold > 0.0 {
        d.low_threshold
    } else {
        20.0
    };
    let min_gap = if d.min_gap > 0.0 { d.min_gap } else { 40.0 };
    let min_consecutive = if d.min_consecutive > 0 {
        d.min_consecutive as u64
    } else {
        6
    };
    Some(RangeImbalanceProcessor::new(
        t.clone(),
        ReportKey::Numa,
        "Numa Node: % Processor Time".to_string(),
        indexes,
        labels,
        high,
        low,
        min_gap,
        min_consecutive,
    ))
}

/// Run the selected templates over the whole file in one pass. Row-level
/// failures (bad CSV, bad timestamp) skip the row and keep scanning;
/// only I/O failures abort the run.
pub fn run_diagnostics(
    df: &DataFile,
    selected: &[DiagnosticTemplate],
) -> Result<DiagnosticRunResponse, CoreError> {
    let started = Instant::now();
    let mut resp = DiagnosticRunResponse::default();
    if selected.is_empty() {
        return Ok(resp);
    }
    resp.templates = selected.len();

    let cols: Vec<ParsedColumn> = df
        .columns
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| parse_column(c, i))
        .collect();
    let mut processors = compile_processors(selected, &cols);
    if processors.is_empty() {
        return Ok(resp);
    }

    let file = File::open(&df.path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);
    let mut line: Vec<u8> = Vec::with_capacity(1024);

    // Consume the header line.
    reader.read_until(b'\n', &mut line)?;

    let mut rows: u64 = 0;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let record = match decode_line(&line) {
            Some(record) => record,
            None => continue,
        };
        let field = record.first().map(String::as_str).unwrap_or("");
        let ts = match parse_time_or_millis(field) {
            Some(ts) => ts,
            None => continue,
        };
        rows += 1;
        for p in processors.iter_mut() {
            p.on_row(ts, &record);
        }
    }

    for p in processors.iter_mut() {
        resp.findings.extend(p.finalize());
    }
    resp.findings.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| a.title.cmp(&b.title))
    });
    resp.rows_scanned = rows;
    resp.duration_ms = started.elapsed().as_millis() as i64;
    tracing::debug!(
        templates = resp.templates,
        findings = resp.findings.len(),
        rows = rows,
        "diagnostics run complete"
    );
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use crate::template::{TemplateCondition, TemplateFilter};
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn template(id: &str, kind: &str, severity: Severity) -> DiagnosticTemplate {
        let mut t = DiagnosticTemplate {
            id: id.into(),
            name: id.into(),
            enabled: true,
            severity,
            ..Default::default()
        };
        t.detector.kind = kind.into();
        t
    }

    fn indexed(contents: &str) -> (NamedTempFile, DataFile) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        let df = esx_core::build_index(f.path()).unwrap();
        (f, df)
    }

    #[test]
    fn test_high_ready_detector_end_to_end() {
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:vm)\\% Ready\n",
            "2026-02-09 15:30:00,6\n",
            "2026-02-09 15:30:01,7\n",
            "2026-02-09 15:30:02,8\n",
            "2026-02-09 15:30:03,7\n",
            "2026-02-09 15:30:04,6\n",
            "2026-02-09 15:30:05,7\n",
            "2026-02-09 15:30:06,8\n",
            "2026-02-09 15:30:07,6\n",
            "2026-02-09 15:30:08,2\n",
            "2026-02-09 15:30:09,2\n",
        ));
        let templates = vec![template("high_ready", "high_ready", Severity::High)];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert_eq!(resp.rows_scanned, 10);
        assert_eq!(resp.findings.len(), 1);
        let f = &resp.findings[0];
        assert_eq!(f.instances, vec!["0:vm"]);
        assert_eq!(f.report_key, ReportKey::Cpu);
        let base = chrono::Utc
            .with_ymd_and_hms(2026, 2, 9, 15, 30, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(f.start, Some(base));
        assert_eq!(f.end, Some(base + 8000));
        assert!(f.summary.contains("peak 8.00"));
    }

    #[test]
    fn test_zero_eligible_columns_drops_template() {
        let (_f, df) = indexed("Time,\\\\h\\Memory\\MBytes\n2026-02-09 15:30:00,1\n");
        let templates = vec![template("high_ready", "high_ready", Severity::High)];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert!(resp.findings.is_empty());
        assert_eq!(resp.templates, 1);
    }

    #[test]
    fn test_unix_millis_timestamp_fallback() {
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:vm)\\% Ready\n",
            "1770651000000,9\n",
            "1770651001000,9\n",
            "1770651002000,9\n",
            "1770651003000,9\n",
            "1770651004000,9\n",
            "1770651005000,9\n",
        ));
        let templates = vec![template("high_ready", "high_ready", Severity::High)];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert_eq!(resp.rows_scanned, 6);
        assert_eq!(resp.findings.len(), 1);
        assert_eq!(resp.findings[0].start, Some(1770651000000));
    }

    #[test]
    fn test_findings_sorted_by_severity_then_title() {
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:vm)\\% Ready,\\\\h\\Disk(d0)\\Read Latency\n",
            "2026-02-09 15:30:00,9,99\n",
            "2026-02-09 15:30:01,9,99\n",
            "2026-02-09 15:30:02,9,99\n",
            "2026-02-09 15:30:03,9,99\n",
            "2026-02-09 15:30:04,9,99\n",
            "2026-02-09 15:30:05,9,99\n",
        ));
        let templates = vec![
            template("a_latency", "storage_latency", Severity::Medium),
            template("b_ready", "high_ready", Severity::Critical),
        ];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert_eq!(resp.findings.len(), 2);
        assert_eq!(resp.findings[0].template_id, "b_ready");
        assert_eq!(resp.findings[1].template_id, "a_latency");
    }

    #[test]
    fn test_filter_restricts_threshold_columns() {
        let mut t = template("custom.web", "high_ready", Severity::High);
        t.detector.filter = TemplateFilter {
            logic: "and".into(),
            conditions: vec![TemplateCondition {
                field: "instance".into(),
                op: "contains".into(),
                value: "web".into(),
            }],
        };
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:web)\\% Ready,\\\\h\\Vcpu(1:db)\\% Ready\n",
            "2026-02-09 15:30:00,9,9\n",
            "2026-02-09 15:30:01,9,9\n",
            "2026-02-09 15:30:02,9,9\n",
            "2026-02-09 15:30:03,9,9\n",
            "2026-02-09 15:30:04,9,9\n",
            "2026-02-09 15:30:05,9,9\n",
        ));
        let resp = run_diagnostics(&df, &[t]).unwrap();
        assert_eq!(resp.findings.len(), 1);
        assert_eq!(resp.findings[0].instances, vec!["0:web"]);
    }

    #[test]
    fn test_exclude_instance_lists() {
        let mut t = template("high_ready", "high_ready", Severity::High);
        t.detector.exclude_instance_contains = vec!["db".into()];
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:web)\\% Ready,\\\\h\\Vcpu(1:db)\\% Ready\n",
            "2026-02-09 15:30:00,9,9\n",
            "2026-02-09 15:30:01,9,9\n",
            "2026-02-09 15:30:02,9,9\n",
            "2026-02-09 15:30:03,9,9\n",
            "2026-02-09 15:30:04,9,9\n",
            "2026-02-09 15:30:05,9,9\n",
        ));
        let resp = run_diagnostics(&df, &[t]).unwrap();
        assert_eq!(resp.findings.len(), 1);
        assert_eq!(resp.findings[0].instances, vec!["0:web"]);
    }

    #[test]
    fn test_dominance_switch_over_file() {
        let mut rowsv = String::from(
            "Time,\\\\h\\Numa Node(0)\\Load Avg,\\\\h\\Numa Node(1)\\Load Avg\n",
        );
        for i in 0..7u32 {
            let (a, b) = if i % 2 == 0 { (90, 80) } else { (80, 90) };
            rowsv.push_str(&format!("2026-02-09 15:30:{:02},{},{}\n", i, a, b));
        }
        let (_f, df) = indexed(&rowsv);
        let templates = vec![template("numa_zigzag", "numa_zigzag", Severity::Medium)];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert_eq!(resp.findings.len(), 1);
        assert!(resp.findings[0].summary.contains("6 dominance switches"));
        assert!(resp.findings[0].summary.contains("7 analyzed samples"));
    }

    #[test]
    fn test_imbalance_needs_two_numa_nodes() {
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Numa Node(0)\\% Processor Time\n",
            "2026-02-09 15:30:00,95\n",
        ));
        let templates = vec![template("numa_imbalance", "numa_imbalance", Severity::Medium)];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert!(resp.findings.is_empty());
    }

    #[test]
    fn test_exclusive_affinity_over_file() {
        let (_f, df) = indexed(concat!(
            "Time,\\\\h\\Vcpu(0:vm)\\Exclusive Affinity\n",
            "2026-02-09 15:30:00,true\n",
            "2026-02-09 15:30:01,0\n",
            "2026-02-09 15:30:02,yes\n",
            "2026-02-09 15:30:03,true\n",
        ));
        let templates = vec![template(
            "exclusive_affinity",
            "exclusive_affinity",
            Severity::Low,
        )];
        let resp = run_diagnostics(&df, &templates).unwrap();
        assert_eq!(resp.findings.len(), 1);
        let f = &resp.findings[0];
        assert_eq!(f.instances, vec!["0:vm"]);
        let base = chrono::Utc
            .with_ymd_and_hms(2026, 2, 9, 15, 30, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(f.start, Some(base));
        assert_eq!(f.end, Some(base + 3000));
    }
}
