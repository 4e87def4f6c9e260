// diagnostics/processors/dominance.rs
// Dominance switching: counts transitions of the argmax entity across the
// matched columns, ignoring rows where the lead is inside the gap margin.

use super::{finite_cell, RowProcessor};
use crate::finding::{DiagnosticFinding, ReportKey};
use crate::template::DiagnosticTemplate;
use chrono::{DateTime, Utc};

pub struct DominanceSwitchProcessor {
    template: DiagnosticTemplate,
    indexes: Vec<usize>,
    min_switches: u64,
    min_gap: f64,
    switches: u64,
    first_switch: Option<DateTime<Utc>>,
    last_switch: Option<DateTime<Utc>>,
    prev_dominant: Option<usize>,
    observations: u64,
}

impl DominanceSwitchProcessor {
    pub fn new(
        template: DiagnosticTemplate,
        indexes: Vec<usize>,
        min_switches: u64,
        min_gap: f64,
    ) -> Self {
        Self {
            template,
            indexes,
            min_switches,
            min_gap,
            switches: 0,
            first_switch: None,
            last_switch: None,
            prev_dominant: None,
            observations: 0,
        }
    }
}

impl RowProcessor for DominanceSwitchProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &[String]) {
        let mut best_val = f64::NEG_INFINITY;
        let mut second_val = f64::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut valid = 0u32;
        for (i, &idx) in self.indexes.iter().enumerate() {
            let v = match finite_cell(record, idx) {
                Some(v) => v,
                None => continue,
            };
            valid += 1;
            if v > best_val {
                second_val = best_val;
                best_val = v;
                best_idx = Some(i);
            } else if v > second_val {
                second_val = v;
            }
        }
        let best_idx = match best_idx {
            Some(i) if valid >= 2 => i,
            _ => return,
        };
        if best_val - second_val < self.min_gap {
            return;
        }
        self.observations += 1;
        if let Some(prev) = self.prev_dominant {
            if prev != best_idx {
                self.switches += 1;
                if self.first_switch.is_none() {
                    self.first_switch = Some(ts);
                }
                self.last_switch = Some(ts);
            }
        }
        self.prev_dominant = Some(best_idx);
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        if self.switches < self.min_switches || self.observations < self.min_switches + 1 {
            return Vec::new();
        }
        vec![DiagnosticFinding {
            template_id: self.template.id.clone(),
            template_name: self.template.name.clone(),
            title: self.template.name.clone(),
            severity: self.template.severity,
            report_key: ReportKey::Numa,
            attribute_label: None,
            instances: Vec::new(),
            start: self.first_switch.map(|t| t.timestamp_millis()),
            end: self.last_switch.map(|t| t.timestamp_millis()),
            summary: format!(
                "Detected {} dominance switches across NUMA nodes ({} analyzed samples).",
                self.switches, self.observations
            ),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, 15, 30, sec).unwrap()
    }

    fn template() -> DiagnosticTemplate {
        let mut t = DiagnosticTemplate {
            id: "numa_zigzag".into(),
            name: "NUMA Load Zigzag".into(),
            enabled: true,
            ..Default::default()
        };
        t.detector.kind = "numa_zigzag".into();
        t
    }

    fn row(a: f64, b: f64) -> Vec<String> {
        vec!["t".to_string(), a.to_string(), b.to_string()]
    }

    #[test]
    fn test_alternating_dominance_counts_switches() {
        let mut p = DominanceSwitchProcessor::new(template(), vec![1, 2], 6, 3.0);
        // Argmax alternates every row with a gap of 10.
        for i in 0..7u32 {
            if i % 2 == 0 {
                p.on_row(ts(i), &row(90.0, 80.0));
            } else {
                p.on_row(ts(i), &row(80.0, 90.0));
            }
        }
        let findings = p.finalize();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert!(f.summary.contains("6 dominance switches"));
        assert!(f.summary.contains("7 analyzed samples"));
        assert_eq!(f.start, Some(ts(1).timestamp_millis()));
        assert_eq!(f.end, Some(ts(6).timestamp_millis()));
        assert_eq!(f.report_key, ReportKey::Numa);
    }

    #[test]
    fn test_rows_inside_gap_margin_are_ignored() {
        let mut p = DominanceSwitchProcessor::new(template(), vec![1, 2], 2, 3.0);
        p.on_row(ts(0), &row(90.0, 80.0));
        // Lead below the gap: neither an observation nor a switch.
        p.on_row(ts(1), &row(81.0, 80.0));
        p.on_row(ts(2), &row(80.0, 90.0));
        p.on_row(ts(3), &row(90.0, 80.0));
        let findings = p.finalize();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].summary.contains("2 dominance switches"));
        assert!(findings[0].summary.contains("3 analyzed samples"));
    }

    #[test]
    fn test_stable_dominance_yields_nothing() {
        let mut p = DominanceSwitchProcessor::new(template(), vec![1, 2], 6, 3.0);
        for i in 0..20u32 {
            p.on_row(ts(i), &row(90.0, 50.0));
        }
        assert!(p.finalize().is_empty());
    }

    #[test]
    fn test_needs_two_finite_values_per_row() {
        let mut p = DominanceSwitchProcessor::new(template(), vec![1, 2], 1, 3.0);
        p.on_row(ts(0), &row(90.0, 80.0));
        p.on_row(ts(1), &vec!["t".into(), "".into(), "90".into()]);
        p.on_row(ts(2), &row(80.0, 90.0));
        let findings = p.finalize();
        // The single-value row at ts(1) is skipped entirely.
        assert_eq!(findings.len(), 1);
        assert!(findings[0].summary.contains("1 dominance switches"));
    }
}
