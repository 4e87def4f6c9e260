// diagnostics/processors/imbalance.rs
// Cross-entity imbalance: one entity pinned high while another stays low,
// sustained over consecutive rows.

use super::{finite_cell, RowProcessor};
use crate::finding::{DiagnosticFinding, ReportKey};
use crate::template::DiagnosticTemplate;
use chrono::{DateTime, Utc};

pub struct RangeImbalanceProcessor {
    template: DiagnosticTemplate,
    report_key: ReportKey,
    attribute_label: String,
    indexes: Vec<usize>,
    labels: Vec<String>,
    high_threshold: f64,
    low_threshold: f64,
    min_gap: f64,
    min_consecutive: u64,
    curr_len: u64,
    curr_start: Option<DateTime<Utc>>,
    curr_high: String,
    curr_low: String,
    best_len: u64,
    best_start: Option<DateTime<Utc>>,
    best_end: Option<DateTime<Utc>>,
    best_high: String,
    best_low: String,
}

impl RangeImbalanceProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        template: DiagnosticTemplate,
        report_key: ReportKey,
        attribute_label: String,
        indexes: Vec<usize>,
        labels: Vec<String>,
        high_threshold: f64,
        low_threshold: f64,
        min_gap: f64,
        min_consecutive: u64,
    ) -> Self {
        Self {
            template,
            report_key,
            attribute_label,
            indexes,
            labels,
            high_threshold,
            low_threshold,
            min_gap,
            min_consecutive,
            curr_len: 0,
            curr_start: None,
            curr_high: String::new(),
            curr_low: String::new(),
            best_len: 0,
            best_start: None,
            best_end: None,
            best_high: String::new(),
            best_low: String::new(),
        }
    }

    fn reset(&mut self, ts: Option<DateTime<Utc>>) {
        if self.curr_len > self.best_len {
            self.best_len = self.curr_len;
            self.best_start = self.curr_start;
            self.best_end = ts;
            self.best_high = std::mem::take(&mut self.curr_high);
            self.best_low = std::mem::take(&mut self.curr_low);
        }
        self.curr_len = 0;
        self.curr_high.clear();
        self.curr_low.clear();
    }
}

impl RowProcessor for RangeImbalanceProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &[String]) {
        let mut max_val = f64::NEG_INFINITY;
        let mut min_val = f64::INFINITY;
        let mut max_idx: Option<usize> = None;
        let mut min_idx: Option<usize> = None;
        let mut valid = 0u32;
        for (i, &idx) in self.indexes.iter().enumerate() {
            let v = match finite_cell(record, idx) {
                Some(v) => v,
                None => continue,
            };
            valid += 1;
            if v > max_val {
                max_val = v;
                max_idx = Some(i);
            }
            if v < min_val {
                min_val = v;
                min_idx = Some(i);
            }
        }
        let (max_idx, min_idx) = match (max_idx, min_idx) {
            (Some(a), Some(b)) if valid >= 2 => (a, b),
            _ => {
                self.reset(Some(ts));
                return;
            }
        };
        if max_val >= self.high_threshold
            && min_val <= self.low_threshold
            && (max_val - min_val) >= self.min_gap
        {
            if self.curr_len == 0 {
                self.curr_start = Some(ts);
                self.curr_high = self.labels[max_idx].clone();
                self.curr_low = self.labels[min_idx].clone();
            }
            self.curr_len += 1;
        } else {
            self.reset(Some(ts));
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        self.reset(None);
        if self.best_len < self.min_consecutive {
            return Vec::new();
        }
        vec![DiagnosticFinding {
            template_id: self.template.id.clone(),
            template_name: self.template.name.clone(),
            title: self.template.name.clone(),
            severity: self.template.severity,
            report_key: self.report_key,
            attribute_label: Some(self.attribute_label.clone()),
            instances: vec![self.best_high.clone(), self.best_low.clone()],
            start: self.best_start.map(|t| t.timestamp_millis()),
            end: self.best_end.map(|t| t.timestamp_millis()),
            summary: format!(
                "Persistent imbalance: one node stayed high (>={:.1}%) while another stayed low (<={:.1}%) for {} samples.",
                self.high_threshold, self.low_threshold, self.best_len
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
            id: "numa_imbalance".into(),
            name: "NUMA Imbalance".into(),
            enabled: true,
            ..Default::default()
        };
        t.detector.kind = "numa_imbalance".into();
        t
    }

    fn processor(min_consecutive: u64) -> RangeImbalanceProcessor {
        RangeImbalanceProcessor::new(
            template(),
            ReportKey::Numa,
            "Numa Node: % Processor Time".into(),
            vec![1, 2],
            vec!["Numa Node 0".into(), "Numa Node 1".into()],
            80.0,
            20.0,
            40.0,
            min_consecutive,
        )
    }

    fn row(a: f64, b: f64) -> Vec<String> {
        vec!["t".to_string(), a.to_string(), b.to_string()]
    }

    #[test]
    fn test_sustained_imbalance_names_both_nodes() {
        let mut p = processor(6);
        for i in 0..7u32 {
            p.on_row(ts(i), &row(95.0, 5.0));
        }
        let findings = p.finalize();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.instances, vec!["Numa Node 0", "Numa Node 1"]);
        assert_eq!(f.start, Some(ts(0).timestamp_millis()));
        assert_eq!(f.end, None);
        assert!(f.summary.contains("7 samples"));
    }

    #[test]
    fn test_balanced_rows_break_the_streak() {
        let mut p = processor(6);
        for i in 0..5u32 {
            p.on_row(ts(i), &row(95.0, 5.0));
        }
        p.on_row(ts(5), &row(50.0, 50.0));
        for i in 6..11u32 {
            p.on_row(ts(i), &row(95.0, 5.0));
        }
        assert!(p.finalize().is_empty());
    }

    #[test]
    fn test_gap_condition_required() {
        // Thresholds loose enough that only the gap condition can fail.
        let mut p = RangeImbalanceProcessor::new(
            template(),
            ReportKey::Numa,
            "Numa Node: % Processor Time".into(),
            vec![1, 2],
            vec!["Numa Node 0".into(), "Numa Node 1".into()],
            50.0,
            45.0,
            40.0,
            2,
        );
        for i in 0..5u32 {
            p.on_row(ts(i), &row(55.0, 40.0));
        }
        assert!(p.finalize().is_empty());
    }

    #[test]
    fn test_single_valid_value_breaks_streak() {
        let mut p = processor(2);
        p.on_row(ts(0), &row(95.0, 5.0));
        p.on_row(ts(1), &row(95.0, 5.0));
        p.on_row(ts(2), &vec!["t".into(), "95".into(), "".into()]);
        let findings = p.finalize();
        // Streak closed at ts(2) with length 2, which meets min_consecutive.
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].end, Some(ts(2).timestamp_millis()));
    }
}
