// diagnostics/processors/threshold.rs
// Sustained-threshold streaks: per-instance runs of consecutive samples
// beyond a threshold.

use super::{finite_cell, RowProcessor};
use crate::finding::{DiagnosticFinding, ReportKey};
use crate::template::DiagnosticTemplate;
use chrono::{DateTime, Utc};

const MAX_FINDINGS: usize = 20;

#[derive(Debug, Default, Clone)]
struct EntityStreak {
    curr_len: u64,
    curr_start: Option<DateTime<Utc>>,
    curr_peak: f64,
    best_len: u64,
    best_start: Option<DateTime<Utc>>,
    /// The timestamp of the row that broke the best streak. A streak still
    /// open at finalize keeps no end; that asymmetry is deliberate.
    best_end: Option<DateTime<Utc>>,
    best_peak: f64,
}

pub struct ThresholdProcessor {
    template: DiagnosticTemplate,
    report_key: ReportKey,
    attribute_label: String,
    compare_less: bool,
    indexes: Vec<usize>,
    labels: Vec<String>,
    threshold: f64,
    min_consecutive: u64,
    states: Vec<EntityStreak>,
}

impl ThresholdProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        template: DiagnosticTemplate,
        report_key: ReportKey,
        attribute_label: String,
        compare_less: bool,
        indexes: Vec<usize>,
        labels: Vec<String>,
        threshold: f64,
        min_consecutive: u64,
    ) -> Self {
        let states = vec![EntityStreak::default(); indexes.len()];
        Self {
            template,
            report_key,
            attribute_label,
            compare_less,
            indexes,
            labels,
            threshold,
            min_consecutive,
            states,
        }
    }

    fn reset(&mut self, i: usize, ts: Option<DateTime<Utc>>) {
        let s = &mut self.states[i];
        if s.curr_len > s.best_len {
            s.best_len = s.curr_len;
            s.best_start = s.curr_start;
            s.best_end = ts;
            s.best_peak = s.curr_peak;
        }
        s.curr_len = 0;
        s.curr_peak = 0.0;
    }
}

impl RowProcessor for ThresholdProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &[String]) {
        for i in 0..self.indexes.len() {
            let idx = self.indexes[i];
            let v = match finite_cell(record, idx) {
                Some(v) => v,
                None => {
                    self.reset(i, Some(ts));
                    continue;
                }
            };
            let matched = if self.compare_less {
                v < self.threshold
            } else {
                v > self.threshold
            };
            if matched {
                let s = &mut self.states[i];
                if s.curr_len == 0 {
                    s.curr_start = Some(ts);
                    s.curr_peak = v;
                } else if (!self.compare_less && v > s.curr_peak)
                    || (self.compare_less && v < s.curr_peak)
                {
                    s.curr_peak = v;
                }
                s.curr_len += 1;
            } else {
                self.reset(i, Some(ts));
            }
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        for i in 0..self.states.len() {
            self.reset(i, None);
        }
        let comp_word = if self.compare_less { "below" } else { "above" };
        let mut findings = Vec::new();
        for (i, s) in self.states.iter().enumerate() {
            if s.best_len < self.min_consecutive {
                continue;
            }
            let summary = format!(
                "Sustained threshold breach: peak {:.2} stayed {} threshold {:.2} for {} consecutive samples.",
                s.best_peak, comp_word, self.threshold, s.best_len
            );
            findings.push(DiagnosticFinding {
                template_id: self.template.id.clone(),
                template_name: self.template.name.clone(),
                title: self.template.name.clone(),
                severity: self.template.severity,
                report_key: self.report_key,
                attribute_label: Some(self.attribute_label.clone()),
                instances: vec![self.labels[i].clone()],
                start: s.best_start.map(|t| t.timestamp_millis()),
                end: s.best_end.map(|t| t.timestamp_millis()),
                summary,
            });
        }
        findings.truncate(MAX_FINDINGS);
        findings
    }
}
