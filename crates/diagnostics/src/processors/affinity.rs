// diagnostics/processors/affinity.rs
// Boolean-active flags: entities whose exclusive-affinity column was ever
// truthy, with the union of first/last seen timestamps.

use super::RowProcessor;
use crate::finding::{DiagnosticFinding, ReportKey};
use crate::template::DiagnosticTemplate;
use chrono::{DateTime, Utc};
use esx_core::parse_truthy;

const MAX_LISTED_ENTITIES: usize = 12;

pub struct AffinityProcessor {
    template: DiagnosticTemplate,
    indexes: Vec<usize>,
    labels: Vec<String>,
    hit_counts: Vec<u64>,
    first_seen: Vec<Option<DateTime<Utc>>>,
    last_seen: Vec<Option<DateTime<Utc>>>,
}

impl AffinityProcessor {
    pub fn new(template: DiagnosticTemplate, indexes: Vec<usize>, labels: Vec<String>) -> Self {
        let n = indexes.len();
        Self {
            template,
            indexes,
            labels,
            hit_counts: vec![0; n],
            first_seen: vec![None; n],
            last_seen: vec![None; n],
        }
    }
}

impl RowProcessor for AffinityProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &[String]) {
        for (i, &idx) in self.indexes.iter().enumerate() {
            let truthy = record.get(idx).map(|raw| parse_truthy(raw)).unwrap_or(false);
            if !truthy {
                continue;
            }
            self.hit_counts[i] += 1;
            if self.first_seen[i].is_none() {
                self.first_seen[i] = Some(ts);
            }
            self.last_seen[i] = Some(ts);
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        let mut entities = Vec::new();
        let mut first: Option<DateTime<Utc>> = None;
        let mut last: Option<DateTime<Utc>> = None;
        for (i, &count) in self.hit_counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            entities.push(self.labels[i].clone());
            if let Some(seen) = self.first_seen[i] {
                first = Some(first.map_or(seen, |f| f.min(seen)));
            }
            if let Some(seen) = self.last_seen[i] {
                last = Some(last.map_or(seen, |l| l.max(seen)));
            }
        }
        if entities.is_empty() {
            return Vec::new();
        }
        if entities.len() > MAX_LISTED_ENTITIES {
            let more = entities.len() - MAX_LISTED_ENTITIES;
            entities.truncate(MAX_LISTED_ENTITIES);
            entities.push(format!("... and {} more", more));
        }
        vec![DiagnosticFinding {
            template_id: self.template.id.clone(),
            template_name: self.template.name.clone(),
            title: self.template.name.clone(),
            severity: self.template.severity,
            report_key: ReportKey::Cpu,
            attribute_label: None,
            instances: entities,
            start: first.map(|t| t.timestamp_millis()),
            end: last.map(|t| t.timestamp_millis()),
            summary: "Exclusive affinity is enabled for one or more entities. Verify pinning side-effects and contention behavior.".to_string(),
        }]
    }
}
