// diagnostics/processors/mod.rs
// Row-processor capability: every detector variant compiles to one of
// these. Adding a detector type means adding a processor; existing
// processors are untouched.

mod affinity;
mod dominance;
mod imbalance;
mod threshold;

pub use affinity::AffinityProcessor;
pub use dominance::DominanceSwitchProcessor;
pub use imbalance::RangeImbalanceProcessor;
pub use threshold::ThresholdProcessor;

use crate::finding::DiagnosticFinding;
use chrono::{DateTime, Utc};

/// Ingests `(timestamp, record)` tuples during the single streaming pass
/// and emits findings once the pass completes.
pub trait RowProcessor: Send {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &[String]);
    fn finalize(&mut self) -> Vec<DiagnosticFinding>;
}

/// Fetch and parse a finite numeric cell, if present.
pub(crate) fn finite_cell(record: &[String], idx: usize) -> Option<f64> {
    record
        .get(idx)
        .and_then(|raw| esx_core::parse_float_value(raw))
        .filter(|v| v.is_finite())
}
