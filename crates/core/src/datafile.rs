// core/datafile.rs
// Immutable descriptor of an indexed CSV file plus seek helpers.

use crate::timeparse::TimeLayout;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Every `INDEX_STRIDE`-th row gets an index entry, so the index holds
/// roughly rows/1000 + 1 entries: O(log n) seek, bounded re-scan after.
pub const INDEX_STRIDE: u64 = 1000;

/// Points at the start byte of `row` in the source file. Rows are
/// monotonically time-ordered, so entries are non-decreasing in row,
/// offset and timestamp alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub row: u64,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
}

/// Descriptor produced by one indexing pass. Immutable after construction;
/// concurrent readers each open their own descriptor against `path`.
#[derive(Debug, Clone)]
pub struct DataFile {
    pub path: PathBuf,
    /// Display name: upload filename, URL basename, or the path itself.
    pub label: String,
    /// True when this process created the backing file and owns deletion.
    pub owned_temp: bool,
    /// Ordered headers; `columns[0]` is always normalized to `"Time"`.
    pub columns: Vec<String>,
    pub index: Vec<IndexEntry>,
    /// Total data rows, header excluded.
    pub rows: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Byte offset of the first data row.
    pub data_start_offset: u64,
    /// First layout that successfully parsed a row timestamp.
    pub time_layout: TimeLayout,
}

impl DataFile {
    /// Seek target for a window starting at `start`: the byte offset and row
    /// number of the last index entry strictly before `start`. Guarantees no
    /// window row is skipped, at the cost of re-scanning at most
    /// `INDEX_STRIDE - 1` rows.
    pub fn find_offset(&self, start: Option<DateTime<Utc>>) -> (u64, u64) {
        let start = match start {
            Some(t) if !self.index.is_empty() => t,
            _ => return (self.data_start_offset, 1),
        };
        let idx = self.index.partition_point(|e| e.timestamp < start);
        if idx == 0 {
            return (self.data_start_offset, 1);
        }
        let entry = &self.index[idx - 1];
        (entry.offset, entry.row)
    }

    /// Index-based estimate of how many rows fall in the window. Short
    /// indexes and fully unbounded requests estimate the whole file.
    pub fn estimate_rows(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> u64 {
        if self.index.len() < 2 || (start.is_none() && end.is_none()) {
            return self.rows;
        }

        let row_at = |bound: DateTime<Utc>, default: u64| {
            let idx = self.index.partition_point(|e| e.timestamp < bound);
            if idx > 0 {
                self.index[idx - 1].row
            } else {
                default
            }
        };

        let start_row = start.map(|t| row_at(t, 1)).unwrap_or(1);
        let end_row = end.map(|t| row_at(t, self.rows)).unwrap_or(self.rows);
        if end_row < start_row {
            return 0;
        }
        end_row - start_row + 1
    }
}
