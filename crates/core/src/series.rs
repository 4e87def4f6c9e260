// core/series.rs
// Range-restricted series extraction with decimation and multi-home fan-out.

use crate::csvline::decode_line;
use crate::datafile::DataFile;
use crate::error::CoreError;
use crate::timeparse::parse_time_value;
use crate::values::{parse_delimited_floats, parse_float_value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

const READ_BUFFER: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct SeriesPayload {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesResponse {
    pub times: Vec<i64>,
    pub series: Vec<SeriesPayload>,
    pub start: i64,
    pub end: i64,
    pub rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stream the rows of `df` inside `[start, end]` (inclusive, `None` =
/// unbounded) and decode the requested columns. When `max_points > 0`, rows
/// are decimated by a uniform step derived from the index estimate. Cells
/// holding `/`-separated numeric vectors fan out into sibling
/// `<base> [home N]` series; series with no finite sample are dropped.
pub fn extract_series(
    df: &DataFile,
    cols: &[usize],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    max_points: u64,
) -> Result<SeriesResponse, CoreError> {
    let mut resp = SeriesResponse::default();
    // One entry per requested column, listing the response series its homes
    // land in. Starts as a single scalar target and grows lazily when a
    // multi-home cell shows up.
    let mut series_map: Vec<Vec<usize>> = Vec::with_capacity(cols.len());
    let mut valid_counts: Vec<u64> = Vec::with_capacity(cols.len());
    for &idx in cols {
        let name = df.columns.get(idx).cloned().unwrap_or_default();
        resp.series.push(SeriesPayload {
            name,
            values: Vec::new(),
        });
        series_map.push(vec![resp.series.len() - 1]);
        valid_counts.push(0);
    }

    let estimated = df.estimate_rows(start, end);
    let mut step: u64 = 1;
    if max_points > 0 && estimated > max_points {
        step = (estimated / max_points).max(1);
    }

    let mut file = File::open(&df.path)?;
    let (start_offset, start_row) = df.find_offset(start);
    file.seek(SeekFrom::Start(start_offset))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);

    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut row = start_row;
    // Decimation is anchored at the first row inside the window, so that
    // row is always emitted regardless of how the seek row aligns with the
    // step.
    let mut anchor_row: Option<u64> = None;
    let mut kept: u64 = 0;
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
        let timestamp = match parse_time_value(field) {
            Ok((ts, _)) => ts,
            Err(_) => {
                row += 1;
                continue;
            }
        };

        if let Some(start) = start {
            if timestamp < start {
                row += 1;
                continue;
            }
        }
        if let Some(end) = end {
            if timestamp > end {
                break;
            }
        }

        let anchor = *anchor_row.get_or_insert(row);
        if (row - anchor) % step == 0 {
            resp.times.push(timestamp.timestamp_millis());
            let current_pos = resp.times.len() - 1;
            for payload in &mut resp.series {
                payload.values.push(0.0);
            }

            for (i, &idx) in cols.iter().enumerate() {
                let raw = match record.get(idx) {
                    Some(raw) => raw,
                    None => continue,
                };
                if let Some(values) = parse_delimited_floats(raw, '/') {
                    emit_multi_home(
                        &mut resp.series,
                        &mut series_map[i],
                        &mut valid_counts,
                        idx,
                        current_pos,
                        &values,
                    );
                    continue;
                }
                if let Some(v) = parse_float_value(raw) {
                    if v.is_finite() {
                        let target = series_map[i][0];
                        resp.series[target].values[current_pos] = v;
                        valid_counts[target] += 1;
                    }
                }
            }
            kept += 1;
        }

        row += 1;
    }

    if let (Some(&first), Some(&last)) = (resp.times.first(), resp.times.last()) {
        resp.start = first;
        resp.end = last;
    }

    // Drop series that never produced a finite sample.
    let all = std::mem::take(&mut resp.series);
    let mut filtered = Vec::with_capacity(all.len());
    for (i, payload) in all.into_iter().enumerate() {
        if valid_counts.get(i).copied().unwrap_or(0) > 0 {
            filtered.push(payload);
        }
    }
    resp.series = filtered;
    resp.rows = kept;
    Ok(resp)
}

/// Write one multi-home cell into its sibling series, growing the sibling
/// set on first sight of a wider vector. Newly created series are
/// zero-backfilled up to the current row slot.
fn emit_multi_home(
    series: &mut Vec<SeriesPayload>,
    targets: &mut Vec<usize>,
    valid_counts: &mut Vec<u64>,
    col_idx: usize,
    current_pos: usize,
    values: &[f64],
) {
    if targets.len() == 1 && values.len() > 1 {
        let first = &mut series[targets[0]];
        first.name = format!("{} [home 1]", first.name);
    }
    while targets.len() < values.len() {
        let next_home = targets.len() + 1;
        let base = {
            let name = &series[targets[0]].name;
            match name.rfind(" [home ") {
                Some(p) if p > 0 => &name[..p],
                _ => name.as_str(),
            }
        };
        let name = if base.is_empty() {
            format!("col_{} [home {}]", col_idx, next_home)
        } else {
            format!("{} [home {}]", base, next_home)
        };
        series.push(SeriesPayload {
            name,
            values: vec![0.0; current_pos + 1],
        });
        targets.push(series.len() - 1);
        valid_counts.push(0);
    }
    for (vi, &val) in values.iter().enumerate() {
        let target = targets[vi];
        series[target].values[current_pos] = val;
        valid_counts[target] += 1;
    }
}
