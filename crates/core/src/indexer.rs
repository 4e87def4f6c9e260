// core/indexer.rs
// Single-pass sparse indexer: header, stride index, row count, time range.

use crate::csvline::decode_line;
use crate::datafile::{DataFile, IndexEntry, INDEX_STRIDE};
use crate::error::CoreError;
use crate::timeparse::{parse_time_value, TIME_LAYOUTS};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const READ_BUFFER: usize = 4 * 1024 * 1024;

/// Scan `path` once, recording byte offsets and timestamps at every
/// `INDEX_STRIDE`-th row. Only the timestamp field of each row is examined;
/// the cost is line splitting and offset accounting. Rows that fail CSV
/// decoding or timestamp parsing still advance the offset, and decodable
/// rows keep their physical row number even when the timestamp is bad.
pub fn build_index(path: &Path) -> Result<DataFile, CoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);

    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut offset: u64 = 0;

    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(CoreError::EmptyFile);
    }
    offset += n as u64;
    let mut columns = decode_line(&line).ok_or(CoreError::HeaderMalformed)?;
    if columns.is_empty() {
        return Err(CoreError::EmptyHeader);
    }
    columns[0] = "Time".to_string();

    let mut df = DataFile {
        path: path.to_path_buf(),
        label: path.display().to_string(),
        owned_temp: false,
        columns,
        index: Vec::with_capacity(1024),
        rows: 0,
        start_time: None,
        end_time: None,
        data_start_offset: offset,
        time_layout: TIME_LAYOUTS[0],
    };

    let mut layout_seen = false;
    let mut row: u64 = 0;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }

        let record = match decode_line(&line) {
            Some(record) => record,
            None => {
                offset += n as u64;
                continue;
            }
        };

        row += 1;
        let field = record.first().map(String::as_str).unwrap_or("");
        match parse_time_value(field) {
            Ok((timestamp, layout)) => {
                if !layout_seen {
                    df.time_layout = layout;
                    layout_seen = true;
                }
                if row == 1 {
                    df.start_time = Some(timestamp);
                }
                df.end_time = Some(timestamp);
                if row == 1 || row % INDEX_STRIDE == 0 {
                    df.index.push(IndexEntry {
                        row,
                        offset,
                        timestamp,
                    });
                }
            }
            Err(_) => {
                // Bad timestamp: the row still counts so row numbering
                // tracks physical line position.
            }
        }
        offset += n as u64;
    }

    df.rows = row;
    tracing::info!(
        rows = df.rows,
        index_entries = df.index.len(),
        layout = df.time_layout.as_str(),
        "indexed {}",
        df.label
    );
    Ok(df)
}
