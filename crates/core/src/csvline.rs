// core/csvline.rs
// Decode one logical CSV record from an already-delimited byte line.

use csv::ReaderBuilder;

/// Decode a single record from one raw line. Trailing `\r`/`\n` are
/// stripped; quoted fields and stray quotes are tolerated; records may have
/// any field count. Returns `None` for blank lines or lines the CSV reader
/// cannot make a record out of, and callers skip those rows.
pub fn decode_line(line: &[u8]) -> Option<Vec<String>> {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    let trimmed = &line[..end];
    if trimmed.is_empty() {
        return None;
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .double_quote(true)
        .from_reader(trimmed);

    let mut record = csv::ByteRecord::new();
    match reader.read_byte_record(&mut record) {
        Ok(true) if !record.is_empty() => Some(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        ),
        _ => None,
    }
}
