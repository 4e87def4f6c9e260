// core/values.rs
// Numeric and boolean cell decoding shared by the extractor and detectors.

/// Parse a scalar numeric cell. Empty and non-numeric cells yield `None`;
/// callers decide how non-finite values are treated.
pub fn parse_float_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Parse a multi-home cell: `delim`-separated numeric parts, at least two,
/// all finite. Anything else is not a multi-home value and falls back to
/// scalar handling.
pub fn parse_delimited_floats(s: &str, delim: char) -> Option<Vec<f64>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parts: Vec<&str> = s.split(delim).collect();
    if parts.len() < 2 {
        return None;
    }
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        let v = part.parse::<f64>().ok()?;
        if !v.is_finite() {
            return None;
        }
        out.push(v);
    }
    Some(out)
}

/// Boolean-like cell test: `true|1|yes|y`, case-insensitive, trimmed.
pub fn parse_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}
