// core/column.rs
// PDH counter-path decomposition: \\host\Object(Instance)\Counter

/// Projection of a raw column header. Derived on demand; the indexed file
/// keeps only the raw header strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedColumn {
    pub idx: usize,
    pub raw: String,
    pub object: String,
    pub instance: String,
    pub counter: String,
    pub attribute_label: String,
    pub unit: &'static str,
}

/// Break a header of the form `\\host\Object(Instance)\Counter` into its
/// parts. Headers that do not match the shape fall back to
/// `object="Other"`, `instance="Global"`, `counter=<raw>`.
pub fn parse_column(raw: &str, idx: usize) -> ParsedColumn {
    let fallback = |raw: &str| ParsedColumn {
        idx,
        raw: raw.to_string(),
        object: "Other".to_string(),
        instance: "Global".to_string(),
        counter: raw.to_string(),
        attribute_label: raw.to_string(),
        unit: infer_unit(raw),
    };

    if !raw.starts_with("\\\\") {
        return fallback(raw);
    }
    let parts: Vec<&str> = raw.split('\\').collect();
    if parts.len() < 5 {
        return fallback(raw);
    }

    let object_part = parts[3];
    let mut counter = parts[4..].join("\\");

    let mut object = match object_part.find('(') {
        Some(p) => &object_part[..p],
        None => object_part,
    }
    .to_string();

    let mut instance = "Global".to_string();
    if let Some(open) = object_part.find('(') {
        if let Some(close) = object_part.rfind(')') {
            if close > open {
                instance = object_part[open + 1..close].to_string();
            }
        }
    }

    if object.trim().is_empty() {
        object = "Other".to_string();
    }
    if counter.trim().is_empty() {
        counter = raw.to_string();
    }

    let attribute_label = format!("{}: {}", object, counter);
    let unit = infer_unit(&counter);
    ParsedColumn {
        idx,
        raw: raw.to_string(),
        object,
        instance,
        counter,
        attribute_label,
        unit,
    }
}

/// Unit hint from common counter-name patterns. Best-effort; unknown
/// counters carry no unit.
fn infer_unit(counter: &str) -> &'static str {
    let l = counter.to_ascii_lowercase();
    if l.contains('%') {
        "%"
    } else if l.contains("mbytes") {
        "MB"
    } else if l.contains("kbytes") {
        "KB"
    } else if l.contains("watts") {
        "W"
    } else if l.contains("mhz") {
        "MHz"
    } else if l.contains("/sec") {
        "/s"
    } else if l.contains("millisec") {
        "ms"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_counter_path() {
        let c = parse_column("\\\\esx01\\Vcpu(0:vm-web)\\% Ready", 3);
        assert_eq!(c.object, "Vcpu");
        assert_eq!(c.instance, "0:vm-web");
        assert_eq!(c.counter, "% Ready");
        assert_eq!(c.attribute_label, "Vcpu: % Ready");
        assert_eq!(c.unit, "%");
        assert_eq!(c.idx, 3);
    }

    #[test]
    fn test_no_instance_defaults_to_global() {
        let c = parse_column("\\\\esx01\\Memory\\MBytes Granted", 1);
        assert_eq!(c.object, "Memory");
        assert_eq!(c.instance, "Global");
        assert_eq!(c.counter, "MBytes Granted");
        assert_eq!(c.unit, "MB");
    }

    #[test]
    fn test_counter_with_embedded_backslash() {
        let c = parse_column("\\\\h\\Disk(naa.1)\\Reads\\Extended", 2);
        assert_eq!(c.counter, "Reads\\Extended");
    }

    #[test]
    fn test_non_pdh_header_falls_back() {
        let c = parse_column("plain column", 7);
        assert_eq!(c.object, "Other");
        assert_eq!(c.instance, "Global");
        assert_eq!(c.counter, "plain column");
        assert_eq!(c.attribute_label, "plain column");
    }

    #[test]
    fn test_too_few_segments_falls_back() {
        let c = parse_column("\\\\host\\Object", 0);
        assert_eq!(c.object, "Other");
        assert_eq!(c.counter, "\\\\host\\Object");
    }

    #[test]
    fn test_unit_inference() {
        assert_eq!(parse_column("\\\\h\\Power\\Watts", 0).unit, "W");
        assert_eq!(parse_column("\\\\h\\Cpu\\MHz Used", 0).unit, "MHz");
        assert_eq!(parse_column("\\\\h\\Net(n0)\\Packets/sec", 0).unit, "/s");
        assert_eq!(
            parse_column("\\\\h\\Disk(d0)\\Average Driver Millisec/Command", 0).unit,
            "ms"
        );
        assert_eq!(parse_column("\\\\h\\Mem\\KBytes Swapped", 0).unit, "KB");
        assert_eq!(parse_column("\\\\h\\Misc\\Count", 0).unit, "");
    }
}
