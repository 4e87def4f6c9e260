// diagnostics/filter.rs
// Column eligibility predicates: structured filters plus the include /
// exclude shorthand lists. Everything matches case-insensitively.

use crate::template::{TemplateCondition, TemplateFilter};
use esx_core::ParsedColumn;
use regex::RegexBuilder;

fn compile_fold(pattern: &str) -> Option<regex::Regex> {
    RegexBuilder::new(pattern.trim())
        .case_insensitive(true)
        .build()
        .ok()
}

pub fn evaluate_condition(col: &ParsedColumn, cond: &TemplateCondition) -> bool {
    let target = match cond.field.trim().to_ascii_lowercase().as_str() {
        "object" => &col.object,
        "attribute" | "attributelabel" => &col.attribute_label,
        "instance" => &col.instance,
        "counter" => &col.counter,
        "raw" => &col.raw,
        _ => return false,
    };
    let target_fold = target.trim().to_ascii_lowercase();
    let value_fold = cond.value.trim().to_ascii_lowercase();

    match cond.op.trim().to_ascii_lowercase().as_str() {
        "eq" | "=" => target_fold == value_fold,
        "neq" | "!=" => target_fold != value_fold,
        "contains" => target_fold.contains(&value_fold),
        "not_contains" => !target_fold.contains(&value_fold),
        "regex" => compile_fold(&cond.value)
            .map(|re| re.is_match(target))
            .unwrap_or(false),
        "not_regex" => compile_fold(&cond.value)
            .map(|re| !re.is_match(target))
            .unwrap_or(false),
        "prefix" | "starts_with" => target_fold.starts_with(&value_fold),
        "suffix" | "ends_with" => target_fold.ends_with(&value_fold),
        _ => false,
    }
}

/// Empty condition lists match everything; `logic` defaults to `and`.
pub fn matches_filter(col: &ParsedColumn, filter: &TemplateFilter) -> bool {
    if filter.conditions.is_empty() {
        return true;
    }
    if filter.logic.trim().eq_ignore_ascii_case("or") {
        filter.conditions.iter().any(|c| evaluate_condition(col, c))
    } else {
        filter.conditions.iter().all(|c| evaluate_condition(col, c))
    }
}

pub fn contains_any_fold(s: &str, subs: &[&str]) -> bool {
    let s = s.to_ascii_lowercase();
    subs.iter()
        .any(|sub| s.contains(&sub.to_ascii_lowercase()))
}

pub fn excluded_by_name(name: &str, excludes: &[String]) -> bool {
    let n = name.to_ascii_lowercase();
    excludes.iter().any(|ex| {
        let ex = ex.trim().to_ascii_lowercase();
        !ex.is_empty() && n.contains(&ex)
    })
}

/// Patterns that fail to compile are ignored rather than matched.
pub fn excluded_by_regex(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        let p = p.trim();
        !p.is_empty()
            && compile_fold(p)
                .map(|re| re.is_match(name))
                .unwrap_or(false)
    })
}

pub fn matches_included_attribute(label: &str, includes: &[String]) -> bool {
    if includes.is_empty() {
        return true;
    }
    includes
        .iter()
        .any(|inc| inc.trim().eq_ignore_ascii_case(label.trim()))
}

pub fn matches_included_object(object: &str, includes: &[String]) -> bool {
    if includes.is_empty() {
        return true;
    }
    includes
        .iter()
        .any(|inc| inc.trim().eq_ignore_ascii_case(object.trim()))
}
