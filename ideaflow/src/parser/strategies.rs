//! Extraction strategies.
//!
//! Each strategy is a pure function from preprocessed text to a candidate
//! value. The cascade in [`super::RecoveryParser`] validates candidates and
//! moves on when a strategy returns `None` or an unusable value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

use super::is_structurally_valid;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+\-]*[ \t]*\n?([\s\S]*?)```").expect("valid regex"));

static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

static UNQUOTED_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([{,]\s*)([A-Za-z_$][A-Za-z0-9_$\-]*)(\s*:)"#).expect("valid regex")
});

static PY_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([:\[,]\s*)(True|False|None)\b").expect("valid regex"));

static KEY_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:[-*]\s+)?["']?([A-Za-z_][A-Za-z0-9_\-]*)["']?\s*[:=]\s*(.+?)\s*,?\s*$"#)
        .expect("valid regex")
});

/// How many comma boundaries smart repair backs off through.
const MAX_REPAIR_BACKOFF: usize = 8;

/// Strategy 1: the whole text is already valid JSON.
pub fn direct(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Strategy 2: the first fenced code block whose body starts with `{` or `[`.
pub fn fenced_block(text: &str) -> Option<Value> {
    fenced_candidate(text).and_then(|body| serde_json::from_str(body).ok())
}

/// Strategy 3: the span from the first opening bracket to the last closing
/// bracket of the same kind, object spans first.
pub fn bracket_span(text: &str) -> Option<Value> {
    outer_spans(text).into_iter().find_map(|span| {
        serde_json::from_str(span)
            .ok()
            .filter(is_structurally_valid)
    })
}

/// Strategy 4: syntactic clean-up of the most likely candidate.
///
/// Removes trailing commas, quotes bare keys, maps Python literals and, when
/// the text has no double quotes at all, swaps single quotes for double ones.
/// String contents are left untouched.
pub fn fuzzy_repair(text: &str) -> Option<Value> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(body) = fenced_candidate(text) {
        candidates.push(body);
    }
    candidates.extend(outer_spans(text));
    candidates.push(text.trim());

    candidates.into_iter().find_map(|candidate| {
        serde_json::from_str(&repair_syntax(candidate))
            .ok()
            .filter(is_structurally_valid)
    })
}

/// Strategy 5: structural repair of truncated or padded output.
///
/// Drops everything before the first opening bracket and after the first
/// complete top-level value, closes an unterminated string, removes a
/// dangling separator and appends the missing closing brackets. If that does
/// not parse, backs off to earlier comma boundaries. When nothing parses
/// from the first opening bracket, the first bracket of the other kind is
/// tried.
pub fn smart_repair(text: &str) -> Option<Value> {
    let mut starts: Vec<usize> = [text.find('{'), text.find('[')].into_iter().flatten().collect();
    starts.sort_unstable();
    starts
        .into_iter()
        .find_map(|start| repair_from(&text[start..]))
}

fn repair_from(body: &str) -> Option<Value> {
    let scan = scan_structure(body);

    if let Some(end) = scan.complete_end {
        return serde_json::from_str(&repair_syntax(&body[..end])).ok();
    }

    if let Some(value) = close_and_parse(body) {
        return Some(value);
    }
    scan.commas
        .iter()
        .rev()
        .take(MAX_REPAIR_BACKOFF)
        .find_map(|&pos| close_and_parse(&body[..pos]))
}

/// Strategy 6: `key: value` lines with scalar type inference.
pub fn key_value_lines(text: &str) -> Option<Value> {
    let mut map = Map::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("```") {
            continue;
        }
        if let Some(caps) = KEY_VALUE_RE.captures(trimmed) {
            let key = caps[1].to_string();
            let value = infer_scalar(&caps[2]);
            map.insert(key, value);
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn fenced_candidate(text: &str) -> Option<&str> {
    FENCE_RE.captures_iter(text).find_map(|caps| {
        let body = caps.get(1)?.as_str().trim();
        (body.starts_with('{') || body.starts_with('[')).then_some(body)
    })
}

/// Candidate bracket spans, object span first.
///
/// When one span encloses the other only the outer one is returned, so a
/// nested value cannot stand in for its container. Disjoint spans, such as
/// a `[1]` citation before the payload, are both returned.
fn outer_spans(text: &str) -> Vec<&str> {
    let object = span_range(text, '{', '}');
    let array = span_range(text, '[', ']');
    let ranges = match (object, array) {
        (Some(o), Some(a)) if a.0 < o.0 && a.1 >= o.1 => vec![a],
        (Some(o), Some(a)) if o.0 < a.0 && o.1 >= a.1 => vec![o],
        (Some(o), Some(a)) => vec![o, a],
        (o, a) => o.into_iter().chain(a).collect(),
    };
    ranges.into_iter().map(|(start, end)| &text[start..end]).collect()
}

/// Byte range from the first `open` to just past the last `close`.
fn span_range(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then_some((start, end + close.len_utf8()))
}

fn repair_syntax(candidate: &str) -> String {
    let source = if !candidate.contains('"') && candidate.contains('\'') {
        candidate.replace('\'', "\"")
    } else {
        candidate.to_string()
    };

    let mut fixed = String::with_capacity(source.len());
    let mut code_start = 0;
    for (start, end) in string_ranges(&source) {
        fixed.push_str(&repair_code(&source[code_start..start]));
        fixed.push_str(&source[start..end]);
        code_start = end;
    }
    fixed.push_str(&repair_code(&source[code_start..]));
    fixed
}

/// Rewrites a run of text that lies outside any string literal.
fn repair_code(code: &str) -> String {
    let fixed = TRAILING_COMMA_RE.replace_all(code, "$1");
    let fixed = UNQUOTED_KEY_RE.replace_all(&fixed, "$1\"$2\"$3");
    PY_LITERAL_RE
        .replace_all(&fixed, |caps: &regex::Captures<'_>| {
            let literal = match &caps[2] {
                "True" => "true",
                "False" => "false",
                _ => "null",
            };
            format!("{}{literal}", &caps[1])
        })
        .into_owned()
}

/// Byte ranges of double-quoted strings, quotes included. An unterminated
/// string runs to the end of the text.
fn string_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        match open {
            Some(start) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    ranges.push((start, i + 1));
                    open = None;
                }
            }
            None if c == '"' => open = Some(i),
            None => {}
        }
    }
    if let Some(start) = open {
        ranges.push((start, text.len()));
    }
    ranges
}

#[derive(Debug, Default)]
struct StructureScan {
    /// Byte offset just past the first complete top-level value.
    complete_end: Option<usize>,
    /// Byte offsets of commas outside strings.
    commas: Vec<usize>,
    /// Unclosed brackets, innermost last.
    stack: Vec<char>,
    in_string: bool,
}

fn scan_structure(text: &str) -> StructureScan {
    let mut scan = StructureScan::default();
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if scan.in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                scan.in_string = false;
            }
            continue;
        }
        match c {
            '"' => scan.in_string = true,
            '{' | '[' => scan.stack.push(c),
            '}' | ']' => {
                scan.stack.pop();
                if scan.stack.is_empty() {
                    scan.complete_end = Some(i + 1);
                    return scan;
                }
            }
            ',' => scan.commas.push(i),
            _ => {}
        }
    }
    scan
}

fn close_and_parse(prefix: &str) -> Option<Value> {
    let scan = scan_structure(prefix);
    let mut repaired = prefix.to_string();
    if scan.in_string {
        repaired.push('"');
    }

    loop {
        let trimmed_len = repaired.trim_end().len();
        repaired.truncate(trimmed_len);
        if repaired.ends_with(',') || repaired.ends_with(':') {
            repaired.pop();
        } else {
            break;
        }
    }
    if scan.stack.last() == Some(&'{') {
        strip_dangling_key(&mut repaired);
    }

    for open in scan.stack.iter().rev() {
        repaired.push(if *open == '{' { '}' } else { ']' });
    }
    serde_json::from_str(&repair_syntax(&repaired)).ok()
}

/// Removes a trailing `"key"` that has no value yet, as in `{"a": 1, "b"`.
fn strip_dangling_key(text: &mut String) {
    if !text.ends_with('"') {
        return;
    }
    let without_close = &text[..text.len() - 1];
    let Some(open) = without_close.rfind('"') else {
        return;
    };
    let before = text[..open].trim_end();
    if before.ends_with(',') || before.ends_with('{') {
        let keep = before.trim_end_matches(',').len();
        text.truncate(keep);
    }
}

fn infer_scalar(raw: &str) -> Value {
    let trimmed = raw.trim().trim_end_matches(',').trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    if let Some(s) = unquoted {
        return Value::String(s.to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        "null" | "none" | "nil" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(trimmed.to_string())
}
