//! Text normalisation applied before any extraction strategy.

/// Characters removed outright.
const ZERO_WIDTH: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

const CURLY_DOUBLE: &[char] = &['\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}', '\u{2033}'];
const CURLY_SINGLE: &[char] = &['\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}', '\u{2032}'];

/// Strips zero-width characters, normalises line endings to `\n`, and
/// replaces curly quotes with straight ones.
///
/// A curly double quote inside a string that was opened by a straight quote
/// is escaped, so prose quotations inside otherwise valid JSON stay valid.
#[must_use]
pub fn preprocess(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // Some(true) = inside a string opened by a straight quote,
    // Some(false) = inside a string opened by a curly quote.
    let mut string_opened_by: Option<bool> = None;
    let mut escaped = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if ZERO_WIDTH.contains(&c) {
            continue;
        }
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
            escaped = false;
            continue;
        }

        if escaped {
            escaped = false;
            out.push(if CURLY_SINGLE.contains(&c) { '\'' } else { c });
            continue;
        }

        match c {
            '\\' if string_opened_by.is_some() => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                string_opened_by = match string_opened_by {
                    None => Some(true),
                    Some(_) => None,
                };
                out.push('"');
            }
            c if CURLY_DOUBLE.contains(&c) => match string_opened_by {
                Some(true) => out.push_str("\\\""),
                Some(false) => {
                    string_opened_by = None;
                    out.push('"');
                }
                None => {
                    string_opened_by = Some(false);
                    out.push('"');
                }
            },
            c if CURLY_SINGLE.contains(&c) => out.push('\''),
            c => out.push(c),
        }
    }

    out
}
