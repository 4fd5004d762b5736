//! Log helpers that keep remote attribute values and raw serial lines on a single log line.
//! Calendar values always contain a newline, so they must be escaped before logging.

use std::fmt::Write;

const MAX_PREVIEW: usize = 200;

/// Escape a string for single-line logging.
///
/// Newlines, carriage returns, tabs and backslashes are written as their escape
/// sequences; other control characters become `\xNN`. Output is capped at
/// 200 characters followed by an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lossy preview of raw serial bytes (invalid UTF-8 replaced, then escaped).
pub fn preview_bytes(raw: &[u8]) -> String {
    escape_log(&String::from_utf8_lossy(raw))
}
