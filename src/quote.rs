//! Quoted string literals.
//!
//! Two quoting styles are recognized: double quotes with backslash escapes,
//! and backticks holding raw text. The same rules apply to quoted values
//! found inside log lines and to string tokens in pipeline text.

/// If `s` starts with a quoted literal, returns its unquoted value and the
/// byte length of the quoted span.
pub fn try_unquote_string(s: &str) -> Option<(String, usize)> {
    match s.as_bytes().first() {
        Some(b'"') => unquote_double(s),
        Some(b'`') => unquote_backtick(s),
        _ => None,
    }
}

fn unquote_backtick(s: &str) -> Option<(String, usize)> {
    let body = &s[1..];
    let end = body.find('`')?;
    let value: String = body[..end].chars().filter(|&c| c != '\r').collect();
    Some((value, end + 2))
}

fn unquote_double(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let value = String::from_utf8(out).ok()?;
                return Some((value, i + 1));
            }
            b'\n' => return None,
            b'\\' => {
                let esc = *bytes.get(i + 1)?;
                i += 2;
                match esc {
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'v' => out.push(0x0b),
                    b'\\' => out.push(b'\\'),
                    b'"' => out.push(b'"'),
                    b'x' => {
                        let v = parse_radix(bytes.get(i..i + 2)?, 16)?;
                        out.push(v as u8);
                        i += 2;
                    }
                    b'0'..=b'7' => {
                        let v = parse_radix(bytes.get(i - 1..i + 2)?, 8)?;
                        if v > 0xff {
                            return None;
                        }
                        out.push(v as u8);
                        i += 2;
                    }
                    b'u' | b'U' => {
                        let n = if esc == b'u' { 4 } else { 8 };
                        let v = parse_radix(bytes.get(i..i + n)?, 16)?;
                        let c = char::from_u32(v)?;
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        i += n;
                    }
                    _ => return None,
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    None
}

fn parse_radix(digits: &[u8], radix: u32) -> Option<u32> {
    digits.iter().try_fold(0u32, |acc, &d| {
        let v = (d as char).to_digit(radix)?;
        Some(acc * radix + v)
    })
}

/// Renders `s` bare when it is a plain word, or double-quoted otherwise.
pub fn quote_token_if_needed(s: &str) -> String {
    if is_plain_token(s) {
        return s.to_string();
    }
    quote_string(s)
}

/// Always renders `s` as a double-quoted literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub(crate) fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '/')
}

fn is_plain_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_char) && !is_reserved_keyword(s)
}

fn is_reserved_keyword(s: &str) -> bool {
    ["extract", "fields", "count"]
        .iter()
        .any(|k| s.eq_ignore_ascii_case(k))
}
