//! Escape decoding applied before path segments are inspected.
//!
//! Handles percent-encoding (`%2e`, `%u002e`), backslash escapes (`.`,
//! `\u{2e}`, `\x2e`), numeric HTML entities (`&#46;`, `&#x2e;`) and
//! Unicode lookalikes of `.`, `/` and `\`. Decoding repeats until the
//! string stops changing so that double encoding cannot hide a traversal.

use super::ViolationKind;

const MAX_ROUNDS: usize = 4;

pub(super) fn decode_fully(raw: &str) -> Result<String, ViolationKind> {
    let mut current = raw.to_owned();
    for _ in 0..MAX_ROUNDS {
        let next = decode_once(&current)?;
        if next == current {
            return Ok(next);
        }
        current = next;
    }
    // Still changing after the last round: refuse rather than guess.
    if decode_once(&current)? == current {
        Ok(current)
    } else {
        Err(ViolationKind::Encoding("escape nesting too deep"))
    }
}

fn decode_once(input: &str) -> Result<String, ViolationKind> {
    let chars: Vec<char> = input.chars().collect();
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let decoded = match c {
            '%' => percent_escape(&chars[i + 1..]),
            '\\' => backslash_escape(&chars[i + 1..]),
            '&' => entity_escape(&chars[i + 1..]),
            _ => None,
        };

        match decoded {
            Some((Escaped::Byte(b), consumed)) => {
                bytes.push(b);
                i += 1 + consumed;
            }
            Some((Escaped::Char(ch), consumed)) => {
                push_char(&mut bytes, fold_lookalike(ch));
                i += 1 + consumed;
            }
            None => {
                push_char(&mut bytes, fold_lookalike(c));
                i += 1;
            }
        }
    }

    String::from_utf8(bytes).map_err(|_| ViolationKind::Encoding("invalid UTF-8 after decoding"))
}

enum Escaped {
    Byte(u8),
    Char(char),
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn hex_value(digits: &[char]) -> Option<u32> {
    if digits.is_empty() || !digits.iter().all(char::is_ascii_hexdigit) {
        return None;
    }
    let text: String = digits.iter().collect();
    u32::from_str_radix(&text, 16).ok()
}

fn as_char(value: u32) -> Option<Escaped> { char::from_u32(value).map(Escaped::Char) }

fn percent_escape(rest: &[char]) -> Option<(Escaped, usize)> {
    if matches!(rest.first(), Some('u' | 'U')) && rest.len() >= 5 {
        let value = hex_value(&rest[1..5])?;
        return Some((as_char(value)?, 5));
    }
    if rest.len() >= 2 {
        let value = hex_value(&rest[..2])?;
        return Some((Escaped::Byte(value as u8), 2));
    }
    None
}

fn backslash_escape(rest: &[char]) -> Option<(Escaped, usize)> {
    match rest.first()? {
        'u' if rest.get(1) == Some(&'{') => {
            let close = rest.iter().position(|&c| c == '}')?;
            let value = hex_value(&rest[2..close])?;
            Some((as_char(value)?, close + 1))
        }
        'u' if rest.len() >= 5 => {
            let value = hex_value(&rest[1..5])?;
            Some((as_char(value)?, 5))
        }
        'U' if rest.len() >= 9 => {
            let value = hex_value(&rest[1..9])?;
            Some((as_char(value)?, 9))
        }
        'x' if rest.len() >= 3 => {
            let value = hex_value(&rest[1..3])?;
            Some((as_char(value)?, 3))
        }
        _ => None,
    }
}

fn entity_escape(rest: &[char]) -> Option<(Escaped, usize)> {
    if rest.first() != Some(&'#') {
        return None;
    }
    let close = rest.iter().take(12).position(|&c| c == ';')?;
    let body = &rest[1..close];
    let value = match body.first() {
        Some('x' | 'X') => hex_value(&body[1..])?,
        _ => {
            if body.is_empty() || !body.iter().all(char::is_ascii_digit) {
                return None;
            }
            body.iter().collect::<String>().parse().ok()?
        }
    };
    Some((as_char(value)?, close + 1))
}

/// Map characters that some platforms or tools normalize into `.`, `/` or `\`.
fn fold_lookalike(c: char) -> char {
    match c {
        '\u{FF0E}' | '\u{2024}' | '\u{FE52}' | '\u{3002}' => '.',
        '\u{FF0F}' | '\u{2215}' | '\u{2044}' | '\u{29F8}' => '/',
        '\u{FF3C}' | '\u{FE68}' | '\u{29F9}' | '\u{2216}' => '\\',
        _ => c,
    }
}
