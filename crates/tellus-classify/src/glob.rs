//! Path globs over `/`-separated relative paths.
//!
//! - `*` matches within one segment, `?` one character of a segment
//! - `**` matches any number of segments (`**/x` also matches `x`)
//! - `[a-z]`, `[!0-9]` character classes, `{nc,grb}` alternation
//!
//! A pattern without `/` is tested against the file name as well as the
//! full path, so `*.nc` matches `output/a.nc`.

use std::fmt;

use regex::Regex;

use crate::{Error, Result};

#[derive(Clone)]
pub struct Glob {
    pattern:  String,
    regex:    Regex,
    basename: bool,
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("Glob").field(&self.pattern).finish() }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool { self.pattern == other.pattern }
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidGlob {
            pattern: pattern.to_owned(),
            reason,
        };
        let trimmed = pattern.trim_start_matches("./").trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let source = translate(trimmed).map_err(invalid)?;
        let regex = Regex::new(&source).map_err(|source| Error::InvalidRegex {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
            basename: !trimmed.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str { &self.pattern }

    pub fn is_match(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        if self.regex.is_match(path) {
            return true;
        }
        self.basename && path.rsplit('/').next().is_some_and(|name| self.regex.is_match(name))
    }
}

fn translate(pattern: &str) -> std::result::Result<String, &'static str> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    let mut depth = 0usize;
    let mut i = 0;

    out.push('^');
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                if chars.get(i + 1) == Some(&'/') {
                    i += 1;
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .enumerate()
                    .position(|(n, &c)| c == ']' && n > 0)
                    .ok_or("unclosed character class")?
                    + i
                    + 1;
                out.push('[');
                let mut body = &chars[i + 1..close];
                if let Some('!' | '^') = body.first() {
                    out.push('^');
                    body = &body[1..];
                }
                for &c in body {
                    if matches!(c, '\\' | '[' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push(']');
                i = close;
            }
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            ',' if depth > 0 => out.push('|'),
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }
    if depth > 0 {
        return Err("unclosed alternation");
    }
    out.push('$');
    Ok(out)
}
