//! Date tokens embedded in file names, described by strftime-style formats.

use std::fmt;

use chrono::NaiveDate;
use regex::Regex;

use crate::{Error, Result};

/// A strftime-style date format plus the regex that locates it in a name.
///
/// Formats without a day (`%Y`, `%Y%m`) parse to the first day of the
/// period they name.
#[derive(Clone)]
pub struct DateFormat {
    format: String,
    finder: Regex,
}

impl fmt::Debug for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("DateFormat").field(&self.format).finish() }
}

impl PartialEq for DateFormat {
    fn eq(&self, other: &Self) -> bool { self.format == other.format }
}

impl DateFormat {
    pub fn new(format: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidDateFormat {
            format: format.to_owned(),
            reason,
        };

        let mut body = String::new();
        let mut has_year = false;
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                body.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
                continue;
            }
            let directive = chars.next().ok_or_else(|| invalid("dangling '%'".into()))?;
            let piece = match directive {
                'Y' => {
                    has_year = true;
                    r"\d{4}"
                }
                'y' => {
                    has_year = true;
                    r"\d{2}"
                }
                'm' => r"(?:0[1-9]|1[0-2])",
                'd' => r"(?:0[1-9]|[12]\d|3[01])",
                'j' => r"\d{3}",
                'H' | 'M' | 'S' => r"\d{2}",
                'b' => r"[A-Za-z]{3}",
                '%' => "%",
                other => return Err(invalid(format!("unsupported directive '%{other}'"))),
            };
            body.push_str(piece);
        }
        if !has_year {
            return Err(invalid("format must contain a year".into()));
        }

        let finder = Regex::new(&format!(r"(?:^|[^0-9])({body})(?:[^0-9]|$)")).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            format: format.to_owned(),
            finder,
        })
    }

    pub fn as_str(&self) -> &str { &self.format }

    /// Parse `text` that is exactly one date in this format.
    pub fn parse(&self, text: &str) -> Option<NaiveDate> {
        let mut format = self.format.clone();
        let mut text = text.to_owned();
        let has = |d: &str| self.format.contains(d);

        if !has("%j") {
            if !has("%d") {
                format.push_str("|%d");
                text.push_str("|01");
            }
            if !has("%m") && !has("%b") {
                format.push_str("|%m");
                text.push_str("|01");
            }
        }
        NaiveDate::parse_from_str(&text, &format).ok()
    }

    /// The first date in `text` written in this format.
    pub fn find(&self, text: &str) -> Option<NaiveDate> {
        self.finder
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| self.parse(m.as_str()))
    }

    /// Render `date` in this format.
    pub fn render(&self, date: NaiveDate) -> String { date.format(&self.format).to_string() }
}
