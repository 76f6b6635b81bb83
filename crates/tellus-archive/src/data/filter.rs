use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tellus_classify::{ContentType, DateFormat, Glob, Importance};

use super::record::FileRecord;
use crate::{Error, Result};

/// Requested date: one value or an inclusive range, written in the
/// filter's date format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateSelector {
    On(String),
    Range { start: String, end: String },
}

impl DateSelector {
    /// `"20240101"` selects one date, `"20240101:20240331"` a range.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.split_once(':') {
            Some((start, end)) => {
                let (start, end) = (start.trim(), end.trim());
                if start.is_empty() || end.is_empty() {
                    return Err(Error::Validation(format!("incomplete date range '{text}'")));
                }
                Ok(Self::Range {
                    start: start.to_owned(),
                    end:   end.to_owned(),
                })
            }
            None if text.is_empty() => Err(Error::Validation("empty date".into())),
            None => Ok(Self::On(text.to_owned())),
        }
    }

    /// Parse the bounds with `format` into an inclusive span of dates.
    fn span(&self, format: &DateFormat) -> Result<DateSpan> {
        let parse = |text: &str| {
            format
                .parse(text)
                .ok_or_else(|| Error::Validation(format!("'{text}' is not a date in format '{}'", format.as_str())))
        };
        let (start, end) = match self {
            Self::On(date) => {
                let date = parse(date)?;
                (date, date)
            }
            Self::Range { start, end } => (parse(start)?, parse(end)?),
        };
        if start > end {
            return Err(Error::Validation(format!("date range {start}..{end} ends before it starts")));
        }
        Ok(DateSpan { start, end })
    }
}

/// Inclusive bounds, at the granularity of the filter's format.
#[derive(Clone, Copy, Debug)]
struct DateSpan {
    start: NaiveDate,
    end:   NaiveDate,
}

/// Selects FileRecords for extraction. Every predicate is AND-combined and
/// an empty predicate matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFilter {
    /// Globs on the record path; a record matches if any matches.
    #[serde(default)]
    pub patterns:      Vec<String>,
    /// Globs that remove records matched by `patterns`.
    #[serde(default)]
    pub exclude:       Vec<String>,
    #[serde(default)]
    pub content_types: BTreeSet<ContentType>,
    #[serde(default)]
    pub importance:    BTreeSet<Importance>,
    /// A record matches if it carries any of these tags.
    #[serde(default)]
    pub tags:          BTreeSet<String>,
    #[serde(default)]
    pub date_format:   Option<String>,
    #[serde(default)]
    pub date:          Option<DateSelector>,
}

impl ExtractionFilter {
    pub fn new() -> Self { Self::default() }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_types.insert(content_type);
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance.insert(importance);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Select by date: `selector` is one date or `start:end` in `format`.
    pub fn date(mut self, format: impl Into<String>, selector: &str) -> Result<Self> {
        let format = format.into();
        let selector = DateSelector::parse(selector)?;
        let compiled = DateFormat::new(&format).map_err(|e| Error::Validation(e.to_string()))?;
        selector.span(&compiled)?;
        self.date_format = Some(format);
        self.date = Some(selector);
        Ok(self)
    }

    pub fn is_unrestricted(&self) -> bool { *self == Self::default() }

    /// Validate and compile. Nothing touches storage before this succeeds.
    pub fn compile(&self) -> Result<CompiledFilter> {
        let globs = |patterns: &[String]| -> Result<Vec<Glob>> {
            patterns
                .iter()
                .map(|p| Glob::new(p).map_err(|e| Error::Validation(e.to_string())))
                .collect()
        };

        let date = match (&self.date_format, &self.date) {
            (None, None) => None,
            (Some(format), Some(selector)) => {
                let format = DateFormat::new(format).map_err(|e| Error::Validation(e.to_string()))?;
                let span = selector.span(&format)?;
                Some((format, span))
            }
            (Some(_), None) => return Err(Error::Validation("date format given without a date".into())),
            (None, Some(_)) => return Err(Error::Validation("date given without a date format".into())),
        };

        Ok(CompiledFilter {
            include: globs(&self.patterns)?,
            exclude: globs(&self.exclude)?,
            content_types: self.content_types.clone(),
            importance: self.importance.clone(),
            tags: self.tags.clone(),
            date,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CompiledFilter {
    include:       Vec<Glob>,
    exclude:       Vec<Glob>,
    content_types: BTreeSet<ContentType>,
    importance:    BTreeSet<Importance>,
    tags:          BTreeSet<String>,
    date:          Option<(DateFormat, DateSpan)>,
}

impl CompiledFilter {
    pub fn matches(&self, record: &FileRecord) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|g| g.is_match(&record.path)) {
            return false;
        }
        if self.exclude.iter().any(|g| g.is_match(&record.path)) {
            return false;
        }
        if !self.content_types.is_empty() && !self.content_types.contains(&record.content_type) {
            return false;
        }
        if !self.importance.is_empty() && !self.importance.contains(&record.importance) {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&record.tags) {
            return false;
        }
        match &self.date {
            None => true,
            Some((format, span)) => {
                // Truncate to the format's granularity: `%Y%m` compares months.
                let date = record
                    .date
                    .or_else(|| format.find(record.file_name()))
                    .and_then(|d| format.parse(&format.render(d)));
                date.is_some_and(|d| span.start <= d && d <= span.end)
            }
        }
    }
}
