use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::date::DateFormat;
use crate::glob::Glob;
use crate::{ContentType, Error, Importance, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    #[default]
    Glob,
    Regex,
}

/// One pattern → classification entry, as written in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern:      String,
    #[serde(default)]
    pub syntax:       Syntax,
    pub content_type: ContentType,
    pub importance:   Importance,
    /// Format of the date token in the file name. With regex syntax a
    /// named group `date` narrows where the token is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size:     Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size:     Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags:         Vec<String>,
}

fn default_priority() -> i32 { 50 }

/// Ordered rules for one model family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub model:    String,
    /// Higher priorities are consulted first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub rules:    Vec<Rule>,
}

#[derive(Clone, Debug)]
pub(crate) enum Matcher {
    Glob(Glob),
    Regex(Regex),
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledRule {
    pub model:        String,
    pub pattern:      String,
    pub matcher:      Matcher,
    pub content_type: ContentType,
    pub importance:   Importance,
    pub date:         Option<DateFormat>,
    pub min_size:     Option<u64>,
    pub max_size:     Option<u64>,
    pub tags:         Vec<String>,
}

impl CompiledRule {
    pub fn compile(model: &str, rule: &Rule) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidRule {
            model:   model.to_owned(),
            pattern: rule.pattern.clone(),
            reason,
        };

        if let (Some(min), Some(max)) = (rule.min_size, rule.max_size) {
            if min > max {
                return Err(invalid(format!("min_size {min} exceeds max_size {max}")));
            }
        }
        let matcher = match rule.syntax {
            Syntax::Glob => Matcher::Glob(Glob::new(&rule.pattern)?),
            Syntax::Regex => Matcher::Regex(Regex::new(&rule.pattern).map_err(|source| Error::InvalidRegex {
                pattern: rule.pattern.clone(),
                source,
            })?),
        };
        if let Matcher::Regex(regex) = &matcher {
            if regex.capture_names().flatten().any(|n| n == "date") && rule.date_format.is_none() {
                return Err(invalid("a 'date' group needs a date_format".into()));
            }
        }
        let date = rule.date_format.as_deref().map(DateFormat::new).transpose()?;

        Ok(Self {
            model: model.to_owned(),
            pattern: rule.pattern.clone(),
            matcher,
            content_type: rule.content_type,
            importance: rule.importance,
            date,
            min_size: rule.min_size,
            max_size: rule.max_size,
            tags: rule.tags.clone(),
        })
    }

    /// Match `path`, returning the date text region when the rule has one.
    pub fn matches<'p>(&self, path: &'p str, size: u64) -> Option<Option<&'p str>> {
        if self.min_size.is_some_and(|min| size < min) || self.max_size.is_some_and(|max| size > max) {
            return None;
        }
        match &self.matcher {
            Matcher::Glob(glob) => glob.is_match(path).then_some(None),
            Matcher::Regex(regex) => {
                let caps = regex.captures(path)?;
                Some(caps.name("date").map(|m| m.as_str()))
            }
        }
    }
}
