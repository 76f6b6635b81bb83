use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::Error;

/// What role a file plays in a simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Input,
    Output,
    Log,
    Intermediate,
    Config,
    Diagnostic,
    Metadata,
    Unknown,
}

impl ContentType {
    pub const ALL: [ContentType; 8] = [
        Self::Input,
        Self::Output,
        Self::Log,
        Self::Intermediate,
        Self::Config,
        Self::Diagnostic,
        Self::Metadata,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Log => "log",
            Self::Intermediate => "intermediate",
            Self::Config => "config",
            Self::Diagnostic => "diagnostic",
            Self::Metadata => "metadata",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownVariant {
                kind:  "content type",
                value: s.to_owned(),
            })
    }
}

/// How much a file matters when deciding what to keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Critical,
    Important,
    Optional,
    Temporary,
}

impl Importance {
    pub const ALL: [Importance; 4] = [Self::Critical, Self::Important, Self::Optional, Self::Temporary];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Important => "important",
            Self::Optional => "optional",
            Self::Temporary => "temporary",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Importance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownVariant {
                kind:  "importance",
                value: s.to_owned(),
            })
    }
}

/// Which stage of classification produced a result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Rule { model: String, pattern: String },
    Generic(&'static str),
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule { model, pattern } => write!(f, "{model}:{pattern}"),
            Self::Generic(convention) => write!(f, "generic:{convention}"),
            Self::Default => f.write_str("default"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub content_type: ContentType,
    pub importance:   Importance,
    pub date:         Option<NaiveDate>,
    /// Format the date was read with, when the matching rule declares one.
    pub date_format:  Option<String>,
    pub tags:         Vec<String>,
    pub origin:       Origin,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            content_type: ContentType::Unknown,
            importance:   Importance::Optional,
            date:         None,
            date_format:  None,
            tags:         Vec::new(),
            origin:       Origin::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for t in ContentType::ALL {
            assert_eq!(t.as_str().parse::<ContentType>().unwrap(), t);
        }
        for i in Importance::ALL {
            assert_eq!(i.to_string().parse::<Importance>().unwrap(), i);
        }
        assert_eq!("OUTPUT".parse::<ContentType>().unwrap(), ContentType::Output);
        assert!("restart".parse::<ContentType>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        #[derive(Deserialize)]
        struct Probe {
            t: ContentType,
            i: Importance,
        }
        let probe: Probe = toml::from_str("t = \"diagnostic\"\ni = \"temporary\"").unwrap();
        assert_eq!(probe.t, ContentType::Diagnostic);
        assert_eq!(probe.i, Importance::Temporary);
    }
}
