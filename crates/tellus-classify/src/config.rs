use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::{Result, RuleTable};

const BUILTIN_TABLES: &str = include_str!("builtin.toml");

/// Classifier configuration: which rule tables apply, in what order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Include the built-in model tables.
    #[serde(default = "default_builtin")]
    pub builtin: bool,
    #[serde(default)]
    pub tables:  Vec<RuleTable>,
}

fn default_builtin() -> bool { true }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            tables:  Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct TableDocument {
    #[serde(default)]
    tables: Vec<RuleTable>,
}

impl ClassifierConfig {
    /// Load from an optional TOML file with `TELLUS_CLASSIFIER_` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config = figment.merge(Env::prefixed("TELLUS_CLASSIFIER_")).extract()?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(source))
            .extract()?;
        Ok(config)
    }

    /// A configuration with no tables at all; only generic conventions apply.
    pub fn generic_only() -> Self {
        Self {
            builtin: false,
            tables:  Vec::new(),
        }
    }

    pub fn with_table(mut self, table: RuleTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Every table that applies, built-ins first, in declaration order.
    pub fn effective_tables(&self) -> Result<Vec<RuleTable>> {
        let mut tables = if self.builtin { builtin_tables()? } else { Vec::new() };
        tables.extend(self.tables.iter().cloned());
        Ok(tables)
    }
}

pub fn builtin_tables() -> Result<Vec<RuleTable>> {
    let document: TableDocument = toml::from_str(BUILTIN_TABLES)?;
    Ok(document.tables)
}
