use std::sync::Arc;

use tracing::debug;

use crate::config::ClassifierConfig;
use crate::rules::CompiledRule;
use crate::{Classification, Origin, Result, fallback};

/// Pure path/size → classification function.
///
/// Rule tables are compiled once and never mutated, so a `Classifier` can be
/// cloned cheaply and shared across worker threads.
#[derive(Clone, Debug)]
pub struct Classifier {
    rules: Arc<[CompiledRule]>,
}

impl Default for Classifier {
    fn default() -> Self { Self::generic() }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let mut tables = config.effective_tables()?;
        // Stable: equal priorities keep declaration order.
        tables.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut rules = Vec::new();
        for table in &tables {
            for rule in &table.rules {
                rules.push(CompiledRule::compile(&table.model, rule)?);
            }
        }
        debug!(tables = tables.len(), rules = rules.len(), "compiled classification rules");
        Ok(Self { rules: rules.into() })
    }

    /// Built-in model tables plus generic conventions.
    pub fn builtin() -> Result<Self> { Self::new(&ClassifierConfig::default()) }

    /// Generic conventions only.
    pub fn generic() -> Self { Self { rules: Arc::from([]) } }

    pub fn rule_count(&self) -> usize { self.rules.len() }

    /// Classify a `/`-separated relative path of a file with `size` bytes.
    pub fn classify(&self, path: &str, size: u64) -> Classification {
        let path = path.trim_start_matches('/');
        let name = path.rsplit('/').next().unwrap_or(path);

        for rule in self.rules.iter() {
            let Some(date_text) = rule.matches(path, size) else {
                continue;
            };
            let date = rule.date.as_ref().and_then(|format| match date_text {
                Some(text) => format.parse(text),
                None => format.find(name),
            });
            return Classification {
                content_type: rule.content_type,
                importance: rule.importance,
                date,
                date_format: rule.date.as_ref().map(|f| f.as_str().to_owned()),
                tags: rule.tags.clone(),
                origin: Origin::Rule {
                    model:   rule.model.clone(),
                    pattern: rule.pattern.clone(),
                },
            };
        }

        if let Some((content_type, importance, convention)) = fallback::classify(path) {
            return Classification {
                content_type,
                importance,
                date: None,
                date_format: None,
                tags: Vec::new(),
                origin: Origin::Generic(convention),
            };
        }

        Classification::unknown()
    }
}
