//! Content classification of simulation files.
//!
//! Classification looks at a relative path and a size, never at file
//! contents. Model-specific rule tables are consulted first, then generic
//! naming conventions, then the unknown/optional default.

mod classifier;
mod config;
mod date;
mod error;
mod fallback;
mod glob;
mod rules;
mod types;

pub use classifier::Classifier;
pub use config::{ClassifierConfig, builtin_tables};
pub use date::DateFormat;
pub use error::{Error, Result};
pub use glob::Glob;
pub use rules::{Rule, RuleTable, Syntax};
pub use types::{Classification, ContentType, Importance, Origin};
