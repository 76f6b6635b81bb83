#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: &'static str },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source:  regex::Error,
    },

    #[error("invalid date format '{format}': {reason}")]
    InvalidDateFormat { format: String, reason: String },

    #[error("invalid rule '{pattern}' in table '{model}': {reason}")]
    InvalidRule {
        model:   String,
        pattern: String,
        reason:  String,
    },

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self { Self::Config(Box::new(err)) }
}

pub type Result<T> = std::result::Result<T, Error>;
