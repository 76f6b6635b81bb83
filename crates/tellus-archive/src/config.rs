use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::data::{Codec, METADATA_VERSION};
use crate::{Error, Result};

const MAX_DEFAULT_WORKERS: usize = 8;

/// Tunables for archive creation and extraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Upper bound on concurrent hashing and fragment workers.
    pub workers:           usize,
    /// gzip: 0-9, zstd: 1-22.
    pub compression_level: u32,
    pub codec:             Codec,
    /// Part size for split archives, in bytes.
    pub split_part_size:   u64,
    /// Copy buffer size; cancellation is checked once per chunk.
    pub chunk_size:        usize,
    pub metadata_version:  String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS);
        Self {
            workers,
            compression_level: 6,
            codec: Codec::Gzip,
            split_part_size: 1 << 30,
            chunk_size: 64 * 1024,
            metadata_version: METADATA_VERSION.to_owned(),
        }
    }
}

impl ArchiveConfig {
    /// Load from an optional TOML file with `TELLUS_ARCHIVE_` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed("TELLUS_ARCHIVE_")).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(source))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.split_part_size == 0 {
            return Err(Error::InvalidConfig("split_part_size must be positive".into()));
        }
        let levels = match self.codec {
            Codec::Gzip => 0..=9,
            Codec::Zstd => 1..=22,
        };
        if !levels.contains(&self.compression_level) {
            return Err(Error::InvalidConfig(format!(
                "compression level {} out of range for {:?}",
                self.compression_level, self.codec
            )));
        }
        if !self.metadata_version.starts_with("1.") {
            return Err(Error::InvalidConfig(format!(
                "unsupported metadata version {}",
                self.metadata_version
            )));
        }
        Ok(())
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn codec(mut self, codec: Codec, level: u32) -> Self {
        self.codec = codec;
        self.compression_level = level;
        self
    }

    pub fn split_part_size(mut self, bytes: u64) -> Self {
        self.split_part_size = bytes;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }
}
