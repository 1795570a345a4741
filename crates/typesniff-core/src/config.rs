//! Detector configuration

use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fs::{DEFAULT_FILE_PATTERNS, FileFilter};

/// Samples taken from a local directory.
pub const DEFAULT_SAMPLE_SIZE: usize = 7;

/// Directory levels walked below a local resource.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Tuning for local detection.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration:
///
/// ```toml
/// sample_size = 12
/// max_depth = 3
/// file_patterns = ["*.xml", "*.gml", "*.atom"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Maximum number of files sniffed per local resource.
    pub sample_size: usize,

    /// Maximum directory depth listed below a local resource.
    pub max_depth: usize,

    /// Case-insensitive glob patterns for candidate file names.
    pub file_patterns: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
            file_patterns: DEFAULT_FILE_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl DetectorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_size == 0 {
            return Err(ConfigError::ZeroSampleSize);
        }
        self.file_filter().map(|_| ())
    }

    /// Compile `file_patterns`.
    pub fn file_filter(&self) -> Result<FileFilter, ConfigError> {
        if self.file_patterns.is_empty() {
            return Err(ConfigError::NoFilePatterns);
        }
        let patterns = self
            .file_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidFilePattern {
                    pattern: pattern.clone(),
                    message: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FileFilter::new(patterns))
    }
}
