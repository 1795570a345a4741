//! Error types shared across the detection core.
//!
//! Only [`DetectError`] ever leaves the public detection entry points. Every
//! other error is recovered locally and folded into "no match" by the
//! detectors, after being logged.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::Eid;

pub type DetectResult<T> = Result<T, DetectError>;

/// Precondition violations of the detector lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectError {
    #[error("detector is not initialized")]
    NotInitialized,

    #[error("detector is already initialized; release it before initializing again")]
    AlreadyInitialized,
}

/// A detection, label or description expression could not be compiled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("syntax error at position {position} in `{expression}`: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    #[error("detection expression `{expression}` does not yield a boolean or node-set")]
    NotBoolean { expression: String },

    #[error("invalid URI pattern `{pattern}`: {message}")]
    UriPattern { pattern: String, message: String },
}

/// Failure while streaming a document through the sniffing engine.
#[derive(Error, Debug)]
pub enum SniffError {
    #[error("failed to read document")]
    Io(#[from] std::io::Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("text before the document element")]
    TextBeforeRoot,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A sniffed result could not be read the way a compiled expression needs it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("probe #{probe} was not evaluated by this sniff")]
    MissingProbe { probe: usize },

    #[error("probe #{probe} yields a {actual}, expected a {expected}")]
    TypeMismatch {
        probe: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Fetching a remote resource failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to build HTTP client: {message}")]
    Client { message: String },

    #[error("request to {uri} failed: {message}")]
    Request { uri: String, message: String },

    #[error("{uri} answered with HTTP status {status}")]
    Status { uri: String, status: u16 },

    #[error("response from {uri} is not valid UTF-8")]
    Encoding { uri: String },
}

/// A resource could not be normalized for a test object type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("URI {uri} cannot carry query parameters")]
    OpaqueUri { uri: String },
}

/// Loading or assembling a test object type catalog failed.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate test object type id `{0}`")]
    DuplicateId(Eid),

    #[error("test object type id must not be empty")]
    EmptyId,
}

/// Detector configuration is unreadable or unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    #[error("sample_size must be at least 1")]
    ZeroSampleSize,

    #[error("file_patterns must not be empty")]
    NoFilePatterns,

    #[error("invalid file pattern `{pattern}`: {message}")]
    InvalidFilePattern { pattern: String, message: String },
}
