//! # typesniff-core
//!
//! Resource type detection engine.
//!
//! Given a resource and a catalog of test object types, works out which type
//! the resource is without knowing its format up front:
//! - local directories are sampled and each sample is sniffed
//! - remote endpoints are sniffed after normalizing their URI
//! - API-style endpoints are confirmed through their conformance document
//!
//! Detection runs on probes compiled once by
//! [`TestObjectTypeDetector::init`] and evaluated in a single streaming pass
//! over each document.

pub mod catalog;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod expression;
pub mod fs;
pub mod registry;
pub mod resource;
pub mod sample;
pub mod sniff;
pub mod transport;

pub use catalog::{Catalog, Eid, TestObjectType};
pub use config::DetectorConfig;
pub use detector::{DetectorState, TestObjectTypeDetector};
pub use error::{
    CatalogError, CompileError, ConfigError, DetectError, DetectResult, EvalError, NormalizeError,
    SniffError, TransportError,
};
pub use expression::{CompiledDetectionExpression, DetectedTestObjectType, Evaluation};
pub use fs::{FileFilter, FileSystem, RealFileSystem};
pub use registry::{ExpressionRegistry, SkippedType};
pub use resource::{LocalResource, RemoteResource, Resource};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::Transport;
