//! Streaming structural sniffing of XML documents.
//!
//! This module provides:
//!
//! - [`Expr`]: the XPath subset detection catalogs are written in
//! - [`SniffEngine`]: compiles probes and evaluates them in one pass
//! - [`SniffResults`]: probe values keyed by [`ProbeId`]
//!
//! The engine never builds a document tree. Each sniff reads the input once
//! and stops as soon as every probe is decided.

mod decode;
mod engine;
mod expr;
mod results;

pub use engine::{ProbeId, SniffEngine};
pub use expr::{Axis, Comparison, Expr, LocationPath, NodeTest, Operand, Predicate, Step, ValueKind};
pub use results::{ProbeValue, SniffResults};
