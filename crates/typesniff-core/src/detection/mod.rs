//! Detection strategies per resource kind.
//!
//! - [`local`] samples files of a directory and sniffs each one
//! - [`remote`] sniffs a single endpoint, or confirms API-style types
//!   through [`conformance`]

pub mod conformance;
pub(crate) mod local;
pub(crate) mod remote;

use std::fmt;

use tracing::warn;
use url::Url;

use crate::expression::{CompiledDetectionExpression, DetectedTestObjectType, Evaluation};
use crate::sniff::SniffResults;

/// First candidate matching `results`. Evaluation errors count as no match.
pub(crate) fn first_match(
    candidates: &[&CompiledDetectionExpression],
    results: &SniffResults,
    resource_uri: &Url,
    document: &dyn fmt::Display,
) -> Option<DetectedTestObjectType> {
    candidates
        .iter()
        .find_map(|expression| match expression.evaluate(results, resource_uri) {
            Evaluation::Matched(detected) => Some(detected),
            Evaluation::NoMatch => None,
            Evaluation::EvalError(e) => {
                warn!(type_id = %expression.id(), document = %document, error = %e, "evaluation failed");
                None
            }
        })
}
