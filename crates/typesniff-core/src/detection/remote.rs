//! Detection of a single type on a remote endpoint.

use tracing::{debug, error, warn};

use super::conformance;
use crate::error::SniffError;
use crate::expression::{CompiledDetectionExpression, DetectedTestObjectType, Evaluation};
use crate::resource::RemoteResource;
use crate::sniff::SniffEngine;

/// Whether `resource`, normalized for `expression`, is of its type.
///
/// API-style types are confirmed through the conformance document of the
/// normalized URI, read through the resource's cache like any sniff. Every
/// other type is sniffed from the normalized
/// resource's content.
pub(crate) fn detect(
    expression: &CompiledDetectionExpression,
    engine: &SniffEngine,
    resource: &RemoteResource,
) -> Option<DetectedTestObjectType> {
    let normalized = match expression.normalized_resource(resource) {
        Ok(normalized) => normalized,
        Err(e) => {
            error!(type_id = %expression.id(), uri = %resource.uri(), error = %e, "cannot normalize resource");
            return None;
        }
    };

    if expression.is_api_features() {
        if conformance::check(&normalized) {
            debug!(type_id = %expression.id(), uri = %normalized.uri(), "conformance confirmed");
            return Some(expression.detected(normalized.uri().clone(), None, None));
        }
        return None;
    }

    let results = match normalized
        .open_stream()
        .map_err(SniffError::from)
        .and_then(|stream| engine.sniff(stream))
    {
        Ok(results) => results,
        Err(e) => {
            error!(type_id = %expression.id(), uri = %normalized.uri(), error = %e, "cannot sniff resource");
            return None;
        }
    };

    match expression.evaluate(&results, normalized.uri()) {
        Evaluation::Matched(detected) => Some(detected),
        Evaluation::NoMatch => None,
        Evaluation::EvalError(e) => {
            warn!(type_id = %expression.id(), uri = %normalized.uri(), error = %e, "evaluation failed");
            None
        }
    }
}
