//! Conformance declaration lookup for API-style resources.
//!
//! The landing page at the resource URI links to a conformance document:
//!
//! ```json
//! {"links": [{"rel": "conformance", "href": "/conformance"}]}
//! ```
//!
//! which lists the conformance classes the service implements:
//!
//! ```json
//! {"conformsTo": ["http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core"]}
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::TransportError;
use crate::resource::RemoteResource;

/// Conformance class every OGC API - Features service declares.
pub const CONFORMANCE_CLASS_CORE: &str =
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core";

#[derive(Error, Debug)]
enum ConformanceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response is not JSON")]
    Json(#[from] serde_json::Error),

    #[error("invalid conformance link `{href}`")]
    Href {
        href: String,
        #[source]
        source: url::ParseError,
    },
}

/// Whether the service at `resource` declares [`CONFORMANCE_CLASS_CORE`].
///
/// Both documents are read through `resource`, so a cached resource shares
/// them with later sniffs of the same URIs. Every failure along the way is
/// logged and reported as `false`.
pub fn check(resource: &RemoteResource) -> bool {
    match declares_core(resource) {
        Ok(declared) => declared,
        Err(e) => {
            error!(uri = %resource.uri(), error = %e, "conformance check failed");
            false
        }
    }
}

fn declares_core(resource: &RemoteResource) -> Result<bool, ConformanceError> {
    let uri = resource.uri();
    let landing: Value = serde_json::from_str(&resource.read_text()?)?;
    let Some(href) = conformance_href(&landing) else {
        debug!(uri = %uri, "no conformance link");
        return Ok(false);
    };

    let conformance_uri = uri.join(href).map_err(|source| ConformanceError::Href {
        href: href.to_string(),
        source,
    })?;
    let conformance: Value =
        serde_json::from_str(&resource.with_uri(conformance_uri.clone()).read_text()?)?;

    let declared = conformance
        .get("conformsTo")
        .and_then(Value::as_array)
        .is_some_and(|classes| {
            classes
                .iter()
                .any(|class| class.as_str() == Some(CONFORMANCE_CLASS_CORE))
        });
    debug!(uri = %conformance_uri, declared, "conformance document read");
    Ok(declared)
}

fn conformance_href(landing: &Value) -> Option<&str> {
    landing
        .get("links")?
        .as_array()?
        .iter()
        .find_map(|link| {
            if link.get("rel").and_then(Value::as_str) != Some("conformance") {
                return None;
            }
            link.get("href").and_then(Value::as_str)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::Arc;
    use url::Url;

    const LANDING: &str = "http://example.org/api/";
    const CONFORMANCE: &str = "http://example.org/api/conformance";

    fn landing(href: &str) -> String {
        format!(
            r#"{{"title": "Example", "links": [
                {{"rel": "self", "href": "{LANDING}"}},
                {{"rel": "conformance", "href": "{href}"}}
            ]}}"#
        )
    }

    fn check_with(transport: MockTransport) -> (bool, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let resource =
            RemoteResource::new(Url::parse(LANDING).unwrap(), transport.clone()).to_cached();
        (check(&resource), transport)
    }

    #[test]
    fn core_conformance_class_matches() {
        let (matched, transport) = check_with(
            MockTransport::new()
                .respond(LANDING, landing(CONFORMANCE))
                .respond(
                    CONFORMANCE,
                    format!(r#"{{"conformsTo": ["http://example.org/other", "{CONFORMANCE_CLASS_CORE}"]}}"#),
                ),
        );
        assert!(matched);
        assert_eq!(transport.requests(), [LANDING, CONFORMANCE]);
    }

    #[test]
    fn unrelated_conformance_classes_do_not_match() {
        let (matched, _) = check_with(
            MockTransport::new()
                .respond(LANDING, landing(CONFORMANCE))
                .respond(CONFORMANCE, r#"{"conformsTo": ["http://example.org/other"]}"#),
        );
        assert!(!matched);
    }

    #[test]
    fn missing_links_skip_the_second_fetch() {
        let (matched, transport) =
            check_with(MockTransport::new().respond(LANDING, r#"{"title": "No links"}"#));
        assert!(!matched);
        assert_eq!(transport.requests(), [LANDING]);
    }

    #[test]
    fn conformance_link_without_href_is_ignored() {
        let (matched, transport) = check_with(MockTransport::new().respond(
            LANDING,
            r#"{"links": [{"rel": "conformance"}, {"rel": "data", "href": "collections"}]}"#,
        ));
        assert!(!matched);
        assert_eq!(transport.requests(), [LANDING]);
    }

    #[test]
    fn relative_href_resolves_against_landing_page() {
        let (matched, _) = check_with(
            MockTransport::new()
                .respond(LANDING, landing("conformance"))
                .respond(
                    CONFORMANCE,
                    format!(r#"{{"conformsTo": ["{CONFORMANCE_CLASS_CORE}"]}}"#),
                ),
        );
        assert!(matched);
    }

    #[test]
    fn malformed_json_is_not_a_match() {
        let (matched, _) =
            check_with(MockTransport::new().respond(LANDING, "<html>not json</html>"));
        assert!(!matched);
    }

    #[test]
    fn network_failure_is_not_a_match() {
        let (matched, _) = check_with(
            MockTransport::new()
                .respond(LANDING, landing(CONFORMANCE))
                .fail(CONFORMANCE, 503),
        );
        assert!(!matched);
    }

    #[test]
    fn conforms_to_must_be_an_array() {
        let (matched, _) = check_with(
            MockTransport::new()
                .respond(LANDING, landing(CONFORMANCE))
                .respond(
                    CONFORMANCE,
                    format!(r#"{{"conformsTo": "{CONFORMANCE_CLASS_CORE}"}}"#),
                ),
        );
        assert!(!matched);
    }

    #[test]
    fn landing_page_is_read_through_the_cache() {
        let transport = Arc::new(MockTransport::new().respond(LANDING, "<Capabilities/>"));
        let resource =
            RemoteResource::new(Url::parse(LANDING).unwrap(), transport.clone()).to_cached();
        assert!(!check(&resource));
        assert_eq!(resource.read_text().unwrap(), "<Capabilities/>");
        assert_eq!(transport.requests(), [LANDING]);
    }
}
