//! Top-level detection policy.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::catalog::{Catalog, TestObjectType};
use crate::config::DetectorConfig;
use crate::detection::local::{self, Sampling};
use crate::detection::remote;
use crate::error::{ConfigError, DetectError, DetectResult};
use crate::expression::{CompiledDetectionExpression, DetectedTestObjectType};
use crate::fs::FileFilter;
use crate::registry::{ExpressionRegistry, SkippedType};
use crate::resource::Resource;

/// Lifecycle of a [`TestObjectTypeDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Uninitialized,
    Initialized,
    Released,
}

#[derive(Debug)]
enum Lifecycle {
    Uninitialized,
    Initialized(ExpressionRegistry),
    Released,
}

/// Detects the test object type of resources against a catalog.
///
/// ```ignore
/// let mut detector = TestObjectTypeDetector::with_catalog(Catalog::builtin());
/// detector.init()?;
/// let detected = detector.detect_type(&resource)?;
/// ```
#[derive(Debug)]
pub struct TestObjectTypeDetector {
    catalog: Catalog,
    sampling: Sampling,
    lifecycle: Lifecycle,
}

impl TestObjectTypeDetector {
    /// A detector for `catalog` tuned by `config`. Not yet initialized.
    pub fn new(catalog: Catalog, config: &DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            catalog,
            sampling: Sampling {
                sample_size: config.sample_size,
                max_depth: config.max_depth,
                filter: config.file_filter()?,
            },
            lifecycle: Lifecycle::Uninitialized,
        })
    }

    /// A detector for `catalog` with the default configuration.
    pub fn with_catalog(catalog: Catalog) -> Self {
        let config = DetectorConfig::default();
        Self {
            catalog,
            sampling: Sampling {
                sample_size: config.sample_size,
                max_depth: config.max_depth,
                filter: FileFilter::default(),
            },
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Compile the catalog. Fails if the detector is already initialized;
    /// a released detector may be initialized again.
    pub fn init(&mut self) -> DetectResult<()> {
        if let Lifecycle::Initialized(_) = self.lifecycle {
            return Err(DetectError::AlreadyInitialized);
        }
        let registry = ExpressionRegistry::compile(&self.catalog);
        info!(
            types = registry.len(),
            skipped = registry.skipped().len(),
            "detector initialized"
        );
        self.lifecycle = Lifecycle::Initialized(registry);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Initialized(_))
    }

    pub fn state(&self) -> DetectorState {
        match self.lifecycle {
            Lifecycle::Uninitialized => DetectorState::Uninitialized,
            Lifecycle::Initialized(_) => DetectorState::Initialized,
            Lifecycle::Released => DetectorState::Released,
        }
    }

    /// Drop every compiled expression. Does nothing unless initialized.
    pub fn release(&mut self) {
        if self.is_initialized() {
            self.lifecycle = Lifecycle::Released;
            debug!("detector released");
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> DetectResult<&ExpressionRegistry> {
        match &self.lifecycle {
            Lifecycle::Initialized(registry) => Ok(registry),
            _ => Err(DetectError::NotInitialized),
        }
    }

    /// Detectable types, best ranked first.
    pub fn supported_types(&self) -> DetectResult<Vec<&TestObjectType>> {
        Ok(self
            .registry()?
            .expressions()
            .iter()
            .map(CompiledDetectionExpression::object_type)
            .collect())
    }

    /// Catalog types that failed to compile during [`init`](Self::init).
    pub fn skipped_types(&self) -> DetectResult<&[SkippedType]> {
        Ok(self.registry()?.skipped())
    }

    /// Detect the type of `resource` among every compiled type.
    pub fn detect_type(&self, resource: &Resource) -> DetectResult<Option<DetectedTestObjectType>> {
        let registry = self.registry()?;
        let candidates: Vec<&CompiledDetectionExpression> = registry.expressions().iter().collect();
        let resource = cached(resource);
        Ok(self.run(registry, &resource, &candidates))
    }

    /// Detect the type of `resource` among `expected` types only.
    ///
    /// Expected types whose URI pattern matches the resource URI are tried
    /// first; the others only if none of those matched. Unknown or
    /// uncompiled identifiers are ignored.
    pub fn detect_type_expecting<I, S>(
        &self,
        resource: &Resource,
        expected: I,
    ) -> DetectResult<Option<DetectedTestObjectType>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = self.registry()?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for id in expected {
            let id = id.as_ref();
            if !seen.insert(id.to_string()) {
                continue;
            }
            match registry.get(id) {
                Some(expression) => candidates.push(expression),
                None => debug!(type_id = id, "expected type is not detectable"),
            }
        }
        candidates.sort();

        let (uri_known, others): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|expression| expression.is_uri_known(resource.uri()));
        debug!(
            uri = %resource.uri(),
            uri_known = uri_known.len(),
            others = others.len(),
            "detecting expected types"
        );

        let resource = cached(resource);
        if let Some(detected) = self.run(registry, &resource, &uri_known) {
            return Ok(Some(detected));
        }
        Ok(self.run(registry, &resource, &others))
    }

    fn run(
        &self,
        registry: &ExpressionRegistry,
        resource: &Resource,
        candidates: &[&CompiledDetectionExpression],
    ) -> Option<DetectedTestObjectType> {
        match resource {
            Resource::Local(local) => {
                local::detect(candidates, registry.engine(), local, &self.sampling)
            }
            Resource::Remote(remote) => candidates
                .iter()
                .find_map(|expression| remote::detect(expression, registry.engine(), remote)),
        }
    }
}

fn cached(resource: &Resource) -> Resource {
    match resource {
        Resource::Remote(remote) => Resource::Remote(remote.to_cached()),
        Resource::Local(_) => resource.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::API_FEATURES_MARKER;
    use crate::fs::mock::MockFileSystem;
    use crate::resource::{LocalResource, RemoteResource};
    use crate::transport::mock::MockTransport;
    use std::sync::Arc;
    use url::Url;

    fn catalog() -> Catalog {
        Catalog::from_types([
            TestObjectType::new("a", "A")
                .with_detection_expression("boolean(/*[local-name() = 'A'])")
                .with_uri_pattern("[?&]kind=a(&|$)")
                .with_priority(1),
            TestObjectType::new("b", "B")
                .with_detection_expression("boolean(/*[local-name() = 'B'])")
                .with_default_query("FORMAT=b")
                .with_priority(5),
            TestObjectType::new("broken", "Broken").with_detection_expression("boolean(/*["),
        ])
        .unwrap()
    }

    fn initialized() -> TestObjectTypeDetector {
        let mut detector = TestObjectTypeDetector::with_catalog(catalog());
        detector.init().unwrap();
        detector
    }

    fn remote(uri: &str, transport: &Arc<MockTransport>) -> Resource {
        RemoteResource::new(Url::parse(uri).unwrap(), transport.clone()).into()
    }

    const BASE: &str = "http://example.org/service?kind=a";
    const B_URI: &str = "http://example.org/service?kind=a&FORMAT=b";

    #[test]
    fn lifecycle_transitions() {
        let mut detector = TestObjectTypeDetector::with_catalog(catalog());
        assert_eq!(detector.state(), DetectorState::Uninitialized);
        assert!(!detector.is_initialized());

        detector.init().unwrap();
        assert_eq!(detector.state(), DetectorState::Initialized);
        assert_eq!(detector.init(), Err(DetectError::AlreadyInitialized));

        detector.release();
        assert_eq!(detector.state(), DetectorState::Released);
        assert_eq!(
            detector.supported_types().unwrap_err(),
            DetectError::NotInitialized
        );

        detector.init().unwrap();
        assert!(detector.is_initialized());
    }

    #[test]
    fn release_before_init_is_a_no_op() {
        let mut detector = TestObjectTypeDetector::with_catalog(catalog());
        detector.release();
        assert_eq!(detector.state(), DetectorState::Uninitialized);
    }

    #[test]
    fn detection_requires_init() {
        let detector = TestObjectTypeDetector::with_catalog(catalog());
        let transport = Arc::new(MockTransport::new());
        let resource = remote(BASE, &transport);
        assert_eq!(
            detector.detect_type(&resource).unwrap_err(),
            DetectError::NotInitialized
        );
        assert_eq!(
            detector
                .detect_type_expecting(&resource, ["a"])
                .unwrap_err(),
            DetectError::NotInitialized
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn supported_types_are_ranked_and_skip_broken_ones() {
        let detector = initialized();
        let ids: Vec<&str> = detector
            .supported_types()
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(detector.skipped_types().unwrap()[0].id.as_str(), "broken");
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = DetectorConfig {
            sample_size: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            TestObjectTypeDetector::new(catalog(), &config),
            Err(ConfigError::ZeroSampleSize)
        ));
    }

    #[test]
    fn uri_known_type_matching_skips_the_others() {
        let transport = Arc::new(MockTransport::new().respond(BASE, "<A/>").respond(B_URI, "<B/>"));
        let detector = initialized();

        let detected = detector
            .detect_type_expecting(&remote(BASE, &transport), ["a", "b"])
            .unwrap()
            .unwrap();
        assert_eq!(detected.id().as_str(), "a");
        assert!(!transport.was_requested(B_URI));
    }

    #[test]
    fn falls_back_to_other_expected_types() {
        let transport = Arc::new(MockTransport::new().respond(BASE, "<B/>").respond(B_URI, "<B/>"));
        let detector = initialized();

        let detected = detector
            .detect_type_expecting(&remote(BASE, &transport), ["a", "b", "a"])
            .unwrap()
            .unwrap();
        assert_eq!(detected.id().as_str(), "b");
        assert_eq!(detected.resource_uri().as_str(), B_URI);
        assert_eq!(transport.requests(), [BASE, B_URI]);
    }

    #[test]
    fn unknown_expected_types_are_ignored() {
        let transport = Arc::new(MockTransport::new().respond(BASE, "<A/>"));
        let detector = initialized();
        let resource = remote(BASE, &transport);

        assert!(
            detector
                .detect_type_expecting(&resource, ["nope", "broken"])
                .unwrap()
                .is_none()
        );
        assert!(transport.requests().is_empty());
        assert!(
            detector
                .detect_type_expecting(&resource, Vec::<String>::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn remote_detection_fetches_each_uri_once() {
        let transport = Arc::new(MockTransport::new().respond(BASE, "<A/>").respond(B_URI, "<B/>"));
        let detector = initialized();

        // b ranks first but its normalized URI serves <B/>
        let detected = detector
            .detect_type(&remote(BASE, &transport))
            .unwrap()
            .unwrap();
        assert_eq!(detected.id().as_str(), "b");
        assert_eq!(transport.requests(), [B_URI]);
    }

    #[test]
    fn remote_detection_tries_candidates_in_rank_order() {
        let transport = Arc::new(MockTransport::new().respond(BASE, "<A/>").respond(B_URI, "<html/>"));
        let detector = initialized();

        let detected = detector
            .detect_type(&remote(BASE, &transport))
            .unwrap()
            .unwrap();
        assert_eq!(detected.id().as_str(), "a");
        assert_eq!(transport.requests(), [B_URI, BASE]);
    }

    #[test]
    fn failed_conformance_check_shares_the_landing_page() {
        let mut detector = TestObjectTypeDetector::with_catalog(
            Catalog::from_types([
                TestObjectType::new("api", "API")
                    .with_detection_expression(API_FEATURES_MARKER)
                    .with_priority(10),
                TestObjectType::new("caps", "Capabilities")
                    .with_detection_expression("boolean(/*[local-name() = 'Capabilities'])"),
            ])
            .unwrap(),
        );
        detector.init().unwrap();
        let landing = "http://example.org/ows";
        let transport = Arc::new(MockTransport::new().respond(landing, "<Capabilities/>"));

        let detected = detector
            .detect_type(&remote(landing, &transport))
            .unwrap()
            .unwrap();
        assert_eq!(detected.id().as_str(), "caps");
        assert_eq!(transport.requests(), [landing]);
    }

    #[test]
    fn local_detection_uses_all_types() {
        let mut fs = MockFileSystem::new();
        fs.add_file("/data/1.xml", "<A/>");
        fs.add_file("/data/2.xml", "<B/>");
        let resource: Resource = LocalResource::new("/data", Arc::new(fs)).unwrap().into();
        let detector = initialized();

        let detected = detector.detect_type(&resource).unwrap().unwrap();
        assert_eq!(detected.id().as_str(), "b");

        let expected_a = detector
            .detect_type_expecting(&resource, ["a"])
            .unwrap()
            .unwrap();
        assert_eq!(expected_a.id().as_str(), "a");
    }
}
