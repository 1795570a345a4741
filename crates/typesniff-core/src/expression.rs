//! Compiled detection expressions and their results.

use std::cmp::Ordering;
use std::collections::HashSet;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::catalog::{Eid, TestObjectType};
use crate::error::{CompileError, EvalError, NormalizeError};
use crate::resource::RemoteResource;
use crate::sniff::{
    Axis, Comparison, Expr, LocationPath, NodeTest, Operand, Predicate, ProbeId, SniffEngine,
    SniffResults, Step, ValueKind,
};

/// Structural marker of API-style resources. Types detected by exactly this
/// expression are confirmed through their conformance document instead of
/// by sniffing content.
pub const API_FEATURES_MARKER: &str = "boolean(/child::*[local-name() = 'API_FEATURES'])";

/// [`API_FEATURES_MARKER`], already parsed.
pub fn api_features_marker() -> Expr {
    Expr::Boolean(Box::new(Expr::Path(LocationPath {
        steps: vec![Step {
            axis: Axis::Child,
            test: NodeTest::Any,
            predicates: vec![Predicate::Compare(
                Operand::LocalName,
                Comparison::Equals,
                "API_FEATURES".to_string(),
            )],
        }],
        attribute: None,
    })))
}

/// Ranking of test object types: higher priority first, then identifier.
pub fn compare_priority(a: &TestObjectType, b: &TestObjectType) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.id.cmp(&b.id))
}

/// A test object type bound to its probes in a shared [`SniffEngine`].
#[derive(Debug, Clone)]
pub struct CompiledDetectionExpression {
    object_type: TestObjectType,
    detection: ProbeId,
    label: Option<ProbeId>,
    description: Option<ProbeId>,
    uri_pattern: Option<Regex>,
    default_query: Vec<(String, String)>,
    api_features: bool,
}

impl CompiledDetectionExpression {
    /// Compile the expressions of `object_type` into `engine`.
    ///
    /// Nothing is registered unless every expression of the type compiles.
    /// `marker` is the parsed [`API_FEATURES_MARKER`].
    pub fn compile(
        object_type: &TestObjectType,
        engine: &mut SniffEngine,
        marker: &Expr,
    ) -> Result<Self, CompileError> {
        let detection_source = object_type.detection_source().unwrap_or_default();
        let detection = Expr::parse(detection_source)?;
        if detection.kind() == ValueKind::String {
            return Err(CompileError::NotBoolean {
                expression: detection_source.to_string(),
            });
        }

        let label = parse_optional(object_type.label_expression.as_deref())?;
        let description = parse_optional(object_type.description_expression.as_deref())?;

        let uri_pattern = match &object_type.uri_pattern {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| CompileError::UriPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?),
            None => None,
        };

        let default_query = object_type
            .default_query
            .as_deref()
            .map(|query| {
                url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let api_features = detection == *marker;
        Ok(Self {
            object_type: object_type.clone(),
            detection: engine.register(detection_source, detection),
            label: label.map(|(source, expr)| engine.register(source, expr)),
            description: description.map(|(source, expr)| engine.register(source, expr)),
            uri_pattern,
            default_query,
            api_features,
        })
    }

    pub fn id(&self) -> &Eid {
        &self.object_type.id
    }

    pub fn object_type(&self) -> &TestObjectType {
        &self.object_type
    }

    pub fn priority(&self) -> i32 {
        self.object_type.priority
    }

    /// Whether the detection expression is the API-style marker.
    pub fn is_api_features(&self) -> bool {
        self.api_features
    }

    /// Whether `uri` alone has a shape known for this type. No I/O.
    pub fn is_uri_known(&self, uri: &Url) -> bool {
        self.uri_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(uri.as_str()))
    }

    /// `uri` with the default query parameters it is missing appended. Keys
    /// compare case-insensitively.
    pub fn normalized_uri(&self, uri: &Url) -> Result<Url, NormalizeError> {
        if self.default_query.is_empty() {
            return Ok(uri.clone());
        }
        if uri.cannot_be_a_base() {
            return Err(NormalizeError::OpaqueUri {
                uri: uri.to_string(),
            });
        }

        let present: HashSet<String> = uri
            .query_pairs()
            .map(|(key, _)| key.to_ascii_lowercase())
            .collect();
        let missing: Vec<&(String, String)> = self
            .default_query
            .iter()
            .filter(|(key, _)| !present.contains(&key.to_ascii_lowercase()))
            .collect();
        if missing.is_empty() {
            return Ok(uri.clone());
        }

        let mut normalized = uri.clone();
        {
            let mut pairs = normalized.query_pairs_mut();
            for (key, value) in missing {
                pairs.append_pair(key, value);
            }
        }
        Ok(normalized)
    }

    /// The resource to sniff for this type.
    pub fn normalized_resource(
        &self,
        resource: &RemoteResource,
    ) -> Result<RemoteResource, NormalizeError> {
        Ok(resource.with_uri(self.normalized_uri(resource.uri())?))
    }

    /// Decide this type from one sniff of the document at `resource_uri`.
    pub fn evaluate(&self, results: &SniffResults, resource_uri: &Url) -> Evaluation {
        match results.boolean(self.detection) {
            Ok(true) => Evaluation::Matched(self.detected(
                resource_uri.clone(),
                self.extract(results, self.label),
                self.extract(results, self.description),
            )),
            Ok(false) => Evaluation::NoMatch,
            Err(e) => Evaluation::EvalError(e),
        }
    }

    pub(crate) fn detected(
        &self,
        resource_uri: Url,
        extracted_label: Option<String>,
        extracted_description: Option<String>,
    ) -> DetectedTestObjectType {
        DetectedTestObjectType {
            object_type: self.object_type.clone(),
            resource_uri,
            extracted_label,
            extracted_description,
        }
    }

    fn extract(&self, results: &SniffResults, probe: Option<ProbeId>) -> Option<String> {
        let probe = probe?;
        match results.string(probe) {
            Ok(value) => {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Err(e) => {
                warn!(type_id = %self.id(), error = %e, "cannot extract value");
                None
            }
        }
    }
}

impl PartialEq for CompiledDetectionExpression {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for CompiledDetectionExpression {}

impl PartialOrd for CompiledDetectionExpression {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompiledDetectionExpression {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_priority(&self.object_type, &other.object_type)
    }
}

fn parse_optional(source: Option<&str>) -> Result<Option<(&str, Expr)>, CompileError> {
    match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(source) => Ok(Some((source, Expr::parse(source)?))),
        None => Ok(None),
    }
}

/// Outcome of evaluating one expression against one sniff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Matched(DetectedTestObjectType),
    NoMatch,
    EvalError(EvalError),
}

impl Evaluation {
    pub fn into_detected(self) -> Option<DetectedTestObjectType> {
        match self {
            Evaluation::Matched(detected) => Some(detected),
            _ => None,
        }
    }
}

/// A type recognized for a resource.
///
/// Detections order by rank: a detection of a higher priority type sorts
/// first, ties go to the smaller identifier. Two detections are equal when
/// they rank the same.
#[derive(Debug, Clone)]
pub struct DetectedTestObjectType {
    object_type: TestObjectType,
    resource_uri: Url,
    extracted_label: Option<String>,
    extracted_description: Option<String>,
}

impl DetectedTestObjectType {
    pub fn id(&self) -> &Eid {
        &self.object_type.id
    }

    pub fn object_type(&self) -> &TestObjectType {
        &self.object_type
    }

    pub fn priority(&self) -> i32 {
        self.object_type.priority
    }

    /// The resource the type was detected on, after normalization.
    pub fn resource_uri(&self) -> &Url {
        &self.resource_uri
    }

    pub fn extracted_label(&self) -> Option<&str> {
        self.extracted_label.as_deref()
    }

    pub fn extracted_description(&self) -> Option<&str> {
        self.extracted_description.as_deref()
    }

    /// Extracted label, falling back to the catalog label.
    pub fn label(&self) -> &str {
        self.extracted_label
            .as_deref()
            .unwrap_or(&self.object_type.label)
    }

    /// Extracted description, falling back to the catalog description.
    pub fn description(&self) -> Option<&str> {
        self.extracted_description
            .as_deref()
            .or(self.object_type.description.as_deref())
    }
}

impl PartialEq for DetectedTestObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DetectedTestObjectType {}

impl PartialOrd for DetectedTestObjectType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DetectedTestObjectType {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_priority(&self.object_type, &other.object_type)
    }
}
