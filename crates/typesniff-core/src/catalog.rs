//! Test object type catalog.
//!
//! A catalog is the list of types the detector can recognize. It is read
//! once when the detector initializes. Catalogs are TOML documents made of
//! `[[type]]` tables:
//!
//! ```toml
//! [[type]]
//! id = "wfs-2.0"
//! label = "OGC Web Feature Service 2.0"
//! detection_expression = "boolean(/*[local-name() = 'WFS_Capabilities'])"
//! uri_pattern = '(?i)[?&]service=wfs(&|$)'
//! default_query = "SERVICE=WFS&REQUEST=GetCapabilities"
//! priority = 30
//! ```

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::CatalogError;

const BUILTIN_CATALOG: &str = include_str!("catalog/builtin.toml");

/// Identifier of a test object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Eid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Eid {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Eid {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestObjectType {
    pub id: Eid,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Boolean probe deciding whether a document is of this type. Types
    /// without one are never detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_expression: Option<String>,
    /// String probe extracting a label from a matching document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_expression: Option<String>,
    /// String probe extracting a description from a matching document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_expression: Option<String>,
    /// Regular expression a resource URI of this type is known to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri_pattern: Option<String>,
    /// Query parameters (`KEY=value&...`) a remote resource of this type
    /// must carry; missing keys are appended before sniffing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_query: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl TestObjectType {
    pub fn new(id: impl Into<Eid>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            detection_expression: None,
            label_expression: None,
            description_expression: None,
            uri_pattern: None,
            default_query: None,
            priority: 0,
        }
    }

    pub fn with_detection_expression(mut self, expression: impl Into<String>) -> Self {
        self.detection_expression = Some(expression.into());
        self
    }

    pub fn with_label_expression(mut self, expression: impl Into<String>) -> Self {
        self.label_expression = Some(expression.into());
        self
    }

    pub fn with_description_expression(mut self, expression: impl Into<String>) -> Self {
        self.description_expression = Some(expression.into());
        self
    }

    pub fn with_uri_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.uri_pattern = Some(pattern.into());
        self
    }

    pub fn with_default_query(mut self, query: impl Into<String>) -> Self {
        self.default_query = Some(query.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The detection expression, if it is present and not blank.
    pub fn detection_source(&self) -> Option<&str> {
        self.detection_expression
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "type", default)]
    types: Vec<TestObjectType>,
}

/// Test object types keyed by [`Eid`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    types: BTreeMap<Eid, TestObjectType>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog embedded in this crate.
    pub fn builtin() -> Self {
        match Self::from_toml_str(BUILTIN_CATALOG) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(error = %e, "built-in catalog is invalid");
                Self::new()
            }
        }
    }

    pub fn from_types(
        types: impl IntoIterator<Item = TestObjectType>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for object_type in types {
            catalog.insert(object_type)?;
        }
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::from_types(file.types)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Add a type. Identifiers must be non-empty and unique.
    pub fn insert(&mut self, object_type: TestObjectType) -> Result<(), CatalogError> {
        if object_type.id.as_str().trim().is_empty() {
            return Err(CatalogError::EmptyId);
        }
        if self.types.contains_key(&object_type.id) {
            return Err(CatalogError::DuplicateId(object_type.id));
        }
        self.types.insert(object_type.id.clone(), object_type);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TestObjectType> {
        self.types.get(id)
    }

    /// Types in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &TestObjectType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
