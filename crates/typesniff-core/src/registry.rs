//! Registry of compiled detection expressions.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::catalog::{Catalog, Eid};
use crate::error::CompileError;
use crate::expression::{CompiledDetectionExpression, api_features_marker};
use crate::sniff::SniffEngine;

/// A catalog type left out of the registry because it failed to compile.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedType {
    pub id: Eid,
    pub error: CompileError,
}

/// Every compiled expression of a catalog, sharing one [`SniffEngine`].
///
/// Expressions are kept in priority order and indexed by type identifier.
/// A registry is built completely by [`ExpressionRegistry::compile`] and is
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct ExpressionRegistry {
    engine: SniffEngine,
    expressions: Vec<CompiledDetectionExpression>,
    by_id: HashMap<Eid, usize>,
    skipped: Vec<SkippedType>,
}

impl ExpressionRegistry {
    /// Compile every type of `catalog` that has a detection expression.
    ///
    /// Types whose expressions fail to compile are logged and recorded in
    /// [`skipped`](Self::skipped).
    pub fn compile(catalog: &Catalog) -> Self {
        let marker = api_features_marker();
        let mut engine = SniffEngine::new();
        let mut expressions = Vec::with_capacity(catalog.len());
        let mut skipped = Vec::new();

        for object_type in catalog.iter() {
            if object_type.detection_source().is_none() {
                debug!(type_id = %object_type.id, "no detection expression");
                continue;
            }
            match CompiledDetectionExpression::compile(object_type, &mut engine, &marker) {
                Ok(expression) => expressions.push(expression),
                Err(error) => {
                    warn!(type_id = %object_type.id, error = %error, "skipping type");
                    skipped.push(SkippedType {
                        id: object_type.id.clone(),
                        error,
                    });
                }
            }
        }

        expressions.sort();
        let by_id = expressions
            .iter()
            .enumerate()
            .map(|(i, expression)| (expression.id().clone(), i))
            .collect();

        debug!(
            compiled = expressions.len(),
            skipped = skipped.len(),
            probes = engine.len(),
            "expression registry ready"
        );
        Self {
            engine,
            expressions,
            by_id,
            skipped,
        }
    }

    pub fn engine(&self) -> &SniffEngine {
        &self.engine
    }

    /// Compiled expressions, best ranked first.
    pub fn expressions(&self) -> &[CompiledDetectionExpression] {
        &self.expressions
    }

    pub fn get(&self, id: &str) -> Option<&CompiledDetectionExpression> {
        self.by_id.get(id).map(|&i| &self.expressions[i])
    }

    pub fn skipped(&self) -> &[SkippedType] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TestObjectType;

    fn catalog() -> Catalog {
        Catalog::from_types([
            TestObjectType::new("low", "Low").with_detection_expression("boolean(/a)"),
            TestObjectType::new("high", "High")
                .with_detection_expression("boolean(/b)")
                .with_priority(10),
            TestObjectType::new("mid-b", "Mid B")
                .with_detection_expression("boolean(/c)")
                .with_priority(5),
            TestObjectType::new("mid-a", "Mid A")
                .with_detection_expression("boolean(/d)")
                .with_priority(5),
            TestObjectType::new("no-expression", "Nothing"),
            TestObjectType::new("broken", "Broken").with_detection_expression("boolean(/a["),
            TestObjectType::new("stringly", "Stringly").with_detection_expression("string(/a)"),
        ])
        .unwrap()
    }

    #[test]
    fn sorts_by_priority_then_id() {
        let registry = ExpressionRegistry::compile(&catalog());
        let ids: Vec<&str> = registry
            .expressions()
            .iter()
            .map(|e| e.id().as_str())
            .collect();
        assert_eq!(ids, ["high", "mid-a", "mid-b", "low"]);
    }

    #[test]
    fn index_and_sequence_agree() {
        let registry = ExpressionRegistry::compile(&catalog());
        assert_eq!(registry.len(), 4);
        for expression in registry.expressions() {
            assert_eq!(registry.get(expression.id().as_str()), Some(expression));
        }
        assert!(registry.get("no-expression").is_none());
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn records_skipped_types() {
        let registry = ExpressionRegistry::compile(&catalog());
        let skipped: Vec<&str> = registry.skipped().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(skipped, ["broken", "stringly"]);
        assert!(matches!(
            registry.skipped()[1].error,
            CompileError::NotBoolean { .. }
        ));
    }

    #[test]
    fn empty_catalog_compiles_to_empty_registry() {
        let registry = ExpressionRegistry::compile(&Catalog::new());
        assert!(registry.is_empty());
        assert!(registry.engine().is_empty());
    }

    #[test]
    fn builtin_catalog_compiles_cleanly() {
        let registry = ExpressionRegistry::compile(&Catalog::builtin());
        assert!(registry.skipped().is_empty(), "{:?}", registry.skipped());
        assert_eq!(registry.expressions()[0].id().as_str(), "ogcapi-features-1.0");
        assert!(registry.expressions()[0].is_api_features());
        assert_eq!(registry.expressions().last().unwrap().id().as_str(), "xml");
    }
}
