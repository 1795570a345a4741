//! Values produced by one sniff of a document.

use super::engine::ProbeId;
use super::expr::ValueKind;
use crate::error::EvalError;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeValue {
    Boolean(bool),
    String(String),
    /// A bare location path: whether it selected anything, and the string
    /// value of the first selected node.
    NodeSet {
        matched: bool,
        first: Option<String>,
    },
}

impl ProbeValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ProbeValue::Boolean(_) => ValueKind::Boolean,
            ProbeValue::String(_) => ValueKind::String,
            ProbeValue::NodeSet { .. } => ValueKind::NodeSet,
        }
    }
}

/// Probe results keyed by [`ProbeId`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffResults {
    values: Vec<ProbeValue>,
}

impl SniffResults {
    pub(crate) fn new(values: Vec<ProbeValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, probe: ProbeId) -> Option<&ProbeValue> {
        self.values.get(probe.index())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read a probe as a boolean. Node-sets convert to "non-empty"; strings
    /// are a type mismatch.
    pub fn boolean(&self, probe: ProbeId) -> Result<bool, EvalError> {
        match self.lookup(probe)? {
            ProbeValue::Boolean(value) => Ok(*value),
            ProbeValue::NodeSet { matched, .. } => Ok(*matched),
            other => Err(mismatch(probe, ValueKind::Boolean, other)),
        }
    }

    /// Read a probe as a string. Node-sets convert to the string value of
    /// their first node; booleans are a type mismatch.
    pub fn string(&self, probe: ProbeId) -> Result<String, EvalError> {
        match self.lookup(probe)? {
            ProbeValue::String(value) => Ok(value.clone()),
            ProbeValue::NodeSet { first, .. } => Ok(first.clone().unwrap_or_default()),
            other => Err(mismatch(probe, ValueKind::String, other)),
        }
    }

    fn lookup(&self, probe: ProbeId) -> Result<&ProbeValue, EvalError> {
        self.get(probe).ok_or(EvalError::MissingProbe {
            probe: probe.index(),
        })
    }
}

fn mismatch(probe: ProbeId, expected: ValueKind, actual: &ProbeValue) -> EvalError {
    EvalError::TypeMismatch {
        probe: probe.index(),
        expected: expected.name(),
        actual: actual.kind().name(),
    }
}
