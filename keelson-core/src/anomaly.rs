//! Anomaly types for the recovery engine.
//!
//! Anomaly classification is a closed enum, not a string key: the mapping
//! from anomaly type to recovery strategy and fallback chain is checked
//! exhaustively at compile time.

use crate::identity::{new_entity_id, ContextId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    /// Resource constraint (memory, quota, budget).
    Resource,
    /// The handling agent lacks a required capability.
    Capability,
    /// Working context was lost or corrupted.
    Context,
}

/// Severity of an anomaly. Carried for operators and logging; strategy
/// selection is by type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Context gathered while analyzing an anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnomalyContext {
    /// Capabilities the failed operation required (capability anomalies).
    pub required_capabilities: Vec<String>,
    /// Context the anomaly relates to (context anomalies).
    pub context_id: Option<ContextId>,
    /// Free-form diagnostic detail.
    pub detail: Option<Value>,
}

/// A classified failure routed through the recovery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Unique identifier for this anomaly.
    pub anomaly_id: EntityId,
    /// Classification driving strategy selection.
    pub anomaly_type: AnomalyType,
    /// Severity, for operators.
    pub severity: Severity,
    /// Gathered diagnostic context.
    pub gathered_context: AnomalyContext,
}

impl Anomaly {
    /// Create a new anomaly.
    pub fn new(anomaly_type: AnomalyType, severity: Severity) -> Self {
        Self {
            anomaly_id: new_entity_id(),
            anomaly_type,
            severity,
            gathered_context: AnomalyContext::default(),
        }
    }

    /// Set required capabilities.
    pub fn with_required_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.gathered_context.required_capabilities = capabilities;
        self
    }

    /// Set the related context.
    pub fn with_context_id(mut self, context_id: &str) -> Self {
        self.gathered_context.context_id = Some(context_id.to_string());
        self
    }

    /// Set diagnostic detail.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.gathered_context.detail = Some(detail);
        self
    }
}
