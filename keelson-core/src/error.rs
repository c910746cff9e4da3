//! Error types for KEELSON operations

use crate::identity::{AgentId, ContextId, StateKey};
use thiserror::Error;

/// Context store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context id conflict: {id} already exists")]
    IdConflict { id: ContextId },

    #[error("Context not found: {id}")]
    NotFound { id: ContextId },

    #[error("Recovery point {index} not found for context {id} ({available} available)")]
    RecoveryPointNotFound {
        id: ContextId,
        index: usize,
        available: usize,
    },

    #[error("Context chain walk for {id} exceeded maximum depth {max_depth}")]
    ChainDepthExceeded { id: ContextId, max_depth: usize },

    #[error("Context store lock poisoned")]
    StorePoisoned,
}

/// Shared state coordination errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Agent {agent_id} does not hold the lock for key {key} (holder: {holder:?})")]
    LockNotHeld {
        key: StateKey,
        agent_id: AgentId,
        holder: Option<AgentId>,
    },

    #[error("State table lock poisoned")]
    TablePoisoned,
}

/// Anomaly recovery errors. These are the structured failure reasons a
/// strategy or fallback reports; they are inputs to the fallback chain,
/// not terminal conditions (except `Critical`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("Insufficient resources: {reason}")]
    InsufficientResources { reason: String },

    #[error("No capable agents for capabilities {required:?}")]
    NoCapableAgents { required: Vec<String> },

    #[error("Context unrecoverable: {context_id:?}")]
    ContextUnrecoverable { context_id: Option<ContextId> },

    #[error("Delegation failed: {reason}")]
    DelegationFailed { reason: String },

    #[error("Degraded mode unavailable: {reason}")]
    DegradationFailed { reason: String },

    #[error("Critical failure: {reason}")]
    Critical { reason: String },
}

/// Task orchestration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Agent {agent_id} is not registered with the orchestrator")]
    UnknownAgent { agent_id: AgentId },

    #[error("Lock acquisition failed for key {key} (held by {holder:?})")]
    LockAcquisitionFailed {
        key: StateKey,
        holder: Option<AgentId>,
    },

    #[error("Step {step_index} failed for agent {agent_id}: {reason}")]
    StepFailed {
        step_index: usize,
        agent_id: AgentId,
        reason: String,
    },

    #[error("Recovery escalated for task: {reason}")]
    RecoveryEscalated { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all KEELSON errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeelsonError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for KEELSON operations.
pub type KeelsonResult<T> = Result<T, KeelsonError>;

// =============================================================================
// TESTS
// =============================================================================
