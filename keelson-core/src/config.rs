//! Configuration types

use crate::error::{ConfigError, KeelsonError, KeelsonResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Context store tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStoreConfig {
    /// Maximum number of contexts before an eviction sweep runs on create.
    pub max_contexts: usize,
    /// Contexts scoring below this relevance are eligible for eviction.
    pub relevance_threshold: f64,
    /// Contexts older than this (by last access) are evicted regardless of score.
    pub max_age: Duration,
    /// Upper bound on parent-chain walks; guards against index corruption.
    pub max_chain_depth: usize,
    /// Number of relevance samples retained per context.
    pub relevance_history_depth: usize,
}

/// State coordinator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Capacity of each subscriber mailbox. Overflow drops the oldest entry.
    pub mailbox_capacity: usize,
}

/// Task orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Label prefix for the checkpoints taken when a task acquires its locks.
    pub checkpoint_label: String,
}

/// Master configuration struct.
/// ALL values are required - no defaults anywhere except `baseline()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeelsonConfig {
    pub context: ContextStoreConfig,
    pub state: StateConfig,
    pub orchestrator: OrchestratorConfig,
}

impl KeelsonConfig {
    /// Build a baseline configuration.
    ///
    /// This centralizes the "sane defaults" that embedding systems can reuse
    /// without hardcoding policy at the call site.
    pub fn baseline() -> Self {
        Self {
            context: ContextStoreConfig {
                max_contexts: 1000,
                relevance_threshold: 0.3,
                max_age: Duration::from_secs(3600),
                max_chain_depth: 64,
                relevance_history_depth: 10,
            },
            state: StateConfig {
                mailbox_capacity: 64,
            },
            orchestrator: OrchestratorConfig {
                checkpoint_label: "task".to_string(),
            },
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(KeelsonError::Config) if invalid.
    pub fn validate(&self) -> KeelsonResult<()> {
        if self.context.max_contexts == 0 {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "context.max_contexts".to_string(),
                value: self.context.max_contexts.to_string(),
                reason: "max_contexts must be greater than 0".to_string(),
            }));
        }

        if self.context.relevance_threshold < 0.0 || self.context.relevance_threshold > 1.0 {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "context.relevance_threshold".to_string(),
                value: self.context.relevance_threshold.to_string(),
                reason: "relevance_threshold must be between 0.0 and 1.0".to_string(),
            }));
        }

        if self.context.max_age.is_zero() {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "context.max_age".to_string(),
                value: format!("{:?}", self.context.max_age),
                reason: "max_age must be positive".to_string(),
            }));
        }

        if self.context.max_chain_depth == 0 {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "context.max_chain_depth".to_string(),
                value: self.context.max_chain_depth.to_string(),
                reason: "max_chain_depth must be greater than 0".to_string(),
            }));
        }

        if self.context.relevance_history_depth == 0 {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "context.relevance_history_depth".to_string(),
                value: self.context.relevance_history_depth.to_string(),
                reason: "relevance_history_depth must be greater than 0".to_string(),
            }));
        }

        if self.state.mailbox_capacity == 0 {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "state.mailbox_capacity".to_string(),
                value: self.state.mailbox_capacity.to_string(),
                reason: "mailbox_capacity must be greater than 0".to_string(),
            }));
        }

        if self.orchestrator.checkpoint_label.is_empty() {
            return Err(KeelsonError::Config(ConfigError::InvalidValue {
                field: "orchestrator.checkpoint_label".to_string(),
                value: String::new(),
                reason: "checkpoint_label must be non-empty".to_string(),
            }));
        }

        Ok(())
    }
}
