//! KEELSON Core - Entity Types
//!
//! Pure data structures with no coordination behavior. All other crates
//! depend on this. This crate contains data types, error taxonomy, and
//! configuration - no business logic.

pub mod anomaly;
pub mod config;
pub mod error;
pub mod identity;
pub mod payload;
pub mod snapshot;
pub mod task;

pub use anomaly::{Anomaly, AnomalyContext, AnomalyType, Severity};
pub use config::{ContextStoreConfig, KeelsonConfig, OrchestratorConfig, StateConfig};
pub use error::{
    ConfigError, ContextError, KeelsonError, KeelsonResult, OrchestrationError, RecoveryError,
    StateError,
};
pub use identity::{
    compute_content_hash, hash_hex, new_entity_id, AgentId, ContentHash, ContextId, EntityId,
    StateKey, Timestamp,
};
pub use payload::ContextPayload;
pub use snapshot::{EnvironmentSnapshot, ResourceUsage};
pub use task::{Task, TaskPhase, TaskStep};
