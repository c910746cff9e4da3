//! Environment snapshots.
//!
//! A snapshot is an immutable, typed capture of resource and agent-population
//! state at a point in time. Snapshots are embedded in context records and
//! recovery points; restoring a recovery point reinstates its snapshot.

use crate::identity::{compute_content_hash, AgentId, ContentHash, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Resource usage figures captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    /// Approximate bytes held by the coordination substrate.
    pub memory_bytes: u64,
    /// Number of live contexts at capture time.
    pub context_count: usize,
    /// Depth of the state change history at capture time.
    pub history_depth: usize,
}

/// Opaque-to-callers capture of resource/agent-population state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// When this snapshot was taken.
    pub captured_at: Timestamp,
    /// Resource usage at capture time.
    pub resources: ResourceUsage,
    /// Agents considered active at capture time.
    pub active_agents: Vec<AgentId>,
}

impl EnvironmentSnapshot {
    /// Capture a snapshot from the given figures.
    pub fn capture(resources: ResourceUsage, active_agents: Vec<AgentId>) -> Self {
        Self {
            captured_at: Utc::now(),
            resources,
            active_agents,
        }
    }

    /// An empty snapshot, used when a context is created before any
    /// environment data is available.
    pub fn empty() -> Self {
        Self {
            captured_at: Utc::now(),
            resources: ResourceUsage::default(),
            active_agents: Vec::new(),
        }
    }

    /// SHA-256 hash over the serialized snapshot, for integrity checks
    /// when a snapshot round-trips through a recovery point.
    pub fn content_hash(&self) -> ContentHash {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        compute_content_hash(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_agents() {
        let snapshot = EnvironmentSnapshot::capture(
            ResourceUsage {
                memory_bytes: 4096,
                context_count: 3,
                history_depth: 12,
            },
            vec!["agent-1".to_string(), "agent-2".to_string()],
        );
        assert_eq!(snapshot.active_agents.len(), 2);
        assert_eq!(snapshot.resources.context_count, 3);
    }

    #[test]
    fn test_empty_snapshot_has_no_agents() {
        let snapshot = EnvironmentSnapshot::empty();
        assert!(snapshot.active_agents.is_empty());
        assert_eq!(snapshot.resources, ResourceUsage::default());
    }

    #[test]
    fn test_content_hash_stable_for_same_snapshot() {
        let snapshot = EnvironmentSnapshot::empty();
        assert_eq!(snapshot.content_hash(), snapshot.content_hash());
    }
}
