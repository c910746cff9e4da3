//! Identity types for KEELSON entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Caller-supplied context identifier (e.g. "task-1", "task-1/sub-1").
/// Contexts are addressed by the submitting system, not minted internally.
pub type ContextId = String;

/// Caller-supplied agent identifier.
pub type AgentId = String;

/// Key into the shared state table.
pub type StateKey = String;

/// Internally generated identifier using UUIDv7 for timestamp-sortable IDs.
/// Used for records the substrate mints itself (change records, tasks,
/// anomalies, recovery attempts).
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for snapshot integrity verification.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Render a content hash as lowercase hex for logs and diagnostics.
pub fn hash_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}
