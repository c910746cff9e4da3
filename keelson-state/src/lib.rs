//! KEELSON State - Shared State Coordination
//!
//! A per-key advisory lock table over shared state, with versioned writes,
//! an append-only change history, and subscriber notification through
//! bounded per-agent mailboxes. Locks are advisory: they gate writes through
//! the coordinator, not reads, and nothing stops an agent that bypasses the
//! coordinator entirely.

use chrono::Utc;
use keelson_core::{
    new_entity_id, AgentId, EntityId, KeelsonError, KeelsonResult, StateConfig, StateError,
    StateKey, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

// ============================================================================
// STATE ENTRIES AND CHANGES
// ============================================================================

/// One key of shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// The state key.
    pub key: StateKey,
    /// Current value. Null until the first write.
    pub value: Value,
    /// Monotonic version, bumped on every successful write.
    pub version: u64,
    /// Current advisory lock holder, if any.
    pub holder_agent_id: Option<AgentId>,
}

/// One entry of the append-only change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// Unique identifier for this change.
    pub change_id: EntityId,
    /// The key that changed.
    pub key: StateKey,
    /// Value before the write. `None` for the first write to a key.
    pub old_value: Option<Value>,
    /// Value after the write.
    pub new_value: Value,
    /// Version assigned by the write.
    pub version: u64,
    /// When the write happened.
    pub timestamp: Timestamp,
    /// Agent that performed the write.
    pub agent_id: AgentId,
}

/// A notification delivered to a subscriber's mailbox after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNotification {
    /// The key that changed.
    pub key: StateKey,
    /// Value after the write.
    pub new_value: Value,
    /// Version assigned by the write.
    pub version: u64,
    /// Agent that performed the write.
    pub changed_by: AgentId,
    /// When the write happened.
    pub timestamp: Timestamp,
}

/// Outcome of a non-blocking lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockAttempt {
    /// Whether the requesting agent now holds the lock.
    pub granted: bool,
    /// The current holder. Equal to the requester when granted.
    pub holder: Option<AgentId>,
}

// ============================================================================
// MAILBOXES
// ============================================================================

/// A bounded per-subscriber notification queue. Overflow drops the oldest
/// entry so a stalled subscriber degrades its own view of history, never
/// the writer's progress.
#[derive(Debug)]
struct Mailbox {
    queue: VecDeque<StateNotification>,
    capacity: usize,
    dropped: u64,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    fn push(&mut self, agent_id: &str, notification: StateNotification) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            tracing::warn!(
                agent_id,
                dropped_total = self.dropped,
                "subscriber mailbox full, dropping oldest notification"
            );
        }
        self.queue.push_back(notification);
    }

    fn drain(&mut self) -> Vec<StateNotification> {
        self.queue.drain(..).collect()
    }
}

// ============================================================================
// STATE COORDINATOR
// ============================================================================

#[derive(Debug, Default)]
struct TableInner {
    entries: HashMap<StateKey, StateEntry>,
    history: Vec<StateChange>,
    /// Per-key subscriber lists, in registration order. Notification order
    /// follows registration order, always excluding the writer.
    subscribers: HashMap<StateKey, Vec<AgentId>>,
    mailboxes: HashMap<AgentId, Mailbox>,
}

/// The shared state coordinator.
///
/// One structural lock guards the whole table; every operation is atomic
/// with respect to every other. The per-key locks it manages are advisory
/// claims recorded in the table, not OS locks.
pub struct StateCoordinator {
    inner: RwLock<TableInner>,
    config: StateConfig,
}

impl StateCoordinator {
    /// Create a coordinator with the given configuration.
    pub fn new(config: StateConfig) -> Self {
        Self {
            inner: RwLock::new(TableInner::default()),
            config,
        }
    }

    /// Request the advisory lock for a key. Non-blocking: the result says
    /// whether the lock was granted and who holds it.
    ///
    /// Re-acquiring a lock already held by the same agent succeeds
    /// idempotently. Locking a key that has never been written registers it
    /// with a null value at version 0.
    pub fn request_lock(&self, key: &str, agent_id: &str) -> KeelsonResult<LockAttempt> {
        let mut inner = self.write_table()?;
        let entry = entry_mut(&mut inner, key);

        match &entry.holder_agent_id {
            Some(holder) if holder != agent_id => Ok(LockAttempt {
                granted: false,
                holder: Some(holder.clone()),
            }),
            _ => {
                entry.holder_agent_id = Some(agent_id.to_string());
                Ok(LockAttempt {
                    granted: true,
                    holder: Some(agent_id.to_string()),
                })
            }
        }
    }

    /// Release the advisory lock for a key.
    ///
    /// Idempotent: releasing a lock the agent does not hold (including a
    /// lock held by another agent) is a no-op. Returns whether a lock was
    /// actually released.
    pub fn release_lock(&self, key: &str, agent_id: &str) -> KeelsonResult<bool> {
        let mut inner = self.write_table()?;
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(false);
        };
        if entry.holder_agent_id.as_deref() == Some(agent_id) {
            entry.holder_agent_id = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Write a value to a key.
    ///
    /// The writer must hold the key's lock; otherwise `LockNotHeld` reports
    /// the actual holder. A successful write bumps the version, appends to
    /// the change history, and enqueues a notification for every subscriber
    /// of the key except the writer, in registration order. Returns the new
    /// version.
    pub fn update_state(&self, key: &str, value: Value, agent_id: &str) -> KeelsonResult<u64> {
        let mut inner = self.write_table()?;

        let holder = inner
            .entries
            .get(key)
            .and_then(|e| e.holder_agent_id.clone());
        if holder.as_deref() != Some(agent_id) {
            return Err(KeelsonError::State(StateError::LockNotHeld {
                key: key.to_string(),
                agent_id: agent_id.to_string(),
                holder,
            }));
        }

        let now = Utc::now();
        let (old_value, version) = {
            let entry = entry_mut(&mut inner, key);
            let old_value = if entry.version == 0 {
                None
            } else {
                Some(entry.value.clone())
            };
            entry.value = value.clone();
            entry.version += 1;
            (old_value, entry.version)
        };

        inner.history.push(StateChange {
            change_id: new_entity_id(),
            key: key.to_string(),
            old_value,
            new_value: value.clone(),
            version,
            timestamp: now,
            agent_id: agent_id.to_string(),
        });

        let recipients: Vec<AgentId> = inner
            .subscribers
            .get(key)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.as_str() != agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let capacity = self.config.mailbox_capacity;
        for recipient in recipients {
            let notification = StateNotification {
                key: key.to_string(),
                new_value: value.clone(),
                version,
                changed_by: agent_id.to_string(),
                timestamp: now,
            };
            inner
                .mailboxes
                .entry(recipient.clone())
                .or_insert_with(|| Mailbox::new(capacity))
                .push(&recipient, notification);
        }

        Ok(version)
    }

    /// Subscribe an agent to changes of a key. Duplicate subscriptions are
    /// collapsed; the agent keeps its original position in the order.
    pub fn subscribe(&self, key: &str, agent_id: &str) -> KeelsonResult<()> {
        let mut inner = self.write_table()?;
        let subs = inner.subscribers.entry(key.to_string()).or_default();
        if !subs.iter().any(|s| s == agent_id) {
            subs.push(agent_id.to_string());
        }
        Ok(())
    }

    /// Unsubscribe an agent from a key. No-op if not subscribed. Pending
    /// notifications already in the mailbox are kept.
    pub fn unsubscribe(&self, key: &str, agent_id: &str) -> KeelsonResult<()> {
        let mut inner = self.write_table()?;
        if let Some(subs) = inner.subscribers.get_mut(key) {
            subs.retain(|s| s != agent_id);
        }
        Ok(())
    }

    /// Take all pending notifications for an agent, oldest first.
    pub fn drain_notifications(&self, agent_id: &str) -> KeelsonResult<Vec<StateNotification>> {
        let mut inner = self.write_table()?;
        Ok(inner
            .mailboxes
            .get_mut(agent_id)
            .map(Mailbox::drain)
            .unwrap_or_default())
    }

    /// Current value of a key. `None` if the key has never been registered.
    pub fn get_state(&self, key: &str) -> KeelsonResult<Option<Value>> {
        let inner = self.read_table()?;
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    /// Current version of a key. 0 if never written or never registered.
    pub fn version(&self, key: &str) -> KeelsonResult<u64> {
        let inner = self.read_table()?;
        Ok(inner.entries.get(key).map(|e| e.version).unwrap_or(0))
    }

    /// Current lock holder of a key.
    pub fn holder(&self, key: &str) -> KeelsonResult<Option<AgentId>> {
        let inner = self.read_table()?;
        Ok(inner
            .entries
            .get(key)
            .and_then(|e| e.holder_agent_id.clone()))
    }

    /// Change history for a key, oldest first.
    pub fn history(&self, key: &str) -> KeelsonResult<Vec<StateChange>> {
        let inner = self.read_table()?;
        Ok(inner
            .history
            .iter()
            .filter(|c| c.key == key)
            .cloned()
            .collect())
    }

    /// Full change history across all keys, in write order.
    pub fn full_history(&self) -> KeelsonResult<Vec<StateChange>> {
        let inner = self.read_table()?;
        Ok(inner.history.clone())
    }

    /// Keys currently locked by an agent, in lexicographic order.
    pub fn held_locks(&self, agent_id: &str) -> KeelsonResult<Vec<StateKey>> {
        let inner = self.read_table()?;
        let mut keys: Vec<StateKey> = inner
            .entries
            .values()
            .filter(|e| e.holder_agent_id.as_deref() == Some(agent_id))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn read_table(&self) -> KeelsonResult<std::sync::RwLockReadGuard<'_, TableInner>> {
        self.inner
            .read()
            .map_err(|_| KeelsonError::State(StateError::TablePoisoned))
    }

    fn write_table(&self) -> KeelsonResult<std::sync::RwLockWriteGuard<'_, TableInner>> {
        self.inner
            .write()
            .map_err(|_| KeelsonError::State(StateError::TablePoisoned))
    }
}

fn entry_mut<'a>(inner: &'a mut TableInner, key: &str) -> &'a mut StateEntry {
    inner
        .entries
        .entry(key.to_string())
        .or_insert_with(|| StateEntry {
            key: key.to_string(),
            value: Value::Null,
            version: 0,
            holder_agent_id: None,
        })
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use keelson_core::KeelsonConfig;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// Versions assigned to a key are exactly 1..=n for n writes, in order.
        #[test]
        fn prop_versions_are_dense_and_monotonic(writes in 1usize..40) {
            let coord = StateCoordinator::new(KeelsonConfig::baseline().state);
            coord.request_lock("k", "w").unwrap();
            for i in 0..writes {
                let version = coord.update_state("k", json!(i), "w").unwrap();
                prop_assert_eq!(version, (i + 1) as u64);
            }
            let history = coord.history("k").unwrap();
            prop_assert_eq!(history.len(), writes);
        }

        /// A mailbox never exceeds its configured capacity.
        #[test]
        fn prop_mailbox_bounded(capacity in 1usize..16, writes in 0usize..48) {
            let coord = StateCoordinator::new(StateConfig { mailbox_capacity: capacity });
            coord.subscribe("k", "listener").unwrap();
            coord.request_lock("k", "w").unwrap();
            for i in 0..writes {
                coord.update_state("k", json!(i), "w").unwrap();
            }
            let pending = coord.drain_notifications("listener").unwrap();
            prop_assert!(pending.len() <= capacity);
            prop_assert_eq!(pending.len(), writes.min(capacity));
        }
    }
}
