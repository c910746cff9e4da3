//! KEELSON Context - Hierarchical Context Store
//!
//! Owns context records arranged as a forest (parent links, derived child
//! sets), append-only recovery points, adaptation rules, and the
//! relevance-driven eviction sweep. All cross-agent access goes through the
//! store's operations; callers never hold references into its internals.

use chrono::Utc;
use keelson_core::{
    ContextError, ContextId, ContextPayload, ContextStoreConfig, EnvironmentSnapshot,
    KeelsonError, KeelsonResult, ResourceUsage, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

// ============================================================================
// LIFECYCLE STATE
// ============================================================================

/// Lifecycle state of a context record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Created, no work attached yet.
    Initialized,
    /// Actively used by a task.
    Active,
    /// Operating with reduced capabilities.
    Degraded,
    /// Being restored from a recovery point.
    Recovering,
    /// Finished; retained only until eviction.
    Terminated,
}

impl LifecycleState {
    /// Convert to stable string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Active => "active",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Recovering => "recovering",
            LifecycleState::Terminated => "terminated",
        }
    }

    /// Parse from stable string representation.
    pub fn from_db_str(s: &str) -> Result<Self, LifecycleStateParseError> {
        match s.to_lowercase().as_str() {
            "initialized" => Ok(LifecycleState::Initialized),
            "active" => Ok(LifecycleState::Active),
            "degraded" => Ok(LifecycleState::Degraded),
            "recovering" => Ok(LifecycleState::Recovering),
            "terminated" => Ok(LifecycleState::Terminated),
            _ => Err(LifecycleStateParseError(s.to_string())),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for LifecycleState {
    type Err = LifecycleStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid lifecycle state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleStateParseError(pub String);

impl fmt::Display for LifecycleStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid lifecycle state: {}", self.0)
    }
}

impl std::error::Error for LifecycleStateParseError {}

// ============================================================================
// CONTEXT RECORD
// ============================================================================

/// An immutable snapshot of context state, restorable later.
/// Recovery point history is append-only and never truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    /// When this point was recorded.
    pub timestamp: Timestamp,
    /// Caller-supplied label for the checkpoint.
    pub label: String,
    /// Lifecycle state at checkpoint time; restored on rollback.
    pub state: LifecycleState,
    /// Environment capture at checkpoint time; restored on rollback.
    pub environment: EnvironmentSnapshot,
}

/// One entry of a context's adaptation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    /// When the adaptation was applied.
    pub timestamp: Timestamp,
    /// Lifecycle state before the adaptation.
    pub previous_state: LifecycleState,
    /// Conditions that triggered the adaptation.
    pub conditions: AdaptationConditions,
}

/// A tracked unit of task/agent state with lineage, checkpoints, and a
/// relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Caller-supplied unique identifier.
    pub context_id: ContextId,
    /// Parent link; `None` for roots. Forms a forest, never a cycle.
    pub parent_id: Option<ContextId>,
    /// When the context was created.
    pub created_at: Timestamp,
    /// Last retrieval or update. Reads are mutations here: they feed
    /// relevance and eviction decisions.
    pub last_accessed_at: Timestamp,
    /// Number of successful retrievals.
    pub access_count: u64,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Environment capture from creation or the last restore.
    pub environment: EnvironmentSnapshot,
    /// Typed payload carried by this context.
    pub payload: ContextPayload,
    /// Append-only checkpoint history.
    pub recovery_points: Vec<RecoveryPoint>,
    /// Append-only adaptation history.
    pub adaptation_history: Vec<AdaptationRecord>,
    /// Importance in [0,1], computed from the payload at creation.
    pub importance_score: f64,
    /// Derived child set, maintained by the store. Registration order.
    pub child_ids: Vec<ContextId>,
}

/// Child context data returned by hierarchy queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildContext {
    pub context_id: ContextId,
    pub lifecycle_state: LifecycleState,
    pub payload: ContextPayload,
}

/// One link of a parent chain, nearest ancestor first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub context_id: ContextId,
    pub lifecycle_state: LifecycleState,
    pub payload: ContextPayload,
}

/// Context data returned by `retrieve_context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub context_id: ContextId,
    pub lifecycle_state: LifecycleState,
    pub payload: ContextPayload,
    /// Populated only when children were requested.
    pub children: Vec<ChildContext>,
}

// ============================================================================
// ADAPTATION RULES
// ============================================================================

/// Conditions evaluated against registered adaptation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdaptationConditions {
    /// Resource pressure was detected.
    pub resource_constrained: bool,
    /// Observed error rate in [0,1].
    pub error_rate: f64,
    /// A dependency of this context is degraded.
    pub dependency_degraded: bool,
    /// A recovery pass has been requested for this context.
    pub recovery_requested: bool,
}

/// A registered adaptation rule.
///
/// All matching rules apply in registration order, each transforming the
/// state produced by the previous one - not first-match-wins.
pub struct AdaptationRule {
    name: String,
    predicate: Box<dyn Fn(&AdaptationConditions) -> bool + Send + Sync>,
    apply: Box<dyn Fn(LifecycleState, &AdaptationConditions) -> LifecycleState + Send + Sync>,
}

impl AdaptationRule {
    /// Create a rule from a predicate and a state transform.
    pub fn new<P, A>(name: &str, predicate: P, apply: A) -> Self
    where
        P: Fn(&AdaptationConditions) -> bool + Send + Sync + 'static,
        A: Fn(LifecycleState, &AdaptationConditions) -> LifecycleState + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            predicate: Box::new(predicate),
            apply: Box::new(apply),
        }
    }

    /// Rule name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for AdaptationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptationRule")
            .field("name", &self.name)
            .finish()
    }
}

/// The stock rule set: degrade under resource pressure or high error rate,
/// enter recovery on request, return to active when conditions clear.
/// Terminated contexts never leave that state.
pub fn default_rules() -> Vec<AdaptationRule> {
    vec![
        AdaptationRule::new(
            "degrade-under-pressure",
            |c| c.resource_constrained || c.error_rate >= 0.1 || c.dependency_degraded,
            |state, _| match state {
                LifecycleState::Terminated => LifecycleState::Terminated,
                _ => LifecycleState::Degraded,
            },
        ),
        AdaptationRule::new(
            "recover-on-request",
            |c| c.recovery_requested,
            |state, _| match state {
                LifecycleState::Terminated => LifecycleState::Terminated,
                _ => LifecycleState::Recovering,
            },
        ),
        AdaptationRule::new(
            "activate-when-healthy",
            |c| {
                !c.resource_constrained
                    && !c.dependency_degraded
                    && !c.recovery_requested
                    && c.error_rate < 0.05
            },
            |state, _| match state {
                LifecycleState::Terminated => LifecycleState::Terminated,
                _ => LifecycleState::Active,
            },
        ),
    ]
}

// ============================================================================
// CONTEXT STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<ContextId, ContextRecord>,
    /// Bounded per-context relevance samples, most recent last.
    relevance_history: HashMap<ContextId, Vec<f64>>,
}

/// The hierarchical context store.
///
/// A single structural lock guards the store's own indexes: creation,
/// eviction, checkpointing, and reads that bump access metadata are
/// mutually exclusive. This is distinct from the advisory per-key locks
/// the state coordinator exposes.
pub struct ContextStore {
    inner: RwLock<StoreInner>,
    rules: RwLock<Vec<AdaptationRule>>,
    config: ContextStoreConfig,
}

impl ContextStore {
    /// Create a store with the given configuration and no adaptation rules.
    pub fn new(config: ContextStoreConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            rules: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Create a store with the stock adaptation rule set.
    pub fn with_default_rules(config: ContextStoreConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            rules: RwLock::new(default_rules()),
            config,
        }
    }

    /// Register an adaptation rule. Rules apply in registration order.
    pub fn register_rule(&self, rule: AdaptationRule) -> KeelsonResult<()> {
        let mut rules = self
            .rules
            .write()
            .map_err(|_| KeelsonError::Context(ContextError::StorePoisoned))?;
        rules.push(rule);
        Ok(())
    }

    /// Create a context.
    ///
    /// Fails with `IdConflict` if the id exists. If the store is at
    /// capacity, an eviction sweep runs first. A `parent_id` that does not
    /// resolve yields a root context - degrade-gracefully policy, not an
    /// error.
    pub fn create_context(
        &self,
        id: &str,
        parent_id: Option<&str>,
        payload: ContextPayload,
    ) -> KeelsonResult<ContextRecord> {
        let mut inner = self.write_inner()?;
        if inner.records.contains_key(id) {
            return Err(KeelsonError::Context(ContextError::IdConflict {
                id: id.to_string(),
            }));
        }

        if inner.records.len() >= self.config.max_contexts {
            self.sweep_locked(&mut inner);
        }

        let environment = capture_environment_locked(&inner);
        let resolved_parent = parent_id
            .filter(|p| inner.records.contains_key(*p))
            .map(|p| p.to_string());

        let now = Utc::now();
        let record = ContextRecord {
            context_id: id.to_string(),
            parent_id: resolved_parent.clone(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            lifecycle_state: LifecycleState::Initialized,
            environment,
            importance_score: compute_importance(&payload),
            payload,
            recovery_points: Vec::new(),
            adaptation_history: Vec::new(),
            child_ids: Vec::new(),
        };

        if let Some(parent) = &resolved_parent {
            if let Some(parent_record) = inner.records.get_mut(parent) {
                if !parent_record.child_ids.contains(&record.context_id) {
                    parent_record.child_ids.push(record.context_id.clone());
                }
            }
        }

        inner.records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Adapt a context against the registered rules.
    ///
    /// Every rule whose predicate matches applies, in registration order,
    /// each transforming the state produced by the previous one. Appends a
    /// single adaptation-history entry recording the pre-adaptation state.
    pub fn adapt_context(
        &self,
        id: &str,
        conditions: &AdaptationConditions,
    ) -> KeelsonResult<LifecycleState> {
        let rules = self
            .rules
            .read()
            .map_err(|_| KeelsonError::Context(ContextError::StorePoisoned))?;
        let mut inner = self.write_inner()?;
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| KeelsonError::Context(ContextError::NotFound { id: id.to_string() }))?;

        let previous_state = record.lifecycle_state;
        let mut state = previous_state;
        for rule in rules.iter() {
            if (rule.predicate)(conditions) {
                state = (rule.apply)(state, conditions);
            }
        }

        record.adaptation_history.push(AdaptationRecord {
            timestamp: Utc::now(),
            previous_state,
            conditions: conditions.clone(),
        });
        record.lifecycle_state = state;
        Ok(state)
    }

    /// Append a recovery point capturing the current lifecycle state and a
    /// fresh environment snapshot. History is never truncated. Returns the
    /// index of the new point.
    pub fn add_recovery_point(&self, id: &str, label: &str) -> KeelsonResult<usize> {
        let mut inner = self.write_inner()?;
        let environment = capture_environment_locked(&inner);
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| KeelsonError::Context(ContextError::NotFound { id: id.to_string() }))?;

        record.recovery_points.push(RecoveryPoint {
            timestamp: Utc::now(),
            label: label.to_string(),
            state: record.lifecycle_state,
            environment,
        });
        Ok(record.recovery_points.len() - 1)
    }

    /// Restore a context from a recovery point.
    ///
    /// Resets the lifecycle state and environment to the checkpoint's
    /// values. Later checkpoints are retained: restoration is
    /// non-destructive, enabling redo. Returns the restored state.
    pub fn restore_from_recovery_point(
        &self,
        id: &str,
        index: usize,
    ) -> KeelsonResult<LifecycleState> {
        let mut inner = self.write_inner()?;
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| KeelsonError::Context(ContextError::NotFound { id: id.to_string() }))?;

        let available = record.recovery_points.len();
        let point = record.recovery_points.get(index).cloned().ok_or_else(|| {
            KeelsonError::Context(ContextError::RecoveryPointNotFound {
                id: id.to_string(),
                index,
                available,
            })
        })?;

        record.lifecycle_state = point.state;
        record.environment = point.environment;
        Ok(record.lifecycle_state)
    }

    /// Retrieve a context.
    ///
    /// A missing id is a normal outcome, returned as `(None, 0.0)`.
    /// Every successful retrieval is itself a mutation: it bumps
    /// `last_accessed_at` and `access_count`, and (when relevance is
    /// requested) records the computed score in the relevance history.
    pub fn retrieve_context(
        &self,
        id: &str,
        include_children: bool,
        include_relevance: bool,
    ) -> KeelsonResult<(Option<RetrievedContext>, f64)> {
        let mut inner = self.write_inner()?;
        let now = Utc::now();
        let (retrieved, relevance) = {
            let Some(record) = inner.records.get_mut(id) else {
                return Ok((None, 0.0));
            };
            record.last_accessed_at = now;
            record.access_count += 1;

            let relevance = if include_relevance {
                relevance_of(record, now, &self.config)
            } else {
                1.0
            };

            let retrieved = RetrievedContext {
                context_id: record.context_id.clone(),
                lifecycle_state: record.lifecycle_state,
                payload: record.payload.clone(),
                children: Vec::new(),
            };
            (retrieved, relevance)
        };

        if include_relevance {
            let history = inner
                .relevance_history
                .entry(id.to_string())
                .or_default();
            history.push(relevance);
            if history.len() > self.config.relevance_history_depth {
                history.remove(0);
            }
        }

        let mut retrieved = retrieved;
        if include_children {
            retrieved.children = children_locked(&inner, id);
        }

        Ok((Some(retrieved), relevance))
    }

    /// Update a context's payload, merging or replacing.
    pub fn update_context(
        &self,
        id: &str,
        updates: ContextPayload,
        merge: bool,
    ) -> KeelsonResult<()> {
        let mut inner = self.write_inner()?;
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| KeelsonError::Context(ContextError::NotFound { id: id.to_string() }))?;

        if merge {
            record.payload.merge(&updates);
        } else {
            record.payload.replace(updates);
        }
        record.last_accessed_at = Utc::now();
        Ok(())
    }

    /// Direct children of a context, in registration order.
    pub fn get_child_contexts(&self, id: &str) -> KeelsonResult<Vec<ChildContext>> {
        let inner = self.read_inner()?;
        Ok(children_locked(&inner, id))
    }

    /// Walk parent links upward from `id`, nearest ancestor first.
    ///
    /// Termination is guaranteed by the forest invariant and additionally
    /// bounded by `max_chain_depth` so index corruption cannot cause an
    /// unbounded walk.
    pub fn get_context_chain(&self, id: &str) -> KeelsonResult<Vec<ChainLink>> {
        let inner = self.read_inner()?;
        let mut chain = Vec::new();
        let mut current = match inner.records.get(id) {
            Some(record) => record.parent_id.clone(),
            None => return Ok(chain),
        };

        while let Some(parent_id) = current {
            if chain.len() >= self.config.max_chain_depth {
                return Err(KeelsonError::Context(ContextError::ChainDepthExceeded {
                    id: id.to_string(),
                    max_depth: self.config.max_chain_depth,
                }));
            }
            match inner.records.get(&parent_id) {
                Some(parent) => {
                    chain.push(ChainLink {
                        context_id: parent.context_id.clone(),
                        lifecycle_state: parent.lifecycle_state,
                        payload: parent.payload.clone(),
                    });
                    current = parent.parent_id.clone();
                }
                // Dangling parent link (parent evicted before detach ran,
                // or caller raced a delete): treat as chain end.
                None => break,
            }
        }
        Ok(chain)
    }

    /// Explicitly delete a context. Children are detached, not deleted.
    pub fn delete_context(&self, id: &str) -> KeelsonResult<()> {
        let mut inner = self.write_inner()?;
        if !inner.records.contains_key(id) {
            return Err(KeelsonError::Context(ContextError::NotFound {
                id: id.to_string(),
            }));
        }
        remove_locked(&mut inner, id);
        Ok(())
    }

    /// Run an eviction sweep.
    ///
    /// A context is evicted when its relevance falls below the configured
    /// threshold or its age (by last access) exceeds `max_age`. Eviction
    /// removes the context from all indexes atomically and detaches its
    /// children; they become roots. The structural lock is held for the
    /// full sweep.
    pub fn evict_stale(&self) -> KeelsonResult<Vec<ContextId>> {
        let mut inner = self.write_inner()?;
        Ok(self.sweep_locked(&mut inner))
    }

    /// Capture a typed environment snapshot from current store statistics.
    pub fn capture_environment(&self) -> KeelsonResult<EnvironmentSnapshot> {
        let inner = self.read_inner()?;
        Ok(capture_environment_locked(&inner))
    }

    /// Current relevance of a context, without bumping access metadata.
    pub fn relevance(&self, id: &str) -> KeelsonResult<Option<f64>> {
        let inner = self.read_inner()?;
        let now = Utc::now();
        Ok(inner
            .records
            .get(id)
            .map(|record| relevance_of(record, now, &self.config)))
    }

    /// Recorded relevance samples for a context, oldest first.
    pub fn relevance_history(&self, id: &str) -> KeelsonResult<Vec<f64>> {
        let inner = self.read_inner()?;
        Ok(inner.relevance_history.get(id).cloned().unwrap_or_default())
    }

    /// A point-in-time copy of a record, without bumping access metadata.
    /// Intended for diagnostics and tests; agents use `retrieve_context`.
    pub fn inspect(&self, id: &str) -> KeelsonResult<Option<ContextRecord>> {
        let inner = self.read_inner()?;
        Ok(inner.records.get(id).cloned())
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.records.len())
            .unwrap_or(0)
    }

    /// Whether the store holds no contexts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_inner(&self) -> KeelsonResult<std::sync::RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| KeelsonError::Context(ContextError::StorePoisoned))
    }

    fn write_inner(&self) -> KeelsonResult<std::sync::RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| KeelsonError::Context(ContextError::StorePoisoned))
    }

    fn sweep_locked(&self, inner: &mut StoreInner) -> Vec<ContextId> {
        let now = Utc::now();
        let max_age = self.config.max_age;
        let mut to_remove = Vec::new();

        for (id, record) in &inner.records {
            let age = age_of(record, now);
            if age > max_age {
                to_remove.push(id.clone());
                continue;
            }
            if relevance_of(record, now, &self.config) < self.config.relevance_threshold {
                to_remove.push(id.clone());
            }
        }

        for id in &to_remove {
            remove_locked(inner, id);
        }
        to_remove
    }
}

/// Remove a record and all references to it. Children are detached and
/// become root-like; they are never recursively deleted.
fn remove_locked(inner: &mut StoreInner, id: &str) {
    let record = match inner.records.remove(id) {
        Some(record) => record,
        None => return,
    };

    for child_id in &record.child_ids {
        if let Some(child) = inner.records.get_mut(child_id) {
            child.parent_id = None;
        }
    }

    if let Some(parent_id) = &record.parent_id {
        if let Some(parent) = inner.records.get_mut(parent_id) {
            parent.child_ids.retain(|c| c != id);
        }
    }

    inner.relevance_history.remove(id);
}

fn children_locked(inner: &StoreInner, id: &str) -> Vec<ChildContext> {
    let Some(record) = inner.records.get(id) else {
        return Vec::new();
    };
    record
        .child_ids
        .iter()
        .filter_map(|child_id| inner.records.get(child_id))
        .map(|child| ChildContext {
            context_id: child.context_id.clone(),
            lifecycle_state: child.lifecycle_state,
            payload: child.payload.clone(),
        })
        .collect()
}

fn capture_environment_locked(inner: &StoreInner) -> EnvironmentSnapshot {
    let memory_bytes: u64 = inner
        .records
        .values()
        .map(|r| r.payload.serialized_len() as u64)
        .sum();
    let history_depth = inner
        .records
        .values()
        .map(|r| r.recovery_points.len())
        .sum();
    let active_agents = inner
        .records
        .values()
        .filter(|r| r.lifecycle_state == LifecycleState::Active)
        .map(|r| r.context_id.clone())
        .collect();

    EnvironmentSnapshot::capture(
        ResourceUsage {
            memory_bytes,
            context_count: inner.records.len(),
            history_depth,
        },
        active_agents,
    )
}

fn age_of(record: &ContextRecord, now: Timestamp) -> std::time::Duration {
    (now - record.last_accessed_at)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

/// Relevance = 0.4 * recency decay + 0.3 * access frequency + 0.3 * importance.
///
/// Recency decays exponentially over `max_age`; frequency saturates at 100
/// accesses. All three terms live in [0,1], so the score does too.
fn relevance_of(record: &ContextRecord, now: Timestamp, config: &ContextStoreConfig) -> f64 {
    let age_secs = age_of(record, now).as_secs_f64();
    let max_age_secs = config.max_age.as_secs_f64();
    let recency = (-age_secs / max_age_secs).exp();
    let frequency = (record.access_count as f64 / 100.0).min(1.0);
    0.4 * recency + 0.3 * frequency + 0.3 * record.importance_score
}

/// Importance from payload size, complexity, and a fixed hierarchy weight,
/// averaged and clamped to [0,1].
fn compute_importance(payload: &ContextPayload) -> f64 {
    let serialized = serde_json::to_string(payload).unwrap_or_default();
    let size_score = (serialized.len() as f64 / 1000.0).min(1.0);
    let complexity_score = (serialized.split_whitespace().count() as f64 / 100.0).min(1.0);
    let hierarchy_score = 0.5;
    ((size_score + complexity_score + hierarchy_score) / 3.0).clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_core::KeelsonConfig;
    use serde_json::json;

    fn test_config() -> ContextStoreConfig {
        KeelsonConfig::baseline().context
    }

    fn payload(label: &str) -> ContextPayload {
        ContextPayload::new().with_entry("operation", json!(label))
    }

    fn backdate(store: &ContextStore, id: &str, secs: i64) {
        let mut inner = store.inner.write().unwrap();
        let record = inner.records.get_mut(id).unwrap();
        record.last_accessed_at = Utc::now() - chrono::Duration::seconds(secs);
    }

    #[test]
    fn test_retrieve_missing_returns_none_and_zero() {
        let store = ContextStore::new(test_config());
        let (data, relevance) = store.retrieve_context("ghost", false, true).unwrap();
        assert!(data.is_none());
        assert_eq!(relevance, 0.0);
    }

    #[test]
    fn test_create_then_retrieve_bumps_access_count() {
        let store = ContextStore::new(test_config());
        store.create_context("t1", None, payload("root")).unwrap();

        let (data, relevance) = store.retrieve_context("t1", false, true).unwrap();
        let data = data.unwrap();
        assert_eq!(data.context_id, "t1");
        assert!(relevance > 0.0);

        let record = store.inspect("t1").unwrap().unwrap();
        assert_eq!(record.access_count, 1);
    }

    #[test]
    fn test_create_duplicate_is_id_conflict() {
        let store = ContextStore::new(test_config());
        store.create_context("t1", None, payload("a")).unwrap();
        let err = store.create_context("t1", None, payload("b")).unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Context(ContextError::IdConflict { .. })
        ));
    }

    #[test]
    fn test_missing_parent_creates_root() {
        let store = ContextStore::new(test_config());
        let record = store
            .create_context("orphan", Some("never-created"), payload("x"))
            .unwrap();
        assert!(record.parent_id.is_none());
    }

    #[test]
    fn test_parent_child_indexes_consistent() {
        let store = ContextStore::new(test_config());
        store.create_context("task-1", None, payload("root")).unwrap();
        store
            .create_context("sub-1", Some("task-1"), payload("child"))
            .unwrap();

        let parent = store.inspect("task-1").unwrap().unwrap();
        assert_eq!(parent.child_ids, vec!["sub-1".to_string()]);
        let child = store.inspect("sub-1").unwrap().unwrap();
        assert_eq!(child.parent_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn test_context_chain_returns_ancestors() {
        let store = ContextStore::new(test_config());
        store.create_context("task-1", None, payload("root")).unwrap();
        store
            .create_context("sub-1", Some("task-1"), payload("child"))
            .unwrap();

        let chain = store.get_context_chain("sub-1").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].context_id, "task-1");

        assert!(store.get_context_chain("task-1").unwrap().is_empty());
        assert!(store.get_context_chain("missing").unwrap().is_empty());
    }

    #[test]
    fn test_chain_depth_guard_trips_on_deep_chain() {
        let mut config = test_config();
        config.max_chain_depth = 3;
        let store = ContextStore::new(config);

        store.create_context("c0", None, payload("0")).unwrap();
        for i in 1..=5 {
            let parent = format!("c{}", i - 1);
            store
                .create_context(&format!("c{}", i), Some(&parent), payload("n"))
                .unwrap();
        }

        let err = store.get_context_chain("c5").unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Context(ContextError::ChainDepthExceeded { max_depth: 3, .. })
        ));
    }

    #[test]
    fn test_adapt_applies_rules_in_registration_order() {
        let store = ContextStore::new(test_config());
        store.create_context("t1", None, payload("x")).unwrap();

        // Both rules match; the second sees the first's output.
        store
            .register_rule(AdaptationRule::new(
                "first",
                |_| true,
                |_, _| LifecycleState::Degraded,
            ))
            .unwrap();
        store
            .register_rule(AdaptationRule::new(
                "second",
                |_| true,
                |state, _| {
                    assert_eq!(state, LifecycleState::Degraded);
                    LifecycleState::Recovering
                },
            ))
            .unwrap();

        let state = store
            .adapt_context("t1", &AdaptationConditions::default())
            .unwrap();
        assert_eq!(state, LifecycleState::Recovering);

        let record = store.inspect("t1").unwrap().unwrap();
        assert_eq!(record.adaptation_history.len(), 1);
        assert_eq!(
            record.adaptation_history[0].previous_state,
            LifecycleState::Initialized
        );
    }

    #[test]
    fn test_adapt_missing_context_is_not_found() {
        let store = ContextStore::with_default_rules(test_config());
        let err = store
            .adapt_context("ghost", &AdaptationConditions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Context(ContextError::NotFound { .. })
        ));
    }

    #[test]
    fn test_default_rules_degrade_under_pressure() {
        let store = ContextStore::with_default_rules(test_config());
        store.create_context("t1", None, payload("x")).unwrap();

        let state = store
            .adapt_context(
                "t1",
                &AdaptationConditions {
                    resource_constrained: true,
                    error_rate: 0.15,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(state, LifecycleState::Degraded);
    }

    #[test]
    fn test_recovery_point_append_and_restore() {
        let store = ContextStore::with_default_rules(test_config());
        store.create_context("t1", None, payload("x")).unwrap();

        let idx0 = store.add_recovery_point("t1", "before-risky-op").unwrap();
        assert_eq!(idx0, 0);

        store
            .adapt_context(
                "t1",
                &AdaptationConditions {
                    resource_constrained: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let idx1 = store.add_recovery_point("t1", "degraded").unwrap();
        assert_eq!(idx1, 1);

        let restored = store.restore_from_recovery_point("t1", 0).unwrap();
        assert_eq!(restored, LifecycleState::Initialized);

        // Restoration is non-destructive: later points survive for redo.
        let record = store.inspect("t1").unwrap().unwrap();
        assert_eq!(record.recovery_points.len(), 2);
        let redone = store.restore_from_recovery_point("t1", 1).unwrap();
        assert_eq!(redone, LifecycleState::Degraded);
    }

    #[test]
    fn test_restore_out_of_bounds() {
        let store = ContextStore::new(test_config());
        store.create_context("t1", None, payload("x")).unwrap();
        let err = store.restore_from_recovery_point("t1", 3).unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Context(ContextError::RecoveryPointNotFound {
                index: 3,
                available: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_update_context_merge_and_replace() {
        let store = ContextStore::new(test_config());
        store
            .create_context("t1", None, payload("data_processing"))
            .unwrap();

        store
            .update_context(
                "t1",
                ContextPayload::new().with_entry("progress", json!(0.5)),
                true,
            )
            .unwrap();
        let record = store.inspect("t1").unwrap().unwrap();
        assert_eq!(record.payload.get("operation"), Some(&json!("data_processing")));
        assert_eq!(record.payload.get("progress"), Some(&json!(0.5)));

        store
            .update_context(
                "t1",
                ContextPayload::new().with_entry("fresh", json!(true)),
                false,
            )
            .unwrap();
        let record = store.inspect("t1").unwrap().unwrap();
        assert!(record.payload.get("operation").is_none());
    }

    #[test]
    fn test_eviction_detaches_children() {
        let store = ContextStore::new(test_config());
        store.create_context("task-1", None, payload("root")).unwrap();
        store
            .create_context("sub-1", Some("task-1"), payload("child"))
            .unwrap();

        // Age the parent past max_age; the child stays fresh and accessed.
        backdate(&store, "task-1", 7200);
        store.retrieve_context("sub-1", false, true).unwrap();

        let evicted = store.evict_stale().unwrap();
        assert!(evicted.contains(&"task-1".to_string()));

        let child = store.inspect("sub-1").unwrap().unwrap();
        assert!(child.parent_id.is_none(), "child should be orphaned");
    }

    #[test]
    fn test_eviction_spares_fresh_relevant_contexts() {
        let store = ContextStore::new(test_config());
        store.create_context("busy", None, payload("hot")).unwrap();
        // Accumulate accesses so frequency + recency clear the threshold.
        for _ in 0..50 {
            store.retrieve_context("busy", false, true).unwrap();
        }

        let relevance = store.relevance("busy").unwrap().unwrap();
        assert!(relevance >= store.config.relevance_threshold);

        let evicted = store.evict_stale().unwrap();
        assert!(evicted.is_empty());
        assert!(store.inspect("busy").unwrap().is_some());
    }

    #[test]
    fn test_create_at_capacity_sweeps_first() {
        let mut config = test_config();
        config.max_contexts = 2;
        let store = ContextStore::new(config);

        store.create_context("old", None, payload("a")).unwrap();
        store.create_context("stale", None, payload("b")).unwrap();
        backdate(&store, "old", 7200);
        backdate(&store, "stale", 7200);

        store.create_context("new", None, payload("c")).unwrap();
        assert!(store.inspect("old").unwrap().is_none());
        assert!(store.inspect("stale").unwrap().is_none());
        assert!(store.inspect("new").unwrap().is_some());
    }

    #[test]
    fn test_delete_context_explicit() {
        let store = ContextStore::new(test_config());
        store.create_context("t1", None, payload("x")).unwrap();
        store.delete_context("t1").unwrap();
        assert!(store.is_empty());

        let err = store.delete_context("t1").unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Context(ContextError::NotFound { .. })
        ));
    }

    #[test]
    fn test_relevance_history_is_bounded() {
        let mut config = test_config();
        config.relevance_history_depth = 5;
        let store = ContextStore::new(config);
        store.create_context("t1", None, payload("x")).unwrap();

        for _ in 0..12 {
            store.retrieve_context("t1", false, true).unwrap();
        }
        let history = store.relevance_history("t1").unwrap();
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_capture_environment_counts_active_contexts() {
        let store = ContextStore::with_default_rules(test_config());
        store.create_context("a", None, payload("x")).unwrap();
        store.create_context("b", None, payload("y")).unwrap();
        store
            .adapt_context("a", &AdaptationConditions::default())
            .unwrap();

        let snapshot = store.capture_environment().unwrap();
        assert_eq!(snapshot.resources.context_count, 2);
        assert_eq!(snapshot.active_agents, vec!["a".to_string()]);
    }

    #[test]
    fn test_lifecycle_state_roundtrip() {
        for state in [
            LifecycleState::Initialized,
            LifecycleState::Active,
            LifecycleState::Degraded,
            LifecycleState::Recovering,
            LifecycleState::Terminated,
        ] {
            let parsed = LifecycleState::from_db_str(state.as_db_str()).unwrap();
            assert_eq!(state, parsed);
        }
        assert!(LifecycleState::from_db_str("zombie").is_err());
    }
}
