//! KEELSON Test Utilities
//!
//! Centralized test infrastructure for the KEELSON workspace:
//! - A scriptable mock agent runtime for recovery tests
//! - Proptest generators for core entity types
//! - Test fixtures for common scenarios
//! - Custom assertions for KEELSON-specific validation

// Re-export core types for convenience
pub use keelson_core::{
    Anomaly, AnomalyContext, AnomalyType, ConfigError, ContextError, ContextId, ContextPayload,
    EntityId, EnvironmentSnapshot, KeelsonConfig, KeelsonError, KeelsonResult, OrchestrationError,
    RecoveryError, ResourceUsage, Severity, StateError, StateKey, Task, TaskPhase, TaskStep,
    Timestamp, compute_content_hash, new_entity_id,
};

use keelson_recovery::{AgentRuntime, DelegationOutcome, ResourceReport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// MOCK AGENT RUNTIME
// ============================================================================

/// A runtime whose every capability can be scripted to succeed or fail,
/// with call counts and operator notices recorded for assertion.
///
/// The default scripting fails everything: resources stay insufficient, no
/// agents are capable or available, and no degraded mode exists. Tests
/// enable exactly the paths they exercise.
#[derive(Default)]
pub struct MockRuntime {
    /// Resources report sufficient whenever availability is checked.
    pub resources_sufficient: bool,
    /// Agents returned for any capability query.
    pub capable_agents: Vec<String>,
    /// Whether targeted delegation succeeds.
    pub delegation_succeeds: bool,
    /// Whether delegate-to-any succeeds.
    pub delegate_any_succeeds: bool,
    /// Whether degraded mode is available.
    pub degraded_mode_available: bool,
    /// Whether context reconstruction succeeds.
    pub reconstruction_succeeds: bool,
    /// Whether recovery-point restoration succeeds.
    pub restoration_succeeds: bool,

    optimize_calls: AtomicUsize,
    restore_calls: AtomicUsize,
    reconstruct_calls: AtomicUsize,
    operator_notices: Mutex<Vec<String>>,
    delegations: Mutex<Vec<String>>,
}

impl MockRuntime {
    /// A runtime where every capability succeeds.
    pub fn healthy() -> Self {
        Self {
            resources_sufficient: true,
            capable_agents: vec!["standby-1".to_string()],
            delegation_succeeds: true,
            delegate_any_succeeds: true,
            degraded_mode_available: true,
            reconstruction_succeeds: true,
            restoration_succeeds: true,
            ..Default::default()
        }
    }

    /// A runtime where every capability fails. Routing any anomaly through
    /// it exhausts the fallback chain.
    pub fn exhausted() -> Self {
        Self::default()
    }

    /// Number of resource-optimization calls observed.
    pub fn optimize_calls(&self) -> usize {
        self.optimize_calls.load(Ordering::SeqCst)
    }

    /// Number of recovery-point restorations observed.
    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    /// Number of context reconstructions observed.
    pub fn reconstruct_calls(&self) -> usize {
        self.reconstruct_calls.load(Ordering::SeqCst)
    }

    /// Reasons passed to `notify_operators`, in order.
    pub fn operator_notices(&self) -> Vec<String> {
        self.operator_notices.lock().unwrap().clone()
    }

    /// Delegates that accepted work, in order.
    pub fn delegations(&self) -> Vec<String> {
        self.delegations.lock().unwrap().clone()
    }
}

impl AgentRuntime for MockRuntime {
    fn check_available_resources(&self) -> ResourceReport {
        ResourceReport {
            sufficient: self.resources_sufficient,
            detail: "scripted resource report".to_string(),
        }
    }

    fn optimize_resource_usage(&self) -> Result<(), RecoveryError> {
        self.optimize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn find_agents_with_capabilities(&self, _required: &[String]) -> Vec<String> {
        self.capable_agents.clone()
    }

    fn delegate_task(
        &self,
        delegate: &str,
        _anomaly: &Anomaly,
    ) -> Result<DelegationOutcome, RecoveryError> {
        if self.delegation_succeeds {
            self.delegations.lock().unwrap().push(delegate.to_string());
            Ok(DelegationOutcome {
                delegate: delegate.to_string(),
            })
        } else {
            Err(RecoveryError::DelegationFailed {
                reason: "scripted delegation failure".to_string(),
            })
        }
    }

    fn delegate_to_any(&self, _anomaly: &Anomaly) -> Result<DelegationOutcome, RecoveryError> {
        if self.delegate_any_succeeds {
            let delegate = "standby-any".to_string();
            self.delegations.lock().unwrap().push(delegate.clone());
            Ok(DelegationOutcome { delegate })
        } else {
            Err(RecoveryError::DelegationFailed {
                reason: "no agents available".to_string(),
            })
        }
    }

    fn enter_degraded_mode(&self, _anomaly: &Anomaly) -> Result<(), RecoveryError> {
        if self.degraded_mode_available {
            Ok(())
        } else {
            Err(RecoveryError::DegradationFailed {
                reason: "no reduced mode defined".to_string(),
            })
        }
    }

    fn reconstruct_context(&self, context_id: &str) -> Result<(), RecoveryError> {
        self.reconstruct_calls.fetch_add(1, Ordering::SeqCst);
        if self.reconstruction_succeeds {
            Ok(())
        } else {
            Err(RecoveryError::ContextUnrecoverable {
                context_id: Some(context_id.to_string()),
            })
        }
    }

    fn restore_context(&self, context_id: &str) -> Result<(), RecoveryError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if self.restoration_succeeds {
            Ok(())
        } else {
            Err(RecoveryError::ContextUnrecoverable {
                context_id: Some(context_id.to_string()),
            })
        }
    }

    fn notify_operators(&self, _anomaly: &Anomaly, reason: &str) {
        self.operator_notices
            .lock()
            .unwrap()
            .push(reason.to_string());
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for KEELSON entity types.

    use keelson_core::{
        Anomaly, AnomalyType, ContextPayload, Severity, Task, TaskStep,
    };
    use proptest::prelude::*;
    use serde_json::json;

    /// Identifier-ish strings: short, lowercase, hyphenated.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    pub fn arb_anomaly_type() -> impl Strategy<Value = AnomalyType> {
        prop_oneof![
            Just(AnomalyType::Resource),
            Just(AnomalyType::Capability),
            Just(AnomalyType::Context),
        ]
    }

    pub fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
        ]
    }

    pub fn arb_anomaly() -> impl Strategy<Value = Anomaly> {
        (
            arb_anomaly_type(),
            arb_severity(),
            prop::collection::vec(arb_identifier(), 0..4),
            prop::option::of(arb_identifier()),
        )
            .prop_map(|(anomaly_type, severity, capabilities, context_id)| {
                let mut anomaly = Anomaly::new(anomaly_type, severity)
                    .with_required_capabilities(capabilities);
                if let Some(id) = context_id {
                    anomaly = anomaly.with_context_id(&id);
                }
                anomaly
            })
    }

    pub fn arb_payload() -> impl Strategy<Value = ContextPayload> {
        prop::collection::btree_map(arb_identifier(), "[a-z ]{0,40}", 0..8).prop_map(|entries| {
            let mut payload = ContextPayload::new();
            for (key, value) in entries {
                payload.insert(&key, json!(value));
            }
            payload
        })
    }

    pub fn arb_task_step() -> impl Strategy<Value = TaskStep> {
        (arb_identifier(), arb_identifier())
            .prop_map(|(agent, action)| TaskStep::new(&agent, &action))
    }

    pub fn arb_task() -> impl Strategy<Value = Task> {
        (
            prop::collection::vec(arb_identifier(), 1..6),
            prop::collection::vec(arb_task_step(), 1..6),
        )
            .prop_map(|(keys, steps)| Task::new(keys, steps))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use keelson_context::ContextStore;
    use keelson_core::{ContextPayload, KeelsonConfig, Task, TaskStep};
    use keelson_state::StateCoordinator;
    use serde_json::json;

    /// The baseline configuration, validated.
    pub fn test_config() -> KeelsonConfig {
        let config = KeelsonConfig::baseline();
        config
            .validate()
            .expect("baseline configuration must validate");
        config
    }

    /// An empty context store with the stock adaptation rules.
    pub fn context_store() -> ContextStore {
        ContextStore::with_default_rules(test_config().context)
    }

    /// An empty state coordinator.
    pub fn state_coordinator() -> StateCoordinator {
        StateCoordinator::new(test_config().state)
    }

    /// A small payload naming an operation.
    pub fn operation_payload(operation: &str) -> ContextPayload {
        ContextPayload::new()
            .with_entry("operation", json!(operation))
            .with_entry("progress", json!(0.0))
    }

    /// A two-agent task: agent-1 processes `data`, agent-2 validates into
    /// `result`.
    pub fn two_agent_task() -> Task {
        Task::new(
            vec!["data".to_string(), "result".to_string()],
            vec![
                TaskStep::new("agent-1", "process"),
                TaskStep::new("agent-2", "validate"),
            ],
        )
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for KEELSON result types.

    use keelson_core::{KeelsonError, KeelsonResult};

    /// Assert a result is Ok, with a useful failure message.
    pub fn assert_ok<T: std::fmt::Debug>(result: &KeelsonResult<T>) {
        assert!(result.is_ok(), "expected Ok, got {:?}", result);
    }

    /// Assert a result is Err, with a useful failure message.
    pub fn assert_err<T: std::fmt::Debug>(result: &KeelsonResult<T>) {
        assert!(result.is_err(), "expected Err, got {:?}", result);
    }

    /// Assert a result failed with a state coordination error.
    pub fn assert_state_error<T: std::fmt::Debug>(result: &KeelsonResult<T>) {
        match result {
            Err(KeelsonError::State(_)) => {}
            other => panic!("expected state error, got {:?}", other),
        }
    }

    /// Assert a result failed with a context store error.
    pub fn assert_context_error<T: std::fmt::Debug>(result: &KeelsonResult<T>) {
        match result {
            Err(KeelsonError::Context(_)) => {}
            other => panic!("expected context error, got {:?}", other),
        }
    }

    /// Assert a result failed with an orchestration error.
    pub fn assert_orchestration_error<T: std::fmt::Debug>(result: &KeelsonResult<T>) {
        match result {
            Err(KeelsonError::Orchestration(_)) => {}
            other => panic!("expected orchestration error, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_recovery::RecoveryEngine;
    use std::sync::Arc;

    #[test]
    fn test_healthy_runtime_resolves_every_anomaly_type() {
        for anomaly_type in [
            AnomalyType::Resource,
            AnomalyType::Capability,
            AnomalyType::Context,
        ] {
            let engine = RecoveryEngine::new(Arc::new(MockRuntime::healthy()));
            let anomaly =
                Anomaly::new(anomaly_type, Severity::Medium).with_context_id("fixture-ctx");
            let outcome = engine.handle_anomaly(&anomaly).unwrap();
            assert!(outcome.success, "{anomaly_type:?} should resolve");
        }
    }

    #[test]
    fn test_exhausted_runtime_goes_critical() {
        let runtime = Arc::new(MockRuntime::exhausted());
        let engine = RecoveryEngine::new(runtime.clone());
        let anomaly = Anomaly::new(AnomalyType::Resource, Severity::High);
        let outcome = engine.handle_anomaly(&anomaly).unwrap();
        assert!(outcome.critical);
        assert_eq!(runtime.operator_notices().len(), 1);
    }

    #[test]
    fn test_fixtures_are_internally_consistent() {
        let task = fixtures::two_agent_task();
        assert_eq!(task.participants().len(), 2);
        assert_eq!(
            task.canonical_key_order(),
            vec!["data".to_string(), "result".to_string()]
        );

        let store = fixtures::context_store();
        assert!(store.is_empty());
    }
}
