//! KEELSON Recovery - Anomaly Recovery Engine
//!
//! Routes classified anomalies through a primary strategy and a typed,
//! compile-time-checked fallback chain. The engine owns the routing policy
//! only; every actual capability (resource optimization, delegation,
//! degraded mode, context restoration) is supplied by the embedding system
//! through the [`AgentRuntime`] trait.

use chrono::Utc;
use keelson_core::{
    Anomaly, AnomalyType, ContextId, EntityId, KeelsonError, KeelsonResult, RecoveryError,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

// ============================================================================
// AGENT RUNTIME
// ============================================================================

/// Resource availability as reported by the embedding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    /// Whether current resources suffice for the anomalous workload.
    pub sufficient: bool,
    /// Human-readable detail for operators and logs.
    pub detail: String,
}

/// Result of a successful delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationOutcome {
    /// Agent that accepted the work.
    pub delegate: String,
}

/// Capabilities the recovery engine borrows from the embedding system.
///
/// Implementations should be cheap to call and must not panic; a failure is
/// reported as a [`RecoveryError`] so the fallback chain can proceed.
pub trait AgentRuntime: Send + Sync {
    /// Report whether resources currently suffice.
    fn check_available_resources(&self) -> ResourceReport;

    /// Attempt to free resources (cache trims, context eviction, load
    /// shedding).
    fn optimize_resource_usage(&self) -> Result<(), RecoveryError>;

    /// Agents advertising all of the given capabilities.
    fn find_agents_with_capabilities(&self, required: &[String]) -> Vec<String>;

    /// Hand the anomalous work to a specific agent.
    fn delegate_task(&self, delegate: &str, anomaly: &Anomaly)
        -> Result<DelegationOutcome, RecoveryError>;

    /// Hand the anomalous work to any available agent, capability match
    /// not required.
    fn delegate_to_any(&self, anomaly: &Anomaly) -> Result<DelegationOutcome, RecoveryError>;

    /// Continue operating with reduced scope or fidelity.
    fn enter_degraded_mode(&self, anomaly: &Anomaly) -> Result<(), RecoveryError>;

    /// Rebuild a lost context from surviving sources (parent chain,
    /// sibling payloads, external state).
    fn reconstruct_context(&self, context_id: &str) -> Result<(), RecoveryError>;

    /// Restore a context from its most recent recovery point.
    fn restore_context(&self, context_id: &str) -> Result<(), RecoveryError>;

    /// Surface an unrecoverable anomaly to human operators.
    fn notify_operators(&self, anomaly: &Anomaly, reason: &str);
}

// ============================================================================
// STRATEGIES AND FALLBACK CHAINS
// ============================================================================

/// Primary recovery strategy, selected by anomaly type alone. Severity is
/// carried for operators but never changes the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Free resources, then re-check availability.
    ResourceReallocation,
    /// Find an agent with the missing capabilities and hand over.
    CapabilitySubstitution,
    /// Rebuild the lost context from surviving sources.
    ContextReconstruction,
}

/// A fallback action tried after the primary strategy fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackAction {
    /// Continue with reduced scope or fidelity.
    GracefulDegradation,
    /// Hand the work to any available agent.
    TaskDelegation,
    /// Restore the context from its most recent recovery point.
    ContextRestoration,
}

/// Primary strategy for an anomaly type.
pub fn primary_strategy(anomaly_type: AnomalyType) -> StrategyKind {
    match anomaly_type {
        AnomalyType::Resource => StrategyKind::ResourceReallocation,
        AnomalyType::Capability => StrategyKind::CapabilitySubstitution,
        AnomalyType::Context => StrategyKind::ContextReconstruction,
    }
}

/// Ordered fallback chain for an anomaly type, tried after the primary
/// strategy fails. Exhaustive over the closed anomaly enum.
pub fn fallback_chain(anomaly_type: AnomalyType) -> &'static [FallbackAction] {
    match anomaly_type {
        AnomalyType::Resource => &[
            FallbackAction::GracefulDegradation,
            FallbackAction::TaskDelegation,
        ],
        AnomalyType::Capability => &[
            FallbackAction::TaskDelegation,
            FallbackAction::GracefulDegradation,
        ],
        AnomalyType::Context => &[
            FallbackAction::ContextRestoration,
            FallbackAction::TaskDelegation,
        ],
    }
}

// ============================================================================
// OUTCOMES AND ATTEMPT LOG
// ============================================================================

/// How an anomaly was ultimately resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The primary strategy succeeded.
    Primary(StrategyKind),
    /// A fallback succeeded after the primary failed.
    Fallback(FallbackAction),
}

/// The result of routing one anomaly through the engine. Not serialized:
/// it carries the raw error for the caller, not for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    /// The anomaly that was handled.
    pub anomaly_id: EntityId,
    /// Whether any strategy or fallback succeeded.
    pub success: bool,
    /// True when every fallback was exhausted and operators were notified.
    pub critical: bool,
    /// What resolved the anomaly, when successful.
    pub resolution: Option<Resolution>,
    /// The last error seen, when unsuccessful.
    pub error: Option<RecoveryError>,
}

/// One entry of the engine's attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// The anomaly handled.
    pub anomaly_id: EntityId,
    /// Its classification.
    pub anomaly_type: AnomalyType,
    /// Context the anomaly related to, if any.
    pub context_id: Option<ContextId>,
    /// When handling finished.
    pub timestamp: Timestamp,
    /// Whether handling succeeded.
    pub success: bool,
    /// What resolved it, when successful.
    pub resolution: Option<Resolution>,
}

// ============================================================================
// RECOVERY ENGINE
// ============================================================================

/// The anomaly recovery engine.
pub struct RecoveryEngine {
    runtime: Arc<dyn AgentRuntime>,
    attempts: RwLock<Vec<RecoveryAttempt>>,
}

impl RecoveryEngine {
    /// Create an engine over the given runtime.
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            attempts: RwLock::new(Vec::new()),
        }
    }

    /// Route an anomaly through its primary strategy, then its fallback
    /// chain, stopping at the first success.
    ///
    /// When everything fails, operators are notified and the outcome is
    /// marked critical; the caller decides what to do with the work. The
    /// attempt is recorded in the engine's log either way.
    pub fn handle_anomaly(&self, anomaly: &Anomaly) -> KeelsonResult<RecoveryOutcome> {
        let strategy = primary_strategy(anomaly.anomaly_type);
        let outcome = match self.run_primary(strategy, anomaly) {
            Ok(()) => RecoveryOutcome {
                anomaly_id: anomaly.anomaly_id,
                success: true,
                critical: false,
                resolution: Some(Resolution::Primary(strategy)),
                error: None,
            },
            Err(primary_err) => {
                tracing::warn!(
                    anomaly_id = %anomaly.anomaly_id,
                    anomaly_type = ?anomaly.anomaly_type,
                    error = %primary_err,
                    "primary recovery strategy failed, entering fallback chain"
                );
                self.run_fallbacks(anomaly, primary_err)
            }
        };

        self.record_attempt(anomaly, &outcome)?;
        Ok(outcome)
    }

    /// Attempt log, oldest first.
    pub fn attempts(&self) -> KeelsonResult<Vec<RecoveryAttempt>> {
        let attempts = self
            .attempts
            .read()
            .map_err(|_| KeelsonError::Recovery(RecoveryError::Critical {
                reason: "recovery attempt log poisoned".to_string(),
            }))?;
        Ok(attempts.clone())
    }

    fn run_primary(&self, strategy: StrategyKind, anomaly: &Anomaly) -> Result<(), RecoveryError> {
        match strategy {
            StrategyKind::ResourceReallocation => {
                // Availability is checked before anything is trimmed:
                // sufficient resources resolve the anomaly outright, and
                // optimization is only the second chance.
                if self.runtime.check_available_resources().sufficient {
                    return Ok(());
                }
                self.runtime.optimize_resource_usage()?;
                let report = self.runtime.check_available_resources();
                if report.sufficient {
                    Ok(())
                } else {
                    Err(RecoveryError::InsufficientResources {
                        reason: report.detail,
                    })
                }
            }
            StrategyKind::CapabilitySubstitution => {
                let required = &anomaly.gathered_context.required_capabilities;
                let candidates = self.runtime.find_agents_with_capabilities(required);
                let delegate = candidates.first().ok_or_else(|| {
                    RecoveryError::NoCapableAgents {
                        required: required.clone(),
                    }
                })?;
                self.runtime.delegate_task(delegate, anomaly)?;
                Ok(())
            }
            StrategyKind::ContextReconstruction => {
                let context_id = anomaly.gathered_context.context_id.as_deref().ok_or(
                    RecoveryError::ContextUnrecoverable { context_id: None },
                )?;
                self.runtime.reconstruct_context(context_id)
            }
        }
    }

    fn run_fallbacks(&self, anomaly: &Anomaly, primary_err: RecoveryError) -> RecoveryOutcome {
        let mut last_err = primary_err;
        for action in fallback_chain(anomaly.anomaly_type) {
            match self.run_fallback(*action, anomaly) {
                Ok(()) => {
                    return RecoveryOutcome {
                        anomaly_id: anomaly.anomaly_id,
                        success: true,
                        critical: false,
                        resolution: Some(Resolution::Fallback(*action)),
                        error: None,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        anomaly_id = %anomaly.anomaly_id,
                        fallback = ?action,
                        error = %err,
                        "fallback action failed"
                    );
                    last_err = err;
                }
            }
        }

        let reason = format!("all fallbacks exhausted: {last_err}");
        tracing::error!(
            anomaly_id = %anomaly.anomaly_id,
            anomaly_type = ?anomaly.anomaly_type,
            severity = ?anomaly.severity,
            "{reason}"
        );
        self.runtime.notify_operators(anomaly, &reason);
        RecoveryOutcome {
            anomaly_id: anomaly.anomaly_id,
            success: false,
            critical: true,
            resolution: None,
            error: Some(last_err),
        }
    }

    fn run_fallback(&self, action: FallbackAction, anomaly: &Anomaly) -> Result<(), RecoveryError> {
        match action {
            FallbackAction::GracefulDegradation => self.runtime.enter_degraded_mode(anomaly),
            FallbackAction::TaskDelegation => {
                self.runtime.delegate_to_any(anomaly).map(|_| ())
            }
            FallbackAction::ContextRestoration => {
                let context_id = anomaly.gathered_context.context_id.as_deref().ok_or(
                    RecoveryError::ContextUnrecoverable { context_id: None },
                )?;
                self.runtime.restore_context(context_id)
            }
        }
    }

    fn record_attempt(&self, anomaly: &Anomaly, outcome: &RecoveryOutcome) -> KeelsonResult<()> {
        let mut attempts = self
            .attempts
            .write()
            .map_err(|_| KeelsonError::Recovery(RecoveryError::Critical {
                reason: "recovery attempt log poisoned".to_string(),
            }))?;
        attempts.push(RecoveryAttempt {
            anomaly_id: anomaly.anomaly_id,
            anomaly_type: anomaly.anomaly_type,
            context_id: anomaly.gathered_context.context_id.clone(),
            timestamp: Utc::now(),
            success: outcome.success,
            resolution: outcome.resolution,
        });
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
