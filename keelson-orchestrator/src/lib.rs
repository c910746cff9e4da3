//! KEELSON Orchestrator - Multi-Agent Task Coordination
//!
//! Drives a task through lock acquisition, step execution, and release,
//! with checkpoint-based rollback on failure. Before any step runs, every
//! participant's context is checkpointed; a failed step pauses all
//! participants, verifies state consistency, rolls contexts back to those
//! checkpoints, and resumes - or escalates the failure to the recovery
//! engine when rollback is not safe. A task gets exactly one recovery
//! attempt before the failure is surfaced to the caller.

use keelson_context::ContextStore;
use keelson_core::{
    AgentId, Anomaly, AnomalyType, ContextId, ContextPayload, EntityId, KeelsonError,
    KeelsonResult, OrchestrationError, OrchestratorConfig, Severity, StateKey, Task, TaskPhase,
    TaskStep,
};
use keelson_recovery::{RecoveryEngine, RecoveryOutcome};
use keelson_state::StateCoordinator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// PARTICIPANTS
// ============================================================================

/// Status of a registered participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Available for task steps.
    Active,
    /// Paused by failure handling; awaiting rollback or escalation.
    Paused,
    /// Its step failed and recovery did not resume it.
    Error,
}

/// An agent registered with the orchestrator, bound to a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The agent.
    pub agent_id: AgentId,
    /// The context tracking this agent's work.
    pub context_id: ContextId,
    /// Current status.
    pub status: ParticipantStatus,
    /// Index of the pre-task checkpoint taken for the current task.
    pub checkpoint_index: Option<usize>,
}

// ============================================================================
// EXECUTION SEAMS
// ============================================================================

/// Performs task steps. Supplied by the embedding system.
///
/// When `execute` is called, the step's agent holds the advisory locks for
/// all of the task's required keys, so the executor may write them through
/// the coordinator.
pub trait StepExecutor: Send + Sync {
    /// Perform one step. An `Err` pauses the task and triggers recovery.
    fn execute(
        &self,
        task: &Task,
        step_index: usize,
        step: &TaskStep,
        state: &StateCoordinator,
    ) -> Result<(), String>;

    /// Re-verify one participant's local state against the restored global
    /// state before it resumes. Called once per participant after a
    /// rollback; a single `false` escalates instead of resuming.
    fn revalidate(&self, _task: &Task, _agent_id: &str) -> bool {
        true
    }
}

/// Verifies shared state consistency before a rollback is attempted. Maps
/// the task's required keys to their current values.
pub type ConsistencyCheck = Box<dyn Fn(&HashMap<StateKey, Value>) -> bool + Send + Sync>;

// ============================================================================
// TASK REPORTS
// ============================================================================

/// Which recovery path a task took, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryPath {
    /// No failure occurred.
    None,
    /// Contexts were rolled back to pre-task checkpoints and participants
    /// resumed.
    RolledBack,
    /// Rollback was not safe; the failure went to the recovery engine.
    Escalated,
}

/// Outcome of one `coordinate_task` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    /// The task this report describes.
    pub task_id: EntityId,
    /// Terminal phase: `Completed`, `Resumed`, or `Escalated`.
    pub phase: TaskPhase,
    /// Every phase the task passed through, in order, ending with `phase`.
    pub trace: Vec<TaskPhase>,
    /// Recovery path taken.
    pub recovery: RecoveryPath,
    /// Index of the failed step, when a step failed.
    pub failed_step: Option<usize>,
    /// Failure reason, when a step failed.
    pub error: Option<String>,
    /// Recovery engine outcome, when the failure was escalated.
    pub escalation: Option<RecoveryOutcome>,
}

// ============================================================================
// TASK ORCHESTRATOR
// ============================================================================

/// The task orchestrator.
pub struct TaskOrchestrator {
    state: Arc<StateCoordinator>,
    contexts: Arc<ContextStore>,
    participants: RwLock<HashMap<AgentId, Participant>>,
    consistency: Option<ConsistencyCheck>,
    recovery: Option<Arc<RecoveryEngine>>,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    /// Create an orchestrator over the given state coordinator and context
    /// store, with no consistency check and no recovery engine.
    pub fn new(
        state: Arc<StateCoordinator>,
        contexts: Arc<ContextStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            contexts,
            participants: RwLock::new(HashMap::new()),
            consistency: None,
            recovery: None,
            config,
        }
    }

    /// Attach a recovery engine for escalated failures. Without one, an
    /// escalated failure ends the task in the `Escalated` phase directly.
    pub fn with_recovery_engine(mut self, engine: Arc<RecoveryEngine>) -> Self {
        self.recovery = Some(engine);
        self
    }

    /// Attach a consistency check, run over the task's required keys before
    /// any rollback.
    pub fn with_consistency_check(mut self, check: ConsistencyCheck) -> Self {
        self.consistency = Some(check);
        self
    }

    /// Register an agent, binding it to a context. The context is created
    /// (as a root with the given payload) if it does not exist yet.
    /// Re-registering an agent rebinds it.
    pub fn register_agent(
        &self,
        agent_id: &str,
        context_id: &str,
        payload: ContextPayload,
    ) -> KeelsonResult<()> {
        if self.contexts.inspect(context_id)?.is_none() {
            self.contexts.create_context(context_id, None, payload)?;
        }
        let mut participants = self.write_participants()?;
        participants.insert(
            agent_id.to_string(),
            Participant {
                agent_id: agent_id.to_string(),
                context_id: context_id.to_string(),
                status: ParticipantStatus::Active,
                checkpoint_index: None,
            },
        );
        Ok(())
    }

    /// A copy of a participant's registration.
    pub fn participant(&self, agent_id: &str) -> KeelsonResult<Option<Participant>> {
        let participants = self.read_participants()?;
        Ok(participants.get(agent_id).cloned())
    }

    /// Registered participants, in no particular order.
    pub fn participants(&self) -> KeelsonResult<Vec<Participant>> {
        let participants = self.read_participants()?;
        Ok(participants.values().cloned().collect())
    }

    /// Run a task to completion or through one recovery attempt.
    ///
    /// Every participating agent must be registered. Each step acquires all
    /// of the task's required locks in canonical (lexicographic) order,
    /// all-or-nothing, executes, and releases them. A step failure pauses
    /// every participant, verifies consistency, rolls contexts back to the
    /// pre-task checkpoints, and resumes; when rollback is not safe the
    /// failure escalates to the recovery engine. Either way the task is not
    /// re-run: a recovered task ends in the `Resumed` phase and the caller
    /// decides whether to resubmit.
    pub fn coordinate_task(
        &self,
        task: &Task,
        executor: &dyn StepExecutor,
    ) -> KeelsonResult<TaskReport> {
        let roster = self.verify_registration(task)?;
        self.checkpoint_participants(task, &roster)?;

        tracing::debug!(task_id = %task.task_id, steps = task.steps.len(), "task starting");
        let keys = task.canonical_key_order();
        let mut trace = vec![TaskPhase::Pending];

        for (step_index, step) in task.steps.iter().enumerate() {
            self.acquire_all(&keys, &step.agent_id)?;
            if step_index == 0 {
                trace.push(TaskPhase::LocksAcquired);
                trace.push(TaskPhase::Executing);
            }
            let result = executor.execute(task, step_index, step, &self.state);
            self.release_all(&keys, &step.agent_id)?;

            if let Err(reason) = result {
                tracing::warn!(
                    task_id = %task.task_id,
                    step_index,
                    agent_id = %step.agent_id,
                    reason,
                    "task step failed, entering recovery"
                );
                trace.push(TaskPhase::Recovering);
                return self.recover(task, &roster, step_index, step, executor, reason, trace);
            }
        }

        tracing::debug!(task_id = %task.task_id, "task completed");
        trace.push(TaskPhase::Completed);
        Ok(TaskReport {
            task_id: task.task_id,
            phase: TaskPhase::Completed,
            trace,
            recovery: RecoveryPath::None,
            failed_step: None,
            error: None,
            escalation: None,
        })
    }

    fn verify_registration(&self, task: &Task) -> KeelsonResult<Vec<Participant>> {
        let participants = self.read_participants()?;
        let mut roster = Vec::new();
        for agent_id in task.participants() {
            match participants.get(&agent_id) {
                Some(participant) => roster.push(participant.clone()),
                None => {
                    return Err(KeelsonError::Orchestration(
                        OrchestrationError::UnknownAgent { agent_id },
                    ));
                }
            }
        }
        Ok(roster)
    }

    /// Checkpoint every participant's context before the first step runs.
    fn checkpoint_participants(
        &self,
        task: &Task,
        roster: &[Participant],
    ) -> KeelsonResult<()> {
        let label = format!("{}-{}", self.config.checkpoint_label, task.task_id);
        let mut participants = self.write_participants()?;
        for member in roster {
            let index = self.contexts.add_recovery_point(&member.context_id, &label)?;
            if let Some(entry) = participants.get_mut(&member.agent_id) {
                entry.checkpoint_index = Some(index);
            }
        }
        Ok(())
    }

    /// Acquire every key for the agent, all-or-nothing. On contention, the
    /// keys already acquired are released before the error returns.
    fn acquire_all(&self, keys: &[StateKey], agent_id: &str) -> KeelsonResult<()> {
        for (i, key) in keys.iter().enumerate() {
            let attempt = self.state.request_lock(key, agent_id)?;
            if !attempt.granted {
                for acquired in keys[..i].iter().rev() {
                    self.state.release_lock(acquired, agent_id)?;
                }
                return Err(KeelsonError::Orchestration(
                    OrchestrationError::LockAcquisitionFailed {
                        key: key.clone(),
                        holder: attempt.holder,
                    },
                ));
            }
        }
        Ok(())
    }

    fn release_all(&self, keys: &[StateKey], agent_id: &str) -> KeelsonResult<()> {
        for key in keys.iter().rev() {
            self.state.release_lock(key, agent_id)?;
        }
        Ok(())
    }

    /// The single recovery attempt: pause, verify, roll back, resume - or
    /// escalate.
    fn recover(
        &self,
        task: &Task,
        roster: &[Participant],
        step_index: usize,
        step: &TaskStep,
        executor: &dyn StepExecutor,
        reason: String,
        mut trace: Vec<TaskPhase>,
    ) -> KeelsonResult<TaskReport> {
        self.pause_participants(task, roster, step_index, &reason)?;

        let rollback_safe = self.consistency_holds(task)?;
        if rollback_safe {
            self.rollback_contexts(roster)?;
            // Every participant re-verifies its own local state against the
            // restored global state; one refusal keeps everyone paused.
            let revalidated = roster
                .iter()
                .all(|member| executor.revalidate(task, &member.agent_id));
            if revalidated {
                self.set_roster_status(roster, ParticipantStatus::Active)?;
                tracing::debug!(task_id = %task.task_id, "participants resumed after rollback");
                trace.push(TaskPhase::Resumed);
                return Ok(TaskReport {
                    task_id: task.task_id,
                    phase: TaskPhase::Resumed,
                    trace,
                    recovery: RecoveryPath::RolledBack,
                    failed_step: Some(step_index),
                    error: Some(reason),
                    escalation: None,
                });
            }
        }

        self.escalate(task, roster, step_index, step, reason, trace)
    }

    /// Pause every participant and project the failure into its context so
    /// a later reconstruction has something to work from.
    fn pause_participants(
        &self,
        task: &Task,
        roster: &[Participant],
        step_index: usize,
        reason: &str,
    ) -> KeelsonResult<()> {
        self.set_roster_status(roster, ParticipantStatus::Paused)?;
        let projection = ContextPayload::new().with_entry(
            "last_failure",
            json!({
                "task_id": task.task_id,
                "failed_step": step_index,
                "reason": reason,
            }),
        );
        let label = format!("paused-{}", task.task_id);
        for member in roster {
            self.contexts
                .update_context(&member.context_id, projection.clone(), true)?;
            // Checkpoint the paused projection so a later reconstruction can
            // see the state at failure, not just the pre-task state.
            self.contexts.add_recovery_point(&member.context_id, &label)?;
        }
        Ok(())
    }

    /// Run the configured consistency check over the task's required keys.
    /// No check configured means consistency is assumed.
    fn consistency_holds(&self, task: &Task) -> KeelsonResult<bool> {
        let Some(check) = &self.consistency else {
            return Ok(true);
        };
        let mut values = HashMap::new();
        for key in task.canonical_key_order() {
            values.insert(
                key.clone(),
                self.state.get_state(&key)?.unwrap_or(Value::Null),
            );
        }
        Ok(check(&values))
    }

    fn rollback_contexts(&self, roster: &[Participant]) -> KeelsonResult<()> {
        let participants = self.read_participants()?;
        for member in roster {
            let checkpoint = participants
                .get(&member.agent_id)
                .and_then(|p| p.checkpoint_index);
            if let Some(index) = checkpoint {
                self.contexts
                    .restore_from_recovery_point(&member.context_id, index)?;
            }
        }
        Ok(())
    }

    /// Hand the failure to the recovery engine. Success resumes the
    /// participants; anything else leaves the failing agent in `Error` and
    /// ends the task in the `Escalated` phase.
    fn escalate(
        &self,
        task: &Task,
        roster: &[Participant],
        step_index: usize,
        step: &TaskStep,
        reason: String,
        mut trace: Vec<TaskPhase>,
    ) -> KeelsonResult<TaskReport> {
        let failed_context = roster
            .iter()
            .find(|m| m.agent_id == step.agent_id)
            .map(|m| m.context_id.clone());

        let escalation = match &self.recovery {
            Some(engine) => {
                let mut anomaly = Anomaly::new(AnomalyType::Context, Severity::High).with_detail(
                    json!({
                        "task_id": task.task_id,
                        "failed_step": step_index,
                        "agent_id": step.agent_id,
                        "reason": reason,
                    }),
                );
                if let Some(context_id) = &failed_context {
                    anomaly = anomaly.with_context_id(context_id);
                }
                Some(engine.handle_anomaly(&anomaly)?)
            }
            None => None,
        };

        let recovered = escalation.as_ref().map(|o| o.success).unwrap_or(false);
        if recovered {
            self.set_roster_status(roster, ParticipantStatus::Active)?;
            trace.push(TaskPhase::Resumed);
            Ok(TaskReport {
                task_id: task.task_id,
                phase: TaskPhase::Resumed,
                trace,
                recovery: RecoveryPath::Escalated,
                failed_step: Some(step_index),
                error: Some(reason),
                escalation,
            })
        } else {
            self.mark_failed_agent(&step.agent_id)?;
            tracing::error!(
                task_id = %task.task_id,
                step_index,
                agent_id = %step.agent_id,
                "task escalated without recovery"
            );
            trace.push(TaskPhase::Escalated);
            Ok(TaskReport {
                task_id: task.task_id,
                phase: TaskPhase::Escalated,
                trace,
                recovery: RecoveryPath::Escalated,
                failed_step: Some(step_index),
                error: Some(reason),
                escalation,
            })
        }
    }

    fn set_roster_status(
        &self,
        roster: &[Participant],
        status: ParticipantStatus,
    ) -> KeelsonResult<()> {
        let mut participants = self.write_participants()?;
        for member in roster {
            if let Some(entry) = participants.get_mut(&member.agent_id) {
                entry.status = status;
            }
        }
        Ok(())
    }

    fn mark_failed_agent(&self, agent_id: &str) -> KeelsonResult<()> {
        let mut participants = self.write_participants()?;
        if let Some(entry) = participants.get_mut(agent_id) {
            entry.status = ParticipantStatus::Error;
        }
        Ok(())
    }

    fn read_participants(
        &self,
    ) -> KeelsonResult<std::sync::RwLockReadGuard<'_, HashMap<AgentId, Participant>>> {
        self.participants.read().map_err(|_| {
            KeelsonError::Orchestration(OrchestrationError::RecoveryEscalated {
                reason: "participant registry lock poisoned".to_string(),
            })
        })
    }

    fn write_participants(
        &self,
    ) -> KeelsonResult<std::sync::RwLockWriteGuard<'_, HashMap<AgentId, Participant>>> {
        self.participants.write().map_err(|_| {
            KeelsonError::Orchestration(OrchestrationError::RecoveryEscalated {
                reason: "participant registry lock poisoned".to_string(),
            })
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_test_utils::fixtures;

    /// Executor scripted to fail at a chosen step and to refuse
    /// revalidation for chosen agents. Successful steps write their action
    /// name to the first required key.
    struct ScriptedExecutor {
        fail_at: Option<usize>,
        refuse_revalidation: Vec<String>,
    }

    impl ScriptedExecutor {
        fn succeeding() -> Self {
            Self {
                fail_at: None,
                refuse_revalidation: Vec::new(),
            }
        }

        fn failing_at(step: usize) -> Self {
            Self {
                fail_at: Some(step),
                refuse_revalidation: Vec::new(),
            }
        }
    }

    impl StepExecutor for ScriptedExecutor {
        fn execute(
            &self,
            task: &Task,
            step_index: usize,
            step: &TaskStep,
            state: &StateCoordinator,
        ) -> Result<(), String> {
            if self.fail_at == Some(step_index) {
                return Err(format!("scripted failure at step {step_index}"));
            }
            if let Some(key) = task.canonical_key_order().first() {
                state
                    .update_state(key, json!(step.action), &step.agent_id)
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        }

        fn revalidate(&self, _task: &Task, agent_id: &str) -> bool {
            !self.refuse_revalidation.iter().any(|a| a == agent_id)
        }
    }

    fn orchestrator() -> TaskOrchestrator {
        TaskOrchestrator::new(
            Arc::new(fixtures::state_coordinator()),
            Arc::new(fixtures::context_store()),
            fixtures::test_config().orchestrator,
        )
    }

    fn register_two_agents(orch: &TaskOrchestrator) {
        orch.register_agent("agent-1", "ctx-1", fixtures::operation_payload("process"))
            .unwrap();
        orch.register_agent("agent-2", "ctx-2", fixtures::operation_payload("validate"))
            .unwrap();
    }

    #[test]
    fn test_task_completes_and_releases_all_locks() {
        let orch = orchestrator();
        register_two_agents(&orch);

        let task = fixtures::two_agent_task();
        let report = orch
            .coordinate_task(&task, &ScriptedExecutor::succeeding())
            .unwrap();
        assert_eq!(report.phase, TaskPhase::Completed);
        assert_eq!(report.recovery, RecoveryPath::None);
        assert!(report.failed_step.is_none());

        for key in task.canonical_key_order() {
            assert!(orch.state.holder(&key).unwrap().is_none(), "{key} still locked");
        }
        // Last writer wins on the shared key.
        assert_eq!(orch.state.get_state("data").unwrap(), Some(json!("validate")));
    }

    #[test]
    fn test_unregistered_agent_rejected_before_any_checkpoint() {
        let orch = orchestrator();
        orch.register_agent("agent-1", "ctx-1", fixtures::operation_payload("process"))
            .unwrap();

        let task = fixtures::two_agent_task();
        let err = orch
            .coordinate_task(&task, &ScriptedExecutor::succeeding())
            .unwrap_err();
        assert!(matches!(
            err,
            KeelsonError::Orchestration(OrchestrationError::UnknownAgent { .. })
        ));

        let record = orch.contexts.inspect("ctx-1").unwrap().unwrap();
        assert!(record.recovery_points.is_empty());
    }

    #[test]
    fn test_contended_lock_fails_task_and_releases_partial_acquisition() {
        let orch = orchestrator();
        register_two_agents(&orch);
        // An outside agent holds the later key; acquisition of "data"
        // succeeds first and must be rolled back.
        orch.state.request_lock("result", "outsider").unwrap();

        let task = fixtures::two_agent_task();
        let err = orch
            .coordinate_task(&task, &ScriptedExecutor::succeeding())
            .unwrap_err();
        match err {
            KeelsonError::Orchestration(OrchestrationError::LockAcquisitionFailed {
                key,
                holder,
            }) => {
                assert_eq!(key, "result");
                assert_eq!(holder.as_deref(), Some("outsider"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(orch.state.holder("data").unwrap().is_none());
    }

    #[test]
    fn test_step_failure_rolls_back_and_resumes() {
        let orch = orchestrator();
        register_two_agents(&orch);

        let task = fixtures::two_agent_task();
        let report = orch
            .coordinate_task(&task, &ScriptedExecutor::failing_at(1))
            .unwrap();
        assert_eq!(report.phase, TaskPhase::Resumed);
        assert_eq!(report.recovery, RecoveryPath::RolledBack);
        assert_eq!(report.failed_step, Some(1));

        // Participants are back to Active after the rollback.
        for member in orch.participants().unwrap() {
            assert_eq!(member.status, ParticipantStatus::Active);
        }
        // The failure projection survives in the context payload.
        let record = orch.contexts.inspect("ctx-2").unwrap().unwrap();
        assert!(record.payload.get("last_failure").is_some());
        // Step 0's write survives; rollback restores contexts, not state.
        assert_eq!(orch.state.get_state("data").unwrap(), Some(json!("process")));
    }

    #[test]
    fn test_failed_revalidation_escalates_without_engine() {
        let orch = orchestrator();
        register_two_agents(&orch);

        let executor = ScriptedExecutor {
            fail_at: Some(0),
            refuse_revalidation: vec!["agent-1".to_string(), "agent-2".to_string()],
        };
        let task = fixtures::two_agent_task();
        let report = orch.coordinate_task(&task, &executor).unwrap();
        assert_eq!(report.phase, TaskPhase::Escalated);
        assert_eq!(report.recovery, RecoveryPath::Escalated);
        assert!(report.escalation.is_none());

        let failed = orch.participant("agent-1").unwrap().unwrap();
        assert_eq!(failed.status, ParticipantStatus::Error);
    }

    #[test]
    fn test_single_agent_refusing_revalidation_keeps_everyone_from_resuming() {
        let orch = orchestrator();
        register_two_agents(&orch);

        // agent-1 revalidates fine; agent-2 alone refuses. Resume is
        // all-or-nothing across the roster.
        let executor = ScriptedExecutor {
            fail_at: Some(0),
            refuse_revalidation: vec!["agent-2".to_string()],
        };
        let task = fixtures::two_agent_task();
        let report = orch.coordinate_task(&task, &executor).unwrap();
        assert_eq!(report.phase, TaskPhase::Escalated);

        let bystander = orch.participant("agent-2").unwrap().unwrap();
        assert_eq!(bystander.status, ParticipantStatus::Paused);
    }

    #[test]
    fn test_report_traces_full_phase_progression() {
        let orch = orchestrator();
        register_two_agents(&orch);
        let task = fixtures::two_agent_task();

        let completed = orch
            .coordinate_task(&task, &ScriptedExecutor::succeeding())
            .unwrap();
        assert_eq!(
            completed.trace,
            vec![
                TaskPhase::Pending,
                TaskPhase::LocksAcquired,
                TaskPhase::Executing,
                TaskPhase::Completed,
            ]
        );

        let recovered = orch
            .coordinate_task(&task, &ScriptedExecutor::failing_at(1))
            .unwrap();
        assert_eq!(
            recovered.trace,
            vec![
                TaskPhase::Pending,
                TaskPhase::LocksAcquired,
                TaskPhase::Executing,
                TaskPhase::Recovering,
                TaskPhase::Resumed,
            ]
        );
        assert_eq!(recovered.trace.last(), Some(&recovered.phase));
    }

    #[test]
    fn test_failed_consistency_check_escalates() {
        let orch = orchestrator().with_consistency_check(Box::new(|_| false));
        register_two_agents(&orch);

        let task = fixtures::two_agent_task();
        let report = orch
            .coordinate_task(&task, &ScriptedExecutor::failing_at(0))
            .unwrap();
        assert_eq!(report.phase, TaskPhase::Escalated);
    }

    #[test]
    fn test_consistency_check_sees_required_key_values() {
        let orch = orchestrator().with_consistency_check(Box::new(|values| {
            values.contains_key("data") && values.contains_key("result")
        }));
        register_two_agents(&orch);

        let task = fixtures::two_agent_task();
        let report = orch
            .coordinate_task(&task, &ScriptedExecutor::failing_at(1))
            .unwrap();
        assert_eq!(report.phase, TaskPhase::Resumed);
    }

    #[test]
    fn test_rollback_restores_pre_task_checkpoint() {
        let orch = orchestrator();
        register_two_agents(&orch);

        // Put ctx-1 into a non-initial state before the task starts.
        orch.contexts
            .adapt_context(
                "ctx-1",
                &keelson_context::AdaptationConditions::default(),
            )
            .unwrap();
        let before = orch.contexts.inspect("ctx-1").unwrap().unwrap();

        let task = fixtures::two_agent_task();
        orch.coordinate_task(&task, &ScriptedExecutor::failing_at(0))
            .unwrap();

        let after = orch.contexts.inspect("ctx-1").unwrap().unwrap();
        assert_eq!(after.lifecycle_state, before.lifecycle_state);
    }

    #[test]
    fn test_reregistering_rebinds_agent() {
        let orch = orchestrator();
        orch.register_agent("agent-1", "ctx-a", fixtures::operation_payload("x"))
            .unwrap();
        orch.register_agent("agent-1", "ctx-b", fixtures::operation_payload("y"))
            .unwrap();

        let participant = orch.participant("agent-1").unwrap().unwrap();
        assert_eq!(participant.context_id, "ctx-b");
        assert!(orch.contexts.inspect("ctx-a").unwrap().is_some());
    }
}
