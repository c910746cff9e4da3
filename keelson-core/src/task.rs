//! Task types for multi-agent coordination.

use crate::identity::{new_entity_id, AgentId, EntityId, StateKey};
use serde::{Deserialize, Serialize};

/// A single step of a coordinated task, performed by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    /// Agent that performs this step.
    pub agent_id: AgentId,
    /// Action name, interpreted by the step executor.
    pub action: String,
}

impl TaskStep {
    /// Create a step.
    pub fn new(agent_id: &str, action: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            action: action.to_string(),
        }
    }
}

/// A multi-agent task submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub task_id: EntityId,
    /// State keys every participating agent must lock before executing.
    /// Acquisition order is canonical (lexicographic), not this order.
    pub required_state_keys: Vec<StateKey>,
    /// Ordered steps of the task.
    pub steps: Vec<TaskStep>,
}

impl Task {
    /// Create a new task.
    pub fn new(required_state_keys: Vec<StateKey>, steps: Vec<TaskStep>) -> Self {
        Self {
            task_id: new_entity_id(),
            required_state_keys,
            steps,
        }
    }

    /// Participating agents, unique, in first-appearance order.
    pub fn participants(&self) -> Vec<AgentId> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.agent_id) {
                seen.push(step.agent_id.clone());
            }
        }
        seen
    }

    /// Required keys in canonical (lexicographic) acquisition order,
    /// deduplicated. All lock acquisition goes through this ordering to
    /// avoid deadlock between tasks with overlapping key sets.
    pub fn canonical_key_order(&self) -> Vec<StateKey> {
        let mut keys = self.required_state_keys.clone();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Per-task state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    /// Submitted, locks not yet acquired.
    Pending,
    /// All required locks acquired.
    LocksAcquired,
    /// Steps executing.
    Executing,
    /// All steps completed.
    Completed,
    /// Failure occurred, recovery in progress.
    Recovering,
    /// Recovery succeeded, participants resumed.
    Resumed,
    /// Recovery failed, surfaced to the caller.
    Escalated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participants_unique_in_order() {
        let task = Task::new(
            vec!["data".to_string()],
            vec![
                TaskStep::new("agent-1", "process"),
                TaskStep::new("agent-2", "validate"),
                TaskStep::new("agent-1", "finalize"),
            ],
        );
        assert_eq!(
            task.participants(),
            vec!["agent-1".to_string(), "agent-2".to_string()]
        );
    }

    #[test]
    fn test_canonical_key_order_sorts_and_dedupes() {
        let task = Task::new(
            vec![
                "result".to_string(),
                "data".to_string(),
                "validation".to_string(),
                "data".to_string(),
            ],
            vec![TaskStep::new("agent-1", "process")],
        );
        assert_eq!(
            task.canonical_key_order(),
            vec![
                "data".to_string(),
                "result".to_string(),
                "validation".to_string()
            ]
        );
    }
}
