use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use vigil_models::{AgentState, RiskAction};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent is {0}; not accepting tasks")]
    NotAccepting(AgentState),

    #[error("Cannot {action} an agent that is {from}")]
    InvalidTransition {
        from: AgentState,
        action: &'static str,
    },

    #[error("Task queue is full ({0} tasks)")]
    QueueFull(usize),

    #[error("Task timed out after {0} ms")]
    Timeout(u64),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Unrecoverable agent error: {0}")]
    Unrecoverable(String),

    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Price source error: {0}")]
    Source(String),

    #[error("Task result was dropped before completion")]
    ResultDropped,

    #[error("State store error: {0}")]
    Store(#[from] vigil_store::StateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Action(#[from] ActionExecutionError),
}

/// A single validation rule could not be evaluated. Counted as a failed rule.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rule {rule_id} could not be evaluated: {message}")]
pub struct RuleError {
    pub rule_id: String,
    pub message: String,
}

impl RuleError {
    pub fn new(rule_id: &str, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            message: message.into(),
        }
    }
}

/// A recommended protective action did not execute.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Action {action} for alert {alert_id} failed: {message}")]
pub struct ActionExecutionError {
    pub alert_id: Uuid,
    pub action: RiskAction,
    pub message: String,
}
