use async_trait::async_trait;
use vigil_models::AgentTask;

use crate::error::AgentError;

/// The workload an [`AgentRuntime`](crate::runtime::AgentRuntime) drives.
/// Mockable for testing.
///
/// The runtime never calls `handle` concurrently on one instance, so
/// implementations can reason about their own state without extra locking.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle(&self, task: &AgentTask) -> Result<serde_json::Value, AgentError>;

    /// Result recorded on a task whose handler missed its deadline.
    /// Safety agents return their fail-closed verdict here.
    fn on_timeout(&self, _task: &AgentTask) -> Option<serde_json::Value> {
        None
    }
}

/// Decode a task's parameters into the handler's input type.
pub fn parse_parameters<T: serde::de::DeserializeOwned>(task: &AgentTask) -> Result<T, AgentError> {
    serde_json::from_value(task.parameters.clone()).map_err(|e| {
        AgentError::InvalidParameters(format!("{} parameters: {e}", task.task_type))
    })
}
