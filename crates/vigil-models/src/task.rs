use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue priority. Higher variants are dequeued first.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// A unit of work submitted to an agent runtime.
///
/// Created by the caller, mutated only by the runtime loop that owns it,
/// and handed back to the caller once it reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTask {
    pub id: Uuid,
    pub task_type: String,
    pub priority: TaskPriority,
    pub parameters: serde_json::Value,
    /// Deadline for the handler, in milliseconds.
    pub timeout_ms: u64,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            parameters,
            timeout_ms: 30_000,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wall-clock time between start and completion, if both are set.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Error,
    Stopped,
}

impl AgentState {
    /// Whether `submit` is accepted in this state.
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Running totals for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub error_count: u64,
    pub average_duration_ms: f64,
    /// completed / (completed + failed + timed out), 0.0 before the first task.
    pub success_rate: f64,
    pub last_error: Option<String>,
    pub last_task_at: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_timed_out
    }

    /// Fold a terminal task into the running totals.
    pub fn record(&mut self, task: &AgentTask) {
        let previous = self.tasks_finished();
        match task.status {
            TaskStatus::Completed => self.tasks_completed += 1,
            TaskStatus::TimedOut => self.tasks_timed_out += 1,
            _ => {
                self.tasks_failed += 1;
                self.error_count += 1;
                self.last_error = task.error.clone();
            }
        }

        let duration = task.duration_ms().unwrap_or(0) as f64;
        self.average_duration_ms =
            (self.average_duration_ms * previous as f64 + duration) / (previous + 1) as f64;
        self.success_rate = self.tasks_completed as f64 / self.tasks_finished() as f64;
        self.last_task_at = task.completed_at;
    }
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatus {
    pub agent: String,
    pub state: AgentState,
    pub metrics: AgentMetrics,
    pub queue_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn finished(status: TaskStatus, millis: i64) -> AgentTask {
        let mut task = AgentTask::new("noop", serde_json::Value::Null);
        let start = Utc::now();
        task.status = status;
        task.started_at = Some(start);
        task.completed_at = Some(start + ChronoDuration::milliseconds(millis));
        if status == TaskStatus::Failed {
            task.error = Some("boom".to_string());
        }
        task
    }

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn new_task_is_pending() {
        let task = AgentTask::new("validate_signal", serde_json::json!({"symbol": "BTCUSDT"}))
            .with_priority(TaskPriority::High)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.timeout(), Duration::from_millis(250));
        assert!(task.duration_ms().is_none());
    }

    #[test]
    fn metrics_track_success_rate_and_average() {
        let mut metrics = AgentMetrics::default();
        metrics.record(&finished(TaskStatus::Completed, 10));
        metrics.record(&finished(TaskStatus::Completed, 30));
        metrics.record(&finished(TaskStatus::Failed, 20));
        metrics.record(&finished(TaskStatus::TimedOut, 40));

        assert_eq!(metrics.tasks_completed, 2);
        assert_eq!(metrics.tasks_failed, 1);
        assert_eq!(metrics.tasks_timed_out, 1);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.last_error.as_deref(), Some("boom"));
        assert!((metrics.success_rate - 0.5).abs() < 1e-9);
        assert!((metrics.average_duration_ms - 25.0).abs() < 1e-9);
    }

    #[test]
    fn only_running_accepts_tasks() {
        assert!(AgentState::Running.accepts_tasks());
        assert!(!AgentState::Paused.accepts_tasks());
        assert!(!AgentState::Idle.accepts_tasks());
        assert!(!AgentState::Stopped.accepts_tasks());
        assert!(!AgentState::Error.accepts_tasks());
    }

    #[test]
    fn priority_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskPriority::Critical).unwrap(),
            "\"critical\""
        );
    }
}
