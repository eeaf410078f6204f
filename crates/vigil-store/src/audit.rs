use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use vigil_models::store_schema::AUDIT_TABLE_DDL;
use vigil_models::{AgentMetrics, AgentTask};

use crate::error::StateError;

/// Write-only persistence for agent task, event and metric logs.
///
/// Nothing in the decision path reads these back; callers log and ignore
/// failures.
pub trait AuditSink: Send + Sync {
    fn record_task(&self, agent: &str, task: &AgentTask) -> Result<(), StateError>;

    fn record_event(
        &self,
        agent: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StateError>;

    fn record_metrics(&self, agent: &str, metrics: &AgentMetrics) -> Result<(), StateError>;
}

/// Discards everything.
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record_task(&self, _agent: &str, _task: &AgentTask) -> Result<(), StateError> {
        Ok(())
    }

    fn record_event(
        &self,
        _agent: &str,
        _kind: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn record_metrics(&self, _agent: &str, _metrics: &AgentMetrics) -> Result<(), StateError> {
        Ok(())
    }
}

/// SQLite audit log. Opens in WAL mode so external readers can tail it.
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: &str) -> Result<Self, StateError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(AUDIT_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(AUDIT_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Unavailable(format!("audit mutex poisoned: {e}")))
    }

    pub fn task_count(&self, agent: &str) -> Result<usize, StateError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM agent_tasks WHERE agent = ?1",
            rusqlite::params![agent],
            |row| row.get(0),
        )?)
    }

    /// Event kinds recorded for `agent`, oldest first.
    pub fn event_kinds(&self, agent: &str) -> Result<Vec<String>, StateError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT kind FROM agent_events WHERE agent = ?1 ORDER BY id")?;
        let kinds = stmt
            .query_map(rusqlite::params![agent], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(kinds)
    }
}

impl AuditSink for SqliteAuditLog {
    fn record_task(&self, agent: &str, task: &AgentTask) -> Result<(), StateError> {
        let priority = serde_json::to_value(task.priority)?;
        let status = serde_json::to_value(task.status)?;
        let result = task.result.as_ref().map(|v| v.to_string());
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO agent_tasks \
             (id, agent, task_type, priority, status, parameters, result, error, created_at, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                task.id.to_string(),
                agent,
                task.task_type,
                priority.as_str().unwrap_or_default(),
                status.as_str().unwrap_or_default(),
                task.parameters.to_string(),
                result,
                task.error,
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn record_event(
        &self,
        agent: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_events (agent, kind, payload, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![agent, kind, payload.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_metrics(&self, agent: &str, metrics: &AgentMetrics) -> Result<(), StateError> {
        let json = serde_json::to_string(metrics)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_metrics (agent, metrics_json, recorded_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![agent, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_models::TaskStatus;

    #[test]
    fn records_tasks_by_agent() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        let mut task = AgentTask::new("validate_signal", serde_json::json!({"symbol": "BTCUSDT"}));
        log.record_task("signal_validator", &task).unwrap();

        // Same id again replaces the row
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        log.record_task("signal_validator", &task).unwrap();

        log.record_task("risk_monitor", &AgentTask::new("check_drawdown", serde_json::Value::Null))
            .unwrap();

        assert_eq!(log.task_count("signal_validator").unwrap(), 1);
        assert_eq!(log.task_count("risk_monitor").unwrap(), 1);
    }

    #[test]
    fn records_events_in_order() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.record_event("risk_monitor", "started", &serde_json::Value::Null)
            .unwrap();
        log.record_event("risk_monitor", "alert", &serde_json::json!({"level": "high"}))
            .unwrap();

        assert_eq!(
            log.event_kinds("risk_monitor").unwrap(),
            vec!["started".to_string(), "alert".to_string()]
        );
    }

    #[test]
    fn records_metrics() {
        let log = SqliteAuditLog::open_in_memory().unwrap();
        log.record_metrics("signal_validator", &AgentMetrics::default())
            .unwrap();
    }

    #[test]
    fn null_audit_accepts_everything() {
        let audit = NullAudit;
        audit
            .record_task("x", &AgentTask::new("noop", serde_json::Value::Null))
            .unwrap();
        audit
            .record_event("x", "noop", &serde_json::Value::Null)
            .unwrap();
    }
}
