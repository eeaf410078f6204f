use serde::{Deserialize, Serialize};

/// Table backing the SQLite state channel.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS state_entries (
///     key         TEXT PRIMARY KEY,
///     value_json  TEXT NOT NULL,
///     updated_at  TEXT NOT NULL,
///     expires_at  TEXT
/// );
/// ```
///
/// A NULL `expires_at` never expires.
pub const STATE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS state_entries (
    key         TEXT PRIMARY KEY,
    value_json  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    expires_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_state_expires ON state_entries(expires_at);
";

/// Write-only audit tables for agent tasks, lifecycle events and metrics.
pub const AUDIT_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS agent_tasks (
    id            TEXT PRIMARY KEY,
    agent         TEXT NOT NULL,
    task_type     TEXT NOT NULL,
    priority      TEXT NOT NULL,
    status        TEXT NOT NULL,
    parameters    TEXT NOT NULL,
    result        TEXT,
    error         TEXT,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT
);
CREATE TABLE IF NOT EXISTS agent_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    agent         TEXT NOT NULL,
    kind          TEXT NOT NULL,
    payload       TEXT NOT NULL,
    recorded_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS agent_metrics (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    agent         TEXT NOT NULL,
    metrics_json  TEXT NOT NULL,
    recorded_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_agent ON agent_tasks(agent);
CREATE INDEX IF NOT EXISTS idx_events_agent ON agent_events(agent);
";

/// A namespaced key in the shared state store.
///
/// Only constructed through [`keys`], so producers and consumers agree on the
/// layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey(String);

impl StateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key and channel conventions.
///
/// - Current regime: `regime:{symbol}` (e.g., `regime:BTCUSDT`)
/// - Last validation per signal: `validation:{signal_id}`
/// - Agent status: `agent:{name}:status`
pub mod keys {
    use super::StateKey;

    pub fn regime(symbol: &str) -> StateKey {
        StateKey(format!("regime:{symbol}"))
    }

    pub fn validation(signal_id: &str) -> StateKey {
        StateKey(format!("validation:{signal_id}"))
    }

    pub fn agent_status(agent: &str) -> StateKey {
        StateKey(format!("agent:{agent}:status"))
    }

    /// Publish/subscribe channel names.
    pub mod channel {
        pub const REGIME_UPDATES: &str = "regime:updates";
        pub const SIGNALS_VALIDATED: &str = "signals:validated";
        pub const RISK_ALERTS: &str = "risk:alerts";
    }
}
