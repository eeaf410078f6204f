use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Top-level configuration. Loaded once at startup and handed to each agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VigilConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Configuration for the shared state store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Path to the SQLite state file (sqlite backend only).
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Maximum number of entries held in memory.
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    /// How long a read stays in the hot layer of the sqlite backend.
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_seconds: u64,
    /// Optional SQLite file for the task/event audit log.
    #[serde(default)]
    pub audit_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: default_sqlite_path(),
            memory_max_capacity: default_memory_capacity(),
            memory_ttl_seconds: default_memory_ttl(),
            audit_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Timeout applied to tasks submitted through the facade helpers.
    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_ms: u64,
    /// Submissions beyond this queue depth are refused.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: default_task_timeout(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// Thresholds for the signal validator's rule catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Hard deadline for one evaluation, including the regime read.
    pub evaluation_timeout_ms: u64,
    pub approve_threshold: Decimal,
    pub warning_threshold: Decimal,
    pub min_confidence: Decimal,
    /// Below this confidence (but above the floor) the size is cut.
    pub full_size_confidence: Decimal,
    pub reduced_size_factor: Decimal,
    pub max_price_change_5m_percent: Decimal,
    pub reversal_min_confidence: Decimal,
    pub max_consecutive_signals: usize,
    /// Fraction of available balance a single order may use.
    pub max_balance_fraction: Decimal,
    pub max_volatility: Decimal,
    pub level_proximity_percent: Decimal,
    pub min_trend_strength: Decimal,
    pub max_recent_trades: u32,
    pub max_drawdown_percent: Decimal,
    /// Per-rule weight overrides keyed by rule id.
    pub rule_weights: BTreeMap<String, Decimal>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: 1_000,
            approve_threshold: dec!(0.8),
            warning_threshold: dec!(0.6),
            min_confidence: dec!(0.6),
            full_size_confidence: dec!(0.7),
            reduced_size_factor: dec!(0.5),
            max_price_change_5m_percent: dec!(2),
            reversal_min_confidence: dec!(0.8),
            max_consecutive_signals: 3,
            max_balance_fraction: dec!(0.30),
            max_volatility: dec!(0.05),
            level_proximity_percent: dec!(0.5),
            min_trend_strength: dec!(0.3),
            max_recent_trades: 10,
            max_drawdown_percent: dec!(10),
            rule_weights: BTreeMap::new(),
        }
    }
}

/// Risk limits. All percentages are expressed as percent (5 = 5%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub max_position_loss_percent: Decimal,
    /// In account currency units.
    pub max_daily_loss: Decimal,
    pub max_drawdown_percent: Decimal,
    pub liquidation_warning_percent: Decimal,
    /// Dispatch recommended actions without operator approval.
    pub auto_execute: bool,
    /// Fraction of the position to shed on a reduce action.
    pub reduce_fraction: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_loss_percent: dec!(5),
            max_daily_loss: dec!(1000),
            max_drawdown_percent: dec!(10),
            liquidation_warning_percent: dec!(10),
            auto_execute: false,
            reduce_fraction: dec!(0.5),
        }
    }
}

/// Configuration for the regime feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub interval_seconds: u64,
    /// TTL of each published snapshot; readers see "unknown" after it lapses.
    pub ttl_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: Vec::new(),
            interval_seconds: 60,
            ttl_seconds: 300,
        }
    }
}

fn default_sqlite_path() -> String {
    "data/vigil_state.db".to_string()
}
fn default_memory_capacity() -> u64 {
    10_000
}
fn default_memory_ttl() -> u64 {
    60
}
fn default_task_timeout() -> u64 {
    5_000
}
fn default_max_queue_depth() -> usize {
    1_024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_vigil_config() {
        let config = VigilConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: VigilConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn risk_defaults() {
        let risk = RiskConfig::default();
        assert_eq!(risk.max_position_loss_percent, dec!(5));
        assert_eq!(risk.max_daily_loss, dec!(1000));
        assert_eq!(risk.max_drawdown_percent, dec!(10));
        assert_eq!(risk.liquidation_warning_percent, dec!(10));
        assert!(!risk.auto_execute);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: VigilConfig = toml::from_str("").unwrap();
        assert_eq!(config, VigilConfig::default());
        assert_eq!(config.validator.evaluation_timeout_ms, 1_000);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[store]
backend = "sqlite"
sqlite_path = "/tmp/vigil_test.db"
audit_path = "/tmp/vigil_audit.db"

[runtime]
default_task_timeout_ms = 2000

[validator]
evaluation_timeout_ms = 250
max_balance_fraction = "0.25"

[validator.rule_weights]
trend_strength = "2.0"

[risk]
max_daily_loss = "500"
auto_execute = true

[feed]
enabled = true
symbols = ["BTCUSDT", "ETHUSDT"]
interval_seconds = 30
"#;

        let config: VigilConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.memory_max_capacity, 10_000);
        assert_eq!(config.runtime.default_task_timeout_ms, 2000);
        assert_eq!(config.runtime.max_queue_depth, 1_024);
        assert_eq!(config.validator.evaluation_timeout_ms, 250);
        assert_eq!(config.validator.max_balance_fraction, dec!(0.25));
        assert_eq!(config.validator.min_confidence, dec!(0.6));
        assert_eq!(
            config.validator.rule_weights.get("trend_strength"),
            Some(&dec!(2.0))
        );
        assert_eq!(config.risk.max_daily_loss, dec!(500));
        assert_eq!(config.risk.max_position_loss_percent, dec!(5));
        assert!(config.risk.auto_execute);
        assert_eq!(config.feed.symbols.len(), 2);
        assert_eq!(config.feed.ttl_seconds, 300);
    }
}
