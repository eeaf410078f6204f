pub mod config;
pub mod regime;
pub mod risk;
pub mod signal;
pub mod store_schema;
pub mod task;
pub mod validation;

pub use config::{
    FeedConfig, RiskConfig, RuntimeConfig, StoreBackend, StoreConfig, ValidatorConfig,
    VigilConfig,
};
pub use regime::{MarketRegime, RegimeSnapshot, REGIME_SCHEMA_VERSION};
pub use risk::{
    AccountRisk, ActionExecution, ExecutionStatus, PositionRisk, RiskAction, RiskAlert,
    RiskAlertType, RiskLevel,
};
pub use signal::{PositionSide, RecentSignal, SignalAction, SignalParams};
pub use store_schema::{keys, StateKey};
pub use task::{AgentMetrics, AgentState, AgentStatus, AgentTask, TaskPriority, TaskStatus};
pub use validation::{
    RuleDescriptor, SignalValidation, ValidationMetadata, ValidationResult,
};
