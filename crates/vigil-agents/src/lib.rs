pub mod error;
pub mod handler;
pub mod regime_feed;
pub mod risk;
pub mod runtime;
pub mod validator;

pub mod test_support;

pub use error::{ActionExecutionError, AgentError, RuleError};
pub use handler::TaskHandler;
pub use regime_feed::{classify_regime, PriceBar, PriceSource, RegimeFeed, RegimeThresholds};
pub use risk::{
    ActionDispatcher, ActionOutcome, LoggingExecutor, OrderExecutor, RiskMonitor, RiskReport,
};
pub use runtime::{AgentRuntime, TaskHandle};
pub use validator::{
    default_rules, timeout_rejection, RuleContext, RuleOutcome, SignalValidator, ValidationCounters,
    ValidationRule, Verdict,
};
