use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::regime::MarketRegime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    Approved,
    Warning,
    Rejected,
    Pending,
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Warning => "warning",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        };
        write!(f, "{s}")
    }
}

/// Static description of one validation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDescriptor {
    pub id: String,
    pub name: String,
    pub weight: Decimal,
    /// A failing critical rule rejects the signal on its own.
    pub is_critical: bool,
}

impl RuleDescriptor {
    pub fn new(id: &str, name: &str, weight: Decimal, is_critical: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            weight,
            is_critical,
        }
    }
}

/// Sizing and audit details attached to every validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationMetadata {
    /// Multiplier in (0, 1] to apply to the position size.
    pub position_adjustment: Decimal,
    /// Absolute order size the caller may submit. Never exceeds the balance cap.
    pub order_size_adjustment: Decimal,
    pub regime: MarketRegime,
    /// Message produced by each rule, keyed by rule id.
    pub rule_messages: BTreeMap<String, String>,
    pub evaluation_ms: u64,
    pub timed_out: bool,
}

/// Outcome of validating one signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalValidation {
    pub signal_id: String,
    pub symbol: String,
    pub result: ValidationResult,
    /// Weighted fraction of passed rules, in [0, 1].
    pub confidence_score: Decimal,
    pub passed_rules: Vec<String>,
    pub failed_rules: Vec<String>,
    pub warnings: Vec<String>,
    /// Human-readable reasons behind a non-approval.
    pub reasons: Vec<String>,
    pub metadata: ValidationMetadata,
    pub validated_at: DateTime<Utc>,
}

impl SignalValidation {
    pub fn is_approved(&self) -> bool {
        self.result == ValidationResult::Approved
    }

    /// Approved or conditionally approved.
    pub fn allows_order(&self) -> bool {
        matches!(
            self.result,
            ValidationResult::Approved | ValidationResult::Warning
        )
    }
}
