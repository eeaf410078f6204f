pub mod rules;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_models::{
    keys, AgentTask, MarketRegime, RegimeSnapshot, SignalParams, SignalValidation,
    ValidationMetadata, ValidationResult, ValidatorConfig,
};
use vigil_store::{get_or_else, publish_typed, set_typed, StateChannel};

use crate::error::AgentError;
use crate::handler::{parse_parameters, TaskHandler};

pub use rules::{default_rules, RuleContext, RuleOutcome, ValidationRule, Verdict};

pub const VALIDATE_SIGNAL: &str = "validate_signal";

/// How long a validation stays readable under `validation:{signal_id}`.
const VALIDATION_TTL: Duration = Duration::from_secs(3600);

/// Running tally of validation outcomes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationCounters {
    pub approved: u64,
    pub warning: u64,
    pub rejected: u64,
}

impl ValidationCounters {
    pub fn total(&self) -> u64 {
        self.approved + self.warning + self.rejected
    }
}

/// Judges trade signals against the rule catalogue before any order is
/// placed.
///
/// Validation never fails outright: a store outage degrades to an unknown
/// regime and a missed deadline yields a rejection.
pub struct SignalValidator {
    config: ValidatorConfig,
    rules: Vec<Box<dyn ValidationRule>>,
    store: Arc<dyn StateChannel>,
    approved: AtomicU64,
    warning: AtomicU64,
    rejected: AtomicU64,
}

impl SignalValidator {
    pub fn new(config: ValidatorConfig, store: Arc<dyn StateChannel>) -> Self {
        let rules = default_rules(&config);
        Self::with_rules(config, store, rules)
    }

    pub fn with_rules(
        config: ValidatorConfig,
        store: Arc<dyn StateChannel>,
        rules: Vec<Box<dyn ValidationRule>>,
    ) -> Self {
        Self {
            config,
            rules,
            store,
            approved: AtomicU64::new(0),
            warning: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &[Box<dyn ValidationRule>] {
        &self.rules
    }

    pub fn counters(&self) -> ValidationCounters {
        ValidationCounters {
            approved: self.approved.load(Ordering::Relaxed),
            warning: self.warning.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.config.evaluation_timeout_ms)
    }

    /// Validate one signal within the configured deadline.
    pub async fn validate_signal(&self, params: &SignalParams) -> SignalValidation {
        let start = Instant::now();
        info!(signal_id = %params.signal_id, symbol = %params.symbol, action = %params.action, "Validating signal");

        let validation = match tokio::time::timeout(self.deadline(), self.evaluate(params, start)).await {
            Ok(validation) => validation,
            Err(_) => {
                warn!(
                    signal_id = %params.signal_id,
                    timeout_ms = self.config.evaluation_timeout_ms,
                    "Validation timed out; rejecting"
                );
                timeout_rejection(params, start.elapsed().as_millis() as u64)
            }
        };

        self.count(validation.result);
        info!(
            signal_id = %validation.signal_id,
            result = %validation.result,
            score = %validation.confidence_score,
            failed = ?validation.failed_rules,
            elapsed_ms = validation.metadata.evaluation_ms,
            "Signal validated"
        );
        self.share(&validation, start).await;
        validation
    }

    async fn evaluate(&self, params: &SignalParams, start: Instant) -> SignalValidation {
        let key = keys::regime(&params.symbol);
        let regime =
            get_or_else(self.store.as_ref(), &key, || RegimeSnapshot::unknown(&params.symbol))
                .await;
        let mut validation = self.decide(params, &regime);
        validation.metadata.evaluation_ms = start.elapsed().as_millis() as u64;
        validation
    }

    /// Apply every rule to the signal and combine the outcomes. Pure given
    /// the regime snapshot.
    pub fn decide(&self, params: &SignalParams, regime: &RegimeSnapshot) -> SignalValidation {
        let ctx = RuleContext {
            signal: params,
            regime,
        };

        let mut passed_rules = Vec::new();
        let mut failed_rules = Vec::new();
        let mut warnings = Vec::new();
        let mut reasons = Vec::new();
        let mut rule_messages = BTreeMap::new();

        let mut total_weight = Decimal::ZERO;
        let mut passed_weight = Decimal::ZERO;
        let mut critical_failure = false;
        let mut vetoed = false;
        let mut adjustment: Option<Decimal> = None;
        // Reduced-size confidence band; caps the verdict at Warning.
        let mut conditional = false;

        if regime.is_unknown() {
            warnings.push(format!("regime data unavailable for {}", params.symbol));
        }

        for rule in &self.rules {
            let descriptor = rule.descriptor();
            total_weight += descriptor.weight;

            let outcome = rule.evaluate(&ctx).unwrap_or_else(|e| {
                warn!(rule = %descriptor.id, error = %e, "Rule errored; counting as failed");
                RuleOutcome::fail(e.to_string())
            });
            debug!(rule = %descriptor.id, verdict = ?outcome.verdict, message = %outcome.message, "Rule evaluated");

            let line = format!("{}: {}", descriptor.id, outcome.message);
            match outcome.verdict {
                Verdict::Pass => {
                    passed_weight += descriptor.weight;
                    passed_rules.push(descriptor.id.clone());
                }
                Verdict::Adjust(factor) => {
                    passed_weight += descriptor.weight;
                    passed_rules.push(descriptor.id.clone());
                    adjustment = Some(adjustment.map_or(factor, |a| a.min(factor)));
                    conditional |= descriptor.id == rules::CONFIDENCE_THRESHOLD;
                    warnings.push(line);
                }
                Verdict::Fail if descriptor.is_critical => {
                    critical_failure = true;
                    failed_rules.push(descriptor.id.clone());
                    reasons.push(line);
                }
                Verdict::Fail => {
                    failed_rules.push(descriptor.id.clone());
                    warnings.push(line);
                }
                Verdict::Veto => {
                    vetoed = true;
                    failed_rules.push(descriptor.id.clone());
                    reasons.push(line);
                }
            }
            rule_messages.insert(descriptor.id.clone(), outcome.message);
        }

        let confidence_score = if total_weight > Decimal::ZERO {
            (passed_weight / total_weight)
                .clamp(Decimal::ZERO, Decimal::ONE)
                .round_dp(4)
        } else {
            Decimal::ZERO
        };

        let result = if critical_failure || vetoed {
            ValidationResult::Rejected
        } else if confidence_score < self.config.warning_threshold {
            reasons.push(format!(
                "confidence score {confidence_score} below {}",
                self.config.warning_threshold
            ));
            ValidationResult::Rejected
        } else if confidence_score >= self.config.approve_threshold && !conditional {
            ValidationResult::Approved
        } else {
            ValidationResult::Warning
        };

        let position_adjustment = adjustment.unwrap_or(Decimal::ONE).min(Decimal::ONE);
        let order_size_adjustment = if result == ValidationResult::Rejected {
            Decimal::ZERO
        } else {
            let cap = params.available_balance * self.config.max_balance_fraction;
            (params.order_size * position_adjustment)
                .min(cap)
                .max(Decimal::ZERO)
        };

        SignalValidation {
            signal_id: params.signal_id.clone(),
            symbol: params.symbol.clone(),
            result,
            confidence_score,
            passed_rules,
            failed_rules,
            warnings,
            reasons,
            metadata: ValidationMetadata {
                position_adjustment,
                order_size_adjustment,
                regime: regime.regime,
                rule_messages,
                evaluation_ms: 0,
                timed_out: false,
            },
            validated_at: Utc::now(),
        }
    }

    fn count(&self, result: ValidationResult) {
        let counter = match result {
            ValidationResult::Approved => &self.approved,
            ValidationResult::Warning => &self.warning,
            ValidationResult::Rejected | ValidationResult::Pending => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Best-effort: record and broadcast the verdict. The caller waits at
    /// most for what is left of the deadline; a slower write finishes in
    /// the background.
    async fn share(&self, validation: &SignalValidation, start: Instant) {
        let write = tokio::spawn(store_and_publish(Arc::clone(&self.store), validation.clone()));
        let remaining = self.deadline().saturating_sub(start.elapsed());
        if tokio::time::timeout(remaining, write).await.is_err() {
            debug!(signal_id = %validation.signal_id, "Store write outlived the deadline; continuing in background");
        }
    }
}

async fn store_and_publish(store: Arc<dyn StateChannel>, validation: SignalValidation) {
    if let Err(e) = set_typed(
        store.as_ref(),
        &keys::validation(&validation.signal_id),
        &validation,
        Some(VALIDATION_TTL),
    )
    .await
    {
        warn!(signal_id = %validation.signal_id, error = %e, "Failed to store validation");
    }
    if let Err(e) =
        publish_typed(store.as_ref(), keys::channel::SIGNALS_VALIDATED, &validation).await
    {
        warn!(signal_id = %validation.signal_id, error = %e, "Failed to publish validation");
    }
}

/// The fail-closed verdict for an evaluation that missed its deadline.
pub fn timeout_rejection(params: &SignalParams, elapsed_ms: u64) -> SignalValidation {
    SignalValidation {
        signal_id: params.signal_id.clone(),
        symbol: params.symbol.clone(),
        result: ValidationResult::Rejected,
        confidence_score: Decimal::ZERO,
        passed_rules: vec![],
        failed_rules: vec!["timeout".to_string()],
        warnings: vec![],
        reasons: vec!["validation timed out".to_string()],
        metadata: ValidationMetadata {
            position_adjustment: Decimal::ZERO,
            order_size_adjustment: Decimal::ZERO,
            regime: MarketRegime::Unknown,
            rule_messages: BTreeMap::new(),
            evaluation_ms: elapsed_ms,
            timed_out: true,
        },
        validated_at: Utc::now(),
    }
}

#[async_trait]
impl TaskHandler for SignalValidator {
    fn name(&self) -> &str {
        "signal_validator"
    }

    async fn handle(&self, task: &AgentTask) -> Result<serde_json::Value, AgentError> {
        if task.task_type != VALIDATE_SIGNAL {
            return Err(AgentError::UnknownTaskType(task.task_type.clone()));
        }
        let params: SignalParams = parse_parameters(task)?;
        let validation = self.validate_signal(&params).await;
        Ok(serde_json::to_value(validation)?)
    }

    fn on_timeout(&self, task: &AgentTask) -> Option<serde_json::Value> {
        let params: SignalParams = parse_parameters(task).ok()?;
        let elapsed = task
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(task.timeout_ms);
        serde_json::to_value(timeout_rejection(&params, elapsed)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_models::{PositionSide, SignalAction};
    use vigil_store::MemoryStateChannel;

    async fn validator() -> SignalValidator {
        let store = Arc::new(MemoryStateChannel::new(100));
        store.connect().await.unwrap();
        SignalValidator::new(ValidatorConfig::default(), store)
    }

    fn params() -> SignalParams {
        SignalParams {
            signal_id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            action: SignalAction::Buy,
            confidence: dec!(0.85),
            current_price: dec!(50000),
            price_change_5m_percent: dec!(0.5),
            current_position: PositionSide::None,
            recent_signals: vec![],
            order_size: dec!(100),
            available_balance: dec!(1000),
            support_level: None,
            resistance_level: None,
            recent_trade_count: 1,
            current_drawdown_percent: dec!(2),
        }
    }

    fn trending_up() -> RegimeSnapshot {
        RegimeSnapshot {
            symbol: "BTCUSDT".to_string(),
            regime: MarketRegime::TrendingUp,
            volatility: Some(dec!(0.02)),
            trend_strength: Some(dec!(0.7)),
            confidence: dec!(0.9),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn clean_signal_is_approved() {
        let v = validator().await;
        let out = v.decide(&params(), &trending_up());
        assert_eq!(out.result, ValidationResult::Approved);
        assert_eq!(out.confidence_score, Decimal::ONE);
        assert_eq!(out.metadata.position_adjustment, Decimal::ONE);
        assert_eq!(out.metadata.order_size_adjustment, dec!(100));
        assert!(out.failed_rules.is_empty());
    }

    #[tokio::test]
    async fn reduced_confidence_is_a_warning() {
        let v = validator().await;
        let mut p = params();
        p.confidence = dec!(0.65);
        let out = v.decide(&p, &trending_up());
        assert_eq!(out.result, ValidationResult::Warning);
        assert_eq!(out.metadata.position_adjustment, dec!(0.5));
        assert_eq!(out.metadata.order_size_adjustment, dec!(50));
    }

    #[tokio::test]
    async fn balance_cap_scales_size_without_downgrading() {
        let v = validator().await;
        let mut p = params();
        p.order_size = dec!(400);
        let out = v.decide(&p, &trending_up());
        assert!(out.failed_rules.is_empty());
        assert_eq!(out.confidence_score, Decimal::ONE);
        assert_eq!(out.result, ValidationResult::Approved);
        assert_eq!(out.metadata.order_size_adjustment, dec!(300));
    }

    #[tokio::test]
    async fn negative_balance_rejects() {
        let v = validator().await;
        let mut p = params();
        p.available_balance = dec!(-20);
        let out = v.decide(&p, &trending_up());
        assert_eq!(out.result, ValidationResult::Rejected);
        assert_eq!(out.failed_rules, vec![rules::BALANCE_LIMIT.to_string()]);
        assert_eq!(out.metadata.order_size_adjustment, Decimal::ZERO);
    }

    #[tokio::test]
    async fn critical_failure_rejects() {
        let v = validator().await;
        let mut p = params();
        p.price_change_5m_percent = dec!(3.1);
        let out = v.decide(&p, &trending_up());
        assert_eq!(out.result, ValidationResult::Rejected);
        assert_eq!(out.failed_rules, vec![rules::SUDDEN_PRICE_CHANGE.to_string()]);
        assert_eq!(out.metadata.order_size_adjustment, Decimal::ZERO);
        assert!(!out.reasons.is_empty());
    }

    #[tokio::test]
    async fn low_score_rejects_without_critical_failure() {
        let v = validator().await;
        let mut p = params();
        p.recent_trade_count = 20;
        p.current_drawdown_percent = dec!(15);
        p.resistance_level = Some(dec!(50100));
        let mut regime = trending_up();
        regime.volatility = Some(dec!(0.2));
        regime.trend_strength = Some(dec!(0.1));

        let out = v.decide(&p, &regime);
        // 4 advisory + drawdown failed: (12 - 4.0) / 12
        assert_eq!(out.confidence_score, dec!(0.6667));
        assert_eq!(out.result, ValidationResult::Warning);

        p.order_size = Decimal::ZERO;
        let out = v.decide(&p, &regime);
        assert_eq!(out.result, ValidationResult::Rejected);
        assert!(out.confidence_score < dec!(0.6));
    }

    #[tokio::test]
    async fn unknown_regime_degrades_without_blocking() {
        let v = validator().await;
        let out = v.validate_signal(&params()).await;
        assert_ne!(out.result, ValidationResult::Rejected);
        assert_eq!(out.metadata.regime, MarketRegime::Unknown);
        assert!(out.passed_rules.contains(&rules::MARKET_REGIME.to_string()));
        assert!(out
            .failed_rules
            .contains(&rules::VOLATILITY_THRESHOLD.to_string()));
        assert!(out.warnings.iter().any(|w| w.contains("regime data unavailable")));
    }

    #[tokio::test]
    async fn counters_track_results() {
        let v = validator().await;
        v.validate_signal(&params()).await;
        let mut p = params();
        p.confidence = dec!(0.3);
        v.validate_signal(&p).await;

        let counters = v.counters();
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.total(), 2);
    }

    #[tokio::test]
    async fn handler_rejects_unknown_task_type() {
        let v = validator().await;
        let task = AgentTask::new("check_drawdown", serde_json::Value::Null);
        assert!(matches!(
            v.handle(&task).await,
            Err(AgentError::UnknownTaskType(_))
        ));
    }

    #[test]
    fn timeout_rejection_is_fail_closed() {
        let out = timeout_rejection(&params(), 1000);
        assert_eq!(out.result, ValidationResult::Rejected);
        assert_eq!(out.failed_rules, vec!["timeout".to_string()]);
        assert_eq!(out.confidence_score, Decimal::ZERO);
        assert!(out.metadata.timed_out);
    }
}
