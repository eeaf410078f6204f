//! End-to-end validation scenarios: signal in, verdict out, with the regime
//! read from a real state channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vigil_agents::test_support::{
    memory_store, FailingStateChannel, SignalBuilder, SlowStateChannel,
};
use vigil_agents::validator::rules;
use vigil_agents::{AgentRuntime, SignalValidator};
use vigil_models::{
    keys, AgentTask, MarketRegime, PositionSide, RegimeSnapshot, SignalAction, SignalValidation,
    TaskStatus, ValidationResult, ValidatorConfig,
};
use vigil_store::{set_typed, Envelope, MemoryStateChannel, StateChannel};

const SYMBOL: &str = "BTCUSDT";

fn regime(kind: MarketRegime) -> RegimeSnapshot {
    RegimeSnapshot {
        symbol: SYMBOL.to_string(),
        regime: kind,
        volatility: Some(dec!(0.015)),
        trend_strength: Some(dec!(0.65)),
        confidence: dec!(0.9),
        observed_at: Utc::now(),
    }
}

async fn store_with(kind: MarketRegime) -> Arc<MemoryStateChannel> {
    let store = memory_store().await;
    set_typed(store.as_ref(), &keys::regime(SYMBOL), &regime(kind), None)
        .await
        .unwrap();
    store
}

async fn validator_with(kind: MarketRegime) -> SignalValidator {
    SignalValidator::new(ValidatorConfig::default(), store_with(kind).await)
}

#[tokio::test]
async fn aligned_signal_is_approved() {
    let validator = validator_with(MarketRegime::TrendingUp).await;
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).build())
        .await;

    assert_eq!(out.result, ValidationResult::Approved);
    assert_eq!(out.confidence_score, Decimal::ONE);
    assert_eq!(out.metadata.regime, MarketRegime::TrendingUp);
    assert_eq!(out.passed_rules.len(), 11);
    assert!(out.reasons.is_empty());
}

#[tokio::test]
async fn moderate_confidence_is_a_sized_down_warning() {
    let validator = validator_with(MarketRegime::TrendingUp).await;
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).confidence(dec!(0.65)).build())
        .await;

    assert_eq!(out.result, ValidationResult::Warning);
    assert_eq!(out.metadata.position_adjustment, dec!(0.5));
    assert_eq!(out.metadata.order_size_adjustment, dec!(50));
    assert!(out
        .warnings
        .iter()
        .any(|w| w.starts_with(rules::CONFIDENCE_THRESHOLD)));
}

#[tokio::test]
async fn any_critical_failure_rejects() {
    let validator = validator_with(MarketRegime::TrendingUp).await;
    let cases = [
        (
            SignalBuilder::new(SYMBOL).confidence(dec!(0.4)).build(),
            rules::CONFIDENCE_THRESHOLD,
        ),
        (
            SignalBuilder::new(SYMBOL).action(SignalAction::Sell).build(),
            rules::MARKET_REGIME,
        ),
        (
            SignalBuilder::new(SYMBOL).price_change_5m(dec!(-4)).build(),
            rules::SUDDEN_PRICE_CHANGE,
        ),
        (
            SignalBuilder::new(SYMBOL)
                .action(SignalAction::Sell)
                .position(PositionSide::Long)
                .confidence(dec!(0.75))
                .build(),
            rules::POSITION_REVERSAL,
        ),
    ];

    for (signal, rule) in cases {
        let out = validator.validate_signal(&signal).await;
        assert_eq!(out.result, ValidationResult::Rejected, "rule {rule}");
        assert!(out.failed_rules.contains(&rule.to_string()), "rule {rule}");
        assert_eq!(out.metadata.order_size_adjustment, Decimal::ZERO);
    }
}

#[tokio::test]
async fn fourth_same_direction_signal_is_rejected() {
    let validator = validator_with(MarketRegime::TrendingUp).await;

    let third = SignalBuilder::new(SYMBOL).recent(SignalAction::Buy, 2).build();
    assert_ne!(
        validator.validate_signal(&third).await.result,
        ValidationResult::Rejected
    );

    let fourth = SignalBuilder::new(SYMBOL).recent(SignalAction::Buy, 3).build();
    let out = validator.validate_signal(&fourth).await;
    assert_eq!(out.result, ValidationResult::Rejected);
    assert_eq!(out.failed_rules, vec![rules::CONSECUTIVE_SIGNALS.to_string()]);
    // Non-critical, but the veto still rejects despite a high score
    assert!(out.confidence_score >= dec!(0.9));
}

#[tokio::test]
async fn order_size_never_exceeds_balance_cap() {
    let validator = validator_with(MarketRegime::Ranging).await;
    for (size, balance) in [
        (dec!(50), dec!(1000)),
        (dec!(300), dec!(1000)),
        (dec!(301), dec!(1000)),
        (dec!(5000), dec!(1000)),
        (dec!(999), dec!(250.5)),
    ] {
        let signal = SignalBuilder::new(SYMBOL)
            .order_size(size)
            .balance(balance)
            .confidence(dec!(0.66))
            .build();
        let out = validator.validate_signal(&signal).await;
        assert!(
            out.metadata.order_size_adjustment <= balance * dec!(0.30),
            "size {size} balance {balance} -> {}",
            out.metadata.order_size_adjustment
        );
    }
}

#[tokio::test]
async fn oversized_order_is_capped_not_rejected() {
    let validator = validator_with(MarketRegime::TrendingUp).await;
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).order_size(dec!(600)).build())
        .await;
    assert!(out.failed_rules.is_empty());
    assert_eq!(out.result, ValidationResult::Approved);
    assert_eq!(out.metadata.order_size_adjustment, dec!(300));
    assert!(out
        .warnings
        .iter()
        .any(|w| w.starts_with(rules::BALANCE_LIMIT)));
}

#[tokio::test]
async fn empty_or_overdrawn_balance_rejects() {
    let validator = validator_with(MarketRegime::TrendingUp).await;
    for balance in [dec!(0), dec!(-250)] {
        let out = validator
            .validate_signal(&SignalBuilder::new(SYMBOL).balance(balance).build())
            .await;
        assert_eq!(out.result, ValidationResult::Rejected, "balance {balance}");
        assert!(out.failed_rules.contains(&rules::BALANCE_LIMIT.to_string()));
        assert_eq!(out.metadata.order_size_adjustment, Decimal::ZERO);
    }
}

#[tokio::test]
async fn scores_stay_in_unit_interval() {
    let validator = validator_with(MarketRegime::Volatile).await;
    let signals = [
        SignalBuilder::new(SYMBOL).build(),
        SignalBuilder::new(SYMBOL)
            .confidence(dec!(0.1))
            .price_change_5m(dec!(9))
            .recent_trades(50)
            .drawdown(dec!(40))
            .balance(dec!(0))
            .build(),
        SignalBuilder::new(SYMBOL).action(SignalAction::Close).build(),
    ];
    for signal in &signals {
        let out = validator.validate_signal(signal).await;
        assert!(out.confidence_score >= Decimal::ZERO);
        assert!(out.confidence_score <= Decimal::ONE);
    }
}

#[tokio::test]
async fn identical_input_gives_identical_verdict() {
    let validator = validator_with(MarketRegime::Ranging).await;
    let signal = SignalBuilder::new(SYMBOL)
        .id("sig-determinism")
        .confidence(dec!(0.68))
        .levels(Some(dec!(90)), Some(dec!(100.3)))
        .build();

    let a = validator.validate_signal(&signal).await;
    let b = validator.validate_signal(&signal).await;
    assert_eq!(a.result, b.result);
    assert_eq!(a.confidence_score, b.confidence_score);
    assert_eq!(a.passed_rules, b.passed_rules);
    assert_eq!(a.failed_rules, b.failed_rules);
    assert_eq!(a.metadata.rule_messages, b.metadata.rule_messages);
}

#[tokio::test]
async fn stalled_store_read_is_rejected_at_deadline() {
    let store = Arc::new(SlowStateChannel::new(Duration::from_millis(500)));
    store.connect().await.unwrap();
    let config = ValidatorConfig {
        evaluation_timeout_ms: 50,
        ..ValidatorConfig::default()
    };
    let validator = SignalValidator::new(config, store);

    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).build())
        .await;
    assert_eq!(out.result, ValidationResult::Rejected);
    assert_eq!(out.failed_rules, vec!["timeout".to_string()]);
    assert_eq!(out.confidence_score, Decimal::ZERO);
    assert!(out.metadata.timed_out);
    assert_eq!(validator.counters().rejected, 1);
}

#[tokio::test]
async fn stalled_store_write_does_not_hold_the_verdict() {
    let store = Arc::new(SlowStateChannel::stalling_writes(Duration::from_millis(400)));
    store.connect().await.unwrap();
    set_typed(
        store.inner(),
        &keys::regime(SYMBOL),
        &regime(MarketRegime::TrendingUp),
        None,
    )
    .await
    .unwrap();
    let config = ValidatorConfig {
        evaluation_timeout_ms: 100,
        ..ValidatorConfig::default()
    };
    let validator = SignalValidator::new(config, store.clone());

    let started = std::time::Instant::now();
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).id("sig-stalled-write").build())
        .await;
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(out.result, ValidationResult::Approved);

    // The write still lands once the store catches up
    tokio::time::sleep(Duration::from_millis(600)).await;
    let stored: Option<SignalValidation> =
        vigil_store::get_typed(store.inner(), &keys::validation("sig-stalled-write"))
            .await
            .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn store_outage_degrades_to_unknown_regime() {
    let validator = SignalValidator::new(ValidatorConfig::default(), Arc::new(FailingStateChannel));
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).build())
        .await;

    assert_eq!(out.metadata.regime, MarketRegime::Unknown);
    assert!(out.passed_rules.contains(&rules::MARKET_REGIME.to_string()));
    assert!(out.failed_rules.contains(&rules::TREND_STRENGTH.to_string()));
    assert_ne!(out.result, ValidationResult::Rejected);
}

#[tokio::test]
async fn expired_snapshot_reads_as_unknown() {
    let store = memory_store().await;
    set_typed(
        store.as_ref(),
        &keys::regime(SYMBOL),
        &regime(MarketRegime::Volatile),
        Some(Duration::from_millis(30)),
    )
    .await
    .unwrap();
    let validator = SignalValidator::new(ValidatorConfig::default(), store);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let out = validator
        .validate_signal(&SignalBuilder::new(SYMBOL).build())
        .await;
    assert_eq!(out.metadata.regime, MarketRegime::Unknown);
}

#[tokio::test]
async fn verdicts_are_published_and_stored() {
    let store = store_with(MarketRegime::TrendingUp).await;
    let mut rx = store
        .subscribe(keys::channel::SIGNALS_VALIDATED)
        .await
        .unwrap();
    let validator = SignalValidator::new(ValidatorConfig::default(), store.clone());

    let signal = SignalBuilder::new(SYMBOL).id("sig-published").build();
    validator.validate_signal(&signal).await;

    let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let envelope = Envelope::<SignalValidation>::decode(&message).unwrap();
    assert_eq!(envelope.payload.signal_id, "sig-published");
    assert_eq!(envelope.payload.result, ValidationResult::Approved);

    let stored: Option<SignalValidation> =
        vigil_store::get_typed(store.as_ref(), &keys::validation("sig-published"))
            .await
            .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn runtime_deadline_yields_fail_closed_result() {
    let store = Arc::new(SlowStateChannel::new(Duration::from_millis(500)));
    store.connect().await.unwrap();
    let validator = Arc::new(SignalValidator::new(ValidatorConfig::default(), store));
    let runtime = AgentRuntime::new(validator, 16);
    runtime.start().unwrap();

    let params = serde_json::to_value(SignalBuilder::new(SYMBOL).id("sig-slow").build()).unwrap();
    let task = AgentTask::new("validate_signal", params).with_timeout(Duration::from_millis(50));
    let task = runtime.execute(task).await.unwrap();

    assert_eq!(task.status, TaskStatus::TimedOut);
    let verdict: SignalValidation = serde_json::from_value(task.result.unwrap()).unwrap();
    assert_eq!(verdict.signal_id, "sig-slow");
    assert_eq!(verdict.result, ValidationResult::Rejected);
    assert_eq!(verdict.failed_rules, vec!["timeout".to_string()]);
}

#[tokio::test]
async fn runtime_runs_validation_tasks() {
    let validator = Arc::new(validator_with(MarketRegime::TrendingUp).await);
    let runtime = AgentRuntime::new(validator.clone(), 16);
    runtime.start().unwrap();

    let params = serde_json::to_value(SignalBuilder::new(SYMBOL).build()).unwrap();
    let task = runtime
        .execute(AgentTask::new("validate_signal", params))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let bad = runtime
        .execute(AgentTask::new("validate_signal", serde_json::json!({"symbol": 3})))
        .await
        .unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert!(bad.error.unwrap().contains("Invalid task parameters"));

    assert_eq!(validator.counters().approved, 1);
}
