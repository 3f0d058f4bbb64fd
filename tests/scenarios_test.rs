//! End-to-end scenarios from `spec.md` §8 that don't require a live broker:
//! test-mode `delay()` (scenario A) and AMQP policy validation at
//! registration time (scenario D). Scenarios B, C, E require a running AMQP
//! or Kafka broker and are out of scope for this suite; their underlying
//! ack/reject and grouping logic is covered by unit tests in
//! `transport::amqp` and `transport::logbroker`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use oxalis_rs::config::RuntimeSettings;
use oxalis_rs::core::{RegistryError, TaskBody};
use oxalis_rs::transport::amqp::{AmqpAppBuilder, AmqpPolicy};

#[tokio::test]
async fn scenario_a_test_mode_delay_runs_inline_without_a_transport() {
    let settings = RuntimeSettings {
        test: true,
        ..RuntimeSettings::default()
    };
    let mut builder = AmqpAppBuilder::new("amqp://unused.invalid", settings);

    let sum = Arc::new(AtomicI64::new(0));
    let sum_for_task = Arc::clone(&sum);
    builder
        .register(
            "t.add",
            "tasks",
            "tasks",
            "tasks",
            AmqpPolicy::default(),
            None,
            None,
            TaskBody::Sync(Arc::new(move |args, _kwargs| {
                let a = args[0].as_i64().unwrap_or(0);
                let b = args[1].as_i64().unwrap_or(0);
                sum_for_task.store(a + b, Ordering::SeqCst);
                Ok(())
            })),
        )
        .unwrap();

    let state = oxalis_rs::runtime::WorkerState::new(false);
    let app = builder.build(state);

    app.delay(
        "t.add",
        vec![serde_json::json!(3), serde_json::json!(4)],
        serde_json::Map::new(),
        Default::default(),
    )
    .await
    .unwrap();

    assert_eq!(sum.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn scenario_d_invalid_ack_policy_is_rejected_before_registration() {
    let settings = RuntimeSettings::default();
    let mut builder = AmqpAppBuilder::new("amqp://unused.invalid", settings);

    let invalid_policy = AmqpPolicy {
        ack_later: true,
        ack_always: true,
        reject: true,
        reject_requeue: false,
    };

    let err = builder
        .register(
            "t.bad",
            "tasks",
            "tasks",
            "tasks",
            invalid_policy,
            None,
            None,
            TaskBody::Sync(Arc::new(|_args, _kwargs| Ok(()))),
        )
        .unwrap_err();

    assert!(matches!(err, RegistryError::Config(_)));

    let state = oxalis_rs::runtime::WorkerState::new(false);
    let app = builder.build(state);
    let delay_err = app
        .delay("t.bad", vec![], serde_json::Map::new(), Default::default())
        .await
        .unwrap_err();
    assert!(delay_err.to_string().contains("not registered"));
}
