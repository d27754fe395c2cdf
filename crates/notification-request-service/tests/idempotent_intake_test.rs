//! 幂等受理集成测试

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use notification_request::NotificationError;
use notification_request::dto::ResultStatus;
use notification_request::idempotency::{IN_FLIGHT_MESSAGE, IdempotencyGuard};
use notification_request::outbox::OutboxSignal;
use notification_request::repository::{IdempotencyRepositoryTrait, RequestRepositoryTrait};
use notification_request::service::{NotificationIntakeService, OPERATION_TYPE};
use notification_request::test_utils::{
    FixtureTemplates, FixtureUsers, ScriptedPublisher, TestHarness, direct_command,
    test_idempotency_key, test_user,
};
use notification_request::{
    IdempotencyCompletion, IdempotencyRecord, NotificationType, OutboxKind, OutboxRecord,
};
use notification_shared::config::IdempotencyConfig;
use tokio_test::{assert_err, assert_ok};

fn harness() -> TestHarness {
    TestHarness::new(
        FixtureUsers::new().with_user(test_user("u1", "ko")),
        FixtureTemplates::new(),
        ScriptedPublisher::new(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_with_same_key_register_once() {
    let h = harness();
    let key = test_idempotency_key();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let intake = Arc::clone(&h.intake);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            intake
                .submit(&key, direct_command(&["u1"], NotificationType::Email))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        ids.push(result.notification_id.unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.requests().len(), 1);
    assert_eq!(h.store.outbox_records(OutboxKind::Request).len(), 1);

    let records = h.store.idempotency_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation_type, OPERATION_TYPE);
    assert!(records[0].result.is_some());
}

#[tokio::test]
async fn test_replay_ignores_changed_payload() {
    let h = harness();
    let key = test_idempotency_key();

    let first = h
        .intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap();
    let second = h
        .intake
        .submit(&key, direct_command(&["u1"], NotificationType::Push))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.requests().len(), 1);
}

#[tokio::test]
async fn test_rejected_command_leaves_key_reusable() {
    let h = harness();
    let key = test_idempotency_key();

    let mut invalid = direct_command(&["u1"], NotificationType::Email);
    invalid.notification_types.clear();
    let err = h.intake.submit(&key, invalid).await.unwrap_err();
    assert!(matches!(err, NotificationError::Validation(_)));
    assert!(h.store.idempotency_records().is_empty());

    let result = h
        .intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap();
    assert_eq!(result.status, ResultStatus::Success);
}

#[tokio::test]
async fn test_try_submit_reports_failure_without_error() {
    let h = harness();
    let mut invalid = direct_command(&["u1"], NotificationType::Email);
    invalid.content = None;

    let result = h.intake.try_submit(&test_idempotency_key(), invalid).await;
    assert_eq!(result.status, ResultStatus::Failure);
    assert!(result.notification_id.is_none());
    assert!(!result.message.is_empty());
}

#[tokio::test]
async fn test_fresh_placeholder_blocks_until_wait_expires() {
    let h = harness();
    let key = test_idempotency_key();
    h.store.put_idempotency_record(IdempotencyRecord {
        key: key.clone(),
        operation_type: OPERATION_TYPE.to_string(),
        result: None,
        created_at: Utc::now(),
    });

    let err = h
        .intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap_err();
    match err {
        NotificationError::DuplicateRequest(message) => assert_eq!(message, IN_FLIGHT_MESSAGE),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.store.requests().is_empty());
}

#[tokio::test]
async fn test_abandoned_placeholder_is_taken_over() {
    let h = harness();
    let key = test_idempotency_key();
    h.store.put_idempotency_record(IdempotencyRecord {
        key: key.clone(),
        operation_type: OPERATION_TYPE.to_string(),
        result: None,
        created_at: Utc::now() - Duration::hours(1),
    });

    let result = h
        .intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap();
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(h.store.requests().len(), 1);
    assert!(h.store.idempotency_records()[0].result.is_some());
}

#[tokio::test]
async fn test_committed_request_replays_after_placeholder_ttl() {
    let h = harness();
    let guard = Arc::new(IdempotencyGuard::new(
        h.store.clone(),
        IdempotencyConfig {
            in_flight_wait_ms: 500,
            poll_interval_ms: 5,
            placeholder_ttl_secs: 1,
        },
    ));
    let intake = NotificationIntakeService::new(
        h.store.clone(),
        guard,
        OutboxSignal::disconnected(OutboxKind::Request),
    );
    let key = test_idempotency_key();

    let first = intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap();
    // 结果与请求一起提交，TTL 过后也不会被当作崩溃的占位接管
    assert!(h.store.idempotency_records()[0].result.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let second = intake
        .submit(&key, direct_command(&["u1"], NotificationType::Email))
        .await
        .unwrap();

    assert_eq!(first.notification_id, second.notification_id);
    assert_eq!(h.store.requests().len(), 1);
    assert_eq!(h.store.outbox_records(OutboxKind::Request).len(), 1);
}

#[tokio::test]
async fn test_superseded_owner_cannot_commit_request() {
    let h = harness();
    let key = test_idempotency_key();
    let claimed_at = Utc::now().trunc_subsecs(6) - Duration::minutes(10);

    assert!(assert_ok!(
        h.store
            .try_insert_placeholder(&key, OPERATION_TYPE, claimed_at)
            .await
    ));
    let now = Utc::now().trunc_subsecs(6);
    assert!(assert_ok!(
        h.store
            .take_over_stale(&key, OPERATION_TYPE, now - Duration::minutes(5), now)
            .await
    ));

    // 原持有者恢复后提交：结果写入条件不成立，请求不落库
    let request = direct_command(&["u1"], NotificationType::Email)
        .into_request(now)
        .unwrap();
    let outbox = OutboxRecord::for_request(&request, now).unwrap();
    let err = assert_err!(
        h.store
            .register_request(
                &request,
                &outbox,
                &IdempotencyCompletion {
                    key: key.clone(),
                    operation_type: OPERATION_TYPE.to_string(),
                    claimed_at,
                    result: serde_json::json!({"status": "SUCCESS"}),
                },
            )
            .await
    );
    assert!(matches!(err, NotificationError::DuplicateRequest(_)));
    assert!(h.store.requests().is_empty());
    assert!(h.store.outbox_records(OutboxKind::Request).is_empty());

    // 原持有者的清理不会删除接管方的占位
    assert_ok!(
        h.store
            .remove_placeholder(&key, OPERATION_TYPE, claimed_at)
            .await
    );
    assert_eq!(h.store.idempotency_records().len(), 1);
}
