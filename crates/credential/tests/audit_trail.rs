//! Integration tests for audit delivery

mod common;

use common::{FailingSink, Harness, Options};
use keyshift_credential::audit::{AuditEvent, AuditSink, WebhookAuditSink};
use keyshift_credential::{Flow, RotationState};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_entries_follow_transitions_and_end_with_one_terminal() {
    // GIVEN: A rotation that rolled back
    let h = Harness::new().await;
    h.remote.refuse_new_keys();
    let attempt = h.rotator.run_scheduled().await.unwrap();

    // WHEN: The trail is read back
    let entries = h.audit_entries().await;

    // THEN: Entries are attributed to the attempt and strictly ordered
    assert!(entries.iter().all(|e| e.attempt_id == attempt.id));
    assert!(entries.iter().all(|e| e.flow == Flow::Scheduled));
    assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));

    // THEN: Transition entries replay the attempt's history
    let mut replayed = vec![RotationState::Idle];
    for entry in &entries {
        if let AuditEvent::Transition { from, to } = entry.event {
            assert_eq!(Some(&from), replayed.last());
            replayed.push(to);
        }
    }
    assert_eq!(replayed, attempt.history);

    // THEN: Exactly one terminal entry, and it is the last one
    let terminals = entries
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::Terminal { .. }))
        .count();
    assert_eq!(terminals, 1);
    let AuditEvent::Terminal { state, failure } = &entries.last().unwrap().event else {
        panic!("last entry is not terminal");
    };
    assert_eq!(*state, RotationState::Failed);
    assert_eq!(failure.as_ref(), attempt.failure.as_ref());
}

#[tokio::test]
async fn test_backups_are_audited() {
    let h = Harness::new().await;
    let attempt = h.rotator.run_scheduled().await.unwrap();

    let stored: Vec<_> = h
        .events_for(&attempt)
        .await
        .into_iter()
        .filter_map(|event| match event {
            AuditEvent::BackupStored { backup_id, .. } => Some(backup_id),
            _ => None,
        })
        .collect();

    assert_eq!(
        stored,
        vec![attempt.pre_backup.unwrap(), attempt.post_backup.unwrap()]
    );
}

#[tokio::test]
async fn test_failing_sink_does_not_change_the_outcome() {
    // GIVEN: An audit sink that rejects everything
    let h = Harness::build(Options {
        audit_sink: Some(Arc::new(FailingSink) as Arc<dyn AuditSink>),
        ..Options::default()
    })
    .await;

    // WHEN: The scheduler runs
    let attempt = h.rotator.run_scheduled().await.unwrap();
    h.rotator.flush_audit().await;

    // THEN: The rotation succeeded regardless
    assert!(attempt.is_succeeded());
    assert!(h.active_key_authenticates().await);
}

#[tokio::test]
async fn test_webhook_receives_only_notable_events() {
    // GIVEN: A chat webhook
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/rotation"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let url = Url::parse(&format!("{}/hooks/rotation", server.uri())).unwrap();
    let sink = WebhookAuditSink::new(url).unwrap();

    let h = Harness::build(Options {
        audit_sink: Some(Arc::new(sink) as Arc<dyn AuditSink>),
        ..Options::default()
    })
    .await;

    // WHEN: A rotation succeeds
    let attempt = h.rotator.run_scheduled().await.unwrap();
    h.rotator.flush_audit().await;

    // THEN: Only the terminal summary was posted, as a message card
    assert!(attempt.is_succeeded());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let card: serde_json::Value = requests[0].body_json().unwrap();
    let body = &card["attachments"][0]["content"]["body"];
    assert_eq!(body[0]["text"], "Key rotation: teams_bot_user");
    assert_eq!(body[1]["text"], "Rotation finished: succeeded");
}

#[tokio::test]
async fn test_webhook_outage_does_not_change_the_outcome() {
    // GIVEN: A webhook that always errors
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let sink = WebhookAuditSink::new(Url::parse(&server.uri()).unwrap())
        .unwrap()
        .with_transitions();

    let h = Harness::build(Options {
        audit_sink: Some(Arc::new(sink) as Arc<dyn AuditSink>),
        ..Options::default()
    })
    .await;

    // WHEN: A rotation runs
    let attempt = h.rotator.run_scheduled().await.unwrap();
    h.rotator.flush_audit().await;

    // THEN: Every entry was attempted and the rotation still succeeded
    assert!(attempt.is_succeeded());
    let posted = server.received_requests().await.unwrap().len();
    // one per transition, two backups, one terminal
    assert_eq!(posted, attempt.history.len() - 1 + 2 + 1);
}
