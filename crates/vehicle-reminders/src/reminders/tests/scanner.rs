use super::common::*;
use std::sync::Arc;

use chrono::Duration;

use crate::reminders::channel::{Channel, ChannelAdapters, ChannelMessage};
use crate::reminders::domain::{DocumentId, PlanTier};
use crate::reminders::ledger::{ClaimState, InMemoryLedger, ReminderLedger};
use crate::reminders::milestone::{MilestonePolicy, ReminderMilestone};
use crate::reminders::probe::ProbeRecipient;
use crate::reminders::scanner::{DispatchError, DocumentExpiryScanner, ScanError, ScanSettings};
use crate::reminders::dispatcher::{NotificationDispatcher, DEFAULT_SEND_TIMEOUT};

#[tokio::test]
async fn week_out_document_is_reminded_exactly_once() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 7)).unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, ledger.clone(), adapters);

    let first = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(first.summary.documents_checked, 1);
    assert_eq!(first.summary.notifications_triggered, 1);
    assert_eq!(first.summary.successful, 1);
    assert_eq!(first.summary.total_notifications_sent, 2);
    assert_eq!(first.results[0].milestone, ReminderMilestone::SevenDays);
    assert_eq!(first.results[0].attempt, 1);

    let second = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(second.summary.documents_checked, 1);
    assert_eq!(second.summary.notifications_triggered, 0);
    assert!(second.results.is_empty());
    assert_eq!(sent.len(), 2);

    let claim = ledger
        .claim(&DocumentId("doc-1".to_string()), ReminderMilestone::SevenDays)
        .unwrap()
        .expect("claim recorded");
    assert_eq!(claim.state, ClaimState::Delivered);
}

#[tokio::test]
async fn documents_off_a_threshold_are_not_reminded() {
    let directory = directory(PlanTier::Pro, true);
    directory.upsert_document(insurance_document("doc-10", 10)).unwrap();
    directory.upsert_document(insurance_document("doc-expired", -1)).unwrap();
    directory.upsert_document(insurance_document("doc-far", 29)).unwrap();
    let mut undated = insurance_document("doc-undated", 7);
    undated.expiry_date = None;
    directory.upsert_document(undated).unwrap();
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    let report = scanner.scan(now()).await.expect("scan runs");

    assert_eq!(report.summary.documents_checked, 3);
    assert_eq!(report.summary.notifications_triggered, 0);
    assert_eq!(sent.len(), 0);
}

#[tokio::test]
async fn active_pro_plan_adds_sms_to_the_reminder() {
    let directory = directory(PlanTier::Pro, true);
    directory.upsert_document(insurance_document("doc-1", 1)).unwrap();
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    let report = scanner.scan(now()).await.expect("scan runs");

    assert_eq!(report.results[0].milestone, ReminderMilestone::OneDay);
    assert_eq!(report.results[0].notifications_sent, 3);
    assert_eq!(
        sent.channels(),
        vec![Channel::Email, Channel::Push, Channel::Sms]
    );

    let sms = sent
        .messages()
        .into_iter()
        .find(|message| message.channel() == Channel::Sms)
        .expect("sms sent");
    let ChannelMessage::Sms { body } = sms else {
        panic!("sms payload expected");
    };
    assert!(body.contains("Toyota Corolla"));
}

#[tokio::test]
async fn lapsed_pro_subscription_is_treated_as_free() {
    let directory = directory(PlanTier::Pro, true);
    let mut lapsed = plan("user-1", PlanTier::Pro, true);
    lapsed.current_period_end = Some(now() - Duration::days(2));
    directory.upsert_plan(lapsed).unwrap();
    directory.upsert_document(insurance_document("doc-1", 14)).unwrap();
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    scanner.scan(now()).await.expect("scan runs");

    assert_eq!(sent.channels(), vec![Channel::Email, Channel::Push]);
}

#[tokio::test]
async fn missing_profile_fails_one_document_without_aborting_the_run() {
    let directory = directory(PlanTier::Free, false);
    directory
        .upsert_document(owned_document("doc-orphan", "user-2", 7))
        .unwrap();
    directory.upsert_document(insurance_document("doc-1", 21)).unwrap();
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    let report = scanner.scan(now()).await.expect("scan runs");

    assert_eq!(report.summary.notifications_triggered, 2);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.failed, 1);
    let ids: Vec<&str> = report
        .results
        .iter()
        .map(|result| result.document_id.0.as_str())
        .collect();
    assert_eq!(ids, vec!["doc-1", "doc-orphan"]);
    let orphan = &report.results[1];
    assert!(!orphan.success);
    assert!(orphan
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("user-2"));
    assert_eq!(sent.len(), 2);
}

#[tokio::test]
async fn store_outage_aborts_the_scan() {
    let store = Arc::new(UnavailableStore);
    let (adapters, sent) = recording_adapters();
    let scanner = DocumentExpiryScanner::new(
        store.clone(),
        store,
        Arc::new(InMemoryLedger::new()),
        Arc::new(NotificationDispatcher::new(adapters, DEFAULT_SEND_TIMEOUT)),
        ScanSettings::default(),
    );

    let err = scanner.scan(now()).await.expect_err("scan aborts");

    assert!(matches!(err, ScanError::Store(_)));
    assert_eq!(sent.len(), 0);
}

#[tokio::test]
async fn failed_channel_is_retried_after_backoff_without_repeating_delivered_ones() {
    let directory = directory(PlanTier::Pro, true);
    directory.upsert_document(insurance_document("doc-1", 7)).unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    let sent = Arc::new(SentLog::default());
    let adapters = ChannelAdapters::new()
        .with(Arc::new(FlakyAdapter::new(Channel::Email, 1, sent.clone())))
        .with(Arc::new(RecordingAdapter::new(Channel::Push, sent.clone())))
        .with(Arc::new(RecordingAdapter::new(Channel::Sms, sent.clone())));
    let scanner = scanner(directory, ledger.clone(), adapters);

    let first = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(first.summary.failed, 1);
    assert_eq!(first.results[0].notifications_sent, 2);
    assert_eq!(sent.channels(), vec![Channel::Push, Channel::Sms]);

    let too_soon = scanner
        .scan(now() + Duration::minutes(30))
        .await
        .expect("scan runs");
    assert_eq!(too_soon.summary.notifications_triggered, 0);
    assert_eq!(too_soon.summary.retried, 0);

    let retry = scanner
        .scan(now() + Duration::hours(2))
        .await
        .expect("scan runs");
    assert_eq!(retry.summary.notifications_triggered, 0);
    assert_eq!(retry.summary.retried, 1);
    let result = &retry.results[0];
    assert!(result.success);
    assert_eq!(result.attempt, 2);
    assert_eq!(result.notifications.len(), 1);
    assert_eq!(result.notifications[0].channel, Channel::Email);
    assert_eq!(
        sent.channels(),
        vec![Channel::Email, Channel::Push, Channel::Sms]
    );

    let claim = ledger
        .claim(&DocumentId("doc-1".to_string()), ReminderMilestone::SevenDays)
        .unwrap()
        .expect("claim recorded");
    assert_eq!(claim.state, ClaimState::Delivered);
    assert_eq!(claim.attempts, 2);
}

#[tokio::test]
async fn exhausted_attempts_mark_the_claim_permanently_failed() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 28)).unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    let sent = Arc::new(SentLog::default());
    let adapters = ChannelAdapters::new()
        .with(Arc::new(FailingAdapter::new(Channel::Email)))
        .with(Arc::new(RecordingAdapter::new(Channel::Push, sent.clone())));
    let settings = ScanSettings {
        max_attempts: 2,
        ..ScanSettings::default()
    };
    let scanner = scanner_with(directory, ledger.clone(), adapters, settings);

    for offset in [0, 2, 4, 6] {
        scanner
            .scan(now() + Duration::hours(offset))
            .await
            .expect("scan runs");
    }

    let claim = ledger
        .claim(
            &DocumentId("doc-1".to_string()),
            ReminderMilestone::TwentyEightDays,
        )
        .unwrap()
        .expect("claim recorded");
    assert_eq!(claim.state, ClaimState::PermanentlyFailed);
    assert_eq!(claim.attempts, 2);
    assert_eq!(sent.len(), 1);
}

#[tokio::test]
async fn catch_up_policy_recovers_a_missed_milestone() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 10)).unwrap();
    let (adapters, _sent) = recording_adapters();
    let settings = ScanSettings {
        policy: MilestonePolicy::CatchUp,
        ..ScanSettings::default()
    };
    let scanner = scanner_with(
        directory,
        Arc::new(InMemoryLedger::new()),
        adapters,
        settings,
    );

    let report = scanner.scan(now()).await.expect("scan runs");

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].milestone, ReminderMilestone::FourteenDays);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_scans_send_each_milestone_once() {
    let directory = directory(PlanTier::Pro, true);
    for (index, days) in [1, 7, 14, 21, 28].into_iter().enumerate() {
        directory
            .upsert_document(insurance_document(&format!("doc-{index}"), days))
            .unwrap();
    }
    let (adapters, sent) = recording_adapters();
    let scanner = Arc::new(scanner(directory, Arc::new(InMemoryLedger::new()), adapters));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.scan(now()).await })
        })
        .collect();

    let mut triggered = 0;
    for handle in handles {
        triggered += handle
            .await
            .expect("task joins")
            .expect("scan runs")
            .summary
            .notifications_triggered;
    }

    assert_eq!(triggered, 5);
    assert_eq!(sent.len(), 15);
}

#[tokio::test]
async fn manual_dispatch_refuses_a_milestone_the_scan_already_handled() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 7)).unwrap();
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);
    let id = DocumentId("doc-1".to_string());

    scanner.scan(now()).await.expect("scan runs");
    let err = scanner
        .dispatch_document(&id, ReminderMilestone::SevenDays, now())
        .await
        .expect_err("already claimed");
    assert!(matches!(err, DispatchError::AlreadyClaimed { .. }));

    let (document, result) = scanner
        .dispatch_document(&id, ReminderMilestone::OneDay, now())
        .await
        .expect("other milestone dispatches");
    assert_eq!(document.id, id);
    assert_eq!(result.summary.succeeded, 2);
    assert_eq!(sent.len(), 4);
}

#[tokio::test]
async fn manual_dispatch_reports_unknown_documents() {
    let directory = directory(PlanTier::Free, false);
    let (adapters, _sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    let err = scanner
        .dispatch_document(
            &DocumentId("missing".to_string()),
            ReminderMilestone::OneDay,
            now(),
        )
        .await
        .expect_err("unknown document");

    assert!(matches!(err, DispatchError::DocumentNotFound(_)));
}

#[tokio::test]
async fn probe_dispatch_never_touches_the_ledger() {
    let directory = directory(PlanTier::Free, false);
    let ledger = Arc::new(InMemoryLedger::new());
    let (adapters, sent) = recording_adapters();
    let scanner = scanner(directory, ledger.clone(), adapters);
    let probe = ProbeRecipient {
        owner_id: None,
        email: Some("ops@example.com".to_string()),
        phone: Some("+40700000009".to_string()),
    };
    let id = DocumentId("probe-doc".to_string());

    for _ in 0..2 {
        let (document, result) = scanner
            .dispatch_probe(&probe, &id, ReminderMilestone::SevenDays, now())
            .await;
        assert!(document.title.starts_with("[TEST]"));
        assert_eq!(result.summary.succeeded, 3);
    }

    assert_eq!(sent.len(), 6);
    assert!(ledger.claims().unwrap().is_empty());
}

#[tokio::test]
async fn report_serializes_with_wire_names() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 7)).unwrap();
    let (adapters, _sent) = recording_adapters();
    let scanner = scanner(directory, Arc::new(InMemoryLedger::new()), adapters);

    let report = scanner.scan(now()).await.expect("scan runs");
    let value = serde_json::to_value(&report).expect("serializes");

    assert_eq!(value["summary"]["documentsChecked"], 1);
    assert_eq!(value["summary"]["totalNotificationsSent"], 2);
    assert_eq!(value["results"][0]["documentId"], "doc-1");
    assert_eq!(value["results"][0]["reminderType"], "7_days");
    assert_eq!(value["results"][0]["notifications"][0]["type"], "email");
    assert!(value["results"][0].get("error").is_none());
}

#[tokio::test]
async fn retry_after_expiry_gives_up_instead_of_sending_stale_copy() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 1)).unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    let sent = Arc::new(SentLog::default());
    let adapters = ChannelAdapters::new()
        .with(Arc::new(FlakyAdapter::new(Channel::Email, 1, sent.clone())))
        .with(Arc::new(RecordingAdapter::new(Channel::Push, sent.clone())));
    let scanner = scanner(directory, ledger.clone(), adapters);

    let first = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(first.results[0].milestone, ReminderMilestone::OneDay);
    assert_eq!(first.summary.failed, 1);
    assert_eq!(sent.channels(), vec![Channel::Push]);

    let next_day = scanner
        .scan(now() + Duration::days(1))
        .await
        .expect("scan runs");
    assert_eq!(next_day.summary.notifications_triggered, 0);
    assert_eq!(next_day.summary.retried, 1);
    assert_eq!(next_day.summary.total_notifications_sent, 0);
    let result = &next_day.results[0];
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("expired"));
    assert_eq!(sent.channels(), vec![Channel::Push]);

    let claim = ledger
        .claim(&DocumentId("doc-1".to_string()), ReminderMilestone::OneDay)
        .unwrap()
        .expect("claim recorded");
    assert_eq!(claim.state, ClaimState::PermanentlyFailed);
}

#[tokio::test]
async fn zero_backoff_never_retries_within_the_same_run() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 7)).unwrap();
    let ledger = Arc::new(InMemoryLedger::new());
    let sent = Arc::new(SentLog::default());
    let adapters = ChannelAdapters::new()
        .with(Arc::new(FailingAdapter::new(Channel::Email)))
        .with(Arc::new(RecordingAdapter::new(Channel::Push, sent.clone())));
    let settings = ScanSettings {
        retry_backoff: Duration::zero(),
        ..ScanSettings::default()
    };
    let scanner = scanner_with(directory, ledger.clone(), adapters, settings);

    let first = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(first.results.len(), 1);
    assert_eq!(first.summary.notifications_triggered, 1);
    assert_eq!(first.summary.retried, 0);

    let repeated = scanner.scan(now()).await.expect("scan runs");
    assert!(repeated.results.is_empty());
    assert_eq!(repeated.summary.notifications_triggered, 0);
    assert_eq!(sent.len(), 1);

    let later = scanner
        .scan(now() + Duration::minutes(1))
        .await
        .expect("scan runs");
    assert_eq!(later.summary.retried, 1);
    assert_eq!(later.results[0].attempt, 2);
    assert_eq!(sent.len(), 1);
}

#[tokio::test]
async fn catch_up_copy_states_the_real_time_left() {
    let directory = directory(PlanTier::Free, false);
    directory.upsert_document(insurance_document("doc-1", 2)).unwrap();
    let (adapters, sent) = recording_adapters();
    let settings = ScanSettings {
        policy: MilestonePolicy::CatchUp,
        ..ScanSettings::default()
    };
    let scanner = scanner_with(
        directory,
        Arc::new(InMemoryLedger::new()),
        adapters,
        settings,
    );

    let report = scanner.scan(now()).await.expect("scan runs");
    assert_eq!(report.results[0].milestone, ReminderMilestone::SevenDays);

    let email = sent
        .messages()
        .into_iter()
        .find_map(|message| match message {
            ChannelMessage::Email { subject, .. } => Some(subject),
            _ => None,
        })
        .expect("email sent");
    assert!(email.contains("in 2 days"));
    assert!(!email.contains("1 week"));
}
