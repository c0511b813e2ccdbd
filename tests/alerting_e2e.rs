use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tempfile::tempdir;

use meterwatch::alerting::{ChannelTransport, UnconfiguredTransport};
use meterwatch::reading::NewReading;
use meterwatch::storage::InMemoryHistoryStore;
use meterwatch::{
    AlertData, AlertEngine, AlertObserver, AlertRule, Coordinator, HistoryStore, NewUser, RemoteNotifier, Role,
    SourceConfig, Token, UserId,
};

const ADMIN: Token = Token::new(1, Role::Admin);
const ANA: UserId = UserId::new(2);

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<AlertData>>,
}

impl AlertObserver for Recorder {
    fn on_alert(&self, alert: &AlertData) {
        self.seen.lock().unwrap().push(alert.clone());
    }
}

fn engine_with_recorder() -> (Arc<AlertEngine>, Arc<InMemoryHistoryStore>, Arc<Recorder>) {
    let history = Arc::new(InMemoryHistoryStore::new());
    let engine = Arc::new(AlertEngine::new(history.clone()));
    let recorder = Arc::new(Recorder::default());
    engine.register_observer(recorder.clone()).unwrap();
    (engine, history, recorder)
}

fn seed_history(history: &InMemoryHistoryStore, values: &[f64]) {
    for value in values {
        history
            .save_reading(NewReading {
                user_id: ANA,
                source_id: "m1".to_string(),
                recorded_at: Utc::now(),
                value: *value,
                provenance: "seed".to_string(),
            })
            .unwrap();
    }
}

#[test]
fn fixed_threshold_is_strict() {
    let (engine, _, recorder) = engine_with_recorder();
    engine.add_rule(ANA, AlertRule::fixed(50.0)).unwrap();

    assert!(engine.evaluate(ANA, "ana", 50.0).unwrap().is_empty());
    assert_eq!(engine.evaluate(ANA, "ana", 51.0).unwrap().len(), 1);
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);
}

#[test]
fn moving_average_over_three_readings() {
    let (engine, history, _) = engine_with_recorder();
    seed_history(&history, &[10.0, 10.0, 10.0]);
    engine.add_rule(ANA, AlertRule::moving_average(3, 1.2)).unwrap();

    assert_eq!(engine.evaluate(ANA, "ana", 37.0).unwrap().len(), 1);
    assert!(engine.evaluate(ANA, "ana", 35.0).unwrap().is_empty());
}

#[test]
fn moving_average_without_history_does_not_trigger() {
    let (engine, _, recorder) = engine_with_recorder();
    engine.add_rule(ANA, AlertRule::moving_average(5, 1.2)).unwrap();
    assert!(engine.evaluate(ANA, "ana", 1_000.0).unwrap().is_empty());
    assert!(recorder.seen.lock().unwrap().is_empty());
}

/// Adds a rule for the alerted user the first time it is notified.
struct RuleAddingObserver {
    engine: Weak<AlertEngine>,
    fired: AtomicBool,
}

impl AlertObserver for RuleAddingObserver {
    fn on_alert(&self, alert: &AlertData) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.add_rule(alert.user_id, AlertRule::fixed(5.0)).unwrap();
        }
    }
}

#[test]
fn rule_added_during_evaluation_is_seen_only_by_later_pass() {
    let (engine, _, recorder) = engine_with_recorder();
    engine
        .register_observer(Arc::new(RuleAddingObserver {
            engine: Arc::downgrade(&engine),
            fired: AtomicBool::new(false),
        }))
        .unwrap();
    engine.add_rule(ANA, AlertRule::fixed(10.0)).unwrap();

    let first = engine.evaluate(ANA, "ana", 20.0).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(engine.rules_for(ANA).unwrap().len(), 2);

    let second = engine.evaluate(ANA, "ana", 20.0).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(recorder.seen.lock().unwrap().len(), 3);
}

#[test]
fn monitor_feeds_moving_average_with_its_own_readings() {
    let dir = tempdir().unwrap();
    let meter = dir.path().join("m1");
    fs::create_dir_all(&meter).unwrap();
    fs::write(meter.join("10.png"), b"x").unwrap();

    let c = Coordinator::in_memory();
    let admin = c
        .create_user(&ADMIN, NewUser::new("admin", "pw", "", Role::Admin))
        .unwrap();
    assert_eq!(admin.id, UserId::new(1));
    let ana = c.create_user(&ADMIN, NewUser::new("ana", "pw", "", Role::Reader)).unwrap();
    c.register_source_config(&ADMIN, SourceConfig::filesystem("m1", &meter)).unwrap();
    c.link_source(&ADMIN, ana.id, "m1").unwrap();
    c.configure_rule(&ADMIN, ana.id, AlertRule::moving_average(3, 1.2)).unwrap();

    // Each pass stores its reading before evaluating, so a steady value never exceeds its own mean.
    for _ in 0..3 {
        assert!(c.monitor(&ADMIN, ana.id).unwrap().alerts.is_empty());
    }
    fs::remove_file(meter.join("10.png")).unwrap();
    fs::write(meter.join("40.png"), b"x").unwrap();

    // History is now [40, 10, 10]: mean 20, 40 > 24.
    let report = c.monitor(&ADMIN, ana.id).unwrap();
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(c.alerts_for(&ADMIN, ana.id).unwrap().len(), 1);
}

#[test]
fn remote_notifier_delivers_only_for_its_user() {
    let dir = tempdir().unwrap();
    let (engine, _, _) = engine_with_recorder();
    let (transport, inbox) = ChannelTransport::new(8);
    engine
        .register_observer(Arc::new(RemoteNotifier::new(
            ANA,
            "ana@example.org",
            Arc::new(transport),
            dir.path().join("outbox"),
        )))
        .unwrap();
    engine.add_rule(ANA, AlertRule::fixed(0.01)).unwrap();
    engine.add_rule(UserId::new(3), AlertRule::fixed(0.01)).unwrap();

    engine.evaluate(UserId::new(3), "bia", 0.5).unwrap();
    assert!(inbox.try_recv().is_err());

    engine.evaluate(ANA, "ana", 0.5).unwrap();
    let delivery = inbox.try_recv().unwrap();
    assert_eq!(delivery.recipient, "ana@example.org");
    assert!(delivery.notification.body.contains("500.0 L"));
    assert!(!dir.path().join("outbox").exists());
}

#[test]
fn failed_delivery_lands_in_outbox_and_alert_is_still_recorded() {
    let dir = tempdir().unwrap();
    let outbox = dir.path().join("outbox");
    let (engine, history, recorder) = engine_with_recorder();
    engine
        .register_observer(Arc::new(RemoteNotifier::new(
            ANA,
            "ana@example.org",
            Arc::new(UnconfiguredTransport),
            &outbox,
        )))
        .unwrap();
    engine.add_rule(ANA, AlertRule::fixed(1.0)).unwrap();

    engine.evaluate(ANA, "ana", 2.0).unwrap();

    assert_eq!(history.alerts_for_user(ANA).unwrap().len(), 1);
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    let files: Vec<_> = fs::read_dir(&outbox).unwrap().collect();
    assert_eq!(files.len(), 1);
}
