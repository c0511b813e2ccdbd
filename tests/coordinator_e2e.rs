use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use meterwatch::source::Registration;
use meterwatch::{
    AlertRule, Coordinator, FileStore, MeterError, NewUser, Role, SourceConfig, SourceState, Token, User, UserId,
};

const ADMIN: Token = Token::new(1, Role::Admin);

fn bootstrap(c: &Coordinator) -> User {
    c.create_user(&ADMIN, NewUser::new("admin", "root", "admin@example.org", Role::Admin))
        .unwrap()
}

fn add_reader(c: &Coordinator, login: &str) -> (User, Token) {
    let user = c
        .create_user(&ADMIN, NewUser::new(login, "pw", format!("{login}@example.org"), Role::Reader))
        .unwrap();
    let token = Token::for_user(user.id, Role::Reader);
    (user, token)
}

fn write_meter(root: &Path, name: &str, reading: &str) -> SourceConfig {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{reading}.png")), b"snapshot").unwrap();
    SourceConfig::filesystem(name, dir)
}

#[test]
fn admin_only_operations_pass_for_admin_and_fail_for_reader() {
    let c = Coordinator::in_memory();
    bootstrap(&c);
    let (ana, reader) = add_reader(&c, "ana");

    // Reader is denied user administration.
    assert!(c.list_all_users(&reader).unwrap_err().is_access_denied());
    assert!(c.unlink_source(&reader, ana.id, "m").unwrap_err().is_access_denied());
    assert!(c.delete_user(&reader, ana.id).unwrap_err().is_access_denied());
    assert!(c
        .create_user(&reader, NewUser::new("x", "pw", "", Role::Reader))
        .unwrap_err()
        .is_access_denied());

    // Everything else only needs a valid token.
    assert!(c.source_status(&reader).unwrap().is_empty());
    c.configure_rule(&reader, ana.id, AlertRule::fixed(1.0)).unwrap();

    // Admin passes the role check.
    assert_eq!(c.list_all_users(&ADMIN).unwrap().len(), 2);
    assert!(!c.unlink_source(&ADMIN, ana.id, "m").unwrap());
    c.delete_user(&ADMIN, ana.id).unwrap();
}

#[test]
fn link_source_not_found_in_every_combination() {
    let c = Coordinator::in_memory();
    bootstrap(&c);
    let (ana, reader) = add_reader(&c, "ana");
    c.register_source_config(&ADMIN, SourceConfig::filesystem("m1", "/nowhere/m1")).unwrap();

    let unknown_user = UserId::new(404);
    let cases = [
        (unknown_user, "ghost"),
        (ana.id, "ghost"),
        (unknown_user, "m1"),
    ];
    for (user, source) in cases {
        let err = c.link_source(&reader, user, source).unwrap_err();
        assert!(err.is_not_found(), "{user}/{source}: {err}");
    }

    c.link_source(&reader, ana.id, "m1").unwrap();
}

#[test]
fn reader_workflow_end_to_end() {
    let dir = tempdir().unwrap();
    let c = Coordinator::in_memory();
    bootstrap(&c);
    let (ana, reader) = add_reader(&c, "ana");

    c.register_source_config(&ADMIN, write_meter(dir.path(), "kitchen", "30")).unwrap();
    c.register_source_config(&ADMIN, write_meter(dir.path(), "garden", "25")).unwrap();
    c.link_source(&reader, ana.id, "kitchen").unwrap();
    c.link_source(&reader, ana.id, "garden").unwrap();
    c.configure_rule(&ADMIN, ana.id, AlertRule::fixed(50.0)).unwrap();

    assert_eq!(
        c.detected_sources(&reader).unwrap(),
        vec!["garden".to_string(), "kitchen".to_string()]
    );
    assert!((c.current_reading(&reader, "kitchen").unwrap() - 30.0).abs() < 1e-9);

    let token = c.authenticate("ana", "pw").unwrap();
    assert_eq!(token, reader);

    let report = c.monitor(&token, ana.id).unwrap();
    assert!((report.total - 55.0).abs() < 1e-9);
    assert_eq!(report.sources_reported, 2);
    assert_eq!(report.alerts.len(), 1);

    let alerts = c.alerts_for(&token, ana.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert!((alerts[0].consumption - 55.0).abs() < 1e-9);
}

#[test]
fn unregistered_linked_source_is_skipped() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::open_in(dir.path()).unwrap());

    let first = Coordinator::new(store.clone(), store.clone());
    bootstrap(&first);
    let (ana, _) = add_reader(&first, "ana");
    first
        .register_source_config(&ADMIN, write_meter(dir.path(), "kitchen", "12"))
        .unwrap();
    first.link_source(&ADMIN, ana.id, "kitchen").unwrap();

    // Registry is in memory only: a fresh coordinator knows the link but not the source.
    let second = Coordinator::new(store.clone(), store);
    let report = second.monitor(&ADMIN, ana.id).unwrap();
    assert_eq!(report.total, 0.0);
    assert_eq!(report.skipped_unregistered, 1);

    let status = second.source_status(&ADMIN).unwrap();
    assert_eq!(status.len(), 1);
    assert!(matches!(status[0].state, SourceState::Offline { .. }));
}

#[test]
fn delete_user_cascades_links() {
    let c = Coordinator::in_memory();
    bootstrap(&c);
    let (ana, _) = add_reader(&c, "ana");
    let (bia, _) = add_reader(&c, "bia");
    c.register_source_config(&ADMIN, SourceConfig::filesystem("m1", "/x/m1")).unwrap();
    c.register_source_config(&ADMIN, SourceConfig::filesystem("m2", "/x/m2")).unwrap();
    c.link_source(&ADMIN, ana.id, "m1").unwrap();
    c.link_source(&ADMIN, bia.id, "m2").unwrap();

    c.delete_user(&ADMIN, ana.id).unwrap();

    let users = c.list_all_users(&ADMIN).unwrap();
    assert!(users.iter().all(|u| u.id != ana.id));
    let status = c.source_status(&ADMIN).unwrap();
    let m1 = status.iter().find(|s| s.source_id == "m1").unwrap();
    assert_eq!(m1.owner, None);
    let m2 = status.iter().find(|s| s.source_id == "m2").unwrap();
    assert_eq!(m2.owner, Some(bia.id));
    assert!(matches!(c.delete_user(&ADMIN, ana.id), Err(MeterError::UserNotFound { .. })));
}

#[test]
fn file_store_survives_restart_with_rules() {
    let dir = tempdir().unwrap();
    let meters = dir.path().join("meters");
    let ana_id;
    {
        let store = Arc::new(FileStore::open_in(dir.path()).unwrap());
        let c = Coordinator::new(store.clone(), store);
        bootstrap(&c);
        let (ana, _) = add_reader(&c, "ana");
        ana_id = ana.id;
        c.configure_rule(&ADMIN, ana.id, AlertRule::fixed(10.0)).unwrap();
    }

    let store = Arc::new(FileStore::open_in(dir.path()).unwrap());
    let c = Coordinator::new(store.clone(), store);
    assert_eq!(c.restore_rules(&ADMIN).unwrap(), 1);
    assert_eq!(c.authenticate("ana", "pw").unwrap().user_id(), ana_id);

    c.register_source_config(&ADMIN, write_meter(&meters, "m1", "11")).unwrap();
    c.link_source(&ADMIN, ana_id, "m1").unwrap();
    let report = c.monitor(&ADMIN, ana_id).unwrap();
    assert_eq!(report.alerts.len(), 1);
}

#[test]
fn concurrent_monitoring_and_registration() {
    let dir = tempdir().unwrap();
    let c = Arc::new(Coordinator::in_memory());
    bootstrap(&c);
    let (ana, reader) = add_reader(&c, "ana");
    c.register_source_config(&ADMIN, write_meter(dir.path(), "base", "1")).unwrap();
    c.link_source(&ADMIN, ana.id, "base").unwrap();
    c.configure_rule(&ADMIN, ana.id, AlertRule::fixed(1000.0)).unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let c = Arc::clone(&c);
        let root = dir.path().to_path_buf();
        handles.push(thread::spawn(move || {
            for i in 0..10 {
                let name = format!("m{t}_{i}");
                let outcome = c.register_source_config(&ADMIN, write_meter(&root, &name, "2")).unwrap();
                assert_eq!(outcome, Registration::Added);
            }
        }));
    }
    for _ in 0..4 {
        let c = Arc::clone(&c);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                let report = c.monitor(&reader, ana.id).unwrap();
                assert!((report.total - 1.0).abs() < 1e-9);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(c.detected_sources(&ADMIN).unwrap().len(), 41);
}
