use chrono::Utc;
use devtool::domains::sessions::{Session, SessionStatus, SessionStore};
use devtool::infrastructure::database::Database;
use std::path::PathBuf;
use tempfile::TempDir;

fn session(id: &str) -> Session {
    Session::new_created(
        id,
        PathBuf::from("/repos/app"),
        PathBuf::from(format!("/worktrees/app/{id}")),
        Utc::now(),
    )
}

#[test]
fn records_survive_reopening_the_store() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("data").join("sessions.db");

    {
        let store = SessionStore::new(Database::new(Some(path.clone())).unwrap());
        let mut s = session("250906-add-retry-logic");
        s.status = SessionStatus::Paused;
        s.container_id = Some("abc123".into());
        s.commit_message_draft = "- first\n- second".into();
        store.put(&s).unwrap();
    }

    let store = SessionStore::new(Database::new(Some(path)).unwrap());
    let loaded = store.get("250906-add-retry-logic").unwrap();
    assert_eq!(loaded.status, SessionStatus::Paused);
    assert_eq!(loaded.container_id.as_deref(), Some("abc123"));
    assert_eq!(loaded.commit_message_draft, "- first\n- second");
}

#[test]
fn two_handles_on_one_file_see_each_others_writes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sessions.db");
    let a = SessionStore::new(Database::new(Some(path.clone())).unwrap());
    let b = SessionStore::new(Database::new(Some(path)).unwrap());

    a.put(&session("250906-a")).unwrap();
    assert!(b.exists("250906-a").unwrap());

    let mut updated = b.get("250906-a").unwrap();
    updated.status = SessionStatus::Abandoned;
    b.put(&updated).unwrap();
    assert_eq!(a.get("250906-a").unwrap().status, SessionStatus::Abandoned);
}

#[test]
fn concurrent_writers_never_tear_records() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sessions.db");
    let store = SessionStore::new(Database::new(Some(path)).unwrap());
    store.put(&session("250906-shared")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut s = session("250906-shared");
                s.commit_message_draft = format!("writer {n}");
                store.put(&s).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let loaded = store.get("250906-shared").unwrap();
    assert!(loaded.commit_message_draft.starts_with("writer "));
    assert_eq!(loaded.status, SessionStatus::Created);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn delete_requires_terminal_status() {
    let temp = TempDir::new().unwrap();
    let store =
        SessionStore::new(Database::new(Some(temp.path().join("sessions.db"))).unwrap());
    let mut s = session("250906-a");
    store.put(&s).unwrap();
    assert_eq!(store.delete("250906-a").unwrap_err().kind(), "invalid-state");

    s.status = SessionStatus::Merged;
    s.merge_commit_id = Some("deadbeef".into());
    store.put(&s).unwrap();
    store.delete("250906-a").unwrap();
    assert_eq!(store.get("250906-a").unwrap_err().kind(), "not-found");
}
