//! History replay over files with staggered modification times.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use swarm_memory::{FileMemStore, MemOption, MemStore};
use swarm_types::Message;

fn write_batch(dir: &Path, name: &str, messages: &[Message], minutes_ago: u64) {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(messages).unwrap()).unwrap();
    let when = SystemTime::now() - Duration::from_secs(minutes_ago * 60);
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

#[tokio::test]
async fn test_span_excludes_old_files() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path();

    write_batch(
        history,
        "2026-01-01-4.json",
        &[Message::user("q120"), Message::assistant("a120")],
        120,
    );
    write_batch(
        history,
        "2026-01-01-3.json",
        &[Message::user("q90"), Message::assistant("a90")],
        90,
    );
    write_batch(
        history,
        "2026-01-01-2.json",
        &[Message::user("q30"), Message::assistant("a30")],
        30,
    );
    write_batch(
        history,
        "2026-01-01-1.json",
        &[Message::user("q0"), Message::assistant("a0")],
        0,
    );

    let store = FileMemStore::new(history);
    let got = store.load(&MemOption::new(3, 60)).await.unwrap();
    let texts: Vec<_> = got.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["a30", "q0", "a0"]);

    let got = store.load(&MemOption::new(10, 60)).await.unwrap();
    let texts: Vec<_> = got.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["q30", "a30", "q0", "a0"]);
}

#[tokio::test]
async fn test_window_keeps_last_k_replayable() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMemStore::new(dir.path());

    let mut expected = Vec::new();
    for i in 0..6 {
        let user = Message::user(format!("u{i}"));
        let reply = Message::assistant(format!("r{i}"));
        let ctx = Message::assistant(format!("ctx{i}")).as_context();
        store
            .save(&[Message::system("sys"), user.clone(), ctx, reply.clone()])
            .await
            .unwrap();
        expected.push(user.content);
        expected.push(reply.content);
    }

    let got = store.load(&MemOption::new(5, 60 * 24)).await.unwrap();
    let texts: Vec<_> = got.iter().map(|m| m.content.clone()).collect();
    assert_eq!(texts, expected[expected.len() - 5..].to_vec());

    let id = got[0].id.clone();
    assert_eq!(store.get(&id).await.unwrap().content, texts[0]);
}
