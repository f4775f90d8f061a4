use chrono::{TimeZone, Utc};
use drive_core::{Error, ManifestEntry, ManifestStore, RemoteId, Settings};
use drive_fs::RelPath;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

fn rel(path: &str) -> RelPath {
    RelPath::new(path).unwrap()
}

fn entry(id: &str, fingerprint: &str) -> ManifestEntry {
    let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    ManifestEntry::new(RemoteId::new(id), time, fingerprint)
}

#[test]
fn test_missing_file_is_empty_manifest() {
    let temp = TempDir::new().unwrap();
    let store = ManifestStore::open(&temp.path().join("files.json")).unwrap();

    assert!(store.is_empty());
    assert!(store.is_persistent());
}

#[test]
fn test_flush_then_open_round_trips() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    let store = ManifestStore::open(&path).unwrap();
    store.upsert(rel("a/b.txt"), entry("id-b", "sha256:bbb"));
    store.upsert(rel("top.txt"), entry("id-top", "sha256:ttt"));
    store.flush().unwrap();

    let reloaded = ManifestStore::open(&path).unwrap();
    assert_eq!(reloaded.snapshot(), store.snapshot());
    assert_eq!(
        reloaded.lookup(&rel("a/b.txt")).unwrap().remote_id,
        RemoteId::new("id-b")
    );
}

#[test]
fn test_persisted_form_is_keyed_by_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    let store = ManifestStore::open(&path).unwrap();
    store.upsert(rel("a/b.txt"), entry("id-b", "sha256:bbb"));
    store.flush().unwrap();

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["a/b.txt"]["remote_id"], "id-b");
    assert_eq!(raw["a/b.txt"]["fingerprint"], "sha256:bbb");
    assert!(raw["a/b.txt"]["modified_time"].is_string());
}

#[test]
fn test_corrupt_file_fails_strict_open() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    fs::write(&path, "{ not json").unwrap();

    let result = ManifestStore::open(&path);

    assert!(matches!(result, Err(Error::ManifestCorrupt { .. })));
}

#[test]
fn test_corrupt_file_resets_to_empty() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    fs::write(&path, "{ not json").unwrap();

    let store = ManifestStore::open_or_reset(&path);
    assert!(store.is_empty());

    // The damaged file is replaced by the next flush.
    store.upsert(rel("x.txt"), entry("id-x", "sha256:xxx"));
    store.flush().unwrap();
    assert_eq!(ManifestStore::open(&path).unwrap().len(), 1);
}

#[test]
fn test_leftover_temp_file_does_not_replace_manifest() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    let store = ManifestStore::open(&path).unwrap();
    store.upsert(rel("kept.txt"), entry("id-kept", "sha256:kkk"));
    store.flush().unwrap();

    // A crash between writing the temp file and renaming it.
    fs::write(temp.path().join(".files.json.999.0.tmp"), "{ partial").unwrap();

    let reloaded = ManifestStore::open(&path).unwrap();
    assert_eq!(reloaded.paths(), vec![rel("kept.txt")]);
}

#[test]
fn test_flush_without_changes_does_not_write() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    let store = ManifestStore::open(&path).unwrap();
    store.flush().unwrap();

    assert!(!path.exists());
}

#[test]
fn test_remove_and_rekey() {
    let store = ManifestStore::in_memory();
    store.upsert(rel("old.txt"), entry("id-1", "sha256:111"));

    assert!(store.rekey(&rel("old.txt"), rel("new.txt")));
    assert!(store.lookup(&rel("old.txt")).is_none());
    assert_eq!(
        store.remove(&rel("new.txt")).unwrap().remote_id,
        RemoteId::new("id-1")
    );
    assert!(store.is_empty());
}

#[test]
fn test_from_settings_respects_update_save() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    let mut settings = Settings {
        drive_folder_name: "Backup".into(),
        path_to_folder: temp.path().to_path_buf(),
        update_on_start: false,
        update_save: false,
    };

    assert!(!ManifestStore::from_settings(&settings, &path).is_persistent());

    settings.update_save = true;
    let store = ManifestStore::from_settings(&settings, &path);
    assert_eq!(store.path(), Some(path.as_path()));
}

#[test]
fn test_concurrent_upserts_and_flushes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    let store = std::sync::Arc::new(ManifestStore::open(&path).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                for j in 0..25 {
                    store.upsert(
                        rel(&format!("t{i}/f{j}.txt")),
                        entry(&format!("id-{i}-{j}"), "sha256:fff"),
                    );
                    if j % 5 == 0 {
                        store.flush().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    store.flush().unwrap();

    assert_eq!(ManifestStore::open(&path).unwrap().len(), 200);
}
