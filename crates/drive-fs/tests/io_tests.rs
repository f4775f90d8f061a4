use drive_fs::io;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_write_atomic_creates_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    io::write_atomic(&path, b"{}").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
}

#[test]
fn test_write_atomic_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state/nested/files.json");

    io::write_atomic(&path, b"{}").unwrap();

    assert!(path.exists());
}

#[test]
fn test_write_atomic_overwrites_existing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    fs::write(&path, "original").unwrap();

    io::write_atomic(&path, b"updated").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "updated");
}

#[test]
fn test_write_atomic_leaves_no_temp_files() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");

    io::write_atomic(&path, b"one").unwrap();
    io::write_atomic(&path, b"two").unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["files.json".to_string()]);
}

#[test]
fn test_write_atomic_failure_keeps_previous_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("files.json");
    fs::write(&path, "previous").unwrap();

    // A directory squatting on the target makes the final rename fail
    let blocked = temp.path().join("blocked");
    fs::create_dir(&blocked).unwrap();
    fs::write(blocked.join("child"), "x").unwrap();
    assert!(io::write_atomic(&blocked, b"new").is_err());

    assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
    assert!(blocked.is_dir());
}

#[test]
fn test_read_text_nonexistent_is_not_found() {
    let temp = TempDir::new().unwrap();
    let err = io::read_text(&temp.path().join("missing")).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_temp_artifact_detection() {
    assert!(io::is_temp_artifact(".files.json.1234.0.tmp"));
    assert!(!io::is_temp_artifact("files.json"));
    assert!(!io::is_temp_artifact("notes.tmp"));
}

#[test]
fn test_write_atomic_is_exported_at_crate_root() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("files.json");

    drive_fs::write_atomic(&path, b"{}").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
}
