//! Concurrent access tests for write_atomic
//!
//! Verifies that concurrent writers to the same target never leave
//! interleaved or partial content behind.

use drive_fs::io;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

#[test]
fn test_concurrent_writes_no_corruption() {
    let dir = tempdir().unwrap();
    let file_path = Arc::new(dir.path().join("files.json"));

    let num_threads = 10;
    let writes_per_thread = 20;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let file_path = Arc::clone(&file_path);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                for i in 0..writes_per_thread {
                    let content = format!("thread{}:write{}\n", thread_id, i);
                    io::write_atomic(&file_path, content.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let content = std::fs::read_to_string(file_path.as_ref()).unwrap();
    assert!(content.starts_with("thread"), "got: {}", content);
    assert_eq!(
        content.matches("thread").count(),
        1,
        "Content should be exactly one complete write"
    );

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            let name = e.as_ref().unwrap().file_name();
            io::is_temp_artifact(&name.to_string_lossy())
        })
        .count();
    assert_eq!(leftovers, 0, "No temp files should be left behind");
}
