//! Live change notifications
//!
//! A [`notify::RecommendedWatcher`] pushes raw notifications into a tokio
//! channel. One task classifies them, runs them through the
//! [`EventNormalizer`] and forwards normalized events until cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use drive_fs::RelPath;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChangeEvent, EventNormalizer, FullScan, IgnoreRules, RawEvent};
use crate::Result;
use crate::manifest::ManifestStore;

/// Map one notification to raw events relative to `root`.
///
/// Paths outside the root and the root itself are dropped. Metadata-only
/// and access notifications carry no content change and are ignored.
pub fn classify(root: &Path, event: &Event) -> Vec<RawEvent> {
    if event.need_rescan() {
        return vec![RawEvent::Rescan];
    }

    let relative = |path: &PathBuf| match RelPath::from_native(root, path) {
        Ok(rel) => Some(rel).filter(|rel| !rel.is_root()),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring change to unusable path");
            None
        }
    };
    let each = |make: fn(RelPath) -> RawEvent| -> Vec<RawEvent> {
        event.paths.iter().filter_map(relative).map(make).collect()
    };
    let by_existence = || -> Vec<RawEvent> {
        event
            .paths
            .iter()
            .filter_map(|path| {
                let rel = relative(path)?;
                Some(if path.exists() {
                    RawEvent::Modified(rel)
                } else {
                    RawEvent::Removed(rel)
                })
            })
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(RawEvent::Created),
        EventKind::Remove(_) => each(RawEvent::Removed),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let cookie = event.tracker();
            match mode {
                RenameMode::From => event
                    .paths
                    .iter()
                    .filter_map(relative)
                    .map(|path| RawEvent::RenamedFrom { path, cookie })
                    .collect(),
                RenameMode::To => event
                    .paths
                    .iter()
                    .filter_map(relative)
                    .map(|path| RawEvent::RenamedTo { path, cookie })
                    .collect(),
                RenameMode::Both => match event.paths.as_slice() {
                    [from, to] => match (relative(from), relative(to)) {
                        (Some(from), Some(to)) => vec![RawEvent::Renamed { from, to }],
                        (Some(from), None) => vec![RawEvent::Removed(from)],
                        (None, Some(to)) => vec![RawEvent::Created(to)],
                        (None, None) => Vec::new(),
                    },
                    _ => Vec::new(),
                },
                // Backends that cannot tell which side of a rename they saw.
                RenameMode::Any | RenameMode::Other => event
                    .paths
                    .iter()
                    .filter_map(|path| {
                        let rel = relative(path)?;
                        Some(if path.exists() {
                            RawEvent::Created(rel)
                        } else {
                            RawEvent::Removed(rel)
                        })
                    })
                    .collect(),
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) => each(RawEvent::Modified),
        EventKind::Any | EventKind::Other => by_existence(),
    }
}

/// Drop raw events about ignored paths; a rename with one ignored end
/// degrades to the other end alone.
fn without_ignored(raw: RawEvent, ignore: &IgnoreRules) -> Option<RawEvent> {
    let keep = |path: &RelPath| !ignore.is_ignored(path);
    match raw {
        RawEvent::Renamed { from, to } => match (keep(&from), keep(&to)) {
            (true, true) => Some(RawEvent::Renamed { from, to }),
            (true, false) => Some(RawEvent::Removed(from)),
            (false, true) => Some(RawEvent::Created(to)),
            (false, false) => None,
        },
        RawEvent::Rescan => Some(RawEvent::Rescan),
        other => {
            let kept = match &other {
                RawEvent::Created(path)
                | RawEvent::Modified(path)
                | RawEvent::Removed(path)
                | RawEvent::RenamedFrom { path, .. }
                | RawEvent::RenamedTo { path, .. } => keep(path),
                _ => true,
            };
            kept.then_some(other)
        }
    }
}

/// Settings of one live watch.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Canonical watched root
    pub root: PathBuf,
    pub ignore: IgnoreRules,
    pub debounce: Duration,
    pub rename_window: Duration,
}

/// Start watching `config.root` and forward normalized events to `sink`.
///
/// The returned task ends when `cancel` fires or `sink` is closed. Events
/// still held back by the debounce are forwarded before it ends.
///
/// # Errors
///
/// Fails when the platform watcher cannot be created or attached.
pub fn spawn(
    config: WatchConfig,
    manifest: Arc<ManifestStore>,
    sink: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| {
        let _ = raw_tx.send(result);
    })?;
    watcher.watch(&config.root, RecursiveMode::Recursive)?;
    tracing::info!(root = %config.root.display(), "Watching for changes");

    let handle = tokio::spawn(async move {
        // The watcher stops delivering once dropped.
        let _watcher = watcher;
        let mut normalizer = EventNormalizer::new(config.debounce, config.rename_window);

        loop {
            let deadline = normalizer
                .next_deadline()
                .map(tokio::time::Instant::from_std);

            tokio::select! {
                _ = cancel.cancelled() => break,
                received = raw_rx.recv() => match received {
                    Some(Ok(event)) => {
                        let now = Instant::now();
                        for raw in classify(&config.root, &event) {
                            if let Some(raw) = without_ignored(raw, &config.ignore) {
                                normalizer.push(raw, now);
                            }
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "File watcher reported an error"),
                    None => break,
                },
                _ = sleep_until(deadline) => {}
            }

            if normalizer.take_rescan() {
                tracing::warn!("File watcher lost events, rescanning");
                if !rescan(&config, manifest.clone(), &sink).await {
                    return;
                }
            }

            for event in normalizer.drain_due(Instant::now()) {
                if sink.send(event).is_err() {
                    return;
                }
            }
        }

        for event in normalizer.drain_all() {
            let _ = sink.send(event);
        }
        tracing::debug!("File watcher stopped");
    });

    Ok(handle)
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forward a full scan; false once the sink is closed.
async fn rescan(
    config: &WatchConfig,
    manifest: Arc<ManifestStore>,
    sink: &mpsc::UnboundedSender<ChangeEvent>,
) -> bool {
    let root = config.root.clone();
    let ignore = config.ignore.clone();
    let scanned = tokio::task::spawn_blocking(move || {
        FullScan::new(&root, manifest, ignore).collect::<Vec<_>>()
    })
    .await;

    let events = match scanned {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(error = %e, "Rescan task failed");
            return true;
        }
    };

    for event in events {
        match event {
            Ok(event) => {
                if sink.send(event).is_err() {
                    return false;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Rescan skipped an entry"),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, MetadataKind, RemoveKind};
    use pretty_assertions::assert_eq;

    fn root() -> PathBuf {
        PathBuf::from("/watched")
    }

    fn rel(path: &str) -> RelPath {
        RelPath::new(path).unwrap()
    }

    #[test]
    fn create_and_remove_map_directly() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(root().join("a/b.txt"));
        let removed = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(root().join("a/b.txt"));

        assert_eq!(
            classify(&root(), &created),
            vec![RawEvent::Created(rel("a/b.txt"))]
        );
        assert_eq!(
            classify(&root(), &removed),
            vec![RawEvent::Removed(rel("a/b.txt"))]
        );
    }

    #[test]
    fn data_change_is_modified_and_metadata_is_ignored() {
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(root().join("doc.txt"));
        let metadata = Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path(root().join("doc.txt"));

        assert_eq!(
            classify(&root(), &data),
            vec![RawEvent::Modified(rel("doc.txt"))]
        );
        assert!(classify(&root(), &metadata).is_empty());
    }

    #[test]
    fn rename_halves_carry_tracker_cookie() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root().join("old.txt"))
            .set_tracker(42);

        assert_eq!(
            classify(&root(), &from),
            vec![RawEvent::RenamedFrom {
                path: rel("old.txt"),
                cookie: Some(42)
            }]
        );
    }

    #[test]
    fn rename_out_of_tree_is_removal() {
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root().join("leaving.txt"))
            .add_path(PathBuf::from("/elsewhere/leaving.txt"));

        assert_eq!(
            classify(&root(), &both),
            vec![RawEvent::Removed(rel("leaving.txt"))]
        );
    }

    #[test]
    fn rescan_flag_wins() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(classify(&root(), &event), vec![RawEvent::Rescan]);
    }

    #[test]
    fn paths_outside_root_are_dropped() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/other/file.txt"))
            .add_path(root());
        assert!(classify(&root(), &event).is_empty());
    }

    #[test]
    fn ignored_rename_target_degrades_to_removal() {
        let ignore = IgnoreRules::new();
        let raw = RawEvent::Renamed {
            from: rel("doc.txt"),
            to: rel(".doc.txt.1.0.tmp"),
        };
        assert_eq!(
            without_ignored(raw, &ignore),
            Some(RawEvent::Removed(rel("doc.txt")))
        );
    }
}
