//! Debounce and rename correlation for live notifications
//!
//! [`EventNormalizer`] is a pure state machine: raw notifications go in with
//! the time they were observed, normalized [`ChangeEvent`]s come out once
//! they are due. Keeping the clock outside makes the timing rules testable
//! without sleeping.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use drive_fs::RelPath;

use super::{ChangeEvent, ChangeKind, EventSource};

/// A notification already made relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Created(RelPath),
    Modified(RelPath),
    Removed(RelPath),
    /// First half of a rename; `cookie` links it to its second half
    RenamedFrom { path: RelPath, cookie: Option<usize> },
    /// Second half of a rename
    RenamedTo { path: RelPath, cookie: Option<usize> },
    /// Rename reported with both ends at once
    Renamed { from: RelPath, to: RelPath },
    /// The notifier lost events; the tree must be rescanned
    Rescan,
}

#[derive(Debug)]
struct Pending {
    kind: ChangeKind,
    due: Instant,
}

#[derive(Debug)]
struct Removal {
    path: RelPath,
    cookie: Option<usize>,
    due: Instant,
}

/// Turns raw notifications into debounced, rename-aware change events.
#[derive(Debug)]
pub struct EventNormalizer {
    debounce: Duration,
    window: Duration,
    pending: BTreeMap<RelPath, Pending>,
    removals: Vec<Removal>,
    ready: VecDeque<ChangeEvent>,
    rescan: bool,
}

impl EventNormalizer {
    /// `debounce` is the quiet period before a created or modified path is
    /// dispatched; `window` is how long a removal waits for a matching
    /// creation.
    pub fn new(debounce: Duration, window: Duration) -> Self {
        Self {
            debounce,
            window,
            pending: BTreeMap::new(),
            removals: Vec::new(),
            ready: VecDeque::new(),
            rescan: false,
        }
    }

    /// Feed one notification observed at `now`.
    pub fn push(&mut self, raw: RawEvent, now: Instant) {
        match raw {
            RawEvent::Created(path) => self.arrived(path, None, now),
            RawEvent::RenamedTo { path, cookie } => self.arrived(path, cookie, now),
            RawEvent::Modified(path) => {
                self.take_removal(|r| r.path == path);
                self.debounce(path, ChangeKind::Modified, now);
            }
            RawEvent::Removed(path) => self.departed(path, None, now),
            RawEvent::RenamedFrom { path, cookie } => self.departed(path, cookie, now),
            RawEvent::Renamed { from, to } => {
                self.pending.remove(&from);
                self.ready
                    .push_back(ChangeEvent::renamed(from, to, EventSource::Live));
            }
            RawEvent::Rescan => self.rescan = true,
        }
    }

    fn departed(&mut self, path: RelPath, cookie: Option<usize>, now: Instant) {
        self.pending.remove(&path);
        self.removals.retain(|r| r.path != path);
        self.removals.push(Removal {
            path,
            cookie,
            due: now + self.window,
        });
    }

    fn arrived(&mut self, path: RelPath, cookie: Option<usize>, now: Instant) {
        // Delete then recreate in place is how many editors save.
        if self.take_removal(|r| r.path == path).is_some() {
            self.debounce(path, ChangeKind::Modified, now);
            return;
        }

        let by_cookie = cookie.and_then(|c| self.take_removal(|r| r.cookie == Some(c)));
        let matched = by_cookie.or_else(|| {
            let name = path.file_name().map(str::to_string);
            self.take_removal(|r| {
                r.due > now && name.is_some() && r.path.file_name() == name.as_deref()
            })
        });

        match matched {
            Some(removal) => {
                self.ready
                    .push_back(ChangeEvent::renamed(removal.path, path, EventSource::Live));
            }
            None => self.debounce(path, ChangeKind::Created, now),
        }
    }

    /// Remove and return the most recent removal matching `predicate`.
    fn take_removal(&mut self, predicate: impl Fn(&Removal) -> bool) -> Option<Removal> {
        let idx = self.removals.iter().rposition(predicate)?;
        Some(self.removals.remove(idx))
    }

    fn debounce(&mut self, path: RelPath, kind: ChangeKind, now: Instant) {
        let due = now + self.debounce;
        self.pending
            .entry(path)
            .and_modify(|pending| pending.due = due)
            .or_insert(Pending { kind, due });
    }

    /// Events whose quiet period or correlation window has elapsed.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = self.ready.drain(..).collect();

        let (expired, waiting): (Vec<_>, Vec<_>) =
            self.removals.drain(..).partition(|r| r.due <= now);
        self.removals = waiting;
        events.extend(
            expired
                .into_iter()
                .map(|r| ChangeEvent::deleted(r.path, EventSource::Live)),
        );

        let due: Vec<RelPath> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.due <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            if let Some(pending) = self.pending.remove(&path) {
                events.push(ChangeEvent::new(pending.kind, path, EventSource::Live));
            }
        }

        events
    }

    /// Everything still held back, regardless of timing.
    pub fn drain_all(&mut self) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = self.ready.drain(..).collect();
        events.extend(
            self.removals
                .drain(..)
                .map(|r| ChangeEvent::deleted(r.path, EventSource::Live)),
        );
        events.extend(
            std::mem::take(&mut self.pending)
                .into_iter()
                .map(|(path, pending)| ChangeEvent::new(pending.kind, path, EventSource::Live)),
        );
        events
    }

    /// Earliest time at which [`drain_due`](Self::drain_due) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.values().map(|p| p.due);
        let removals = self.removals.iter().map(|r| r.due);
        pending.chain(removals).min()
    }

    /// True once after the notifier reported lost events.
    pub fn take_rescan(&mut self) -> bool {
        std::mem::take(&mut self.rescan)
    }

    /// Number of events held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.removals.len() + self.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DEBOUNCE: Duration = Duration::from_millis(500);
    const WINDOW: Duration = Duration::from_millis(300);

    fn rel(path: &str) -> RelPath {
        RelPath::new(path).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn normalizer() -> EventNormalizer {
        EventNormalizer::new(DEBOUNCE, WINDOW)
    }

    fn summary(events: Vec<ChangeEvent>) -> Vec<String> {
        events.into_iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn burst_of_modifies_dispatches_once() {
        let mut n = normalizer();
        let t0 = Instant::now();

        for i in 0..5 {
            n.push(RawEvent::Modified(rel("doc.txt")), t0 + ms(i * 100));
        }

        assert!(n.drain_due(t0 + ms(800)).is_empty());
        assert_eq!(summary(n.drain_due(t0 + ms(900))), vec!["modified doc.txt"]);
        assert_eq!(n.pending_len(), 0);
    }

    #[test]
    fn create_followed_by_writes_stays_created() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Created(rel("new.txt")), t0);
        n.push(RawEvent::Modified(rel("new.txt")), t0 + ms(10));

        assert_eq!(summary(n.drain_due(t0 + ms(510))), vec!["created new.txt"]);
    }

    #[test]
    fn delete_and_create_of_same_name_is_rename() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Removed(rel("a/report.txt")), t0);
        n.push(RawEvent::Created(rel("b/report.txt")), t0 + ms(50));

        assert_eq!(
            summary(n.drain_due(t0 + ms(50))),
            vec!["renamed a/report.txt -> b/report.txt"]
        );
        assert_eq!(n.next_deadline(), None);
    }

    #[test]
    fn tracker_cookie_pairs_different_names() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(
            RawEvent::RenamedFrom {
                path: rel("old.txt"),
                cookie: Some(7),
            },
            t0,
        );
        n.push(
            RawEvent::RenamedTo {
                path: rel("new.txt"),
                cookie: Some(7),
            },
            t0 + ms(5),
        );

        assert_eq!(
            summary(n.drain_due(t0 + ms(5))),
            vec!["renamed old.txt -> new.txt"]
        );
    }

    #[test]
    fn unmatched_delete_passes_through_after_window() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Removed(rel("gone.txt")), t0);

        assert!(n.drain_due(t0 + ms(200)).is_empty());
        assert_eq!(n.next_deadline(), Some(t0 + WINDOW));
        assert_eq!(summary(n.drain_due(t0 + ms(300))), vec!["deleted gone.txt"]);
    }

    #[test]
    fn create_after_window_is_not_a_rename() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Removed(rel("a/x.txt")), t0);
        assert_eq!(summary(n.drain_due(t0 + ms(300))), vec!["deleted a/x.txt"]);

        n.push(RawEvent::Created(rel("b/x.txt")), t0 + ms(400));
        assert_eq!(summary(n.drain_due(t0 + ms(900))), vec!["created b/x.txt"]);
    }

    #[test]
    fn delete_then_recreate_in_place_is_modify() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Removed(rel("doc.txt")), t0);
        n.push(RawEvent::Created(rel("doc.txt")), t0 + ms(20));

        assert_eq!(summary(n.drain_due(t0 + ms(520))), vec!["modified doc.txt"]);
    }

    #[test]
    fn removal_cancels_pending_write() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Modified(rel("tmp.txt")), t0);
        n.push(RawEvent::Removed(rel("tmp.txt")), t0 + ms(10));

        assert_eq!(summary(n.drain_due(t0 + ms(600))), vec!["deleted tmp.txt"]);
    }

    #[test]
    fn drain_all_flushes_everything() {
        let mut n = normalizer();
        let t0 = Instant::now();

        n.push(RawEvent::Modified(rel("a.txt")), t0);
        n.push(RawEvent::Removed(rel("b.txt")), t0);
        n.push(RawEvent::Rescan, t0);

        assert_eq!(
            summary(n.drain_all()),
            vec!["deleted b.txt", "modified a.txt"]
        );
        assert!(n.take_rescan());
        assert!(!n.take_rescan());
    }
}
