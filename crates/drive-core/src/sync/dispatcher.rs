//! Bounded worker pool with per-path ordering
//!
//! Events for different paths reconcile concurrently, up to `max_workers`
//! at a time. Events for one path run strictly in submission order, one at
//! a time. A rename touches two paths and waits for both.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use drive_fs::RelPath;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use super::{Reconciler, SyncReport};
use crate::source::ChangeEvent;

/// Hands events to reconciliation tasks.
///
/// Submitting never waits for remote work, so the change source keeps
/// producing while reconciliations are in flight.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    lanes: Mutex<Lanes>,
    tracker: TaskTracker,
    report: Mutex<SyncReport>,
}

/// A submitted event with the paths it occupies, sorted.
struct Job {
    event: ChangeEvent,
    paths: Vec<RelPath>,
}

impl Job {
    fn new(event: ChangeEvent) -> Self {
        let mut paths = vec![event.path.clone()];
        if let Some(old) = &event.old_path
            && *old != event.path
        {
            paths.push(old.clone());
        }
        paths.sort();
        Self { event, paths }
    }
}

/// Per-path FIFO of tickets.
///
/// A job runs once its ticket heads the lane of every path it occupies.
/// Tickets only grow, so the oldest waiting job always heads all of its
/// lanes once older jobs finish, and two renames never wait on each other.
#[derive(Default)]
struct Lanes {
    next_ticket: u64,
    lanes: HashMap<RelPath, VecDeque<u64>>,
    /// Jobs queued behind other work
    waiting: HashMap<u64, Job>,
}

impl Lanes {
    fn heads_all(&self, ticket: u64, paths: &[RelPath]) -> bool {
        paths
            .iter()
            .all(|path| self.lanes.get(path).and_then(VecDeque::front) == Some(&ticket))
    }

    /// Queue `job`, handing it back when it can start right away.
    fn enqueue(&mut self, job: Job) -> Option<(u64, Job)> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        for path in &job.paths {
            self.lanes.entry(path.clone()).or_default().push_back(ticket);
        }

        if self.heads_all(ticket, &job.paths) {
            return Some((ticket, job));
        }
        tracing::trace!(event = %job.event, "Path busy, queueing event");
        self.waiting.insert(ticket, job);
        None
    }

    /// Retire a finished ticket and return the jobs it unblocked.
    fn release(&mut self, ticket: u64, paths: &[RelPath]) -> Vec<(u64, Job)> {
        let mut heads = Vec::new();
        for path in paths {
            let Some(lane) = self.lanes.get_mut(path) else {
                continue;
            };
            if lane.front() == Some(&ticket) {
                lane.pop_front();
            }
            match lane.front() {
                Some(&next) => heads.push(next),
                None => {
                    self.lanes.remove(path);
                }
            }
        }
        heads.sort_unstable();
        heads.dedup();

        let mut ready = Vec::new();
        for next in heads {
            let runnable = self
                .waiting
                .get(&next)
                .is_some_and(|job| self.heads_all(next, &job.paths));
            if runnable && let Some(job) = self.waiting.remove(&next) {
                ready.push((next, job));
            }
        }
        ready
    }
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>, max_workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler,
                permits: Arc::new(Semaphore::new(max_workers.max(1))),
                lanes: Mutex::new(Lanes::default()),
                tracker: TaskTracker::new(),
                report: Mutex::new(SyncReport::default()),
            }),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.inner.reconciler
    }

    /// Queue `event` behind any in-flight work for the same path.
    ///
    /// Renames queue on both their source and destination path.
    pub fn submit(&self, event: ChangeEvent) {
        self.inner.submit(event);
    }

    /// Number of paths with work queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.lanes().lanes.len()
    }

    /// Wait until every submitted event, follow-ups included, is done.
    pub async fn drain(&self) {
        tracing::debug!(paths = self.in_flight(), "Draining dispatched work");
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Take the accumulated report, leaving an empty one.
    pub fn take_report(&self) -> SyncReport {
        std::mem::take(&mut *self.inner.report())
    }

    /// Copy of the accumulated report.
    pub fn report(&self) -> SyncReport {
        self.inner.report().clone()
    }
}

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn report(&self) -> MutexGuard<'_, SyncReport> {
        self.report.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn submit(self: &Arc<Self>, event: ChangeEvent) {
        let ready = self.lanes().enqueue(Job::new(event));
        if let Some((ticket, job)) = ready {
            self.start(ticket, job);
        }
    }

    /// Run `job`, then start whatever was queued behind it.
    fn start(self: &Arc<Self>, ticket: u64, job: Job) {
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            inner.process(&job.event).await;
            let unblocked = inner.lanes().release(ticket, &job.paths);
            for (ticket, job) in unblocked {
                inner.start(ticket, job);
            }
        });
    }

    async fn process(self: &Arc<Self>, event: &ChangeEvent) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        let result = self.reconciler.reconcile(event).await;
        drop(permit);

        match result {
            Ok(reconciled) => {
                self.report().record(&event.path, &reconciled.outcome);
                for follow_up in reconciled.follow_up {
                    self.submit(follow_up);
                }
            }
            Err(e) => {
                tracing::warn!(
                    event = %event,
                    error = %e,
                    "Reconciliation failed, path left out of sync"
                );
                self.report().record_error(format!("{event}: {e}"));
            }
        }
    }
}
