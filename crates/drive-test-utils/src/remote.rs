//! [`MemoryRemote`]: an in-memory remote object store.
//!
//! Behaves like a hierarchical remote service: folders and files with opaque
//! ids, duplicate names allowed, paginated listings, recursive folder
//! deletes. Every call is recorded so tests can assert exactly which remote
//! operations the engine issued.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drive_core::remote::RemoteResult;
use drive_core::{ListPage, RemoteClient, RemoteError, RemoteId, RemoteKind, RemoteObject};
use drive_fs::compute_content_checksum;

/// Remote operation kinds, for counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    CreateFolder,
    CreateFile,
    UpdateFile,
    Delete,
    Move,
}

/// One recorded call, failed ones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List {
        parent: Option<RemoteId>,
        name: Option<String>,
    },
    CreateFolder {
        parent: Option<RemoteId>,
        name: String,
    },
    CreateFile {
        parent: RemoteId,
        name: String,
    },
    UpdateFile {
        id: RemoteId,
    },
    Delete {
        id: RemoteId,
    },
    Move {
        id: RemoteId,
        new_parent: RemoteId,
        new_name: String,
    },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Self::List { .. } => Op::List,
            Self::CreateFolder { .. } => Op::CreateFolder,
            Self::CreateFile { .. } => Op::CreateFile,
            Self::UpdateFile { .. } => Op::UpdateFile,
            Self::Delete { .. } => Op::Delete,
            Self::Move { .. } => Op::Move,
        }
    }
}

#[derive(Debug)]
struct Fault {
    error: RemoteError,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Debug)]
struct Node {
    object: RemoteObject,
    content: Vec<u8>,
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<RemoteId, Node>,
    seq: u64,
    calls: Vec<Call>,
    faults: HashMap<Op, Fault>,
}

impl State {
    fn insert(
        &mut self,
        parent: Option<RemoteId>,
        name: &str,
        kind: RemoteKind,
        content: Vec<u8>,
    ) -> RemoteObject {
        self.seq += 1;
        let id = RemoteId::new(format!("mem-{}", uuid::Uuid::new_v4().simple()));
        let fingerprint = (kind == RemoteKind::File).then(|| compute_content_checksum(&content));
        let object = RemoteObject {
            id: id.clone(),
            name: name.to_string(),
            parent,
            kind,
            modified_time: Some(Utc::now()),
            fingerprint,
        };
        self.nodes.insert(
            id,
            Node {
                object: object.clone(),
                content,
                seq: self.seq,
            },
        );
        object
    }

    fn is_folder(&self, id: &RemoteId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.object.is_folder())
    }

    fn children(&self, parent: Option<&RemoteId>) -> Vec<RemoteObject> {
        let mut nodes: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.object.parent.as_ref() == parent)
            .collect();
        nodes.sort_by_key(|n| n.seq);
        nodes.into_iter().map(|n| n.object.clone()).collect()
    }

    fn remove_tree(&mut self, id: &RemoteId) {
        let children: Vec<RemoteId> = self
            .nodes
            .values()
            .filter(|n| n.object.parent.as_ref() == Some(id))
            .map(|n| n.object.id.clone())
            .collect();
        for child in children {
            self.remove_tree(&child);
        }
        self.nodes.remove(id);
    }

    /// Record `call` and return the injected failure for it, if any.
    fn enter(&mut self, call: Call) -> RemoteResult<()> {
        let op = call.op();
        self.calls.push(call);

        let Some(fault) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        let error = fault.error.clone();
        let exhausted = match &mut fault.remaining {
            None => false,
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
        };
        if exhausted {
            self.faults.remove(&op);
        }
        Err(error)
    }
}

/// In-memory [`RemoteClient`] for tests.
///
/// # Example
///
/// ```rust,no_run
/// use drive_test_utils::{MemoryRemote, Op};
///
/// let remote = MemoryRemote::new().with_move_support();
/// let base = remote.seed_folder(None, "Backup");
/// remote.seed_file(Some(&base), "notes.txt", b"hello");
/// assert_eq!(remote.count(Op::CreateFile), 0);
/// ```
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
    supports_move: bool,
    page_size: usize,
    latency: Option<Duration>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Empty store without move support, 100 items per page.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            supports_move: false,
            page_size: 100,
            latency: None,
        }
    }

    /// Accept `move_object` calls.
    pub fn with_move_support(mut self) -> Self {
        self.supports_move = true;
        self
    }

    /// Items per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every call, to widen race windows.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Fail every `op` call with `error`.
    pub fn fail(&self, op: Op, error: RemoteError) {
        self.lock().faults.insert(
            op,
            Fault {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_times(&self, op: Op, times: usize, error: RemoteError) {
        if times == 0 {
            return;
        }
        self.lock().faults.insert(
            op,
            Fault {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Stop injecting failures.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Create a folder without recording a call.
    pub fn seed_folder(&self, parent: Option<&RemoteId>, name: &str) -> RemoteId {
        self.lock()
            .insert(parent.cloned(), name, RemoteKind::Folder, Vec::new())
            .id
    }

    /// Create a file without recording a call.
    pub fn seed_file(&self, parent: Option<&RemoteId>, name: &str, content: &[u8]) -> RemoteId {
        self.lock()
            .insert(parent.cloned(), name, RemoteKind::File, content.to_vec())
            .id
    }

    /// Delete an object and its descendants behind the engine's back.
    pub fn remove_out_of_band(&self, id: &RemoteId) {
        self.lock().remove_tree(id);
    }

    pub fn get(&self, id: &RemoteId) -> Option<RemoteObject> {
        self.lock().nodes.get(id).map(|n| n.object.clone())
    }

    pub fn content(&self, id: &RemoteId) -> Option<Vec<u8>> {
        self.lock().nodes.get(id).map(|n| n.content.clone())
    }

    /// Children of `parent` in creation order; `None` is the remote root.
    pub fn children(&self, parent: Option<&RemoteId>) -> Vec<RemoteObject> {
        self.lock().children(parent)
    }

    /// Object at a slash-separated path from the remote root, following
    /// the first match of each segment.
    pub fn find_path(&self, path: &str) -> Option<RemoteObject> {
        let state = self.lock();
        let mut current: Option<RemoteObject> = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let parent = current.as_ref().map(|o| o.id.clone());
            current = state
                .children(parent.as_ref())
                .into_iter()
                .find(|o| o.name == segment);
            current.as_ref()?;
        }
        current
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `op`.
    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn list_page(
        &self,
        parent: Option<&RemoteId>,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> RemoteResult<ListPage> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::List {
            parent: parent.cloned(),
            name: name.map(str::to_string),
        })?;

        let matching: Vec<RemoteObject> = state
            .children(parent)
            .into_iter()
            .filter(|o| name.is_none_or(|n| o.name == n))
            .collect();

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::rejected(format!("bad page token {token:?}")))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(matching.len());
        let items = matching.get(offset..end).unwrap_or_default().to_vec();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn create_folder(
        &self,
        parent: Option<&RemoteId>,
        name: &str,
    ) -> RemoteResult<RemoteObject> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::CreateFolder {
            parent: parent.cloned(),
            name: name.to_string(),
        })?;

        if let Some(parent) = parent
            && !state.is_folder(parent)
        {
            return Err(RemoteError::not_found(parent.as_str()));
        }
        Ok(state.insert(parent.cloned(), name, RemoteKind::Folder, Vec::new()))
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<RemoteObject> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::CreateFile {
            parent: parent.clone(),
            name: name.to_string(),
        })?;

        if !state.is_folder(parent) {
            return Err(RemoteError::not_found(parent.as_str()));
        }
        Ok(state.insert(
            Some(parent.clone()),
            name,
            RemoteKind::File,
            content.to_vec(),
        ))
    }

    async fn update_file(&self, id: &RemoteId, content: &[u8]) -> RemoteResult<RemoteObject> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::UpdateFile { id: id.clone() })?;

        let node = state
            .nodes
            .get_mut(id)
            .filter(|n| !n.object.is_folder())
            .ok_or_else(|| RemoteError::not_found(id.as_str()))?;
        node.content = content.to_vec();
        node.object.fingerprint = Some(compute_content_checksum(content));
        node.object.modified_time = Some(Utc::now());
        Ok(node.object.clone())
    }

    async fn delete(&self, id: &RemoteId) -> RemoteResult<()> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::Delete { id: id.clone() })?;

        if !state.nodes.contains_key(id) {
            return Err(RemoteError::not_found(id.as_str()));
        }
        state.remove_tree(id);
        Ok(())
    }

    async fn move_object(
        &self,
        id: &RemoteId,
        new_parent: &RemoteId,
        new_name: &str,
    ) -> RemoteResult<RemoteObject> {
        self.delay().await;
        let mut state = self.lock();
        state.enter(Call::Move {
            id: id.clone(),
            new_parent: new_parent.clone(),
            new_name: new_name.to_string(),
        })?;

        if !self.supports_move {
            return Err(RemoteError::Unsupported { operation: "move" });
        }
        if !state.is_folder(new_parent) {
            return Err(RemoteError::not_found(new_parent.as_str()));
        }
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| RemoteError::not_found(id.as_str()))?;
        node.object.parent = Some(new_parent.clone());
        node.object.name = new_name.to_string();
        node.object.modified_time = Some(Utc::now());
        Ok(node.object.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn listing_pages_follow_offsets() {
        let remote = MemoryRemote::new().with_page_size(2);
        let base = remote.seed_folder(None, "base");
        for name in ["a", "b", "c"] {
            remote.seed_folder(Some(&base), name);
        }

        let first = remote.list_page(Some(&base), None, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));

        let second = remote
            .list_page(Some(&base), None, first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next_page_token, None);
    }

    #[tokio::test]
    async fn fail_times_then_recovers() {
        let remote = MemoryRemote::new();
        remote.fail_times(Op::CreateFolder, 2, RemoteError::transient("503"));

        assert!(remote.create_folder(None, "x").await.is_err());
        assert!(remote.create_folder(None, "x").await.is_err());
        assert!(remote.create_folder(None, "x").await.is_ok());
        assert_eq!(remote.count(Op::CreateFolder), 3);
    }

    #[tokio::test]
    async fn deleting_folder_removes_descendants() {
        let remote = MemoryRemote::new();
        let base = remote.seed_folder(None, "base");
        let sub = remote.seed_folder(Some(&base), "sub");
        remote.seed_file(Some(&sub), "f.txt", b"x");

        remote.delete(&sub).await.unwrap();

        assert_eq!(remote.len(), 1);
        assert!(remote.find_path("base/sub/f.txt").is_none());
    }

    #[tokio::test]
    async fn move_without_support_is_unsupported() {
        let remote = MemoryRemote::new();
        let base = remote.seed_folder(None, "base");
        let file = remote.seed_file(Some(&base), "f.txt", b"x");

        let error = remote.move_object(&file, &base, "g.txt").await.unwrap_err();
        assert!(error.is_unsupported());
        assert_eq!(remote.count(Op::Move), 1);
    }
}
