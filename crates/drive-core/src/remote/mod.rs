//! Remote object store boundary
//!
//! The engine talks to the remote service only through [`RemoteClient`].
//! Implementations are thin RPC layers; pagination, retries and folder
//! caching all live on this side of the trait.

mod error;
mod listing;
mod retry;

pub use error::{RemoteError, RemoteResult};
pub use listing::Listing;
pub use retry::RetryPolicy;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Folder,
    File,
}

/// One object as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: RemoteId,
    pub name: String,
    /// `None` for objects directly under the remote root
    pub parent: Option<RemoteId>,
    pub kind: RemoteKind,
    pub modified_time: Option<DateTime<Utc>>,
    /// Content hash as reported by the service, files only
    pub fingerprint: Option<String>,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.kind == RemoteKind::Folder
    }
}

/// One page of a child listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<RemoteObject>,
    /// Continuation token; `None` once the listing is exhausted
    pub next_page_token: Option<String>,
}

/// Operations the engine needs from the remote service.
///
/// A `None` parent addresses the remote root. Every call reports failures
/// as [`RemoteError`], whose [`RemoteError::is_transient`] decides whether
/// the engine retries.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one page of the children of `parent`, optionally filtered by
    /// exact name.
    async fn list_page(
        &self,
        parent: Option<&RemoteId>,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> RemoteResult<ListPage>;

    async fn create_folder(&self, parent: Option<&RemoteId>, name: &str)
    -> RemoteResult<RemoteObject>;

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<RemoteObject>;

    async fn update_file(&self, id: &RemoteId, content: &[u8]) -> RemoteResult<RemoteObject>;

    async fn delete(&self, id: &RemoteId) -> RemoteResult<()>;

    /// Re-parent and rename an object in one call.
    ///
    /// Optional capability: the default reports [`RemoteError::Unsupported`]
    /// and the engine falls back to delete plus create.
    async fn move_object(
        &self,
        id: &RemoteId,
        new_parent: &RemoteId,
        new_name: &str,
    ) -> RemoteResult<RemoteObject> {
        let _ = (id, new_parent, new_name);
        Err(RemoteError::Unsupported { operation: "move" })
    }
}
