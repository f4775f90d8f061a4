//! Manifest entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteId;

/// What the engine last knew about one synchronized local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Remote object mirroring the file
    pub remote_id: RemoteId,
    /// Local modification time at the last successful reconciliation
    pub modified_time: DateTime<Utc>,
    /// Local content fingerprint at the last successful reconciliation
    pub fingerprint: String,
}

impl ManifestEntry {
    pub fn new(
        remote_id: RemoteId,
        modified_time: DateTime<Utc>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            remote_id,
            modified_time,
            fingerprint: fingerprint.into(),
        }
    }
}
