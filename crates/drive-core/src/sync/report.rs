//! Summary of one push or watch session

use drive_fs::RelPath;

use super::Outcome;

/// What a sync session did.
///
/// Per-path failures end up in `errors`; they never abort the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote files created
    pub created: usize,
    /// Remote files whose content was replaced
    pub updated: usize,
    /// Remote objects moved or renamed
    pub moved: usize,
    /// Remote objects deleted, folders included
    pub deleted: usize,
    /// Remote folders resolved or created
    pub folders: usize,
    /// Paths found identical to the remote copy
    pub unchanged: usize,
    /// Actions taken, one line per remote change
    pub actions: Vec<String>,
    /// Errors encountered, one line per failed path
    pub errors: Vec<String>,
}

impl SyncReport {
    /// True when no path failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of remote mutations issued for files.
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.moved + self.deleted
    }

    /// Account for one reconciliation.
    pub fn record(&mut self, path: &RelPath, outcome: &Outcome) {
        match outcome {
            Outcome::Created(_) => {
                self.created += 1;
                self.actions.push(format!("Created {path}"));
            }
            Outcome::Updated(_) => {
                self.updated += 1;
                self.actions.push(format!("Updated {path}"));
            }
            Outcome::Moved(_) => {
                self.moved += 1;
                self.actions.push(format!("Moved to {path}"));
            }
            Outcome::Deleted => {
                self.deleted += 1;
                self.actions.push(format!("Deleted {path}"));
            }
            Outcome::FolderDeleted { entries } => {
                self.deleted += 1;
                self.actions
                    .push(format!("Deleted folder {path} ({entries} tracked files)"));
            }
            Outcome::FolderEnsured(_) => self.folders += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped => {}
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.moved += other.moved;
        self.deleted += other.deleted;
        self.folders += other.folders;
        self.unchanged += other.unchanged;
        self.actions.extend(other.actions);
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteId;

    #[test]
    fn records_and_merges() {
        let path = RelPath::new("a/b.txt").unwrap();
        let mut first = SyncReport::default();
        first.record(&path, &Outcome::Created(RemoteId::new("1")));
        first.record(&path, &Outcome::Unchanged);

        let mut second = SyncReport::default();
        second.record(&path, &Outcome::Updated(RemoteId::new("1")));
        second.record_error("a/b.txt: quota exceeded");

        first.merge(second);

        assert_eq!(first.created, 1);
        assert_eq!(first.updated, 1);
        assert_eq!(first.unchanged, 1);
        assert_eq!(first.total_changes(), 2);
        assert_eq!(first.actions, vec!["Created a/b.txt", "Updated a/b.txt"]);
        assert!(!first.is_success());
    }
}
