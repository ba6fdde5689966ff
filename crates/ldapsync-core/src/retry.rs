//! Converting a per-item failure into a guaranteed retry on the next run.

use crate::directory::DirectoryService;
use crate::error::{error_chain, Result, SyncError};
use crate::types::RecordRef;
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

/// Bumps the modification marker of records whose synchronisation failed so
/// the next incremental run selects them again.
///
/// A record is written at most once per run; repeated failures for the same
/// record within a run are only logged.
#[derive(Debug, Default)]
pub struct RetryMarker {
    marked: BTreeSet<RecordRef>,
}

impl RetryMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `cause` and mark `record` for retry.
    ///
    /// A failure to write the marker is returned as
    /// [`SyncError::RetryMarking`]: the record can no longer be guaranteed a
    /// retry, so the run must stop.
    pub fn mark_for_retry(
        &mut self,
        directory: &mut dyn DirectoryService,
        record: &RecordRef,
        cause: &SyncError,
    ) -> Result<()> {
        error!(record = %record, error = %error_chain(cause), "synchronisation failed");

        if self.marked.contains(record) {
            debug!(record = %record, "already marked for retry in this run");
            return Ok(());
        }

        directory.mark_modified(record).map_err(|e| {
            warn!(record = %record, error = %error_chain(&e), "could not mark record for retry");
            SyncError::RetryMarking {
                record: record.to_string(),
                source: Box::new(e),
            }
        })?;
        self.marked.insert(record.clone());
        debug!(record = %record, "marked for retry");
        Ok(())
    }

    pub fn marked(&self) -> &BTreeSet<RecordRef> {
        &self.marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;
    use crate::types::{GroupCategory, GroupRef};

    fn site(name: &str) -> RecordRef {
        RecordRef::Group(GroupRef::new(GroupCategory::Site, name))
    }

    fn cause() -> SyncError {
        SyncError::conflict("repository", "rejected")
    }

    #[test]
    fn marks_each_record_once() {
        let mut dir = MemoryDirectory::new();
        dir.add_group(GroupCategory::Site, "alpha", &[]);
        let mut marker = RetryMarker::new();

        marker.mark_for_retry(&mut dir, &site("alpha"), &cause()).unwrap();
        marker.mark_for_retry(&mut dir, &site("alpha"), &cause()).unwrap();

        assert_eq!(dir.marks(), &[site("alpha")]);
        assert_eq!(marker.marked().len(), 1);
    }

    #[test]
    fn marking_moves_the_modification_marker() {
        let mut dir = MemoryDirectory::new();
        dir.add_group(GroupCategory::Site, "alpha", &[]);
        let cutoff = dir.current_marker();
        RetryMarker::new()
            .mark_for_retry(&mut dir, &site("alpha"), &cause())
            .unwrap();
        let selected = dir.list_records(GroupCategory::Site, Some(&cutoff)).unwrap();
        assert!(selected.contains("alpha"));
    }

    #[test]
    fn failed_marking_is_fatal() {
        let mut dir = MemoryDirectory::new();
        dir.add_group(GroupCategory::Site, "alpha", &[]);
        dir.fail_marking(true);
        let mut marker = RetryMarker::new();

        let err = marker
            .mark_for_retry(&mut dir, &site("alpha"), &cause())
            .unwrap_err();
        assert!(matches!(err, SyncError::RetryMarking { .. }));
        assert!(marker.marked().is_empty());
    }
}
