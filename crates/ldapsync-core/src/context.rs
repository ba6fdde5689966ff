use crate::coordinator::{EngineSettings, RunReport};
use crate::directory::DirectoryService;
use crate::error::{Result, SyncError};
use crate::repository::RepositoryService;
use crate::retry::RetryMarker;
use crate::types::RecordRef;

/// Everything a sync pass touches during one run.
pub struct SyncContext<'a> {
    pub directory: &'a mut dyn DirectoryService,
    pub repository: &'a mut dyn RepositoryService,
    pub settings: &'a EngineSettings,
    pub report: RunReport,
    retry: RetryMarker,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        directory: &'a mut dyn DirectoryService,
        repository: &'a mut dyn RepositoryService,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            directory,
            repository,
            settings,
            report: RunReport::default(),
            retry: RetryMarker::new(),
        }
    }

    /// Handle a per-item failure: log it and mark `record` for retry. Only a
    /// failed marking is returned.
    pub fn recover(&mut self, record: &RecordRef, cause: &SyncError) -> Result<()> {
        self.retry.mark_for_retry(self.directory, record, cause)
    }

    /// Close out the run's bookkeeping and hand back the report.
    pub fn finish(mut self) -> RunReport {
        self.report.marked_for_retry = self.retry.marked().iter().map(ToString::to_string).collect();
        self.report
    }
}
