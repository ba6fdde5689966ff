use crate::clock::Clock;
use crate::directory::DirectoryService;
use crate::error::Result;
use crate::types::RunTimestamp;
use chrono::{DateTime, Utc};

/// Tracks when the repository's security model (site and marking groups) was
/// last refreshed, so callers can answer "has it changed?" cheaply.
#[derive(Debug, Clone)]
pub struct SecurityModelTracker {
    last_updated: Option<DateTime<Utc>>,
    not_modified_enabled: bool,
}

impl SecurityModelTracker {
    pub fn new(not_modified_enabled: bool) -> Self {
        Self {
            last_updated: None,
            not_modified_enabled,
        }
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn mark_updated(&mut self, clock: &dyn Clock) {
        self.last_updated = Some(clock.now());
    }

    /// True unless the optimisation is enabled, an update has been recorded
    /// and no directory group changed since then.
    pub fn is_modified(&self, directory: &mut dyn DirectoryService) -> Result<bool> {
        match self.last_updated {
            Some(at) if self.not_modified_enabled => {
                directory.groups_modified_since(&RunTimestamp::from_datetime(at))
            }
            _ => Ok(true),
        }
    }
}
