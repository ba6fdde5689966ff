//! Change detection: which records a pass has to look at.

use crate::directory::DirectoryService;
use crate::error::Result;
use crate::types::{AttributeBag, GroupCategory, RunTimestamp};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// How much of the directory a pass enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'a> {
    All,
    ModifiedSince(&'a RunTimestamp),
}

impl<'a> Selection<'a> {
    /// A forced pass, or one with no previous run to compare against, sees
    /// everything.
    pub fn for_pass(force: bool, last_run: Option<&'a RunTimestamp>) -> Self {
        match (force, last_run) {
            (false, Some(ts)) => Selection::ModifiedSince(ts),
            _ => Selection::All,
        }
    }

    pub fn since(self) -> Option<&'a RunTimestamp> {
        match self {
            Selection::All => None,
            Selection::ModifiedSince(ts) => Some(ts),
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, Selection::All)
    }
}

pub fn select_groups(
    directory: &mut dyn DirectoryService,
    category: GroupCategory,
    selection: Selection<'_>,
) -> Result<BTreeSet<String>> {
    debug!(category = %category, ?selection, "selecting groups");
    let groups = directory.list_records(category, selection.since())?;
    info!(
        category = %category,
        count = groups.len(),
        full = selection.is_full(),
        "selected groups"
    );
    Ok(groups)
}

pub fn select_users(
    directory: &mut dyn DirectoryService,
    selection: Selection<'_>,
) -> Result<Vec<AttributeBag>> {
    let users = directory.user_attributes(selection.since())?;
    info!(count = users.len(), full = selection.is_full(), "selected users");
    Ok(users)
}
