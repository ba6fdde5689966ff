//! The authoritative side of a reconciliation.

use crate::error::Result;
use crate::types::{AttributeBag, GroupCategory, GroupRef, MemberSet, RecordRef, RunTimestamp};
use std::collections::BTreeSet;

/// Operations the engine needs from the directory.
///
/// Group names passed in and returned are prefix-stripped (see
/// [`GroupRef`]). Every write bumps the written entry's modification marker.
pub trait DirectoryService {
    /// Names of groups in `category`, restricted to those modified at or
    /// after `since` when given.
    fn list_records(
        &mut self,
        category: GroupCategory,
        since: Option<&RunTimestamp>,
    ) -> Result<BTreeSet<String>>;

    fn get_members(&mut self, group: &GroupRef) -> Result<MemberSet>;

    /// Profile-bearing user entries, restricted to those modified at or after
    /// `since` when given.
    fn user_attributes(&mut self, since: Option<&RunTimestamp>) -> Result<Vec<AttributeBag>>;

    /// Sites (prefix-stripped) that list `user` as a member.
    fn site_memberships(&mut self, user: &str) -> Result<BTreeSet<String>>;

    /// Rewrite the record's name to itself so its modification marker moves.
    fn mark_modified(&mut self, record: &RecordRef) -> Result<()>;

    /// Replace the given attributes on a user entry, adding the profile
    /// object class first when the entry lacks it.
    fn update_user_attributes(&mut self, user: &str, attributes: &AttributeBag) -> Result<()>;

    fn lock_exists(&mut self) -> Result<bool>;

    /// Create the lock entry. Succeeds if it already exists.
    fn acquire_lock(&mut self) -> Result<()>;

    /// Delete the lock entry. Succeeds if it is already gone.
    fn release_lock(&mut self) -> Result<()>;

    /// Overwrite the run timestamp entry with `now` and return the marker it
    /// carried before, or `None` when no run has ever recorded one.
    fn swap_run_timestamp(&mut self, now: &RunTimestamp) -> Result<Option<RunTimestamp>>;

    fn admin_group_modified_since(&mut self, since: &RunTimestamp) -> Result<bool>;

    /// Whether any group at all changed at or after `since`.
    fn groups_modified_since(&mut self, since: &RunTimestamp) -> Result<bool>;
}
