//! Turning two membership snapshots into an edit script.

use crate::types::{MemberSet, SiteRole};

/// Additions and removals for one group. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub to_add: MemberSet,
    pub to_remove: MemberSet,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Additions paired with the site role each should receive.
    pub fn additions_with_roles<'a>(
        &'a self,
        admins: &'a MemberSet,
    ) -> impl Iterator<Item = (&'a str, SiteRole)> + 'a {
        self.to_add
            .iter()
            .map(move |m| (m.as_str(), site_role(m, admins)))
    }
}

/// Compute the edit script that makes the repository's member list match the
/// directory's.
///
/// `extra_users` count as directory members. Removal never depends on
/// `force`; under `force` every directory member is (re-)added so the
/// repository refreshes role metadata for members it already has.
pub fn diff(
    directory_members: &MemberSet,
    repository_members: &MemberSet,
    extra_users: &MemberSet,
    force: bool,
) -> MembershipDelta {
    let wanted: MemberSet = directory_members.union(extra_users).cloned().collect();

    let to_remove = repository_members.difference(&wanted).cloned().collect();
    let to_add = if force {
        wanted
    } else {
        wanted.difference(repository_members).cloned().collect()
    };

    MembershipDelta { to_add, to_remove }
}

pub fn site_role(member: &str, admins: &MemberSet) -> SiteRole {
    if admins.contains(member) {
        SiteRole::Manager
    } else {
        SiteRole::Collaborator
    }
}
