//! In-memory directory and repository used to exercise the engine without
//! network services.
//!
//! [`MemoryDirectory`] keeps a logical clock: every write stamps the written
//! entry with the current marker and then advances the clock, so markers are
//! strictly increasing and [`MemoryDirectory::current_marker`] is always newer
//! than anything written so far.

use crate::directory::DirectoryService;
use crate::error::{Result, SyncError};
use crate::repository::RepositoryService;
use crate::types::{
    AttributeBag, GroupCategory, GroupRef, MemberSet, ProfileFields, RecordRef, RunTimestamp,
    SiteRole,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// Seconds since the Unix epoch of tick zero (2024-01-01T00:00:00Z).
const EPOCH_SECS: i64 = 1_704_067_200;

#[derive(Debug, Clone)]
struct GroupEntry {
    members: MemberSet,
    modified: u64,
}

#[derive(Debug, Clone)]
struct UserEntry {
    attrs: AttributeBag,
    modified: u64,
}

#[derive(Debug)]
pub struct MemoryDirectory {
    tick: u64,
    profile_object_class: String,
    groups: BTreeMap<GroupRef, GroupEntry>,
    users: BTreeMap<String, UserEntry>,
    lock: bool,
    timestamp: Option<(u64, RunTimestamp)>,
    marks: Vec<RecordRef>,
    writes: Vec<String>,
    fail_marking: bool,
    fail_lock_release: bool,
    unreadable: BTreeSet<GroupRef>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            tick: 0,
            profile_object_class: "richProfile".to_string(),
            groups: BTreeMap::new(),
            users: BTreeMap::new(),
            lock: false,
            timestamp: None,
            marks: Vec::new(),
            writes: Vec::new(),
            fail_marking: false,
            fail_lock_release: false,
            unreadable: BTreeSet::new(),
        }
    }

    /// The time a tick corresponds to.
    pub fn time_at(tick: u64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(EPOCH_SECS + tick as i64)
    }

    fn marker(tick: u64) -> RunTimestamp {
        RunTimestamp::from_datetime(Self::time_at(tick))
    }

    /// A marker newer than every entry written so far.
    pub fn current_marker(&self) -> RunTimestamp {
        Self::marker(self.tick)
    }

    fn stamp(&mut self) -> u64 {
        let tick = self.tick;
        self.tick += 1;
        tick
    }

    fn is_since(modified: u64, since: Option<&RunTimestamp>) -> bool {
        since.map_or(true, |ts| Self::marker(modified) >= *ts)
    }

    // -- fixtures -----------------------------------------------------------

    /// Create or overwrite a group. Role categories ignore `name`.
    pub fn add_group(&mut self, category: GroupCategory, name: &str, members: &[&str]) {
        let key = Self::key(category, name);
        let modified = self.stamp();
        let members = members.iter().map(|m| m.to_string()).collect();
        self.groups.insert(key, GroupEntry { members, modified });
    }

    pub fn touch(&mut self, category: GroupCategory, name: &str) {
        let key = Self::key(category, name);
        let modified = self.stamp();
        if let Some(entry) = self.groups.get_mut(&key) {
            entry.modified = modified;
        }
    }

    /// Create or overwrite a user entry. `cn` is set to `name`.
    pub fn add_user(&mut self, name: &str, attrs: &[(&str, &str)]) {
        let mut bag = AttributeBag::new();
        bag.push("cn", name);
        for (attr, value) in attrs {
            bag.push(attr, *value);
        }
        let modified = self.stamp();
        self.users.insert(
            name.to_string(),
            UserEntry {
                attrs: bag,
                modified,
            },
        );
    }

    /// Make every subsequent `mark_modified` fail.
    pub fn fail_marking(&mut self, fail: bool) {
        self.fail_marking = fail;
    }

    pub fn fail_lock_release(&mut self, fail: bool) {
        self.fail_lock_release = fail;
    }

    /// Make `get_members` fail for one group.
    pub fn make_unreadable(&mut self, category: GroupCategory, name: &str) {
        self.unreadable.insert(Self::key(category, name));
    }

    fn key(category: GroupCategory, name: &str) -> GroupRef {
        if category.is_role() {
            GroupRef::role(category)
        } else {
            GroupRef::new(category, name)
        }
    }

    // -- inspection ---------------------------------------------------------

    /// Records passed to `mark_modified`, in call order.
    pub fn marks(&self) -> &[RecordRef] {
        &self.marks
    }

    /// Every write the engine issued, in call order.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub fn has_lock(&self) -> bool {
        self.lock
    }

    pub fn user(&self, name: &str) -> Option<&AttributeBag> {
        self.users.get(name).map(|u| &u.attrs)
    }

    /// The value last written by `swap_run_timestamp`.
    pub fn recorded_run(&self) -> Option<&RunTimestamp> {
        self.timestamp.as_ref().map(|(_, now)| now)
    }
}

impl DirectoryService for MemoryDirectory {
    fn list_records(
        &mut self,
        category: GroupCategory,
        since: Option<&RunTimestamp>,
    ) -> Result<BTreeSet<String>> {
        Ok(self
            .groups
            .iter()
            .filter(|(key, entry)| key.category == category && Self::is_since(entry.modified, since))
            .map(|(key, _)| key.name.clone())
            .collect())
    }

    fn get_members(&mut self, group: &GroupRef) -> Result<MemberSet> {
        if self.unreadable.contains(group) {
            return Err(SyncError::connectivity("directory", format!("read of {group} timed out")));
        }
        self.groups
            .get(group)
            .map(|g| g.members.clone())
            .ok_or_else(|| SyncError::DataIntegrity(format!("no such group: {group}")))
    }

    fn user_attributes(&mut self, since: Option<&RunTimestamp>) -> Result<Vec<AttributeBag>> {
        Ok(self
            .users
            .values()
            .filter(|u| Self::is_since(u.modified, since))
            .map(|u| u.attrs.clone())
            .collect())
    }

    fn site_memberships(&mut self, user: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .groups
            .iter()
            .filter(|(key, entry)| key.category == GroupCategory::Site && entry.members.contains(user))
            .map(|(key, _)| key.name.clone())
            .collect())
    }

    fn mark_modified(&mut self, record: &RecordRef) -> Result<()> {
        if self.fail_marking {
            return Err(SyncError::connectivity("directory", "connection reset"));
        }
        let modified = self.stamp();
        match record {
            RecordRef::Group(group) => {
                let entry = self
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| SyncError::DataIntegrity(format!("no such group: {group}")))?;
                entry.modified = modified;
            }
            RecordRef::User(user) => {
                let entry = self
                    .users
                    .get_mut(user)
                    .ok_or_else(|| SyncError::DataIntegrity(format!("no such user: {user}")))?;
                entry.modified = modified;
            }
        }
        self.marks.push(record.clone());
        self.writes.push(format!("mark_modified {record}"));
        Ok(())
    }

    fn update_user_attributes(&mut self, user: &str, attributes: &AttributeBag) -> Result<()> {
        let modified = self.stamp();
        let object_class = self.profile_object_class.clone();
        let entry = self
            .users
            .get_mut(user)
            .ok_or_else(|| SyncError::DataIntegrity(format!("no such user: {user}")))?;
        if !entry.attrs.contains_value("objectClass", &object_class) {
            entry.attrs.push("objectClass", object_class);
        }
        for (name, values) in attributes.iter() {
            if values.is_empty() {
                entry.attrs.remove(name);
            } else {
                entry.attrs.insert(name, values.to_vec());
            }
        }
        entry.modified = modified;
        self.writes.push(format!("update_user_attributes {user}"));
        Ok(())
    }

    fn lock_exists(&mut self) -> Result<bool> {
        Ok(self.lock)
    }

    fn acquire_lock(&mut self) -> Result<()> {
        self.stamp();
        self.lock = true;
        self.writes.push("acquire_lock".to_string());
        Ok(())
    }

    fn release_lock(&mut self) -> Result<()> {
        if self.fail_lock_release {
            return Err(SyncError::connectivity("directory", "connection reset"));
        }
        self.lock = false;
        self.writes.push("release_lock".to_string());
        Ok(())
    }

    fn swap_run_timestamp(&mut self, now: &RunTimestamp) -> Result<Option<RunTimestamp>> {
        let previous = self.timestamp.as_ref().map(|(tick, _)| Self::marker(*tick));
        let tick = self.stamp();
        self.timestamp = Some((tick, now.clone()));
        self.writes.push("swap_run_timestamp".to_string());
        Ok(previous)
    }

    fn admin_group_modified_since(&mut self, since: &RunTimestamp) -> Result<bool> {
        Ok(self
            .groups
            .get(&GroupRef::role(GroupCategory::AdminRole))
            .map_or(false, |g| Self::is_since(g.modified, Some(since))))
    }

    fn groups_modified_since(&mut self, since: &RunTimestamp) -> Result<bool> {
        Ok(self
            .groups
            .values()
            .any(|g| Self::is_since(g.modified, Some(since))))
    }
}

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// A mutating call received by [`MemoryRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    AddMember {
        site: String,
        user: String,
        role: SiteRole,
    },
    RemoveMember {
        site: String,
        user: String,
    },
    SetMarkingGroup {
        marking: String,
        group: String,
        members: MemberSet,
    },
    AddRoleMember {
        role: String,
        user: String,
    },
    RemoveRoleMember {
        role: String,
        user: String,
    },
    UpdateUserProfile {
        user: String,
    },
}

/// Keys of injected failures.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Failure {
    ListSite(String),
    Member(String, String),
    Marking(String),
    RoleMember(String),
    Profile(String),
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    sites: BTreeMap<String, BTreeMap<String, SiteRole>>,
    markings: BTreeMap<(String, String), MemberSet>,
    roles: BTreeMap<String, MemberSet>,
    profiles: BTreeMap<String, ProfileFields>,
    failures: BTreeSet<Failure>,
    calls: Vec<RepositoryCall>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // -- fixtures -----------------------------------------------------------

    pub fn add_site(&mut self, site: &str, members: &[(&str, SiteRole)]) {
        let members = members
            .iter()
            .map(|(user, role)| (user.to_string(), *role))
            .collect();
        self.sites.insert(site.to_string(), members);
    }

    pub fn add_role(&mut self, role: &str, members: &[&str]) {
        let members = members.iter().map(|m| m.to_string()).collect();
        self.roles.insert(role.to_string(), members);
    }

    pub fn fail_listing(&mut self, site: &str) {
        self.failures.insert(Failure::ListSite(site.to_string()));
    }

    /// Fail adding `user` to or removing them from `site`.
    pub fn fail_member(&mut self, site: &str, user: &str) {
        self.failures
            .insert(Failure::Member(site.to_string(), user.to_string()));
    }

    pub fn fail_marking(&mut self, group: &str) {
        self.failures.insert(Failure::Marking(group.to_string()));
    }

    pub fn fail_role_member(&mut self, user: &str) {
        self.failures.insert(Failure::RoleMember(user.to_string()));
    }

    pub fn fail_profile(&mut self, user: &str) {
        self.failures.insert(Failure::Profile(user.to_string()));
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    fn check(&self, failure: Failure) -> Result<()> {
        if self.failures.contains(&failure) {
            return Err(SyncError::conflict("repository", format!("injected failure: {failure:?}")));
        }
        Ok(())
    }

    // -- inspection ---------------------------------------------------------

    pub fn calls(&self) -> &[RepositoryCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn site_members(&self, site: &str) -> MemberSet {
        self.sites
            .get(site)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn site_role(&self, site: &str, user: &str) -> Option<SiteRole> {
        self.sites.get(site).and_then(|m| m.get(user)).copied()
    }

    pub fn marking_group(&self, marking: &str, group: &str) -> Option<&MemberSet> {
        self.markings.get(&(marking.to_string(), group.to_string()))
    }

    pub fn role_members(&self, role: &str) -> MemberSet {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    pub fn profile(&self, user: &str) -> Option<&ProfileFields> {
        self.profiles.get(user)
    }
}

impl RepositoryService for MemoryRepository {
    fn list_group_members(&mut self, site: &str) -> Result<MemberSet> {
        self.check(Failure::ListSite(site.to_string()))?;
        Ok(self.site_members(site))
    }

    fn add_member(&mut self, site: &str, user: &str, role: SiteRole) -> Result<()> {
        self.check(Failure::Member(site.to_string(), user.to_string()))?;
        self.sites
            .entry(site.to_string())
            .or_default()
            .insert(user.to_string(), role);
        self.calls.push(RepositoryCall::AddMember {
            site: site.to_string(),
            user: user.to_string(),
            role,
        });
        Ok(())
    }

    fn remove_member(&mut self, site: &str, user: &str) -> Result<()> {
        self.check(Failure::Member(site.to_string(), user.to_string()))?;
        if let Some(members) = self.sites.get_mut(site) {
            members.remove(user);
        }
        self.calls.push(RepositoryCall::RemoveMember {
            site: site.to_string(),
            user: user.to_string(),
        });
        Ok(())
    }

    fn set_marking_group(&mut self, marking: &str, group: &str, members: &MemberSet) -> Result<()> {
        self.check(Failure::Marking(group.to_string()))?;
        self.markings
            .insert((marking.to_string(), group.to_string()), members.clone());
        self.calls.push(RepositoryCall::SetMarkingGroup {
            marking: marking.to_string(),
            group: group.to_string(),
            members: members.clone(),
        });
        Ok(())
    }

    fn list_role_members(&mut self, role: &str) -> Result<MemberSet> {
        Ok(self.role_members(role))
    }

    fn add_role_member(&mut self, role: &str, user: &str) -> Result<()> {
        self.check(Failure::RoleMember(user.to_string()))?;
        self.roles
            .entry(role.to_string())
            .or_default()
            .insert(user.to_string());
        self.calls.push(RepositoryCall::AddRoleMember {
            role: role.to_string(),
            user: user.to_string(),
        });
        Ok(())
    }

    fn remove_role_member(&mut self, role: &str, user: &str) -> Result<()> {
        self.check(Failure::RoleMember(user.to_string()))?;
        if let Some(members) = self.roles.get_mut(role) {
            members.remove(user);
        }
        self.calls.push(RepositoryCall::RemoveRoleMember {
            role: role.to_string(),
            user: user.to_string(),
        });
        Ok(())
    }

    fn update_user_profile(&mut self, user: &str, fields: &ProfileFields) -> Result<()> {
        self.check(Failure::Profile(user.to_string()))?;
        self.profiles.insert(user.to_string(), fields.clone());
        self.calls.push(RepositoryCall::UpdateUserProfile {
            user: user.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_increase_with_every_write() {
        let mut dir = MemoryDirectory::new();
        let before = dir.current_marker();
        dir.add_group(GroupCategory::Site, "alpha", &[]);
        assert!(dir.current_marker() > before);
    }

    #[test]
    fn swap_returns_previous_marker() {
        let mut dir = MemoryDirectory::new();
        let now = RunTimestamp::new("20240101000000Z");
        assert_eq!(dir.swap_run_timestamp(&now).unwrap(), None);
        let first = dir.swap_run_timestamp(&now).unwrap().unwrap();
        let second = dir.swap_run_timestamp(&now).unwrap().unwrap();
        assert!(first < second);
        assert_eq!(dir.recorded_run(), Some(&now));
    }

    #[test]
    fn site_memberships_only_cover_sites() {
        let mut dir = MemoryDirectory::new();
        dir.add_group(GroupCategory::Site, "alpha", &["bob"]);
        dir.add_group(GroupCategory::OpenMarking, "alpha", &["bob"]);
        dir.add_group(GroupCategory::Site, "beta", &["carol"]);
        let sites: Vec<_> = dir.site_memberships("bob").unwrap().into_iter().collect();
        assert_eq!(sites, vec!["alpha"]);
    }

    #[test]
    fn update_user_attributes_adds_object_class_and_clears_empty() {
        let mut dir = MemoryDirectory::new();
        dir.add_user("bob", &[("description", "old")]);
        let mut bag = AttributeBag::new();
        bag.insert("description", Vec::new());
        bag.insert("mail", vec!["bob@example.com".to_string()]);
        dir.update_user_attributes("bob", &bag).unwrap();

        let user = dir.user("bob").unwrap();
        assert!(user.contains_value("objectClass", "richProfile"));
        assert_eq!(user.get("description"), None);
        assert_eq!(user.first("mail"), Some("bob@example.com"));
    }

    #[test]
    fn repository_removal_is_idempotent() {
        let mut repo = MemoryRepository::new();
        repo.remove_member("nowhere", "nobody").unwrap();
        repo.remove_role_member("ROLE", "nobody").unwrap();
        assert_eq!(repo.calls().len(), 2);
    }

    #[test]
    fn add_member_upserts_role() {
        let mut repo = MemoryRepository::new();
        repo.add_site("alpha", &[("bob", SiteRole::Collaborator)]);
        repo.add_member("alpha", "bob", SiteRole::Manager).unwrap();
        assert_eq!(repo.site_role("alpha", "bob"), Some(SiteRole::Manager));
    }

    #[test]
    fn injected_failures_are_conflicts() {
        let mut repo = MemoryRepository::new();
        repo.fail_member("alpha", "bob");
        let err = repo.add_member("alpha", "bob", SiteRole::Manager).unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));
        assert!(repo.calls().is_empty());
    }
}
