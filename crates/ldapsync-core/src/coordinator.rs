//! One reconciliation run, start to finish.
//!
//! Run protocol:
//!
//! 1. Refuse to start when the lock entry exists, unless forced.
//! 2. Create the lock entry.
//! 3. Swap the run timestamp, keeping the previous one as the incremental
//!    cutoff.
//! 4. Escalate every membership pass to a full pass when the admin group
//!    changed since the cutoff.
//! 5. Sites, open/closed/org markings, deleters, then profiles.
//! 6. Delete the lock entry.
//!
//! Any error that escapes a pass leaves the lock in place so the next
//! unforced run refuses to start until an operator has looked.

use crate::clock::Clock;
use crate::config::{Config, MarkingConstraints};
use crate::context::SyncContext;
use crate::detector::Selection;
use crate::directory::DirectoryService;
use crate::error::{error_chain, Result, SyncError};
use crate::profile::{ProfileSchema, ProfileUpdater};
use crate::repository::RepositoryService;
use crate::security_model::SecurityModelTracker;
use crate::sync::{sync_deleters, sync_markings, sync_sites};
use crate::types::{MarkingClass, MemberSet, RunTimestamp};
use serde::Serialize;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

/// The slice of configuration the sync passes read.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub extra_users: MemberSet,
    pub markings: MarkingConstraints,
    pub deleters_role: String,
    pub deleted_items_suffix: String,
    pub security_model_not_modified: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extra_users: config.extra_users(),
            markings: config.repository.markings.clone(),
            deleters_role: config.repository.deleters_role.clone(),
            deleted_items_suffix: config.repository.deleted_items_suffix.clone(),
            security_model_not_modified: config.sync.security_model_not_modified,
        }
    }
}

// ---------------------------------------------------------------------------
// RunState / RunReport
// ---------------------------------------------------------------------------

/// What the directory said about previous runs when this one started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub lock_present: bool,
    pub last_run_timestamp: Option<RunTimestamp>,
    pub admins_changed_since_last_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub forced: bool,
    pub state: RunState,
    pub groups_examined: usize,
    pub members_added: usize,
    pub members_removed: usize,
    pub marking_groups_set: usize,
    pub deleters_added: usize,
    pub deleters_removed: usize,
    pub profiles_updated: usize,
    /// Records whose failures will be retried by the next run.
    pub marked_for_retry: Vec<String>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<D, R, C> {
    directory: D,
    repository: R,
    clock: C,
    settings: EngineSettings,
    profiles: ProfileUpdater,
    security_model: SecurityModelTracker,
}

impl<D, R, C> Reconciler<D, R, C>
where
    D: DirectoryService,
    R: RepositoryService,
    C: Clock,
{
    pub fn new(directory: D, repository: R, clock: C, settings: EngineSettings, schema: ProfileSchema) -> Self {
        let security_model = SecurityModelTracker::new(settings.security_model_not_modified);
        Self {
            directory,
            repository,
            clock,
            settings,
            profiles: ProfileUpdater::new(schema),
            security_model,
        }
    }

    pub fn from_config(directory: D, repository: R, clock: C, config: &Config) -> Self {
        Self::new(
            directory,
            repository,
            clock,
            EngineSettings::from_config(config),
            ProfileSchema::from_config(&config.profile),
        )
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut R {
        &mut self.repository
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Whether repository security groups may have changed since the last
    /// completed marking passes.
    pub fn security_model_modified(&mut self) -> Result<bool> {
        self.security_model.is_modified(&mut self.directory)
    }

    /// Perform one run. `force` overrides a lock left by an earlier run and
    /// turns every pass into a full pass.
    pub fn run(&mut self, force: bool) -> Result<RunReport> {
        let lock_present = self.directory.lock_exists()?;
        if lock_present && !force {
            error!("lock entry present; refusing to run");
            return Err(SyncError::Locked);
        }
        if lock_present {
            warn!("overriding lock entry left by a previous run");
        }

        self.directory.acquire_lock()?;
        let now = RunTimestamp::from_datetime(self.clock.now());
        let previous = self.directory.swap_run_timestamp(&now)?;
        let admins_changed = match &previous {
            Some(ts) => self.directory.admin_group_modified_since(ts)?,
            None => false,
        };
        info!(
            force,
            previous = previous.as_ref().map(RunTimestamp::as_str).unwrap_or("none"),
            admins_changed,
            "starting run"
        );
        if admins_changed {
            info!("admin group changed; forcing full membership passes");
        }

        let state = RunState {
            lock_present,
            last_run_timestamp: previous.clone(),
            admins_changed_since_last_run: admins_changed,
        };
        let membership_force = force || admins_changed;
        let membership = Selection::for_pass(membership_force, previous.as_ref());
        let profiles = Selection::for_pass(force, previous.as_ref());

        let mut ctx = SyncContext::new(&mut self.directory, &mut self.repository, &self.settings);
        let outcome = run_passes(
            &mut ctx,
            &self.profiles,
            &mut self.security_model,
            &self.clock,
            membership,
            membership_force,
            profiles,
        );
        let mut report = ctx.finish();
        if let Err(e) = outcome {
            error!(error = %error_chain(&e), "run failed; lock left in place");
            return Err(e);
        }

        self.directory.release_lock()?;
        report.forced = force;
        report.state = state;
        info!(
            groups = report.groups_examined,
            added = report.members_added,
            removed = report.members_removed,
            markings = report.marking_groups_set,
            deleters_added = report.deleters_added,
            deleters_removed = report.deleters_removed,
            profiles = report.profiles_updated,
            retries = report.marked_for_retry.len(),
            "run complete"
        );
        Ok(report)
    }
}

fn run_passes(
    ctx: &mut SyncContext<'_>,
    profiles: &ProfileUpdater,
    security_model: &mut SecurityModelTracker,
    clock: &dyn Clock,
    membership: Selection<'_>,
    membership_force: bool,
    profile_selection: Selection<'_>,
) -> Result<()> {
    sync_sites(ctx, membership, membership_force)?;
    for class in MarkingClass::all() {
        sync_markings(ctx, *class, membership)?;
    }
    security_model.mark_updated(clock);
    sync_deleters(ctx)?;
    profiles.sync_to_repository(ctx, profile_selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::tests::sample;
    use crate::memory::{MemoryDirectory, MemoryRepository, RepositoryCall};
    use crate::types::{GroupCategory, GroupRef, RecordRef, SiteRole};
    use chrono::Duration;

    type TestReconciler = Reconciler<MemoryDirectory, MemoryRepository, ManualClock>;

    fn reconciler(dir: MemoryDirectory, repo: MemoryRepository) -> TestReconciler {
        let clock = ManualClock::new(MemoryDirectory::time_at(0));
        let mut config = sample();
        config.sync.extra_users.clear();
        Reconciler::from_config(dir, repo, clock, &config)
    }

    fn directory() -> MemoryDirectory {
        let mut dir = MemoryDirectory::new();
        dir.add_group(GroupCategory::AdminRole, "", &["A"]);
        dir.add_group(GroupCategory::DeletersRole, "", &[]);
        dir
    }

    fn set(items: &[&str]) -> MemberSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_run_is_a_full_pass_and_releases_the_lock() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["A", "B"]);
        dir.add_group(GroupCategory::OpenMarking, "public", &["B"]);
        dir.add_user("B", &[("description", "bee")]);
        let mut repo = MemoryRepository::new();
        repo.add_site("alpha", &[("B", SiteRole::Collaborator), ("C", SiteRole::Collaborator)]);
        let mut rec = reconciler(dir, repo);

        let report = rec.run(false).unwrap();

        assert_eq!(report.state.last_run_timestamp, None);
        assert!(!report.state.admins_changed_since_last_run);
        assert_eq!(rec.repository().site_members("alpha"), set(&["A", "B"]));
        assert_eq!(rec.repository().site_role("alpha", "A"), Some(SiteRole::Manager));
        assert_eq!(
            rec.repository().marking_group("openMarkings", "public"),
            Some(&set(&["B"]))
        );
        assert!(rec.repository().profile("B").is_some());
        assert!(!rec.directory().has_lock());
        assert!(rec.directory().recorded_run().is_some());
    }

    #[test]
    fn lock_present_without_force_makes_no_calls() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["A"]);
        dir.acquire_lock().unwrap();
        let mut rec = reconciler(dir, MemoryRepository::new());
        let writes_before = rec.directory().writes().len();

        let err = rec.run(false).unwrap_err();

        assert!(matches!(err, SyncError::Locked));
        assert!(rec.repository().calls().is_empty());
        assert_eq!(rec.directory().writes().len(), writes_before);
        assert!(rec.directory().has_lock());
    }

    #[test]
    fn force_overrides_the_lock() {
        let mut dir = directory();
        dir.acquire_lock().unwrap();
        let mut rec = reconciler(dir, MemoryRepository::new());

        let report = rec.run(true).unwrap();

        assert!(report.forced);
        assert!(report.state.lock_present);
        assert!(!rec.directory().has_lock());
    }

    #[test]
    fn failed_item_is_retried_on_the_next_incremental_run() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["B"]);
        dir.add_group(GroupCategory::Site, "beta", &["B"]);
        let mut repo = MemoryRepository::new();
        repo.fail_member("alpha", "B");
        let mut rec = reconciler(dir, repo);

        let first = rec.run(false).unwrap();
        assert_eq!(first.marked_for_retry, vec!["site:alpha".to_string()]);
        assert_eq!(
            rec.directory().marks(),
            &[RecordRef::Group(GroupRef::new(GroupCategory::Site, "alpha"))]
        );

        rec.repository_mut().clear_failures();
        rec.repository_mut().clear_calls();
        rec.clock().advance(Duration::minutes(10));
        let second = rec.run(false).unwrap();

        assert!(second.state.last_run_timestamp.is_some());
        // Only the re-marked site is selected.
        assert_eq!(second.groups_examined, 2);
        assert_eq!(
            rec.repository().calls(),
            &[RepositoryCall::AddMember {
                site: "alpha".into(),
                user: "B".into(),
                role: SiteRole::Collaborator
            }]
        );
    }

    #[test]
    fn unchanged_directory_means_empty_incremental_run() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["B"]);
        let mut rec = reconciler(dir, MemoryRepository::new());
        rec.run(false).unwrap();
        rec.repository_mut().clear_calls();

        let report = rec.run(false).unwrap();
        // Only the deleters role, which is always compared in full.
        assert_eq!(report.groups_examined, 1);
        assert!(rec.repository().calls().is_empty());
    }

    #[test]
    fn admin_change_escalates_membership_passes() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["A", "B"]);
        dir.add_group(GroupCategory::Site, "beta", &["B"]);
        dir.add_group(GroupCategory::ClosedMarking, "secret", &["B"]);
        dir.add_user("B", &[]);
        let mut rec = reconciler(dir, MemoryRepository::new());
        rec.run(false).unwrap();
        rec.repository_mut().clear_calls();

        rec.directory_mut()
            .add_group(GroupCategory::AdminRole, "", &["A", "B"]);
        let report = rec.run(false).unwrap();

        assert!(report.state.admins_changed_since_last_run);
        assert_eq!(
            rec.repository().site_role("beta", "B"),
            Some(SiteRole::Manager)
        );
        assert_eq!(rec.repository().site_role("alpha", "A"), Some(SiteRole::Manager));
        assert_eq!(report.marking_groups_set, 1);
        // Profiles are not escalated.
        assert_eq!(report.profiles_updated, 0);
    }

    #[test]
    fn forced_runs_converge_to_the_same_state() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["A", "B"]);
        dir.add_group(GroupCategory::OrgMarking, "acme", &["A"]);
        let mut repo = MemoryRepository::new();
        repo.add_site("alpha", &[("C", SiteRole::Collaborator)]);
        let mut rec = reconciler(dir, repo);

        rec.run(true).unwrap();
        let members = rec.repository().site_members("alpha");
        let marking = rec.repository().marking_group("orgMarkings", "acme").cloned();
        rec.repository_mut().clear_calls();

        rec.run(true).unwrap();
        assert_eq!(rec.repository().site_members("alpha"), members);
        assert_eq!(rec.repository().marking_group("orgMarkings", "acme").cloned(), marking);
        // Present members are re-added, nobody is removed.
        assert!(rec
            .repository()
            .calls()
            .iter()
            .all(|c| !matches!(c, RepositoryCall::RemoveMember { .. })));
        assert!(rec
            .repository()
            .calls()
            .iter()
            .any(|c| matches!(c, RepositoryCall::AddMember { .. })));
    }

    #[test]
    fn failed_retry_marking_keeps_the_lock() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["B"]);
        dir.fail_marking(true);
        let mut repo = MemoryRepository::new();
        repo.fail_member("alpha", "B");
        let mut rec = reconciler(dir, repo);

        let err = rec.run(false).unwrap_err();

        assert!(matches!(err, SyncError::RetryMarking { .. }));
        assert!(rec.directory().has_lock());
        assert!(matches!(rec.run(false), Err(SyncError::Locked)));
    }

    #[test]
    fn failed_lock_release_is_fatal_and_keeps_the_lock() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["B"]);
        dir.fail_lock_release(true);
        let mut rec = reconciler(dir, MemoryRepository::new());

        let err = rec.run(false).unwrap_err();

        assert!(matches!(err, SyncError::Connectivity { .. }));
        assert!(rec.directory().has_lock());
        // The passes themselves completed.
        assert_eq!(rec.repository().site_members("alpha"), set(&["B"]));

        rec.directory_mut().fail_lock_release(false);
        assert!(matches!(rec.run(false), Err(SyncError::Locked)));
        rec.run(true).unwrap();
        assert!(!rec.directory().has_lock());
    }

    #[test]
    fn deleter_with_failed_companion_grant_is_completed_by_the_next_run() {
        let mut dir = directory();
        dir.add_group(GroupCategory::DeletersRole, "", &["X"]);
        dir.add_group(GroupCategory::Site, "s1", &["X"]);
        let mut repo = MemoryRepository::new();
        repo.fail_member("s1-deleted", "X");
        let mut rec = reconciler(dir, repo);

        let first = rec.run(false).unwrap();
        assert_eq!(first.marked_for_retry, vec!["deleters_role".to_string()]);
        assert!(rec.repository().role_members("GROUP_DELETERS").is_empty());

        rec.repository_mut().clear_failures();
        rec.clock().advance(Duration::minutes(10));
        let second = rec.run(false).unwrap();

        assert_eq!(second.deleters_added, 1);
        assert_eq!(rec.repository().role_members("GROUP_DELETERS"), set(&["X"]));
        assert_eq!(
            rec.repository().site_role("s1-deleted", "X"),
            Some(SiteRole::Manager)
        );
    }

    #[test]
    fn security_model_is_fresh_after_a_run() {
        let mut dir = directory();
        dir.add_group(GroupCategory::Site, "alpha", &["B"]);
        let mut rec = reconciler(dir, MemoryRepository::new());
        assert!(rec.security_model_modified().unwrap());

        rec.clock().advance(Duration::hours(1));
        rec.run(false).unwrap();
        assert!(!rec.security_model_modified().unwrap());
    }
}
