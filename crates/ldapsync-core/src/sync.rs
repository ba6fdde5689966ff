//! The membership passes of a run: sites, security markings and the
//! privileged-deleter role.
//!
//! Every pass catches failures at the granularity of one group, or one user
//! in the deleters pass, hands them to [`SyncContext::recover`] and moves on.
//! Only errors from `recover` itself, and failures to read run-wide inputs such
//! as the admin set, end the pass.

use crate::context::SyncContext;
use crate::detector::{select_groups, Selection};
use crate::differ::{diff, MembershipDelta};
use crate::error::Result;
use crate::types::{GroupCategory, GroupRef, MarkingClass, MemberSet, RecordRef, SiteRole};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

pub fn sync_sites(ctx: &mut SyncContext<'_>, selection: Selection<'_>, force: bool) -> Result<()> {
    let admins = ctx
        .directory
        .get_members(&GroupRef::role(GroupCategory::AdminRole))?;
    debug!(count = admins.len(), "loaded site administrators");

    let sites = select_groups(&mut *ctx.directory, GroupCategory::Site, selection)?;
    for site in &sites {
        ctx.report.groups_examined += 1;
        let group = GroupRef::new(GroupCategory::Site, site.as_str());
        if let Err(e) = sync_site(ctx, &group, &admins, force) {
            ctx.recover(&RecordRef::Group(group), &e)?;
        }
    }
    Ok(())
}

/// Reconcile one site. Failures reading either side are returned; failures
/// applying individual edits are recovered here so the rest of the edits
/// still go through.
fn sync_site(
    ctx: &mut SyncContext<'_>,
    group: &GroupRef,
    admins: &MemberSet,
    force: bool,
) -> Result<()> {
    let site = group.name.as_str();
    let wanted = ctx.directory.get_members(group)?;
    let current = ctx.repository.list_group_members(site)?;
    let delta = diff(&wanted, &current, &ctx.settings.extra_users, force);
    if delta.is_empty() {
        debug!(site, "site already in sync");
        return Ok(());
    }
    info!(
        site,
        add = delta.to_add.len(),
        remove = delta.to_remove.len(),
        "updating site membership"
    );

    let record = RecordRef::Group(group.clone());
    for (user, role) in delta.additions_with_roles(admins) {
        match ctx.repository.add_member(site, user, role) {
            Ok(()) => ctx.report.members_added += 1,
            Err(e) => ctx.recover(&record, &e)?,
        }
    }
    for user in &delta.to_remove {
        match ctx.repository.remove_member(site, user) {
            Ok(()) => ctx.report.members_removed += 1,
            Err(e) => ctx.recover(&record, &e)?,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Security markings
// ---------------------------------------------------------------------------

/// Push the full member list of every selected marking group of `class` into
/// the class's repository constraint.
pub fn sync_markings(
    ctx: &mut SyncContext<'_>,
    class: MarkingClass,
    selection: Selection<'_>,
) -> Result<()> {
    let constraint = ctx.settings.markings.constraint_for(class).to_string();
    let groups = select_groups(&mut *ctx.directory, class.category(), selection)?;
    for name in &groups {
        ctx.report.groups_examined += 1;
        let group = GroupRef::new(class.category(), name.as_str());
        if let Err(e) = sync_marking_group(ctx, &constraint, &group) {
            ctx.recover(&RecordRef::Group(group), &e)?;
        }
    }
    Ok(())
}

fn sync_marking_group(ctx: &mut SyncContext<'_>, constraint: &str, group: &GroupRef) -> Result<()> {
    let mut members = ctx.directory.get_members(group)?;
    members.extend(ctx.settings.extra_users.iter().cloned());
    debug!(constraint, group = %group.name, count = members.len(), "setting marking group");
    ctx.repository
        .set_marking_group(constraint, &group.name, &members)?;
    ctx.report.marking_groups_set += 1;
    Ok(())
}

// ---------------------------------------------------------------------------
// Deleters
// ---------------------------------------------------------------------------

/// Reconcile the privileged-deleter role. Always a full comparison; the role
/// carries no extra users and present members are never re-added.
pub fn sync_deleters(ctx: &mut SyncContext<'_>) -> Result<()> {
    let group = GroupRef::role(GroupCategory::DeletersRole);
    ctx.report.groups_examined += 1;
    let delta = match deleters_delta(ctx, &group) {
        Ok(delta) => delta,
        Err(e) => return ctx.recover(&RecordRef::Group(group), &e),
    };
    if delta.is_empty() {
        debug!("deleters role already in sync");
        return Ok(());
    }
    info!(
        add = delta.to_add.len(),
        remove = delta.to_remove.len(),
        "updating deleters role"
    );

    // The pass ignores change markers, so a failed user is picked up by the
    // next full comparison. The mark only records the failure.
    let record = RecordRef::Group(group);
    for user in &delta.to_add {
        match grant_deleter(ctx, user) {
            Ok(()) => ctx.report.deleters_added += 1,
            Err(e) => ctx.recover(&record, &e)?,
        }
    }
    for user in &delta.to_remove {
        match revoke_deleter(ctx, user) {
            Ok(()) => ctx.report.deleters_removed += 1,
            Err(e) => ctx.recover(&record, &e)?,
        }
    }
    Ok(())
}

fn deleters_delta(ctx: &mut SyncContext<'_>, group: &GroupRef) -> Result<MembershipDelta> {
    let wanted = ctx.directory.get_members(group)?;
    let current = ctx
        .repository
        .list_role_members(&ctx.settings.deleters_role)?;
    Ok(diff(&wanted, &current, &MemberSet::new(), false))
}

fn companion_site(ctx: &SyncContext<'_>, site: &str) -> String {
    format!("{site}{}", ctx.settings.deleted_items_suffix)
}

/// Companion grants come first and the role last: a user left outside the
/// role by a partial failure shows up in the next diff again.
fn grant_deleter(ctx: &mut SyncContext<'_>, user: &str) -> Result<()> {
    for site in ctx.directory.site_memberships(user)? {
        let companion = companion_site(ctx, &site);
        debug!(user, site = %companion, "granting deleted-items access");
        ctx.repository
            .add_member(&companion, user, SiteRole::Manager)?;
    }
    ctx.repository
        .add_role_member(&ctx.settings.deleters_role, user)?;
    Ok(())
}

/// Companion revocations come first and the role last. Both removals are
/// idempotent, so a missing companion site or membership is not an error.
fn revoke_deleter(ctx: &mut SyncContext<'_>, user: &str) -> Result<()> {
    for site in ctx.directory.site_memberships(user)? {
        let companion = companion_site(ctx, &site);
        debug!(user, site = %companion, "revoking deleted-items access");
        ctx.repository.remove_member(&companion, user)?;
    }
    ctx.repository
        .remove_role_member(&ctx.settings.deleters_role, user)?;
    Ok(())
}
