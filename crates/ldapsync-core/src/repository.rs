//! The follower side of a reconciliation.

use crate::error::Result;
use crate::types::{MemberSet, ProfileFields, SiteRole};

/// Mutations and reads the engine performs against the repository.
///
/// Removals are idempotent: removing someone who is not a member succeeds.
pub trait RepositoryService {
    fn list_group_members(&mut self, site: &str) -> Result<MemberSet>;

    /// Add `user` to `site` with `role`, or re-assert the role when the user
    /// is already a member.
    fn add_member(&mut self, site: &str, user: &str, role: SiteRole) -> Result<()>;

    fn remove_member(&mut self, site: &str, user: &str) -> Result<()>;

    /// Replace the full member list of `group` within the marking constraint
    /// `marking`.
    fn set_marking_group(&mut self, marking: &str, group: &str, members: &MemberSet) -> Result<()>;

    fn list_role_members(&mut self, role: &str) -> Result<MemberSet>;

    fn add_role_member(&mut self, role: &str, user: &str) -> Result<()>;

    fn remove_role_member(&mut self, role: &str, user: &str) -> Result<()>;

    fn update_user_profile(&mut self, user: &str, fields: &ProfileFields) -> Result<()>;
}
