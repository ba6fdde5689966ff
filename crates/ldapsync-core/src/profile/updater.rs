use super::ProfileSchema;
use crate::context::SyncContext;
use crate::detector::{select_users, Selection};
use crate::directory::DirectoryService;
use crate::error::{Result, SyncError};
use crate::types::{ProfileFields, RecordRef};
use tracing::{debug, info, warn};

/// Moves profile fields between the directory and the repository.
pub struct ProfileUpdater {
    schema: ProfileSchema,
}

impl ProfileUpdater {
    pub fn new(schema: ProfileSchema) -> Self {
        Self { schema }
    }

    /// Send the encoded profile of every selected user to the repository.
    /// A failed update marks the user for retry.
    pub fn sync_to_repository(&self, ctx: &mut SyncContext<'_>, selection: Selection<'_>) -> Result<()> {
        if self.schema.is_empty() {
            debug!("no profile fields configured; skipping profile sync");
            return Ok(());
        }
        let users = select_users(&mut *ctx.directory, selection)?;
        for attrs in &users {
            let Some(user) = attrs.username() else {
                warn!("skipping directory user entry without a cn");
                continue;
            };
            let fields = self.schema.encode(attrs);
            match ctx.repository.update_user_profile(user, &fields) {
                Ok(()) => {
                    debug!(user, "profile updated");
                    ctx.report.profiles_updated += 1;
                }
                Err(e) => ctx.recover(&RecordRef::User(user.to_string()), &e)?,
            }
        }
        Ok(())
    }

    /// Decode a repository profile and write it to the user's directory
    /// entry.
    pub fn push_to_directory(
        &self,
        directory: &mut dyn DirectoryService,
        user: &str,
        fields: &ProfileFields,
    ) -> Result<()> {
        if user.trim().is_empty() {
            return Err(SyncError::DataIntegrity("user name must not be empty".to_string()));
        }
        let attributes = self.schema.decode(fields);
        if attributes.is_empty() {
            warn!(user, "profile contained no convertible fields; nothing to write");
            return Ok(());
        }
        directory.update_user_attributes(user, &attributes)?;
        info!(user, attributes = attributes.len(), "pushed profile to directory");
        Ok(())
    }
}
