use crate::error::{Result, SyncError};
use crate::types::{GroupCategory, MarkingClass, MemberSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const CONFIG_FILE: &str = "ldapsync.yaml";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ldapsync/ldapsync.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DirectoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// One bound connection reused for the whole process. Suits batch runs.
    #[default]
    Persistent,
    /// A fresh bind for every operation. Suits long-lived processes.
    PerOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPrefixes {
    pub site: String,
    pub open: String,
    pub closed: String,
    pub org: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// e.g. `ldap://ldap.example.com:389`
    pub url: String,
    pub bind_dn: String,
    #[serde(default, skip_serializing)]
    pub bind_password: Option<String>,
    /// Name of an environment variable holding the bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password_env: Option<String>,
    pub groups_base: String,
    pub users_base: String,
    /// Parent of the lock and timestamp entries.
    pub control_base: String,
    pub prefixes: GroupPrefixes,
    pub admins_group: String,
    pub deleters_group: String,
    #[serde(default = "default_lock_entry")]
    pub lock_entry: String,
    #[serde(default = "default_timestamp_entry")]
    pub timestamp_entry: String,
    #[serde(default = "default_profile_object_class")]
    pub profile_object_class: String,
    #[serde(default)]
    pub connection: ConnectionPolicy,
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

fn default_lock_entry() -> String {
    "ldapsync-lock".to_string()
}

fn default_timestamp_entry() -> String {
    "ldapsync-timestamp".to_string()
}

fn default_profile_object_class() -> String {
    "richProfile".to_string()
}

fn default_directory_timeout() -> u64 {
    30
}

impl DirectoryConfig {
    /// The common-name prefix that locates groups of `category`. For role
    /// categories this is the whole common name.
    pub fn naming_prefix(&self, category: GroupCategory) -> &str {
        match category {
            GroupCategory::Site => &self.prefixes.site,
            GroupCategory::OpenMarking => &self.prefixes.open,
            GroupCategory::ClosedMarking => &self.prefixes.closed,
            GroupCategory::OrgMarking => &self.prefixes.org,
            GroupCategory::AdminRole => &self.admins_group,
            GroupCategory::DeletersRole => &self.deleters_group,
        }
    }

    pub fn resolve_bind_password(&self) -> Result<String> {
        resolve_secret(
            self.bind_password.as_deref(),
            self.bind_password_env.as_deref(),
            "directory.bind_password",
        )
    }
}

// ---------------------------------------------------------------------------
// RepositoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkingConstraints {
    pub open: String,
    pub closed: String,
    pub org: String,
}

impl MarkingConstraints {
    pub fn constraint_for(&self, class: MarkingClass) -> &str {
        match class {
            MarkingClass::Open => &self.open,
            MarkingClass::Closed => &self.closed,
            MarkingClass::Org => &self.org,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// e.g. `https://repo.example.com/alfresco`
    pub url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    pub deleters_role: String,
    #[serde(default = "default_deleted_items_suffix")]
    pub deleted_items_suffix: String,
    pub markings: MarkingConstraints,
    #[serde(default = "default_repository_timeout")]
    pub timeout_secs: u64,
}

fn default_deleted_items_suffix() -> String {
    "-deleted".to_string()
}

fn default_repository_timeout() -> u64 {
    60
}

impl RepositoryConfig {
    pub fn resolve_password(&self) -> Result<String> {
        resolve_secret(
            self.password.as_deref(),
            self.password_env.as_deref(),
            "repository.password",
        )
    }
}

// ---------------------------------------------------------------------------
// SyncConfig / ProfileConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Users added to every site and marking group.
    #[serde(default)]
    pub extra_users: Vec<String>,
    /// Let the security-model tracker report "not modified" when no group
    /// changed since it was last refreshed.
    #[serde(default = "default_true")]
    pub security_model_not_modified: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            extra_users: Vec::new(),
            security_model_not_modified: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Telephone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFieldConfig {
    pub kind: FieldKind,
    /// Directory attribute name.
    pub attribute: String,
    /// Repository profile field name.
    pub field: String,
    #[serde(default)]
    pub multiple: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub fields: Vec<ProfileFieldConfig>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub directory: DirectoryConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        serde_yaml::from_str(data)
            .map_err(|e| SyncError::Configuration(format!("invalid config: {e}")))
    }

    /// Load and reject configs with error-level warnings.
    pub fn load_validated(path: &Path) -> Result<Self> {
        let cfg = Self::load(path)?;
        let errors: Vec<String> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(SyncError::Configuration(errors.join("; ")));
        }
        Ok(cfg)
    }

    pub fn extra_users(&self) -> MemberSet {
        self.sync
            .extra_users
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        let dir = &self.directory;
        if !(dir.url.starts_with("ldap://") || dir.url.starts_with("ldaps://")) {
            error(format!(
                "directory.url '{}' must start with ldap:// or ldaps://",
                dir.url
            ));
        }
        for (key, value) in [
            ("directory.groups_base", &dir.groups_base),
            ("directory.users_base", &dir.users_base),
            ("directory.control_base", &dir.control_base),
            ("directory.admins_group", &dir.admins_group),
            ("directory.deleters_group", &dir.deleters_group),
            ("directory.lock_entry", &dir.lock_entry),
            ("directory.timestamp_entry", &dir.timestamp_entry),
            ("repository.deleters_role", &self.repository.deleters_role),
        ] {
            if value.trim().is_empty() {
                error(format!("{key} must not be empty"));
            }
        }
        if dir.lock_entry == dir.timestamp_entry {
            error("directory.lock_entry and directory.timestamp_entry must differ".to_string());
        }

        // Two categories sharing a prefix would mix their groups.
        let prefixes = [
            ("site", &dir.prefixes.site),
            ("open", &dir.prefixes.open),
            ("closed", &dir.prefixes.closed),
            ("org", &dir.prefixes.org),
        ];
        for (name, prefix) in prefixes {
            if prefix.trim().is_empty() {
                error(format!("directory.prefixes.{name} must not be empty"));
            }
        }
        for (i, (a, pa)) in prefixes.iter().enumerate() {
            for (b, pb) in prefixes.iter().skip(i + 1) {
                if !pa.is_empty() && !pb.is_empty() && (pa.starts_with(pb.as_str()) || pb.starts_with(pa.as_str())) {
                    error(format!(
                        "directory.prefixes.{a} and directory.prefixes.{b} overlap ('{pa}' / '{pb}')"
                    ));
                }
            }
        }

        let repo_url = &self.repository.url;
        if !(repo_url.starts_with("http://") || repo_url.starts_with("https://")) {
            error(format!(
                "repository.url '{repo_url}' must start with http:// or https://"
            ));
        }

        if dir.bind_password.is_none() && dir.bind_password_env.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "directory has no bind_password or bind_password_env; binding with an empty password".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.profile.fields {
            if field.attribute.trim().is_empty() || field.field.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "profile field entries need both attribute and field".to_string(),
                });
            }
            if !seen.insert(field.field.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "profile field '{}' is configured more than once; the last one wins",
                        field.field
                    ),
                });
            }
        }

        warnings
    }
}

fn resolve_secret(inline: Option<&str>, env: Option<&str>, key: &str) -> Result<String> {
    if let Some(var) = env {
        return std::env::var(var).map_err(|_| {
            SyncError::Configuration(format!("{key}: environment variable {var} is not set"))
        });
    }
    Ok(inline.unwrap_or_default().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
