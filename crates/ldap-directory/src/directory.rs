use crate::connection::{strategy_for, ConnectionStrategy, Connector};
use crate::dn::{
    any_modified_filter, cn_dn, cn_filter, leading_cn, membership_filter, prefix_filter,
    users_filter,
};
use ldap3::{LdapConn, LdapResult, Mod, Scope, SearchEntry};
use ldapsync_core::config::DirectoryConfig;
use ldapsync_core::directory::DirectoryService;
use ldapsync_core::error::{Result, SyncError};
use ldapsync_core::types::{
    AttributeBag, GroupCategory, GroupRef, MemberSet, RecordRef, RunTimestamp,
};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "directory";
const CONTROL_OBJECT_CLASS: &str = "applicationProcess";

// LDAP result codes the adapter tells apart.
const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_ALREADY_EXISTS: u32 = 68;
const RC_BUSY: u32 = 51;
const RC_UNAVAILABLE: u32 = 52;

/// [`DirectoryService`] backed by an LDAP server.
pub struct LdapDirectory {
    config: DirectoryConfig,
    strategy: Box<dyn ConnectionStrategy>,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(config: DirectoryConfig, strategy: Box<dyn ConnectionStrategy>) -> Self {
        let timeout = strategy.connector().timeout();
        Self {
            config,
            strategy,
            timeout,
        }
    }

    /// Build a directory with the connection policy and credentials named in
    /// `config`. Nothing is opened until the first operation.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        let password = config.resolve_bind_password()?;
        let connector = Connector::new(config, password);
        Ok(Self::new(
            config.clone(),
            strategy_for(config.connection, connector),
        ))
    }

    fn group_cn(&self, group: &GroupRef) -> String {
        format!("{}{}", self.config.naming_prefix(group.category), group.name)
    }

    fn control_dn(&self, entry: &str) -> String {
        cn_dn(entry, &self.config.control_base)
    }

    fn user_dn(&self, user: &str) -> String {
        cn_dn(user, &self.config.users_base)
    }

    fn is_role_cn(&self, cn: &str) -> bool {
        cn.eq_ignore_ascii_case(&self.config.admins_group)
            || cn.eq_ignore_ascii_case(&self.config.deleters_group)
    }

    /// Prefix-stripped names of the `entries` belonging to a prefixed
    /// category.
    fn strip_names(&self, prefix: &str, entries: &[SearchEntry]) -> BTreeSet<String> {
        entries
            .iter()
            .flat_map(|e| values(e, "cn"))
            .filter(|cn| !self.is_role_cn(cn))
            .filter_map(|cn| strip_prefix_ci(cn, prefix))
            .map(str::to_string)
            .collect()
    }

    /// Run `op` on a checked-out connection, retiring the connection when
    /// the failure was at the transport level.
    fn with_conn<T>(&mut self, op: impl FnOnce(&mut LdapConn, Duration) -> Result<T>) -> Result<T> {
        let mut conn = self.strategy.checkout()?;
        let result = op(&mut conn, self.timeout);
        let healthy = !matches!(result, Err(SyncError::Connectivity { .. }));
        self.strategy.checkin(conn, healthy);
        result
    }

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<&'static str>,
    ) -> Result<Vec<SearchEntry>> {
        self.with_conn(|conn, timeout| {
            let (entries, result) = search_raw(conn, timeout, base, scope, filter, attrs)?;
            check(result, &format!("search {filter} under {base}"))?;
            Ok(entries)
        })
    }

    fn find_one(
        &mut self,
        base: &str,
        filter: &str,
        attrs: Vec<&'static str>,
    ) -> Result<SearchEntry> {
        let mut entries = self.search(base, Scope::OneLevel, filter, attrs)?;
        match entries.len() {
            1 => Ok(entries.remove(0)),
            0 => Err(SyncError::DataIntegrity(format!(
                "no entry matches {filter} under {base}"
            ))),
            n => Err(SyncError::DataIntegrity(format!(
                "{n} entries match {filter} under {base}"
            ))),
        }
    }

    fn modify(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<()> {
        self.with_conn(|conn, timeout| {
            let result = conn
                .with_timeout(timeout)
                .modify(dn, mods)
                .map_err(|e| transport(&format!("modify {dn}"), e))?;
            check(result, &format!("modify {dn}"))
        })
    }
}

impl DirectoryService for LdapDirectory {
    fn list_records(
        &mut self,
        category: GroupCategory,
        since: Option<&RunTimestamp>,
    ) -> Result<BTreeSet<String>> {
        let prefix = self.config.naming_prefix(category).to_string();
        let base = self.config.groups_base.clone();
        if category.is_role() {
            let entries = self.search(&base, Scope::OneLevel, &cn_filter(&prefix, since), vec!["cn"])?;
            let mut names = BTreeSet::new();
            if !entries.is_empty() {
                names.insert(String::new());
            }
            return Ok(names);
        }
        let entries = self.search(&base, Scope::OneLevel, &prefix_filter(&prefix, since), vec!["cn"])?;
        Ok(self.strip_names(&prefix, &entries))
    }

    fn get_members(&mut self, group: &GroupRef) -> Result<MemberSet> {
        let cn = self.group_cn(group);
        let base = self.config.groups_base.clone();
        let entry = self.find_one(&base, &cn_filter(&cn, None), vec!["member"])?;
        let mut members = MemberSet::new();
        for dn in values(&entry, "member") {
            match leading_cn(dn) {
                Some(user) => {
                    members.insert(user);
                }
                None => warn!(group = %group, member = %dn, "member DN has no cn; ignored"),
            }
        }
        debug!(group = %group, count = members.len(), "read group members");
        Ok(members)
    }

    fn user_attributes(&mut self, since: Option<&RunTimestamp>) -> Result<Vec<AttributeBag>> {
        let base = self.config.users_base.clone();
        let entries = self.search(&base, Scope::OneLevel, &users_filter(since), vec!["*"])?;
        Ok(entries
            .into_iter()
            .map(|e| e.attrs.into_iter().collect::<AttributeBag>())
            .collect())
    }

    fn site_memberships(&mut self, user: &str) -> Result<BTreeSet<String>> {
        let prefix = self.config.prefixes.site.clone();
        let base = self.config.groups_base.clone();
        let filter = membership_filter(&prefix, &self.user_dn(user));
        let entries = self.search(&base, Scope::OneLevel, &filter, vec!["cn"])?;
        Ok(self.strip_names(&prefix, &entries))
    }

    fn mark_modified(&mut self, record: &RecordRef) -> Result<()> {
        let (base, cn) = match record {
            RecordRef::Group(group) => (self.config.groups_base.clone(), self.group_cn(group)),
            RecordRef::User(user) => (self.config.users_base.clone(), user.clone()),
        };
        let entry = self.find_one(&base, &cn_filter(&cn, None), vec!["cn"])?;
        let names: HashSet<String> = values(&entry, "cn").iter().cloned().collect();
        self.modify(&entry.dn, vec![Mod::Replace("cn".to_string(), names)])?;
        debug!(record = %record, dn = %entry.dn, "bumped modification marker");
        Ok(())
    }

    fn update_user_attributes(&mut self, user: &str, attributes: &AttributeBag) -> Result<()> {
        let base = self.config.users_base.clone();
        let object_class = self.config.profile_object_class.clone();
        let entry = self.find_one(&base, &cn_filter(user, None), vec!["objectClass"])?;

        let mut mods = Vec::new();
        let has_class = values(&entry, "objectClass")
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&object_class));
        if !has_class {
            mods.push(Mod::Add(
                "objectClass".to_string(),
                HashSet::from([object_class]),
            ));
        }
        for (name, vals) in attributes.iter() {
            mods.push(Mod::Replace(name.to_string(), vals.iter().cloned().collect()));
        }
        self.modify(&entry.dn, mods)?;
        info!(user, "updated directory profile attributes");
        Ok(())
    }

    fn lock_exists(&mut self) -> Result<bool> {
        let dn = self.control_dn(&self.config.lock_entry);
        self.with_conn(|conn, timeout| {
            let (entries, result) =
                search_raw(conn, timeout, &dn, Scope::Base, "(objectClass=*)", vec!["cn"])?;
            match result.rc {
                RC_NO_SUCH_OBJECT => Ok(false),
                _ => {
                    check(result, &format!("read {dn}"))?;
                    Ok(!entries.is_empty())
                }
            }
        })
    }

    fn acquire_lock(&mut self) -> Result<()> {
        let name = self.config.lock_entry.clone();
        let dn = self.control_dn(&name);
        self.with_conn(|conn, timeout| add_control_entry(conn, timeout, &dn, &name, None))?;
        info!(dn = %dn, "lock acquired");
        Ok(())
    }

    fn release_lock(&mut self) -> Result<()> {
        let dn = self.control_dn(&self.config.lock_entry);
        self.with_conn(|conn, timeout| {
            let result = conn
                .with_timeout(timeout)
                .delete(&dn)
                .map_err(|e| transport(&format!("delete {dn}"), e))?;
            match result.rc {
                RC_NO_SUCH_OBJECT => Ok(()),
                _ => check(result, &format!("delete {dn}")),
            }
        })?;
        info!(dn = %dn, "lock released");
        Ok(())
    }

    fn swap_run_timestamp(&mut self, now: &RunTimestamp) -> Result<Option<RunTimestamp>> {
        let name = self.config.timestamp_entry.clone();
        let dn = self.control_dn(&name);
        self.with_conn(|conn, timeout| {
            let (entries, result) = search_raw(
                conn,
                timeout,
                &dn,
                Scope::Base,
                "(objectClass=*)",
                vec!["modifyTimestamp"],
            )?;
            if result.rc == RC_NO_SUCH_OBJECT {
                add_control_entry(conn, timeout, &dn, &name, Some(now.as_str()))?;
                return Ok(None);
            }
            check(result, &format!("read {dn}"))?;
            let previous = entries
                .first()
                .and_then(|e| values(e, "modifyTimestamp").first())
                .map(|ts| RunTimestamp::new(ts.as_str()));

            let mods = vec![Mod::Replace(
                "description".to_string(),
                HashSet::from([now.as_str().to_string()]),
            )];
            let result = conn
                .with_timeout(timeout)
                .modify(&dn, mods)
                .map_err(|e| transport(&format!("modify {dn}"), e))?;
            check(result, &format!("modify {dn}"))?;
            Ok(previous)
        })
    }

    fn admin_group_modified_since(&mut self, since: &RunTimestamp) -> Result<bool> {
        let base = self.config.groups_base.clone();
        let filter = cn_filter(&self.config.admins_group, Some(since));
        Ok(!self.search(&base, Scope::OneLevel, &filter, vec!["cn"])?.is_empty())
    }

    fn groups_modified_since(&mut self, since: &RunTimestamp) -> Result<bool> {
        let base = self.config.groups_base.clone();
        let filter = any_modified_filter(since);
        Ok(!self.search(&base, Scope::OneLevel, &filter, vec!["1.1"])?.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn search_raw(
    conn: &mut LdapConn,
    timeout: Duration,
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<&'static str>,
) -> Result<(Vec<SearchEntry>, LdapResult)> {
    let result = conn
        .with_timeout(timeout)
        .search(base, scope, filter, attrs)
        .map_err(|e| transport(&format!("search {filter} under {base}"), e))?;
    let entries = result.0.into_iter().map(SearchEntry::construct).collect();
    Ok((entries, result.1))
}

/// Create a control entry. An entry that already exists counts as created.
fn add_control_entry(
    conn: &mut LdapConn,
    timeout: Duration,
    dn: &str,
    name: &str,
    description: Option<&str>,
) -> Result<()> {
    let mut attrs = vec![
        (
            "objectClass".to_string(),
            HashSet::from([CONTROL_OBJECT_CLASS.to_string()]),
        ),
        ("cn".to_string(), HashSet::from([name.to_string()])),
    ];
    if let Some(text) = description {
        attrs.push(("description".to_string(), HashSet::from([text.to_string()])));
    }
    let result = conn
        .with_timeout(timeout)
        .add(dn, attrs)
        .map_err(|e| transport(&format!("add {dn}"), e))?;
    match result.rc {
        RC_ALREADY_EXISTS => {
            debug!(dn, "control entry already exists");
            Ok(())
        }
        _ => check(result, &format!("add {dn}")),
    }
}

fn transport(what: &str, err: ldap3::LdapError) -> SyncError {
    SyncError::connectivity(SERVICE, format!("{what}: {err}"))
}

/// Classify a non-success LDAP result.
fn check(result: LdapResult, what: &str) -> Result<()> {
    match result.rc {
        RC_SUCCESS => Ok(()),
        RC_NO_SUCH_OBJECT => Err(SyncError::DataIntegrity(format!("{what}: no such entry"))),
        RC_BUSY | RC_UNAVAILABLE => Err(SyncError::connectivity(
            SERVICE,
            format!("{what}: server unavailable (code {})", result.rc),
        )),
        rc => Err(SyncError::conflict(
            SERVICE,
            format!("{what} failed with code {rc}: {}", result.text),
        )),
    }
}

/// Values of `name`, matched case-insensitively.
fn values<'e>(entry: &'e SearchEntry, name: &str) -> &'e [String] {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
        .unwrap_or(&[])
}

fn strip_prefix_ci<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
        .filter(|rest| !rest.is_empty())
}
