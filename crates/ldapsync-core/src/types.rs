use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A set of user identifiers. Ordered so logs and journals are deterministic.
pub type MemberSet = BTreeSet<String>;

/// JSON object sent to the repository as a user's profile.
pub type ProfileFields = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// GroupCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCategory {
    Site,
    OpenMarking,
    ClosedMarking,
    OrgMarking,
    AdminRole,
    DeletersRole,
}

impl GroupCategory {
    pub fn all() -> &'static [GroupCategory] {
        &[
            GroupCategory::Site,
            GroupCategory::OpenMarking,
            GroupCategory::ClosedMarking,
            GroupCategory::OrgMarking,
            GroupCategory::AdminRole,
            GroupCategory::DeletersRole,
        ]
    }

    /// Role categories name a single fixed group rather than a family of
    /// prefixed groups.
    pub fn is_role(self) -> bool {
        matches!(self, GroupCategory::AdminRole | GroupCategory::DeletersRole)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupCategory::Site => "site",
            GroupCategory::OpenMarking => "open_marking",
            GroupCategory::ClosedMarking => "closed_marking",
            GroupCategory::OrgMarking => "org_marking",
            GroupCategory::AdminRole => "admin_role",
            GroupCategory::DeletersRole => "deleters_role",
        }
    }
}

impl fmt::Display for GroupCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupCategory {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GroupCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::error::SyncError::DataIntegrity(format!("unknown group category: {s}")))
    }
}

// ---------------------------------------------------------------------------
// MarkingClass
// ---------------------------------------------------------------------------

/// The three security-marking families synchronised into repository
/// constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkingClass {
    Open,
    Closed,
    Org,
}

impl MarkingClass {
    /// Synchronisation order within a run.
    pub fn all() -> &'static [MarkingClass] {
        &[MarkingClass::Open, MarkingClass::Closed, MarkingClass::Org]
    }

    pub fn category(self) -> GroupCategory {
        match self {
            MarkingClass::Open => GroupCategory::OpenMarking,
            MarkingClass::Closed => GroupCategory::ClosedMarking,
            MarkingClass::Org => GroupCategory::OrgMarking,
        }
    }
}

// ---------------------------------------------------------------------------
// GroupRef / RecordRef
// ---------------------------------------------------------------------------

/// A directory group identified by category and the name left after the
/// category's naming prefix is stripped. Role groups have an empty name: the
/// whole common name is the category's configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupRef {
    pub category: GroupCategory,
    pub name: String,
}

impl GroupRef {
    pub fn new(category: GroupCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    pub fn role(category: GroupCategory) -> Self {
        Self {
            category,
            name: String::new(),
        }
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(self.category.as_str())
        } else {
            write!(f, "{}:{}", self.category, self.name)
        }
    }
}

/// Anything whose modification marker can be bumped for retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordRef {
    Group(GroupRef),
    User(String),
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Group(g) => g.fmt(f),
            RecordRef::User(u) => write!(f, "user:{u}"),
        }
    }
}

// ---------------------------------------------------------------------------
// SiteRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteRole {
    Manager,
    Collaborator,
}

impl SiteRole {
    /// Role name understood by the repository.
    pub fn as_str(self) -> &'static str {
        match self {
            SiteRole::Manager => "SiteManager",
            SiteRole::Collaborator => "SiteCollaborator",
        }
    }
}

impl fmt::Display for SiteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunTimestamp
// ---------------------------------------------------------------------------

/// A directory generalized-time value (`yyyyMMddHHmmssZ`). Values of this
/// fixed-width form order lexicographically in time order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTimestamp(String);

impl RunTimestamp {
    pub const FORMAT: &'static str = "%Y%m%d%H%M%SZ";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(Self::FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AttributeBag
// ---------------------------------------------------------------------------

/// Attributes of one directory entry. Names are case-insensitive and stored
/// lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeBag {
    attrs: BTreeMap<String, Vec<String>>,
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of `name`. An empty `values` records an explicit
    /// "no values" entry, which a directory write treats as a clear.
    pub fn insert(&mut self, name: &str, values: Vec<String>) {
        self.attrs.insert(name.to_ascii_lowercase(), values);
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.attrs
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.attrs.remove(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// The entry's user id, taken from its `cn`.
    pub fn username(&self) -> Option<&str> {
        self.first("cn").filter(|s| !s.is_empty())
    }

    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.get(name)
            .map(|vals| vals.iter().any(|v| v.eq_ignore_ascii_case(value)))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, Vec<String>)> for AttributeBag {
    fn from_iter<T: IntoIterator<Item = (S, Vec<String>)>>(iter: T) -> Self {
        let mut bag = AttributeBag::new();
        for (name, values) in iter {
            bag.insert(name.as_ref(), values);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn category_roundtrip_through_str() {
        for c in GroupCategory::all() {
            let parsed: GroupCategory = c.as_str().parse().unwrap();
            assert_eq!(parsed, *c);
        }
        assert!("nope".parse::<GroupCategory>().is_err());
    }

    #[test]
    fn only_role_categories_are_roles() {
        let roles: Vec<_> = GroupCategory::all()
            .iter()
            .filter(|c| c.is_role())
            .collect();
        assert_eq!(
            roles,
            vec![&GroupCategory::AdminRole, &GroupCategory::DeletersRole]
        );
    }

    #[test]
    fn marking_classes_map_to_marking_categories() {
        let cats: Vec<_> = MarkingClass::all().iter().map(|m| m.category()).collect();
        assert_eq!(
            cats,
            vec![
                GroupCategory::OpenMarking,
                GroupCategory::ClosedMarking,
                GroupCategory::OrgMarking
            ]
        );
    }

    #[test]
    fn group_ref_display() {
        assert_eq!(GroupRef::new(GroupCategory::Site, "alpha").to_string(), "site:alpha");
        assert_eq!(GroupRef::role(GroupCategory::AdminRole).to_string(), "admin_role");
        assert_eq!(RecordRef::User("bob".into()).to_string(), "user:bob");
    }

    #[test]
    fn run_timestamp_formats_generalized_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(RunTimestamp::from_datetime(at).as_str(), "20240309070501Z");
    }

    #[test]
    fn run_timestamps_order_by_time() {
        let earlier = RunTimestamp::from_datetime(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
        let later = RunTimestamp::from_datetime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let mut bag = AttributeBag::new();
        bag.push("telephoneNumber", "1");
        bag.push("TELEPHONENUMBER", "2");
        assert_eq!(bag.get("telephonenumber").unwrap(), &["1", "2"]);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn username_comes_from_cn() {
        let bag: AttributeBag = [("cn", vec!["alice".to_string()])].into_iter().collect();
        assert_eq!(bag.username(), Some("alice"));
        assert_eq!(AttributeBag::new().username(), None);
    }

    #[test]
    fn contains_value_ignores_case() {
        let bag: AttributeBag = [("objectClass", vec!["richProfile".to_string()])]
            .into_iter()
            .collect();
        assert!(bag.contains_value("objectclass", "RICHPROFILE"));
        assert!(!bag.contains_value("objectclass", "person"));
    }
}
