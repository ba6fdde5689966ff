//! Request and response bodies of the repository API.

use serde::{Deserialize, Serialize};

/// One entry of `GET sites/{site}/memberships`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteMembership {
    pub role: String,
    pub authority: Authority,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authority {
    #[serde(default)]
    pub authority_type: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

impl Authority {
    /// The user id, or `None` for group members of a site.
    pub fn user(&self) -> Option<&str> {
        match self.authority_type.as_deref() {
            Some(kind) if !kind.eq_ignore_ascii_case("USER") => None,
            _ => self.user_name.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MembershipRequest<'a> {
    pub role: &'a str,
    pub person: PersonRef<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRef<'a> {
    pub user_name: &'a str,
}

/// Body of `POST rmconstraints/{constraint}/values`.
#[derive(Debug, Serialize)]
pub struct ConstraintValues<'a> {
    pub values: Vec<ConstraintValue<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ConstraintValue<'a> {
    pub value: &'a str,
    pub authorities: Vec<&'a str>,
}

/// Response of `GET groups/{group}/children`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupChildren {
    #[serde(default)]
    pub data: Vec<GroupChild>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChild {
    pub short_name: String,
    #[serde(default)]
    pub authority_type: Option<String>,
}
