use crate::wire::{
    ConstraintValue, ConstraintValues, GroupChildren, MembershipRequest, PersonRef, SiteMembership,
};
use ldapsync_core::config::RepositoryConfig;
use ldapsync_core::error::{Result, SyncError};
use ldapsync_core::repository::RepositoryService;
use ldapsync_core::types::{MemberSet, ProfileFields, SiteRole};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "repository";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// [`RepositoryService`] over the repository's HTTP API, authenticating with
/// basic auth on every request.
pub struct AlfrescoClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
}

impl AlfrescoClient {
    pub fn new(base_url: &str, username: &str, password: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            SyncError::Configuration(format!("repository.url '{base_url}' is invalid: {e}"))
        })?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Configuration(format!(
                "repository.url '{base_url}' cannot be used as a base URL"
            )));
        }
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::connectivity(SERVICE, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let password = config.resolve_password()?;
        Self::new(
            &config.url,
            &config.username,
            &password,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// `{base}/service/api/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["service", "api"]).extend(segments);
        }
        url
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    /// Send a request and map failures: transport errors and 5xx are
    /// connectivity problems, any other non-success status is a rejected
    /// write. With `allow_missing`, a 404 is returned as `None`.
    fn send(&self, builder: RequestBuilder, what: &str, allow_missing: bool) -> Result<Option<Response>> {
        let response = self
            .request(builder)
            .send()
            .map_err(|e| SyncError::connectivity(SERVICE, format!("{what}: {e}")))?;
        let status = response.status();
        debug!(%status, what, "repository response");
        if status.is_success() {
            return Ok(Some(response));
        }
        if allow_missing && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().unwrap_or_default();
        if status.is_server_error() {
            return Err(SyncError::connectivity(
                SERVICE,
                format!("{what}: HTTP {status}: {body}"),
            ));
        }
        Err(SyncError::conflict(SERVICE, format!("{what}: HTTP {status}: {body}")))
    }

    fn send_ok(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        self.send(builder, what, false)?
            .ok_or_else(|| SyncError::conflict(SERVICE, format!("{what}: not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        let response = self.send_ok(self.http.get(url), what)?;
        let text = response
            .text()
            .map_err(|e| SyncError::connectivity(SERVICE, format!("{what}: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| SyncError::DataIntegrity(format!("{what}: unexpected response body: {e}")))
    }
}

/// Group API paths take the short name, without the `GROUP_` authority
/// prefix.
fn group_short_name(role: &str) -> &str {
    role.strip_prefix("GROUP_").unwrap_or(role)
}

impl RepositoryService for AlfrescoClient {
    fn list_group_members(&mut self, site: &str) -> Result<MemberSet> {
        let url = self.endpoint(&["sites", site, "memberships"]);
        let memberships: Vec<SiteMembership> =
            self.get_json(url, &format!("list members of site {site}"))?;
        Ok(memberships
            .iter()
            .filter_map(|m| m.authority.user())
            .map(str::to_string)
            .collect())
    }

    fn add_member(&mut self, site: &str, user: &str, role: SiteRole) -> Result<()> {
        let url = self.endpoint(&["sites", site, "memberships"]);
        let body = MembershipRequest {
            role: role.as_str(),
            person: PersonRef { user_name: user },
        };
        self.send_ok(self.http.put(url).json(&body), &format!("add {user} to site {site}"))?;
        debug!(site, user, %role, "site member added");
        Ok(())
    }

    fn remove_member(&mut self, site: &str, user: &str) -> Result<()> {
        let url = self.endpoint(&["sites", site, "memberships", user]);
        self.send(self.http.delete(url), &format!("remove {user} from site {site}"), true)?;
        Ok(())
    }

    fn set_marking_group(&mut self, marking: &str, group: &str, members: &MemberSet) -> Result<()> {
        let url = self.endpoint(&["rma", "admin", "rmconstraints", marking, "values"]);
        let body = ConstraintValues {
            values: vec![ConstraintValue {
                value: group,
                authorities: members.iter().map(String::as_str).collect(),
            }],
        };
        self.send_ok(
            self.http.post(url).json(&body),
            &format!("set {group} in constraint {marking}"),
        )?;
        Ok(())
    }

    fn list_role_members(&mut self, role: &str) -> Result<MemberSet> {
        let mut url = self.endpoint(&["groups", group_short_name(role), "children"]);
        url.query_pairs_mut().append_pair("authorityType", "USER");
        let children: GroupChildren = self.get_json(url, &format!("list members of {role}"))?;
        Ok(children
            .data
            .into_iter()
            .filter(|c| {
                c.authority_type
                    .as_deref()
                    .map_or(true, |t| t.eq_ignore_ascii_case("USER"))
            })
            .map(|c| c.short_name)
            .collect())
    }

    fn add_role_member(&mut self, role: &str, user: &str) -> Result<()> {
        let url = self.endpoint(&["groups", group_short_name(role), "children", user]);
        self.send_ok(self.http.post(url), &format!("add {user} to {role}"))?;
        Ok(())
    }

    fn remove_role_member(&mut self, role: &str, user: &str) -> Result<()> {
        let url = self.endpoint(&["groups", group_short_name(role), "children", user]);
        self.send(self.http.delete(url), &format!("remove {user} from {role}"), true)?;
        Ok(())
    }

    fn update_user_profile(&mut self, user: &str, fields: &ProfileFields) -> Result<()> {
        let url = self.endpoint(&["people", user]);
        self.send_ok(self.http.put(url).json(fields), &format!("update profile of {user}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server) -> AlfrescoClient {
        AlfrescoClient::new(
            &format!("{}/alfresco", server.url()),
            "sync",
            "hunter2",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn set(items: &[&str]) -> MemberSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lists_site_user_members_with_basic_auth() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/alfresco/service/api/sites/alpha/memberships")
            .match_header("authorization", "Basic c3luYzpodW50ZXIy")
            .with_status(200)
            .with_body(
                json!([
                    {"role": "SiteManager", "authority": {"authorityType": "USER", "userName": "alice"}},
                    {"role": "SiteCollaborator", "authority": {"userName": "bob"}},
                    {"role": "SiteConsumer", "authority": {"authorityType": "GROUP", "fullName": "GROUP_x"}}
                ])
                .to_string(),
            )
            .create();

        let members = client(&server).list_group_members("alpha").unwrap();
        assert_eq!(members, set(&["alice", "bob"]));
        mock.assert();
    }

    #[test]
    fn add_member_puts_role() {
        let mut server = Server::new();
        let mock = server
            .mock("PUT", "/alfresco/service/api/sites/alpha/memberships")
            .match_body(Matcher::Json(
                json!({"role": "SiteManager", "person": {"userName": "alice"}}),
            ))
            .with_status(200)
            .create();

        client(&server)
            .add_member("alpha", "alice", SiteRole::Manager)
            .unwrap();
        mock.assert();
    }

    #[test]
    fn removing_absent_member_succeeds() {
        let mut server = Server::new();
        let mock = server
            .mock("DELETE", "/alfresco/service/api/sites/alpha/memberships/ghost")
            .with_status(404)
            .create();

        client(&server).remove_member("alpha", "ghost").unwrap();
        mock.assert();
    }

    #[test]
    fn marking_group_posts_full_member_list() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/alfresco/service/api/rma/admin/rmconstraints/closedMarkings/values")
            .match_body(Matcher::Json(json!({
                "values": [{"value": "secret", "authorities": ["alice", "bob"]}]
            })))
            .with_status(200)
            .create();

        client(&server)
            .set_marking_group("closedMarkings", "secret", &set(&["bob", "alice"]))
            .unwrap();
        mock.assert();
    }

    #[test]
    fn role_members_use_group_short_name() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/alfresco/service/api/groups/DELETERS/children")
            .match_query(Matcher::UrlEncoded("authorityType".into(), "USER".into()))
            .with_status(200)
            .with_body(
                json!({"data": [
                    {"shortName": "alice", "authorityType": "USER"},
                    {"shortName": "SUBGROUP", "authorityType": "GROUP"}
                ]})
                .to_string(),
            )
            .create();

        let members = client(&server).list_role_members("GROUP_DELETERS").unwrap();
        assert_eq!(members, set(&["alice"]));
        mock.assert();
    }

    #[test]
    fn path_segments_are_encoded() {
        let mut server = Server::new();
        let mock = server
            .mock("PUT", "/alfresco/service/api/people/jo%20smith")
            .match_body(Matcher::Json(json!({"biography": "hi"})))
            .with_status(200)
            .create();

        let fields = json!({"biography": "hi"}).as_object().cloned().unwrap();
        client(&server).update_user_profile("jo smith", &fields).unwrap();
        mock.assert();
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let mut server = Server::new();
        let _busy = server
            .mock("POST", "/alfresco/service/api/groups/DELETERS/children/busy")
            .with_status(503)
            .create();
        let _dup = server
            .mock("POST", "/alfresco/service/api/groups/DELETERS/children/dup")
            .with_status(409)
            .with_body("already a member")
            .create();
        let _bad = server
            .mock("POST", "/alfresco/service/api/groups/DELETERS/children/bad")
            .with_status(400)
            .with_body("no such user")
            .create();

        let mut client = client(&server);
        assert!(matches!(
            client.add_role_member("GROUP_DELETERS", "busy"),
            Err(SyncError::Connectivity { .. })
        ));
        assert!(matches!(
            client.add_role_member("GROUP_DELETERS", "dup"),
            Err(SyncError::Conflict { .. })
        ));
        let err = client.add_role_member("GROUP_DELETERS", "bad").unwrap_err();
        assert!(err.to_string().contains("no such user"));
    }

    #[test]
    fn malformed_body_is_a_data_integrity_error() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/alfresco/service/api/sites/alpha/memberships")
            .with_status(200)
            .with_body("<html>login</html>")
            .create();

        let err = client(&server).list_group_members("alpha").unwrap_err();
        assert!(matches!(err, SyncError::DataIntegrity(_)));
    }

    #[test]
    fn unreachable_server_is_a_connectivity_error() {
        let mut client =
            AlfrescoClient::new("http://127.0.0.1:1/alfresco", "u", "p", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.list_group_members("alpha"),
            Err(SyncError::Connectivity { .. })
        ));
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        assert!(matches!(
            AlfrescoClient::new("not a url", "u", "p", Duration::from_secs(1)),
            Err(SyncError::Configuration(_))
        ));
    }
}
