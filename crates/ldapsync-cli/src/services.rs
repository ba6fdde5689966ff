use alfresco_client::AlfrescoClient;
use anyhow::Context;
use ldap_directory::LdapDirectory;
use ldapsync_core::config::Config;
use std::path::Path;

/// Load the config, refusing one with validation errors.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_validated(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

pub fn directory(config: &Config) -> anyhow::Result<LdapDirectory> {
    LdapDirectory::from_config(&config.directory).context("failed to set up directory connection")
}

pub fn repository(config: &Config) -> anyhow::Result<AlfrescoClient> {
    AlfrescoClient::from_config(&config.repository).context("failed to set up repository client")
}
