use ldap3::{LdapConn, LdapConnSettings};
use ldapsync_core::config::{ConnectionPolicy, DirectoryConfig};
use ldapsync_core::error::{Result, SyncError};
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "directory";

/// Everything needed to open and bind a connection.
#[derive(Debug, Clone)]
pub struct Connector {
    url: String,
    bind_dn: String,
    password: String,
    timeout: Duration,
}

impl Connector {
    pub fn new(config: &DirectoryConfig, password: String) -> Self {
        Self {
            url: config.url.clone(),
            bind_dn: config.bind_dn.clone(),
            password,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connect(&self) -> Result<LdapConn> {
        debug!(url = %self.url, "connecting to directory");
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let mut conn = LdapConn::with_settings(settings, &self.url).map_err(|e| {
            SyncError::connectivity(SERVICE, format!("failed to connect to {}: {e}", self.url))
        })?;

        let result = conn
            .simple_bind(&self.bind_dn, &self.password)
            .map_err(|e| SyncError::connectivity(SERVICE, format!("bind failed: {e}")))?;
        match result.rc {
            0 => {}
            49 => {
                return Err(SyncError::connectivity(
                    SERVICE,
                    format!("invalid credentials for {}", self.bind_dn),
                ))
            }
            rc => {
                return Err(SyncError::connectivity(
                    SERVICE,
                    format!("bind failed with code {rc}: {}", result.text),
                ))
            }
        }
        info!(url = %self.url, "directory connection established");
        Ok(conn)
    }
}

/// How connections are reused across directory operations.
pub trait ConnectionStrategy {
    fn checkout(&mut self) -> Result<LdapConn>;

    /// Return a connection after use. `healthy` is false when the operation
    /// failed at the transport level.
    fn checkin(&mut self, conn: LdapConn, healthy: bool);

    fn connector(&self) -> &Connector;
}

/// One bound connection for the life of the process, replaced after a
/// transport failure.
pub struct Persistent {
    connector: Connector,
    cached: Option<LdapConn>,
}

impl Persistent {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            cached: None,
        }
    }
}

impl ConnectionStrategy for Persistent {
    fn checkout(&mut self) -> Result<LdapConn> {
        match self.cached.take() {
            Some(conn) => Ok(conn),
            None => self.connector.connect(),
        }
    }

    fn checkin(&mut self, mut conn: LdapConn, healthy: bool) {
        if healthy {
            self.cached = Some(conn);
        } else {
            warn!("dropping directory connection after failure");
            let _ = conn.unbind();
        }
    }

    fn connector(&self) -> &Connector {
        &self.connector
    }
}

/// A fresh bind for every operation.
pub struct PerOperation {
    connector: Connector,
}

impl PerOperation {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }
}

impl ConnectionStrategy for PerOperation {
    fn checkout(&mut self) -> Result<LdapConn> {
        self.connector.connect()
    }

    fn checkin(&mut self, mut conn: LdapConn, _healthy: bool) {
        if let Err(e) = conn.unbind() {
            debug!(error = %e, "unbind failed");
        }
    }

    fn connector(&self) -> &Connector {
        &self.connector
    }
}

pub fn strategy_for(policy: ConnectionPolicy, connector: Connector) -> Box<dyn ConnectionStrategy> {
    match policy {
        ConnectionPolicy::Persistent => Box::new(Persistent::new(connector)),
        ConnectionPolicy::PerOperation => Box::new(PerOperation::new(connector)),
    }
}
