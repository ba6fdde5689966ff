//! LDAP-backed directory for ldapsync.
//!
//! Groups live one level below `groups_base` and are found by common-name
//! prefix; members are user DNs whose leading RDN is `cn=<user>`. The lock and
//! run-timestamp entries are `applicationProcess` entries under
//! `control_base`.

pub mod connection;
pub mod directory;
pub mod dn;

pub use connection::{strategy_for, ConnectionStrategy, Connector, PerOperation, Persistent};
pub use directory::LdapDirectory;
