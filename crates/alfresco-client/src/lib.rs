//! Blocking HTTP client for the repository's web-script API.

pub mod client;
pub mod wire;

pub use client::AlfrescoClient;
