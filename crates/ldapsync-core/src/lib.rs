pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod detector;
pub mod differ;
pub mod directory;
pub mod error;
pub mod memory;
pub mod profile;
pub mod repository;
pub mod retry;
pub mod security_model;
pub mod sync;
pub mod types;

pub use error::{Result, SyncError};
