use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot reach {service}: {message}")]
    Connectivity {
        service: &'static str,
        message: String,
    },

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("{service} rejected the write: {message}")]
    Conflict {
        service: &'static str,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "directory contains a lock entry: the previous run did not complete; \
         re-run with --force after investigating"
    )]
    Locked,

    #[error("failed to mark {record} for retry")]
    RetryMarking {
        record: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn connectivity(service: &'static str, message: impl Into<String>) -> Self {
        SyncError::Connectivity {
            service,
            message: message.into(),
        }
    }

    pub fn conflict(service: &'static str, message: impl Into<String>) -> Self {
        SyncError::Conflict {
            service,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Render an error and every `source()` below it as `outer: inner: root`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
