use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("could not bind listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(std::net::SocketAddr),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session cancelled")]
    Cancelled,

    #[error("Error: could not get $HOME value")]
    NoHomeDir,

    #[error("Could not serialize config")]
    ConfigSerializationFail(#[from] toml::ser::Error),

    #[error("Could not parse config file")]
    ConfigParseError(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Coarse classification of a failure, as reported in `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Bind,
    Connect,
    Transport,
    SizeMismatch,
    Protocol,
    Cancelled,
    Config,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Bind { .. } => ErrorKind::Bind,
            SyncError::Connect { .. } | SyncError::ConnectTimeout(_) => ErrorKind::Connect,
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::NoHomeDir
            | SyncError::ConfigSerializationFail(_)
            | SyncError::ConfigParseError(_)
            | SyncError::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        SyncError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transport_failures() {
        let err: SyncError = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn size_mismatch_reports_both_lengths() {
        let err = SyncError::SizeMismatch {
            name: "a.jpg".into(),
            expected: 100,
            actual: 40,
        };
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(
            err.to_string(),
            "size mismatch for a.jpg: expected 100 bytes, got 40"
        );
    }
}
