use std::{io, time::Duration};

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    #[serde(serialize_with = "crate::error::std_io_error_to_string")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("serialization error: {0}")]
    #[serde(serialize_with = "crate::error::std_io_error_to_string")]
    Serde(#[from] serde_json::Error),

    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },

    #[error("client setup error: {reason}")]
    Setup { reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Maps a *ureq* failure onto the transport taxonomy. `timeout` is the
    /// budget that was configured for the call, reported back on expiry.
    pub(crate) fn from_ureq(err: ureq::Error, timeout: Duration) -> Self {
        match err {
            ureq::Error::StatusCode(code) => ClientError::Remote {
                code,
                message: format!("HTTP {code}"),
            },

            ureq::Error::Timeout(_) => ClientError::Timeout(timeout),

            ureq::Error::Io(e) => Self::from_io(e, timeout),

            ureq::Error::Protocol(p) => ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("protocol error: {p}"),
            )),

            ureq::Error::BadUri(u) => ClientError::Setup {
                reason: format!("bad URI: {u}"),
            },

            other => ClientError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("ureq error: {other}"),
            )),
        }
    }

    /// Body reads surface deadline expiry as `TimedOut` I/O errors.
    pub(crate) fn from_io(err: io::Error, timeout: Duration) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ClientError::Timeout(timeout),
            _ => ClientError::Io(err),
        }
    }
}
