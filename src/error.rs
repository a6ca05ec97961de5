// top-level error for the public API

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] crate::client::error::ClientError),

    #[error(transparent)]
    Process(#[from] crate::server::process::error::ProcessError),

    /// The server answered, but not with anything we know how to read.
    #[error("{reason}: {preview}")]
    Protocol {
        reason: &'static str,
        /// First [`PREVIEW_CHARS`] characters of the raw body.
        preview: String,
    },

    #[error("invalid {field}: {reason}")]
    Config { field: &'static str, reason: String },

    #[error("cannot convert `{key}` ({found}) to {expected}")]
    TypeConversion {
        key: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("{operation} failed for '{path}'")]
    FileSystem {
        operation: &'static str,
        path: std::path::PathBuf,
        #[source]
        #[serde(serialize_with = "std_io_error_to_string")]
        source: std::io::Error,
    },
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// How much of an unreadable body ends up in [`BackendError::Protocol`].
pub const PREVIEW_CHARS: usize = 400;

impl BackendError {
    pub fn file_system(
        operation: &'static str,
        path: impl Into<std::path::PathBuf>,
        err: impl Into<std::io::Error>,
    ) -> Self {
        Self::FileSystem {
            operation,
            path: path.into(),
            source: err.into(),
        }
    }

    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn unrecognized_response(body: &[u8]) -> Self {
        Self::Protocol {
            reason: "unrecognized response shape",
            preview: String::from_utf8_lossy(body)
                .chars()
                .take(PREVIEW_CHARS)
                .collect(),
        }
    }
}

pub(crate) fn std_io_error_to_string<S>(e: &impl std::fmt::Display, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&e.to_string())
}
