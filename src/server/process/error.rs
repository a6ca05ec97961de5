#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum ProcessError {
    /// OS rejected a spawn, signal, wait or similar operation.
    #[error("failed to {action} process: {source}")]
    CommandFailed {
        action: &'static str,
        #[source]
        #[serde(serialize_with = "crate::error::std_io_error_to_string")]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// We tried an operation the current user is not allowed to perform.
    #[error("insufficient privilege to {action}: {source}")]
    PermissionDenied {
        action: &'static str,
        #[source]
        #[serde(serialize_with = "crate::error::std_io_error_to_string")]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The process outlived every termination step.
    #[error("{operation} exceeded {elapsed:?}; PID {pid} still running")]
    TerminationTimeout {
        operation: &'static str,
        elapsed: std::time::Duration,
        pid: u32,
    },
}

pub type Result<T> = std::result::Result<T, ProcessError>;
