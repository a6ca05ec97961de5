pub mod error;
pub mod spawn;
pub mod terminate;

pub use error::*;
pub use spawn::*;
pub use terminate::*;

/// How long a gracefully signalled server gets before it is force-killed.
pub const DEFAULT_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);
/// How long to wait for the exit status after a force-kill.
pub const FORCE_KILL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
