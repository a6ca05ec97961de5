//! Server Process - Terminate
//! =========================
//!
//! One capability, [`TerminateGroup`], with a concrete implementation per
//! platform. Supervisor logic only ever calls the trait; which signals get
//! sent is decided here, at build time.
//!
//! | OS | graceful | forceful |
//! |----|----------|----------|
//! | Unix | `killpg(SIGTERM)` | `killpg(SIGKILL)` |
//! | Windows | `GenerateConsoleCtrlEvent(CTRL_BREAK)` | `TerminateJobObject`, else `TerminateProcess` |
//!
//! A group that no longer exists counts as terminated.

use super::{error::*, spawn::ProcessHandle};

pub trait TerminateGroup: std::fmt::Debug + Send + Sync {
    /// Signals every process in `process`'s group. `forceful` selects the
    /// uncatchable variant.
    fn terminate_group(&self, process: &ProcessHandle, forceful: bool) -> Result<()>;
}

#[cfg(unix)]
pub type PlatformTerminator = PosixProcessGroup;
#[cfg(windows)]
pub type PlatformTerminator = WindowsProcessGroup;

#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixProcessGroup;

#[cfg(unix)]
impl TerminateGroup for PosixProcessGroup {
    fn terminate_group(&self, process: &ProcessHandle, forceful: bool) -> Result<()> {
        use nix::{
            errno::Errno,
            sys::signal::{Signal, killpg},
            unistd::Pid,
        };

        let (signal, action) = if forceful {
            (Signal::SIGKILL, "send SIGKILL to process group")
        } else {
            (Signal::SIGTERM, "send SIGTERM to process group")
        };

        match killpg(Pid::from_raw(process.group_id() as i32), signal) {
            Ok(_) | Err(Errno::ESRCH) => Ok(()), // gone already → success

            Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
                action,
                source: "operation not permitted".into(),
            }),

            Err(e) => Err(ProcessError::CommandFailed {
                action,
                source: e.into(),
            }),
        }
    }
}

#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessGroup;

#[cfg(windows)]
impl TerminateGroup for WindowsProcessGroup {
    fn terminate_group(&self, process: &ProcessHandle, forceful: bool) -> Result<()> {
        if forceful {
            terminate_tree(process)
        } else {
            ctrl_break(process)
        }
    }
}

#[cfg(windows)]
fn ctrl_break(process: &ProcessHandle) -> Result<()> {
    use windows::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

    unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, process.group_id()) }.map_err(|e| {
        ProcessError::CommandFailed {
            action: "send CTRL_BREAK to process group",
            source: Box::new(e),
        }
    })
}

#[cfg(windows)]
fn terminate_tree(process: &ProcessHandle) -> Result<()> {
    use windows::Win32::{
        Foundation::CloseHandle,
        System::{
            JobObjects::TerminateJobObject,
            Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess},
        },
    };

    if let Some(job) = process.job_handle() {
        return unsafe { TerminateJobObject(job, 1) }.map_err(|e| ProcessError::CommandFailed {
            action: "TerminateJobObject",
            source: Box::new(e),
        });
    }

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, process.pid()).map_err(|e| {
            ProcessError::CommandFailed {
                action: "OpenProcess",
                source: Box::new(e),
            }
        })?;

        if handle.is_invalid() {
            // Process already gone
            return Ok(());
        }

        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);

        result.map_err(|e| ProcessError::CommandFailed {
            action: "TerminateProcess",
            source: Box::new(e),
        })
    }
}
