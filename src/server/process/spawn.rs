//! Server Process - Spawn
//! =====================
//!
//! Starts the server binary as the leader of its **own** process group so a
//! later signal can reach everything it forks, not just the immediate child.
//!
//! | OS | Containment | Extra state |
//! |----|-------------|-------------|
//! | Linux/BSD/macOS | New process group (`setpgid(0, 0)`) | – |
//! | Windows | `CREATE_NEW_PROCESS_GROUP` + NT Job object (*kill‑on‑close*) | `_job` |

use std::{
    process::{Child, Command, ExitStatus},
    time::Duration,
};

use wait_timeout::ChildExt;

use super::error::*;

/// Owned handle to a spawned server and its group.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    /// Windows‑only: RAII wrapper around the Job object.
    _job: attach::JobGuard,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The child leads its own group, so the group id is its pid.
    pub fn group_id(&self) -> u32 {
        self.child.id()
    }

    /// `Ok(None)` while the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| ProcessError::CommandFailed {
                action: "get exit status",
                source: e.into(),
            })
    }

    /// Waits up to `timeout`; `Ok(None)` if the process is still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        self.child
            .wait_timeout(timeout)
            .map_err(|e| ProcessError::CommandFailed {
                action: "wait for exit",
                source: e.into(),
            })
    }

    /// Kills the direct child only. Last resort when group signalling fails.
    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied {
                action: "force-kill",
                source: e.into(),
            },
            _ => ProcessError::CommandFailed {
                action: "force-kill",
                source: e.into(),
            },
        })
    }

    #[cfg(windows)]
    pub(crate) fn job_handle(&self) -> Option<windows::Win32::Foundation::HANDLE> {
        self._job.handle()
    }
}

/// Spawns `cmd` as the leader of a fresh process group.
pub fn spawn_in_new_group(cmd: Command) -> Result<ProcessHandle> {
    crate::debug!("Spawning in new process group: {:?}", cmd);
    attach::attach(cmd)
}

// Unix ───────────────────────────────────────────────────
#[cfg(unix)]
mod attach {
    use std::os::unix::process::CommandExt;

    use super::*;

    pub type JobGuard = ();

    pub fn attach(mut cmd: Command) -> Result<ProcessHandle> {
        // Child becomes leader of a new process-group (PGID = its PID)
        cmd.process_group(0);
        let child = cmd.spawn().map_err(|e| ProcessError::CommandFailed {
            action: "spawn child process",
            source: e.into(),
        })?;
        Ok(ProcessHandle { child, _job: () })
    }
}

// Windows ────────────────────────────────────────────────
#[cfg(windows)]
mod attach {
    use std::os::windows::{io::AsRawHandle, process::CommandExt};

    use windows::Win32::{
        Foundation::{CloseHandle, HANDLE},
        System::{JobObjects::*, Threading::CREATE_NEW_PROCESS_GROUP},
    };

    use super::*;

    /// Raw job handle kept as an integer so the guard stays `Send + Sync`.
    #[derive(Debug)]
    pub struct JobGuard(Option<isize>);

    impl JobGuard {
        pub fn handle(&self) -> Option<HANDLE> {
            self.0.map(|raw| HANDLE(raw as *mut core::ffi::c_void))
        }
    }

    impl Drop for JobGuard {
        fn drop(&mut self) {
            if let Some(h) = self.handle() {
                self.0 = None;
                unsafe {
                    if CloseHandle(h).is_err() {
                        let err = std::io::Error::last_os_error();
                        crate::error!("Failed to close Job handle {h:?}: {err}");
                    }
                }
            }
        }
    }

    fn create_job() -> Result<JobGuard> {
        let hjob = unsafe {
            CreateJobObjectW(None, None).map_err(|e| ProcessError::CommandFailed {
                action: "CreateJobObjectW",
                source: Box::new(e),
            })?
        };
        let guard = JobGuard(Some(hjob.0 as isize));

        // Closing the last handle takes the whole tree down with it.
        let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        unsafe {
            SetInformationJobObject(
                hjob,
                JobObjectExtendedLimitInformation,
                &info as *const _ as _,
                std::mem::size_of_val(&info) as _,
            )
            .map_err(|e| ProcessError::CommandFailed {
                action: "SetInformationJobObject",
                source: Box::new(e),
            })?;
        }
        Ok(guard)
    }

    pub fn attach(mut cmd: Command) -> Result<ProcessHandle> {
        let job = create_job()?;

        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP.0);
        let child = cmd.spawn().map_err(|e| ProcessError::CommandFailed {
            action: "spawn",
            source: Box::new(e),
        })?;

        let hjob = job.handle().unwrap_or_default();
        let assigned = unsafe { AssignProcessToJobObject(hjob, HANDLE(child.as_raw_handle())) };

        // A parent already inside a restrictive job cannot nest ours; the
        // process group alone still lets us signal the tree.
        let job = match assigned {
            Ok(()) => job,
            Err(e) => {
                crate::warn!("AssignProcessToJobObject failed, continuing without job: {e}");
                drop(job);
                JobGuard(None)
            }
        };

        Ok(ProcessHandle { child, _job: job })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::server::process::tests_helpers::*;

    #[test]
    #[serial]
    fn child_leads_its_own_group() {
        let mut handle = spawn_in_new_group(long_cmd()).unwrap();
        let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(handle.pid() as i32)))
            .unwrap();
        assert_eq!(pgid.as_raw() as u32, handle.group_id());
        assert_ne!(pgid, nix::unistd::getpgrp(), "must not share our group");
        handle.kill().unwrap();
        let _ = handle.wait_timeout(Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn missing_binary_is_command_failed() {
        let err = spawn_in_new_group(Command::new("definitely-does-not-exist-xyz")).unwrap_err();
        assert!(matches!(err, ProcessError::CommandFailed { .. }));
    }

    #[test]
    #[serial]
    fn try_wait_reports_exit() {
        let mut handle = spawn_in_new_group(Command::new("true")).unwrap();
        let status = handle.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(status.is_some_and(|s| s.success()));
        assert!(handle.try_wait().unwrap().is_some());
    }
}
