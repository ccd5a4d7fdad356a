//! The init process of a container and the protocol the runtime uses to
//! hand it its configuration.
//!
//! The runtime re-executes its own binary as the init process with one end
//! of a socket pair inherited. The descriptor number travels in
//! [`init::INIT_PIPE_ENV`], everything else in a typed
//! [`message::InitHandoff`] record sent over the socket.

use std::fs;
use std::process::{Child, ExitStatus};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use procfs::process::{ProcState, Process};

use crate::error::LibcontainerError;

pub mod init;
pub mod message;
pub mod parent;

/// Start time of a process in clock ticks since boot
pub fn process_start_time(pid: Pid) -> Result<u64, procfs::ProcError> {
    Ok(Process::new(pid.as_raw())?.stat()?.starttime)
}

/// Handle to the init process of a container
#[derive(Debug)]
pub enum InitProcess {
    /// Spawned by this process, it can be waited for
    Owned { child: Child, start_time: u64 },
    /// Reconstructed from the state of a container created elsewhere
    NonChild { pid: Pid, start_time: u64 },
}

impl InitProcess {
    pub fn pid(&self) -> Pid {
        match self {
            InitProcess::Owned { child, .. } => Pid::from_raw(child.id() as i32),
            InitProcess::NonChild { pid, .. } => *pid,
        }
    }

    pub fn start_time(&self) -> u64 {
        match self {
            InitProcess::Owned { start_time, .. } | InitProcess::NonChild { start_time, .. } => {
                *start_time
            }
        }
    }

    /// The pid must exist, must not be a zombie and must still belong to the
    /// process that was started, not to a later process reusing the pid
    pub fn is_alive(&self) -> bool {
        let stat = match Process::new(self.pid().as_raw()).and_then(|p| p.stat()) {
            Ok(stat) => stat,
            Err(_) => return false,
        };

        match stat.state() {
            Ok(ProcState::Zombie | ProcState::Dead) | Err(_) => false,
            Ok(_) => stat.starttime == self.start_time(),
        }
    }

    /// Sends a signal to the process. A process that is already gone is not
    /// an error.
    pub fn signal(&self, sig: Signal) -> Result<(), LibcontainerError> {
        tracing::debug!("kill signal {} to {}", sig, self.pid());
        match signal::kill(self.pid(), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn wait(&mut self) -> Result<ExitStatus, LibcontainerError> {
        match self {
            InitProcess::Owned { child, .. } => Ok(child.wait()?),
            InitProcess::NonChild { pid, .. } => Err(LibcontainerError::NotChild(pid.as_raw())),
        }
    }

    /// Collects the exit status of an owned process that already exited
    pub fn try_reap(&mut self) {
        if let InitProcess::Owned { child, .. } = self {
            let _ = child.try_wait();
        }
    }

    /// Targets of the standard descriptors of the process
    pub fn external_descriptors(&self) -> Vec<String> {
        (0..3)
            .map(|fd| {
                fs::read_link(format!("/proc/{}/fd/{}", self.pid(), fd))
                    .map(|target| target.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use anyhow::Result;

    use super::*;

    #[test]
    fn test_own_process_is_alive() -> Result<()> {
        let pid = Pid::this();
        let process = InitProcess::NonChild {
            pid,
            start_time: process_start_time(pid)?,
        };
        assert!(process.is_alive());
        assert_eq!(process.external_descriptors().len(), 3);

        let reused = InitProcess::NonChild {
            pid,
            start_time: process.start_time() + 1,
        };
        assert!(!reused.is_alive());
        Ok(())
    }

    #[test]
    fn test_exited_child_is_not_alive() -> Result<()> {
        let child = Command::new("true").spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        let start_time = process_start_time(pid)?;
        let mut process = InitProcess::Owned { child, start_time };

        let status = process.wait()?;
        assert!(status.success());
        assert!(!process.is_alive());
        Ok(())
    }

    #[test]
    fn test_wait_requires_child() {
        let mut process = InitProcess::NonChild {
            pid: Pid::from_raw(1),
            start_time: 0,
        };
        assert!(matches!(
            process.wait(),
            Err(LibcontainerError::NotChild(1))
        ));
    }
}
