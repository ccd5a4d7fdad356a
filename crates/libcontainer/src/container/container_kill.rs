use libcgroups::common::{AnyCgroupManager, CgroupManager, FreezerState};
use nix::errno::Errno;
use nix::sys::signal::{self as nix_signal, Signal as NixSignal};

use super::{Container, Status};
use crate::error::LibcontainerError;
use crate::signal::Signal;

impl Container {
    /// Sends the signal to the init process, or with `all` to every process
    /// in the cgroup of the container
    pub fn signal<S: Into<Signal>>(&mut self, signal: S, all: bool) -> Result<(), LibcontainerError> {
        let status = self.refresh_status()?;
        if status == Status::Stopped {
            return Err(LibcontainerError::ContainerNotRunning(self.id.clone()));
        }

        let signal = signal.into().into_raw();
        if all {
            self.signal_all(signal)?;
        } else if let Some(process) = &self.init_process {
            process.signal(signal)?;
        }

        // a frozen cgroup v1 task cannot act on SIGKILL until it is thawed
        if status == Status::Paused
            && signal == NixSignal::SIGKILL
            && matches!(self.cgroup_manager, AnyCgroupManager::V1(_))
        {
            self.cgroup_manager.freeze(FreezerState::Thawed)?;
        }

        Ok(())
    }

    fn signal_all(&self, signal: NixSignal) -> Result<(), LibcontainerError> {
        let can_freeze = !self.cgroup_manager.is_rootless();
        if can_freeze {
            if let Err(err) = self.cgroup_manager.freeze(FreezerState::Frozen) {
                tracing::warn!("failed to freeze container {}: {}", self.id, err);
            }
        }

        let pids = self.cgroup_manager.get_all_pids()?;
        let result = pids.iter().try_for_each(|&pid| {
            tracing::debug!("kill signal {} to {}", signal, pid);
            match nix_signal::kill(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(err) => Err(err),
            }
        });

        if can_freeze && self.status != Status::Paused {
            if let Err(err) = self.cgroup_manager.freeze(FreezerState::Thawed) {
                tracing::warn!("failed to thaw container {}: {}", self.id, err);
            }
        }

        Ok(result?)
    }
}
