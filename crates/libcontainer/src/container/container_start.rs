use libcgroups::common::CgroupManager;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::{Container, Status};
use crate::error::LibcontainerError;
use crate::process::message::{InitHandoff, InitType};
use crate::process::parent::InitParent;
use crate::process::{process_start_time, InitProcess};

impl Container {
    /// Starts the init process of a stopped container and waits until it has
    /// executed the workload
    pub fn start(&mut self) -> Result<(), LibcontainerError> {
        match self.refresh_status()? {
            Status::Stopped => {}
            _ => return Err(LibcontainerError::ContainerNotStopped(self.id.clone())),
        }
        if let Some(previous) = self.init_process.as_mut() {
            previous.try_reap();
        }

        let handoff = InitHandoff {
            init_type: InitType::Standard,
            container_id: self.id.clone(),
            config: self.config.clone(),
            process: self.config.process.clone(),
        };

        let result = InitParent::spawn(&self.init_path, &self.init_args)
            .and_then(|parent| parent.run(handoff, &self.cgroup_manager));
        let child = match result {
            Ok(child) => child,
            Err(err) => {
                self.remove_cgroup();
                return Err(err);
            }
        };

        let pid = Pid::from_raw(child.id() as i32);
        let start_time = match process_start_time(pid) {
            Ok(start_time) => start_time,
            Err(err) => {
                self.abandon_start(InitProcess::Owned {
                    child,
                    start_time: 0,
                });
                return Err(err.into());
            }
        };

        let process = InitProcess::Owned { child, start_time };
        let previous_descriptors = std::mem::replace(
            &mut self.external_descriptors,
            process.external_descriptors(),
        );
        self.init_process = Some(process);
        self.status = Status::Running;
        if let Err(err) = self.save() {
            self.external_descriptors = previous_descriptors;
            self.status = Status::Stopped;
            if let Some(process) = self.init_process.take() {
                self.abandon_start(process);
            }
            return Err(err);
        }

        tracing::debug!("container {} started with init process {}", self.id, pid);
        Ok(())
    }

    /// Undoes a start whose workload is already running but could not be
    /// recorded
    fn abandon_start(&self, mut process: InitProcess) {
        tracing::warn!(
            "killing init process {} of container {} that could not be recorded",
            process.pid(),
            self.id
        );
        if let Err(err) = process.signal(Signal::SIGKILL) {
            tracing::warn!("failed to kill init process {}: {}", process.pid(), err);
        }
        let _ = process.wait();
        self.remove_cgroup();
    }

    fn remove_cgroup(&self) {
        if let Err(err) = self.cgroup_manager.destroy() {
            tracing::warn!("failed to remove cgroup of container {}: {}", self.id, err);
        }
    }
}
