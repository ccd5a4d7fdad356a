use std::process::Child;

use super::{Container, Status};
use crate::configs::Process;
use crate::error::LibcontainerError;
use crate::process::message::{InitHandoff, InitType};
use crate::process::parent::InitParent;

impl Container {
    /// Runs an additional process in the cgroup of a running container. The
    /// returned child can be waited for by the caller.
    pub fn exec(&mut self, process: Process) -> Result<Child, LibcontainerError> {
        match self.refresh_status()? {
            Status::Running => {}
            Status::Paused => return Err(LibcontainerError::ContainerPaused(self.id.clone())),
            _ => return Err(LibcontainerError::ContainerNotRunning(self.id.clone())),
        }

        let handoff = InitHandoff {
            init_type: InitType::Setns,
            container_id: self.id.clone(),
            config: self.config.clone(),
            process,
        };
        let child = InitParent::spawn(&self.init_path, &self.init_args)?
            .run(handoff, &self.cgroup_manager)?;

        tracing::debug!("executed process {} in container {}", child.id(), self.id);
        Ok(child)
    }
}
