use libcgroups::common::{CgroupManager, FreezerState};

use super::{Container, Status};
use crate::error::LibcontainerError;

impl Container {
    /// Suspends all processes within the container
    pub fn pause(&mut self) -> Result<(), LibcontainerError> {
        match self.refresh_status()? {
            Status::Running => {}
            Status::Paused => return Err(LibcontainerError::ContainerPaused(self.id.clone())),
            _ => return Err(LibcontainerError::ContainerNotRunning(self.id.clone())),
        }

        self.cgroup_manager.freeze(FreezerState::Frozen)?;
        self.status = Status::Paused;

        tracing::debug!("container {} paused", self.id);
        Ok(())
    }
}
