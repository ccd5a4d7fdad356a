use libcgroups::common::{CgroupManager, FreezerState};

use super::{Container, Status};
use crate::error::LibcontainerError;

impl Container {
    /// Resumes all processes of a paused container
    pub fn resume(&mut self) -> Result<(), LibcontainerError> {
        if self.refresh_status()? != Status::Paused {
            return Err(LibcontainerError::ContainerNotPaused(self.id.clone()));
        }

        self.cgroup_manager.freeze(FreezerState::Thawed)?;
        self.status = Status::Running;

        tracing::debug!("container {} resumed", self.id);
        Ok(())
    }
}
