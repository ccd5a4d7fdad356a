use std::fs;

use libcgroups::common::CgroupManager;

use super::{Container, Status};
use crate::error::LibcontainerError;

impl Container {
    /// Removes the cgroup and the state directory of a stopped container.
    /// Destroying an already destroyed container does nothing.
    pub fn destroy(&mut self) -> Result<(), LibcontainerError> {
        match self.refresh_status()? {
            Status::Stopped => {}
            _ => return Err(LibcontainerError::ContainerNotStopped(self.id.clone())),
        }

        if !self.root.exists() {
            tracing::debug!("container {} is already destroyed", self.id);
            return Ok(());
        }

        if let Some(process) = self.init_process.as_mut() {
            process.try_reap();
        }

        self.cgroup_manager.destroy()?;
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::error!(?err, path = ?self.root, "failed to remove container directory");
                return Err(err.into());
            }
        }

        tracing::debug!("container {} destroyed", self.id);
        Ok(())
    }
}
