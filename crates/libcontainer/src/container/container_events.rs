use libcgroups::common::CgroupManager;
use libcgroups::stats::Stats;
use nix::unistd::Pid;

use super::Container;
use crate::error::LibcontainerError;

impl Container {
    /// Pids of every process in the cgroup of the container
    pub fn processes(&self) -> Result<Vec<Pid>, LibcontainerError> {
        Ok(self.cgroup_manager.get_all_pids()?)
    }

    /// Resource usage of the container as reported by its cgroup
    pub fn stats(&self) -> Result<Stats, LibcontainerError> {
        Ok(self.cgroup_manager.stats()?)
    }
}
