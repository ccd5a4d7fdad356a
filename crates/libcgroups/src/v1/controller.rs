use std::fs;
use std::path::Path;

use nix::unistd::Pid;

use crate::common::{self, WrapIoResult, WrappedIoError, CGROUP_PROCS};
use crate::resources::Resources;

pub(super) trait Controller {
    type Error: From<WrappedIoError>;

    /// Adds a new task specified by its pid to the cgroup
    fn add_task(pid: Pid, cgroup_path: &Path) -> Result<(), Self::Error> {
        fs::create_dir_all(cgroup_path).wrap_create_dir(cgroup_path)?;
        common::write_cgroup_file(cgroup_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }

    /// Applies resource restrictions to the cgroup
    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error>;

    /// Checks if the controller needs to handle this request
    fn needs_to_handle(resources: &Resources) -> bool;
}
