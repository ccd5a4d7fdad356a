//! Controller delegation in the unified hierarchy
use std::path::{Path, PathBuf};

use super::controller_type::ControllerType;
use crate::common::{self, WrappedIoError};

pub const CGROUP_CONTROLLERS: &str = "cgroup.controllers";
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";

#[derive(thiserror::Error, Debug)]
pub enum V2UtilError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("{0:?} has no {CGROUP_CONTROLLERS}, it is not a cgroup v2 directory")]
    NotACgroup(PathBuf),
}

/// Controllers the parent made available to the cgroup at `path`, leaving
/// out the ones hutch does not configure
pub fn get_available_controllers<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<ControllerType>, V2UtilError> {
    let file = path.as_ref().join(CGROUP_CONTROLLERS);
    if !file.exists() {
        return Err(V2UtilError::NotACgroup(path.as_ref().to_path_buf()));
    }

    let content = common::read_cgroup_file(&file)?;
    let controllers = content
        .split_whitespace()
        .filter_map(|name| {
            let controller = ControllerType::from_name(name);
            if controller.is_none() {
                tracing::trace!("controller {} is not managed", name);
            }
            controller
        })
        .collect();
    Ok(controllers)
}

/// Makes `controllers` available to the children of the cgroup at `path`.
/// The kernel takes one `+name` entry per write.
pub fn delegate_controllers(path: &Path, controllers: &[ControllerType]) -> Result<(), WrappedIoError> {
    let file = path.join(CGROUP_SUBTREE_CONTROL);
    for controller in controllers {
        common::write_cgroup_file_str(&file, &format!("+{controller}"))?;
    }
    Ok(())
}
