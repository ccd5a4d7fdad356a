use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use super::controller::Controller;
use super::util::{self, V1MountPointError};
use super::ControllerType;
use crate::common::{self, WrapIoResult, WrappedIoError, CGROUP_PROCS};
use crate::resources::Resources;

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

#[derive(thiserror::Error, Debug)]
pub enum V1CpuSetControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("{path:?} is not below the cpuset hierarchy at {mount_point:?}")]
    OutsideHierarchy { path: PathBuf, mount_point: PathBuf },
    #[error("{0:?} is empty at the root of the cpuset hierarchy")]
    EmptyRoot(PathBuf),
    #[error("mount point error: {0}")]
    MountPoint(#[from] V1MountPointError),
}

pub struct CpuSet {}

impl Controller for CpuSet {
    type Error = V1CpuSetControllerError;

    /// Tasks cannot join a cpuset with empty cpus or mems (ENOSPC), so new
    /// directories inherit both from their parent first
    fn add_task(pid: Pid, cgroup_path: &Path) -> Result<(), Self::Error> {
        fs::create_dir_all(cgroup_path).wrap_create_dir(cgroup_path)?;

        let mount_point = util::subsystem_mount_point(ControllerType::CpuSet)?;
        for file in [CGROUP_CPUSET_CPUS, CGROUP_CPUSET_MEMS] {
            Self::inherit_if_empty(&mount_point, cgroup_path, file)?;
        }

        common::write_cgroup_file(cgroup_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        let values = [
            (CGROUP_CPUSET_CPUS, &resources.cpuset_cpus),
            (CGROUP_CPUSET_MEMS, &resources.cpuset_mems),
        ];
        for (file, value) in values {
            if let Some(value) = value {
                common::write_cgroup_file_str(cgroup_root.join(file), value)?;
            }
        }
        Ok(())
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        resources.has_cpuset()
    }
}

impl CpuSet {
    /// Fills `file` top down from the mount point to `cgroup_path`, copying
    /// the parent value into every directory where it is empty
    fn inherit_if_empty(
        mount_point: &Path,
        cgroup_path: &Path,
        file: &str,
    ) -> Result<(), V1CpuSetControllerError> {
        if !cgroup_path.starts_with(mount_point) {
            return Err(V1CpuSetControllerError::OutsideHierarchy {
                path: cgroup_path.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
            });
        }

        let mut chain: Vec<&Path> = cgroup_path
            .ancestors()
            .take_while(|dir| dir.starts_with(mount_point))
            .collect();
        chain.reverse();

        let root_file = mount_point.join(file);
        let mut inherited = common::read_cgroup_file(&root_file)?;
        if inherited.trim().is_empty() {
            return Err(V1CpuSetControllerError::EmptyRoot(root_file));
        }

        for dir in chain.into_iter().skip(1) {
            let path = dir.join(file);
            let value = common::read_cgroup_file(&path)?;
            if value.trim().is_empty() {
                common::write_cgroup_file_str(&path, inherited.trim())?;
            } else {
                inherited = value;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;

    use super::*;
    use crate::test::{set_fixture, setup};

    #[test]
    fn test_apply_cpus_and_mems() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        setup(tmp.path(), &[CGROUP_CPUSET_CPUS, CGROUP_CPUSET_MEMS])?;
        let resources = Resources {
            cpuset_cpus: Some("1-3".to_string()),
            cpuset_mems: Some("0".to_string()),
            ..Default::default()
        };

        assert!(CpuSet::needs_to_handle(&resources));
        CpuSet::apply(&resources, tmp.path())?;
        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_CPUSET_CPUS))?, "1-3");
        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_CPUSET_MEMS))?, "0");
        Ok(())
    }

    #[test]
    fn test_nearest_non_empty_ancestor_wins() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let parent = tmp.path().join("hutch");
        let child = parent.join("c1");
        fs::create_dir_all(&child)?;
        set_fixture(tmp.path(), CGROUP_CPUSET_CPUS, "0-7\n")?;
        set_fixture(&parent, CGROUP_CPUSET_CPUS, "2-3\n")?;
        set_fixture(&child, CGROUP_CPUSET_CPUS, "\n")?;

        CpuSet::inherit_if_empty(tmp.path(), &child, CGROUP_CPUSET_CPUS)?;
        assert_eq!(fs::read_to_string(child.join(CGROUP_CPUSET_CPUS))?, "2-3");
        assert_eq!(fs::read_to_string(parent.join(CGROUP_CPUSET_CPUS))?, "2-3\n");
        Ok(())
    }

    #[test]
    fn test_empty_chain_is_filled() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let parent = tmp.path().join("hutch");
        let child = parent.join("c1");
        fs::create_dir_all(&child)?;
        set_fixture(tmp.path(), CGROUP_CPUSET_MEMS, "0\n")?;
        set_fixture(&parent, CGROUP_CPUSET_MEMS, "")?;
        set_fixture(&child, CGROUP_CPUSET_MEMS, "")?;

        CpuSet::inherit_if_empty(tmp.path(), &child, CGROUP_CPUSET_MEMS)?;
        assert_eq!(fs::read_to_string(parent.join(CGROUP_CPUSET_MEMS))?, "0");
        assert_eq!(fs::read_to_string(child.join(CGROUP_CPUSET_MEMS))?, "0");
        Ok(())
    }

    #[test]
    fn test_inherit_errors() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let child = tmp.path().join("c1");
        fs::create_dir(&child)?;
        set_fixture(tmp.path(), CGROUP_CPUSET_MEMS, "")?;
        set_fixture(&child, CGROUP_CPUSET_MEMS, "")?;

        assert!(matches!(
            CpuSet::inherit_if_empty(tmp.path(), &child, CGROUP_CPUSET_MEMS),
            Err(V1CpuSetControllerError::EmptyRoot(_))
        ));
        assert!(matches!(
            CpuSet::inherit_if_empty(&child, tmp.path(), CGROUP_CPUSET_MEMS),
            Err(V1CpuSetControllerError::OutsideHierarchy { .. })
        ));
        Ok(())
    }
}
