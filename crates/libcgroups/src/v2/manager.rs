use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Component::RootDir;
use std::path::PathBuf;

use nix::unistd::Pid;

use super::controller::Controller;
use super::controller_type::ControllerType;
use super::cpu::Cpu;
use super::cpuset::CpuSet;
use super::freezer::{Freezer, V2FreezerError};
use super::memory::{Memory, V2MemoryControllerError};
use super::pids::Pids;
use super::util::{self, V2UtilError};
use crate::common::{
    self, CgroupManager, FreezerState, WrapIoResult,
    WrappedIoError, CGROUP_PROCS, UNIFIED_KEY,
};
use crate::resources::{Cgroup, Resources};
use crate::stats::{ReadStats, Stats, StatsError};

const CGROUP_KILL: &str = "cgroup.kill";

#[derive(thiserror::Error, Debug)]
pub enum V2ManagerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error(transparent)]
    V2Util(#[from] V2UtilError),
    #[error(transparent)]
    MemoryController(#[from] V2MemoryControllerError),
    #[error("failed to read stats: {0}")]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Freezer(#[from] V2FreezerError),
}

#[derive(Debug)]
pub struct Manager {
    root_path: PathBuf,
    cgroup_path: PathBuf,
    full_path: PathBuf,
    /// The cgroup was created by someone else and is only joined
    joined: bool,
}

impl Manager {
    /// Constructs a new cgroup manager with root path being the mount point
    /// of a cgroup v2 fs. A path recorded by an earlier manager wins over an
    /// explicit path in the config, which wins over the relative path.
    pub fn new(
        root_path: PathBuf,
        cgroup: &Cgroup,
        resolved: Option<&HashMap<String, PathBuf>>,
    ) -> Result<Self, V2ManagerError> {
        let explicit = cgroup.paths.as_ref().and_then(|p| p.get(UNIFIED_KEY));
        let recorded = resolved.and_then(|p| p.get(UNIFIED_KEY));

        let full_path = match recorded.or(explicit) {
            Some(path) => path.clone(),
            None => common::join_under(&root_path, cgroup.relative_path()),
        };
        let cgroup_path = full_path
            .strip_prefix(&root_path)
            .map(|p| PathBuf::from("/").join(p))
            .unwrap_or_else(|_| cgroup.relative_path());

        Ok(Self {
            root_path,
            cgroup_path,
            full_path,
            joined: explicit.is_some(),
        })
    }

    fn create_unified_cgroup(&self, pid: Pid) -> Result<(), V2ManagerError> {
        let controllers = util::get_available_controllers(&self.root_path)?;
        util::delegate_controllers(&self.root_path, &controllers)?;

        let mut current_path = self.root_path.clone();
        let mut components = self
            .cgroup_path
            .components()
            .filter(|c| c.ne(&RootDir))
            .peekable();
        while let Some(component) = components.next() {
            current_path = current_path.join(component);
            if !current_path.exists() {
                fs::create_dir(&current_path).wrap_create_dir(&current_path)?;
                fs::set_permissions(&current_path, fs::Permissions::from_mode(0o755))
                    .wrap_other(&current_path)?;
            }

            // the leaf holds the process, a cgroup with delegated controllers
            // cannot have member processes
            if components.peek().is_some() {
                util::delegate_controllers(&current_path, &controllers)?;
            }
        }

        common::write_cgroup_file(self.full_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }
}

impl CgroupManager for Manager {
    type Error = V2ManagerError;

    fn apply(&self, pid: Pid) -> Result<(), Self::Error> {
        if self.joined {
            common::write_cgroup_file(self.full_path.join(CGROUP_PROCS), pid)?;
            return Ok(());
        }

        self.create_unified_cgroup(pid)
    }

    fn set(&self, resources: &Resources) -> Result<(), Self::Error> {
        for controller in ControllerType::ALL {
            match controller {
                ControllerType::Cpu => Cpu::apply(resources, &self.full_path)?,
                ControllerType::CpuSet => CpuSet::apply(resources, &self.full_path)?,
                ControllerType::Memory => Memory::apply(resources, &self.full_path)?,
                ControllerType::Pids => Pids::apply(resources, &self.full_path)?,
            }
        }

        if !resources.devices.is_empty() {
            tracing::warn!("device rules are not enforced on cgroup v2, ignoring them");
        }

        Freezer::apply(resources, &self.full_path)?;
        Ok(())
    }

    fn get_paths(&self) -> HashMap<String, PathBuf> {
        HashMap::from([(UNIFIED_KEY.to_owned(), self.full_path.clone())])
    }

    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        Ok(common::get_pids(&self.full_path)?)
    }

    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        Ok(common::get_all_pids(&self.full_path)?)
    }

    fn stats(&self) -> Result<Stats, Self::Error> {
        let mut stats = Stats::default();
        // cpu.stat exists whether or not the cpu controller is enabled
        Cpu::read_stats(&self.full_path, &mut stats)?;
        for controller in util::get_available_controllers(&self.full_path)? {
            match controller {
                ControllerType::Pids => Pids::read_stats(&self.full_path, &mut stats)?,
                ControllerType::Memory => Memory::read_stats(&self.full_path, &mut stats)?,
                _ => {}
            }
        }

        Ok(stats)
    }

    fn freeze(&self, state: FreezerState) -> Result<(), Self::Error> {
        Ok(Freezer::set_state(state, &self.full_path)?)
    }

    fn freezer_state(&self) -> Result<FreezerState, Self::Error> {
        Ok(Freezer::state(&self.full_path)?)
    }

    fn destroy(&self) -> Result<(), Self::Error> {
        if self.joined {
            tracing::debug!("cgroup {:?} was joined, not removing it", self.full_path);
            return Ok(());
        }

        if self.full_path.exists() {
            tracing::debug!("remove cgroup {:?}", self.full_path);
            let kill_file = self.full_path.join(CGROUP_KILL);
            if kill_file.exists() {
                common::write_cgroup_file_str(&kill_file, "1")?;
            } else {
                common::kill_remaining(&self.full_path)?;
            }

            common::delete_with_retry(&self.full_path)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::stats::MemoryStats;
    use crate::test::set_fixture;

    #[test]
    fn test_full_path_from_relative_path() -> Result<()> {
        let cgroup = Cgroup {
            name: "c1".to_owned(),
            ..Default::default()
        };
        let manager = Manager::new(PathBuf::from("/sys/fs/cgroup"), &cgroup, None)?;
        assert_eq!(
            manager.get_paths()[UNIFIED_KEY],
            PathBuf::from("/sys/fs/cgroup/hutch/c1")
        );
        assert!(!manager.joined);
        Ok(())
    }

    #[test]
    fn test_recorded_path_wins() -> Result<()> {
        let cgroup = Cgroup {
            name: "c1".to_owned(),
            ..Default::default()
        };
        let recorded = HashMap::from([(
            UNIFIED_KEY.to_owned(),
            PathBuf::from("/sys/fs/cgroup/other/c1"),
        )]);
        let manager = Manager::new(PathBuf::from("/sys/fs/cgroup"), &cgroup, Some(&recorded))?;
        assert_eq!(manager.get_paths(), recorded);
        assert_eq!(manager.cgroup_path, PathBuf::from("/other/c1"));
        Ok(())
    }

    #[test]
    fn test_create_unified_cgroup() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        set_fixture(tmp.path(), util::CGROUP_CONTROLLERS, "")?;
        set_fixture(tmp.path(), util::CGROUP_SUBTREE_CONTROL, "")?;
        let cgroup = Cgroup {
            name: "c1".to_owned(),
            path: Some(PathBuf::from("/c1")),
            ..Default::default()
        };
        let manager = Manager::new(tmp.path().to_path_buf(), &cgroup, None)?;
        // the kernel creates the interface files, emulate that
        fs::create_dir(tmp.path().join("c1"))?;
        set_fixture(&tmp.path().join("c1"), CGROUP_PROCS, "")?;

        manager.apply(Pid::from_raw(1234))?;
        assert_eq!(
            fs::read_to_string(tmp.path().join("c1").join(CGROUP_PROCS))?,
            "1234"
        );
        Ok(())
    }

    #[test]
    fn test_stats_follow_available_controllers() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let cgroup = Cgroup {
            path: Some(PathBuf::from("/c1")),
            ..Default::default()
        };
        let manager = Manager::new(tmp.path().to_path_buf(), &cgroup, None)?;
        let dir = tmp.path().join("c1");
        fs::create_dir(&dir)?;
        set_fixture(&dir, util::CGROUP_CONTROLLERS, "pids\n")?;
        set_fixture(&dir, "cpu.stat", "usage_usec 5\nuser_usec 3\nsystem_usec 2\n")?;
        set_fixture(&dir, "pids.current", "2\n")?;
        set_fixture(&dir, "pids.max", "max\n")?;

        let stats = manager.stats()?;
        assert_eq!(stats.cpu.total_ns, 5000);
        assert_eq!(stats.pids.current, 2);
        // memory is not available, its files are never read
        assert_eq!(stats.memory, MemoryStats::default());
        Ok(())
    }

    #[test]
    fn test_destroy_joined_cgroup_is_kept() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("joined");
        fs::create_dir(&path)?;
        let cgroup = Cgroup {
            paths: Some(HashMap::from([(UNIFIED_KEY.to_owned(), path.clone())])),
            ..Default::default()
        };

        let manager = Manager::new(tmp.path().to_path_buf(), &cgroup, None)?;
        manager.destroy()?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_freezer_state_without_cgroup() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let manager = Manager::new(tmp.path().to_path_buf(), &Cgroup::default(), None)?;
        assert_eq!(manager.freezer_state()?, FreezerState::Undefined);
        Ok(())
    }
}
