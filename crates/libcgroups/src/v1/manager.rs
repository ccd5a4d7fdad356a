use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use super::controller::Controller;
use super::cpu::Cpu;
use super::cpuacct::CpuAcct;
use super::cpuset::{CpuSet, V1CpuSetControllerError};
use super::devices::Devices;
use super::freezer::{Freezer, V1FreezerControllerError};
use super::memory::{Memory, V1MemoryControllerError};
use super::pids::Pids;
use super::util::{self, V1MountPointError};
use super::ControllerType as CtrlType;
use crate::common::{self, CgroupManager, FreezerState, WrappedIoError};
use crate::resources::{Cgroup, Resources};
use crate::stats::{ReadStats, Stats, StatsError};

#[derive(thiserror::Error, Debug)]
pub enum V1ManagerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("mount point error: {0}")]
    MountPoint(#[from] V1MountPointError),
    #[error("cgroup {0} is required to fulfill the request, but is not supported by this system")]
    CGroupRequired(CtrlType),
    #[error("cpuset controller error: {0}")]
    CpuSetController(#[from] V1CpuSetControllerError),
    #[error("freezer controller error: {0}")]
    FreezerController(#[from] V1FreezerControllerError),
    #[error("memory controller error: {0}")]
    MemoryController(#[from] V1MemoryControllerError),
    #[error("failed to read stats: {0}")]
    Stats(#[from] StatsError),
}

#[derive(Debug)]
pub struct Manager {
    subsystems: HashMap<CtrlType, PathBuf>,
    /// The cgroups were created by someone else and are only joined
    joined: bool,
}

impl Manager {
    /// Resolves one directory per mounted subsystem. Paths recorded by an
    /// earlier manager take precedence over explicit paths in the config,
    /// which take precedence over `<mount point>/<relative path>`.
    pub fn new(
        cgroup: &Cgroup,
        resolved: Option<&HashMap<String, PathBuf>>,
    ) -> Result<Self, V1ManagerError> {
        if let Some(paths) = resolved.or(cgroup.paths.as_ref()) {
            return Ok(Manager {
                subsystems: Self::subsystems_from_paths(paths),
                joined: cgroup.paths.is_some(),
            });
        }

        let relative = cgroup.relative_path();
        let mut subsystems = HashMap::new();
        for (subsystem, mount_point) in util::subsystem_mount_points()? {
            subsystems.insert(subsystem, common::join_under(&mount_point, &relative));
        }

        for subsystem in CtrlType::ALL {
            if !subsystems.contains_key(&subsystem) {
                tracing::warn!("cgroup {} not supported on this system", subsystem);
            }
        }

        Ok(Manager {
            subsystems,
            joined: false,
        })
    }

    fn subsystems_from_paths(paths: &HashMap<String, PathBuf>) -> HashMap<CtrlType, PathBuf> {
        paths
            .iter()
            .filter_map(|(name, path)| match CtrlType::from_name(name) {
                Some(ctrl) => Some((ctrl, path.clone())),
                None => {
                    tracing::debug!("ignoring cgroup path {:?} of unknown subsystem {}", path, name);
                    None
                }
            })
            .collect()
    }

    // pids are read from one hierarchy, all of them contain the same tasks
    fn primary_path(&self) -> Option<&PathBuf> {
        [CtrlType::Devices, CtrlType::Memory, CtrlType::Pids]
            .iter()
            .find_map(|c| self.subsystems.get(c))
            .or_else(|| self.subsystems.values().next())
    }

    fn get_required_controllers(
        &self,
        resources: &Resources,
    ) -> Result<Vec<(CtrlType, &PathBuf)>, V1ManagerError> {
        let mut required_controllers = Vec::new();

        for controller in CtrlType::ALL {
            let required = match controller {
                CtrlType::Cpu => Cpu::needs_to_handle(resources),
                CtrlType::CpuAcct => CpuAcct::needs_to_handle(resources),
                CtrlType::CpuSet => CpuSet::needs_to_handle(resources),
                CtrlType::Devices => Devices::needs_to_handle(resources),
                CtrlType::Memory => Memory::needs_to_handle(resources),
                CtrlType::Pids => Pids::needs_to_handle(resources),
                CtrlType::Freezer => Freezer::needs_to_handle(resources),
            };

            if required {
                let path = self
                    .subsystems
                    .get(&controller)
                    .ok_or(V1ManagerError::CGroupRequired(controller))?;
                required_controllers.push((controller, path));
            }
        }

        Ok(required_controllers)
    }

    fn freezer_path(&self) -> Result<&Path, V1ManagerError> {
        self.subsystems
            .get(&CtrlType::Freezer)
            .map(|p| p.as_path())
            .ok_or(V1ManagerError::CGroupRequired(CtrlType::Freezer))
    }
}

impl CgroupManager for Manager {
    type Error = V1ManagerError;

    fn apply(&self, pid: Pid) -> Result<(), Self::Error> {
        for (subsys, path) in &self.subsystems {
            match subsys {
                CtrlType::Cpu => Cpu::add_task(pid, path)?,
                CtrlType::CpuAcct => CpuAcct::add_task(pid, path)?,
                CtrlType::CpuSet => CpuSet::add_task(pid, path)?,
                CtrlType::Devices => Devices::add_task(pid, path)?,
                CtrlType::Memory => Memory::add_task(pid, path)?,
                CtrlType::Pids => Pids::add_task(pid, path)?,
                CtrlType::Freezer => Freezer::add_task(pid, path)?,
            }
        }

        Ok(())
    }

    fn set(&self, resources: &Resources) -> Result<(), Self::Error> {
        for (subsys, path) in self.get_required_controllers(resources)? {
            match subsys {
                CtrlType::Cpu => Cpu::apply(resources, path)?,
                CtrlType::CpuAcct => CpuAcct::apply(resources, path)?,
                CtrlType::CpuSet => CpuSet::apply(resources, path)?,
                CtrlType::Devices => Devices::apply(resources, path)?,
                CtrlType::Memory => Memory::apply(resources, path)?,
                CtrlType::Pids => Pids::apply(resources, path)?,
                CtrlType::Freezer => Freezer::apply(resources, path)?,
            }
        }

        Ok(())
    }

    fn get_paths(&self) -> HashMap<String, PathBuf> {
        self.subsystems
            .iter()
            .map(|(subsys, path)| (subsys.to_string(), path.clone()))
            .collect()
    }

    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        match self.primary_path() {
            Some(path) => Ok(common::get_pids(path)?),
            None => Ok(Vec::new()),
        }
    }

    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        match self.primary_path() {
            Some(path) => Ok(common::get_all_pids(path)?),
            None => Ok(Vec::new()),
        }
    }

    fn stats(&self) -> Result<Stats, Self::Error> {
        let mut stats = Stats::default();

        for (subsys, path) in &self.subsystems {
            match subsys {
                CtrlType::Cpu => Cpu::read_stats(path, &mut stats)?,
                CtrlType::CpuAcct => CpuAcct::read_stats(path, &mut stats)?,
                CtrlType::Pids => Pids::read_stats(path, &mut stats)?,
                CtrlType::Memory => Memory::read_stats(path, &mut stats)?,
                _ => {}
            }
        }

        Ok(stats)
    }

    fn freeze(&self, state: FreezerState) -> Result<(), Self::Error> {
        Freezer::set_state(state, self.freezer_path()?)?;
        Ok(())
    }

    fn freezer_state(&self) -> Result<FreezerState, Self::Error> {
        match self.subsystems.get(&CtrlType::Freezer) {
            Some(path) if path.exists() => Ok(Freezer::state(path)?),
            _ => Ok(FreezerState::Undefined),
        }
    }

    fn destroy(&self) -> Result<(), Self::Error> {
        if self.joined {
            tracing::debug!("cgroups were joined, not removing them");
            return Ok(());
        }

        for path in self.subsystems.values() {
            if path.exists() {
                tracing::debug!("remove cgroup {:?}", path);
                common::kill_remaining(path)?;
                common::delete_with_retry(path)?;
            }
        }

        Ok(())
    }
}
