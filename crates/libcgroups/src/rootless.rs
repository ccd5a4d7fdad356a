//! Cgroup manager used for rootless containers. An unprivileged user can
//! neither create cgroups nor move processes between them, so every write is
//! either refused or skipped. Reads go through the filesystem managers.
use std::collections::HashMap;
use std::path::PathBuf;

use nix::unistd::Pid;

use crate::common::{
    get_cgroup_setup_with_root, CgroupManager, CgroupSetup, FreezerState, GetCgroupSetupError,
};
use crate::resources::{Cgroup, Resources};
use crate::stats::Stats;
use crate::{v1, v2};

#[derive(thiserror::Error, Debug)]
pub enum RootlessManagerError {
    #[error("cannot change cgroup path in rootless container")]
    ExplicitPaths,
    #[error("cannot use freezer cgroup in rootless container")]
    Freezer,
    #[error("failed to detect cgroup setup: {0}")]
    Setup(#[from] GetCgroupSetupError),
    #[error(transparent)]
    V1(#[from] v1::manager::V1ManagerError),
    #[error(transparent)]
    V2(#[from] v2::manager::V2ManagerError),
}

#[derive(Debug)]
pub struct Manager {
    root_path: PathBuf,
    cgroup: Cgroup,
    paths: Option<HashMap<String, PathBuf>>,
}

enum FsManager {
    V1(v1::manager::Manager),
    V2(v2::manager::Manager),
}

impl Manager {
    pub fn new(
        root_path: PathBuf,
        cgroup: Cgroup,
        paths: Option<HashMap<String, PathBuf>>,
    ) -> Self {
        Self {
            root_path,
            cgroup,
            paths,
        }
    }

    fn fs_manager(&self) -> Result<FsManager, RootlessManagerError> {
        let manager = match get_cgroup_setup_with_root(&self.root_path)? {
            CgroupSetup::Unified => FsManager::V2(v2::manager::Manager::new(
                self.root_path.clone(),
                &self.cgroup,
                self.paths.as_ref(),
            )?),
            CgroupSetup::Legacy | CgroupSetup::Hybrid => FsManager::V1(
                v1::manager::Manager::new(&self.cgroup, self.paths.as_ref())?,
            ),
        };
        Ok(manager)
    }
}

impl CgroupManager for Manager {
    type Error = RootlessManagerError;

    fn apply(&self, _pid: Pid) -> Result<(), Self::Error> {
        if self.cgroup.paths.is_some() {
            return Err(RootlessManagerError::ExplicitPaths);
        }

        Ok(())
    }

    fn set(&self, _resources: &Resources) -> Result<(), Self::Error> {
        // rootless configs with resource limits are rejected during validation
        Ok(())
    }

    fn get_paths(&self) -> HashMap<String, PathBuf> {
        self.paths.clone().unwrap_or_default()
    }

    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        match self.fs_manager()? {
            FsManager::V1(m) => Ok(m.get_pids()?),
            FsManager::V2(m) => Ok(m.get_pids()?),
        }
    }

    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        match self.fs_manager()? {
            FsManager::V1(m) => Ok(m.get_all_pids()?),
            FsManager::V2(m) => Ok(m.get_all_pids()?),
        }
    }

    fn stats(&self) -> Result<Stats, Self::Error> {
        match self.fs_manager()? {
            FsManager::V1(m) => Ok(m.stats()?),
            FsManager::V2(m) => Ok(m.stats()?),
        }
    }

    fn freeze(&self, _state: FreezerState) -> Result<(), Self::Error> {
        Err(RootlessManagerError::Freezer)
    }

    fn freezer_state(&self) -> Result<FreezerState, Self::Error> {
        Ok(FreezerState::Undefined)
    }

    fn destroy(&self) -> Result<(), Self::Error> {
        // nothing was created
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn manager(cgroup: Cgroup) -> Manager {
        Manager::new(PathBuf::from("/sys/fs/cgroup"), cgroup, None)
    }

    #[test]
    fn test_apply_without_paths() -> Result<()> {
        let manager = manager(Cgroup {
            name: "c1".to_string(),
            ..Default::default()
        });
        manager.apply(Pid::from_raw(1000))?;
        Ok(())
    }

    #[test]
    fn test_apply_with_explicit_paths() {
        let mut paths = HashMap::new();
        paths.insert("memory".to_string(), PathBuf::from("/sys/fs/cgroup/memory/c1"));
        let manager = manager(Cgroup {
            name: "c1".to_string(),
            paths: Some(paths),
            ..Default::default()
        });

        let result = manager.apply(Pid::from_raw(1000));
        assert!(matches!(result, Err(RootlessManagerError::ExplicitPaths)));
    }

    #[test]
    fn test_freeze_always_fails() {
        let manager = manager(Cgroup::default());
        for state in [
            FreezerState::Frozen,
            FreezerState::Thawed,
            FreezerState::Undefined,
        ] {
            assert!(matches!(
                manager.freeze(state),
                Err(RootlessManagerError::Freezer)
            ));
        }
    }

    #[test]
    fn test_set_and_destroy_are_noops() -> Result<()> {
        let manager = manager(Cgroup::default());
        let resources = Resources {
            pids_limit: Some(10),
            ..Default::default()
        };
        manager.set(&resources)?;
        manager.destroy()?;
        manager.destroy()?;
        assert_eq!(manager.freezer_state()?, FreezerState::Undefined);
        assert!(manager.get_paths().is_empty());
        Ok(())
    }

    #[test]
    fn test_get_paths_returns_resolved_paths() {
        let mut paths = HashMap::new();
        paths.insert("unified".to_string(), PathBuf::from("/sys/fs/cgroup/c1"));
        let manager = Manager::new(
            PathBuf::from("/sys/fs/cgroup"),
            Cgroup::default(),
            Some(paths.clone()),
        );
        assert_eq!(manager.get_paths(), paths);
    }
}
