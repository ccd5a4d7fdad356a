use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use libcgroups::common::{AnyCgroupManager, CgroupManager, FreezerState};
use nix::unistd::Pid;

use super::state::{State, Status};
use crate::configs::Config;
use crate::error::LibcontainerError;
use crate::process::InitProcess;

/// A container and the handle to its processes. Every operation first
/// checks the live system, the stored status is never trusted.
#[derive(Debug)]
pub struct Container {
    pub(crate) id: String,
    pub(crate) root: PathBuf,
    pub(crate) config: Config,
    pub(crate) cgroup_manager: AnyCgroupManager,
    pub(crate) created: DateTime<Utc>,
    pub(crate) rootless: bool,
    pub(crate) init_path: PathBuf,
    pub(crate) init_args: Vec<String>,
    pub(crate) criu_path: PathBuf,
    pub(crate) init_process: Option<InitProcess>,
    pub(crate) external_descriptors: Vec<String>,
    pub(crate) status: Status,
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory holding the state of the container
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn rootless(&self) -> bool {
        self.rootless
    }

    /// Pid of the init process, if the container was ever started
    pub fn pid(&self) -> Option<Pid> {
        self.init_process.as_ref().map(InitProcess::pid)
    }

    /// Checkpoint tool handed to external checkpoint/restore integrations
    pub fn criu_path(&self) -> &Path {
        &self.criu_path
    }

    pub fn cgroup_manager(&self) -> &AnyCgroupManager {
        &self.cgroup_manager
    }

    /// Current status, checked against the system
    pub fn status(&mut self) -> Result<Status, LibcontainerError> {
        self.refresh_status()
    }

    /// Snapshot of the container as it is written to disk
    pub fn state(&self) -> State {
        State {
            id: self.id.clone(),
            init_process_pid: self.pid().map(Pid::as_raw).unwrap_or(0),
            init_process_start: self
                .init_process
                .as_ref()
                .map(InitProcess::start_time)
                .unwrap_or(0),
            created: self.created,
            external_descriptors: self.external_descriptors.clone(),
            config: self.config.clone(),
            rootless: self.rootless,
            cgroup_paths: self.cgroup_manager.get_paths(),
        }
    }

    pub(crate) fn save(&self) -> Result<(), LibcontainerError> {
        tracing::debug!("save state of container {} in {:?}", self.id, self.root);
        self.state().save(&self.root)?;
        Ok(())
    }

    /// Derives the status from the init process and the freezer
    pub(crate) fn refresh_status(&mut self) -> Result<Status, LibcontainerError> {
        let status = match &self.init_process {
            None => Status::Stopped,
            Some(process) if !process.is_alive() => Status::Stopped,
            Some(_) => match self.cgroup_manager.freezer_state()? {
                FreezerState::Frozen => Status::Paused,
                _ => Status::Running,
            },
        };

        if status != self.status {
            tracing::debug!(
                "container {} status changed from {} to {}",
                self.id,
                self.status,
                status
            );
        }
        self.status = status;
        Ok(status)
    }

    /// Waits for the init process to exit. Only possible for a container
    /// started by this process.
    pub fn wait(&mut self) -> Result<ExitStatus, LibcontainerError> {
        let process = self
            .init_process
            .as_mut()
            .ok_or_else(|| LibcontainerError::ContainerNotRunning(self.id.clone()))?;
        let status = process.wait()?;
        self.status = Status::Stopped;
        Ok(status)
    }
}
