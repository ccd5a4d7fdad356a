//! Persistent snapshot of a container, stored as `state.json` in the
//! container directory
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::configs::Config;

/// Lifecycle state of a container
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No live init process
    #[default]
    Stopped,
    /// The init process has executed the workload and is alive
    Running,
    /// The processes of the container are frozen
    Paused,
    /// Reconstructed from disk and not yet checked against the system
    Loaded,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Loaded => "loaded",
        };

        write!(f, "{print}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("container state file {state_file_path:?} does not exist")]
    NotFound { state_file_path: PathBuf },
    #[error("failed to open container state file {state_file_path:?}")]
    OpenStateFile {
        state_file_path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse container state file {state_file_path:?}")]
    ParseStateFile {
        state_file_path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write container state file {state_file_path:?}")]
    WriteStateFile {
        state_file_path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, StateError>;

/// Stores the state information of the container
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct State {
    pub id: String,
    /// Pid of the init process, 0 if the container was never started
    #[serde(default)]
    pub init_process_pid: i32,
    /// Start time of the init process in clock ticks since boot
    #[serde(default)]
    pub init_process_start: u64,
    pub created: DateTime<Utc>,
    /// Targets of stdin, stdout and stderr of the init process
    #[serde(default)]
    pub external_descriptors: Vec<String>,
    pub config: Config,
    #[serde(default)]
    pub rootless: bool,
    /// Resolved cgroup paths keyed by subsystem, `unified` for cgroup v2
    #[serde(default)]
    pub cgroup_paths: HashMap<String, PathBuf>,
}

impl State {
    const STATE_FILE_PATH: &'static str = "state.json";

    pub fn new(id: &str, config: Config, rootless: bool) -> Self {
        Self {
            id: id.to_string(),
            init_process_pid: 0,
            init_process_start: 0,
            created: Utc::now(),
            external_descriptors: Vec::new(),
            config,
            rootless,
            cgroup_paths: HashMap::new(),
        }
    }

    /// Writes the state to a temporary file in the container directory and
    /// renames it over the state file, so readers never see a partial
    /// document
    #[instrument(level = "trace", skip(self))]
    pub fn save(&self, container_root: &Path) -> Result<()> {
        let state_file_path = Self::file_path(container_root);
        let write_error = |err: std::io::Error| {
            tracing::error!(?state_file_path, %err, "failed to write container state file");
            StateError::WriteStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        };

        let tmp = tempfile::NamedTempFile::new_in(container_root).map_err(write_error)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, self).map_err(|err| {
                tracing::error!(?state_file_path, %err, "failed to serialize container state");
                StateError::ParseStateFile {
                    state_file_path: state_file_path.to_owned(),
                    source: err,
                }
            })?;
            writer.flush().map_err(write_error)?;
        }
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(&state_file_path)
            .map_err(|err| write_error(err.error))?;

        Ok(())
    }

    #[instrument(level = "trace")]
    pub fn load(container_root: &Path) -> Result<Self> {
        let state_file_path = Self::file_path(container_root);
        let state_file = File::open(&state_file_path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                return StateError::NotFound {
                    state_file_path: state_file_path.to_owned(),
                };
            }
            tracing::error!(?state_file_path, %err, "failed to open container state file");
            StateError::OpenStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        })?;

        let state: Self = serde_json::from_reader(BufReader::new(state_file)).map_err(|err| {
            tracing::error!(?state_file_path, %err, "failed to parse container state file");
            StateError::ParseStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        })?;

        Ok(state)
    }

    /// Returns the path to the state JSON file for the provided `container_root`.
    ///
    /// ```
    /// # use std::path::Path;
    /// # use libcontainer::container::state::State;
    ///
    /// let container_root = Path::new("/run/hutch/container");
    /// let state_file = State::file_path(&container_root);
    /// assert_eq!(state_file.to_str(), Some("/run/hutch/container/state.json"));
    /// ```
    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(Self::STATE_FILE_PATH)
    }
}
