use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::statfs::{statfs, FsType, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use super::resources::{Cgroup, Resources};
use super::rootless;
use super::stats::Stats;
use super::systemd;
use super::v1;
use super::v2;

pub const CGROUP_PROCS: &str = "cgroup.procs";
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
/// Key of the resolved path map used by the unified (v2) hierarchy.
pub const UNIFIED_KEY: &str = "unified";

/// Capability set every cgroup backend provides to the container.
pub trait CgroupManager {
    type Error;

    /// Places the process into the cgroup, creating it if necessary
    fn apply(&self, pid: Pid) -> Result<(), Self::Error>;

    /// Writes the resource limits to the cgroup
    fn set(&self, resources: &Resources) -> Result<(), Self::Error>;

    /// Resolved cgroup paths keyed by subsystem
    fn get_paths(&self) -> HashMap<String, PathBuf>;

    /// Pids that are direct members of the cgroup
    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error>;

    /// Pids of the cgroup and all of its descendants
    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error>;

    /// Usage counters of the cpu, memory and pids controllers
    fn stats(&self) -> Result<Stats, Self::Error>;

    /// Freezes or thaws every task of the cgroup
    fn freeze(&self, state: FreezerState) -> Result<(), Self::Error>;

    fn freezer_state(&self) -> Result<FreezerState, Self::Error>;

    /// Kills what is left in the cgroup and removes it
    fn destroy(&self) -> Result<(), Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum AnyManagerError {
    #[error(transparent)]
    Systemd(#[from] systemd::manager::SystemdManagerError),
    #[error(transparent)]
    V1(#[from] v1::manager::V1ManagerError),
    #[error(transparent)]
    V2(#[from] v2::manager::V2ManagerError),
    #[error(transparent)]
    Rootless(#[from] rootless::RootlessManagerError),
}

/// The manager a container was created with. The systemd one is boxed, it
/// is much larger than the others.
#[derive(Debug)]
pub enum AnyCgroupManager {
    Systemd(Box<systemd::manager::Manager>),
    V1(v1::manager::Manager),
    V2(v2::manager::Manager),
    Rootless(rootless::Manager),
}

impl AnyCgroupManager {
    pub fn is_rootless(&self) -> bool {
        matches!(self, AnyCgroupManager::Rootless(_))
    }
}

/// Forwards a call to whichever manager is active and widens its error
macro_rules! dispatch {
    ($self:ident, $manager:ident => $call:expr) => {
        match $self {
            AnyCgroupManager::Systemd($manager) => Ok($call?),
            AnyCgroupManager::V1($manager) => Ok($call?),
            AnyCgroupManager::V2($manager) => Ok($call?),
            AnyCgroupManager::Rootless($manager) => Ok($call?),
        }
    };
}

impl CgroupManager for AnyCgroupManager {
    type Error = AnyManagerError;

    fn apply(&self, pid: Pid) -> Result<(), Self::Error> {
        dispatch!(self, m => m.apply(pid))
    }

    fn set(&self, resources: &Resources) -> Result<(), Self::Error> {
        dispatch!(self, m => m.set(resources))
    }

    fn get_paths(&self) -> HashMap<String, PathBuf> {
        match self {
            AnyCgroupManager::Systemd(m) => m.get_paths(),
            AnyCgroupManager::V1(m) => m.get_paths(),
            AnyCgroupManager::V2(m) => m.get_paths(),
            AnyCgroupManager::Rootless(m) => m.get_paths(),
        }
    }

    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        dispatch!(self, m => m.get_pids())
    }

    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        dispatch!(self, m => m.get_all_pids())
    }

    fn stats(&self) -> Result<Stats, Self::Error> {
        dispatch!(self, m => m.stats())
    }

    fn freeze(&self, state: FreezerState) -> Result<(), Self::Error> {
        dispatch!(self, m => m.freeze(state))
    }

    fn freezer_state(&self) -> Result<FreezerState, Self::Error> {
        dispatch!(self, m => m.freezer_state())
    }

    fn destroy(&self) -> Result<(), Self::Error> {
        dispatch!(self, m => m.destroy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupSetup {
    Hybrid,
    Legacy,
    Unified,
}

impl Display for CgroupSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CgroupSetup::Hybrid => "hybrid",
            CgroupSetup::Legacy => "legacy",
            CgroupSetup::Unified => "unified",
        })
    }
}

/// State of the freezer of a cgroup, `Undefined` where there is none
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreezerState {
    Undefined,
    Frozen,
    Thawed,
}

/// Which implementation manages the cgroups of new containers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupBackend {
    /// Direct writes to the cgroup filesystem
    #[default]
    Fs,
    /// Transient units created through systemd
    Systemd,
    /// No resource control, for unprivileged containers
    Rootless,
}

impl Display for CgroupBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CgroupBackend::Fs => "cgroupfs",
            CgroupBackend::Systemd => "systemd",
            CgroupBackend::Rootless => "rootless",
        })
    }
}

/// What was attempted on a cgroup file when an io error occurred
#[derive(Debug)]
pub enum IoAction {
    Open,
    Read,
    Write(String),
    CreateDir,
    Other,
}

impl Display for IoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoAction::Open => f.write_str("open"),
            IoAction::Read => f.write_str("read"),
            IoAction::Write(data) => write!(f, "write {data:?} to"),
            IoAction::CreateDir => f.write_str("create directory"),
            IoAction::Other => f.write_str("access"),
        }
    }
}

/// An io error together with the file and the action it happened on
#[derive(thiserror::Error, Debug)]
#[error("failed to {action} {path:?}: {err}")]
pub struct WrappedIoError {
    pub action: IoAction,
    pub path: PathBuf,
    #[source]
    err: std::io::Error,
}

impl WrappedIoError {
    pub fn new<P: Into<PathBuf>>(action: IoAction, path: P, err: std::io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            err,
        }
    }

    pub fn inner(&self) -> &std::io::Error {
        &self.err
    }
}

/// Attaches the path and the attempted action to io results
pub trait WrapIoResult: Sized {
    type Target;

    fn wrap_as<P: Into<PathBuf>>(
        self,
        action: IoAction,
        path: P,
    ) -> Result<Self::Target, WrappedIoError>;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.wrap_as(IoAction::CreateDir, path)
    }

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.wrap_as(IoAction::Read, path)
    }

    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.wrap_as(IoAction::Open, path)
    }

    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError> {
        self.wrap_as(IoAction::Write(data.into()), path)
    }

    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.wrap_as(IoAction::Other, path)
    }
}

impl<T> WrapIoResult for Result<T, std::io::Error> {
    type Target = T;

    fn wrap_as<P: Into<PathBuf>>(self, action: IoAction, path: P) -> Result<T, WrappedIoError> {
        self.map_err(|err| WrappedIoError::new(action, path, err))
    }
}

#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<(), WrappedIoError> {
    let path = path.as_ref();

    fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .wrap_open(path)?
        .write_all(data.as_bytes())
        .wrap_write(path, data)?;

    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    write_cgroup_file_str(path, &data.to_string())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    fs::read_to_string(path).wrap_read(path)
}

#[derive(thiserror::Error, Debug)]
pub enum GetCgroupSetupError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("cgroup root {0:?} does not exist")]
    NonDefault(PathBuf),
    #[error("{path:?} is neither cgroup2 nor tmpfs but {fs_type:?}")]
    FailedToDetect { path: PathBuf, fs_type: FsType },
}

fn filesystem_type(path: &Path) -> Result<FsType, WrappedIoError> {
    let stat = statfs(path)
        .map_err(std::io::Error::from)
        .wrap_other(path)?;
    Ok(stat.filesystem_type())
}

/// Tells the hierarchy layout apart by the filesystem mounted at the root:
/// cgroup2 is unified, tmpfs holds v1 hierarchies (hybrid when a cgroup2
/// filesystem is mounted at `unified` next to them).
pub fn get_cgroup_setup_with_root(root_path: &Path) -> Result<CgroupSetup, GetCgroupSetupError> {
    if !root_path.exists() {
        return Err(GetCgroupSetupError::NonDefault(root_path.to_path_buf()));
    }

    match filesystem_type(root_path)? {
        CGROUP2_SUPER_MAGIC => Ok(CgroupSetup::Unified),
        TMPFS_MAGIC => {
            let unified = root_path.join(UNIFIED_KEY);
            if unified.exists() && filesystem_type(&unified)? == CGROUP2_SUPER_MAGIC {
                Ok(CgroupSetup::Hybrid)
            } else {
                Ok(CgroupSetup::Legacy)
            }
        }
        fs_type => Err(GetCgroupSetupError::FailedToDetect {
            path: root_path.to_path_buf(),
            fs_type,
        }),
    }
}

pub fn get_cgroup_setup() -> Result<CgroupSetup, GetCgroupSetupError> {
    get_cgroup_setup_with_root(Path::new(DEFAULT_CGROUP_ROOT))
}

#[derive(thiserror::Error, Debug)]
pub enum CreateCgroupSetupError {
    #[error("failed to detect cgroup setup: {0}")]
    Setup(#[from] GetCgroupSetupError),
    #[error("v1 error: {0}")]
    V1(#[from] v1::manager::V1ManagerError),
    #[error("v2 error: {0}")]
    V2(#[from] v2::manager::V2ManagerError),
    #[error("systemd error: {0}")]
    Systemd(#[from] systemd::manager::SystemdManagerError),
}

/// Everything needed to construct the cgroup manager of a container.
#[derive(Debug, Clone)]
pub struct CgroupConfig {
    pub backend: CgroupBackend,
    pub cgroup: Cgroup,
    pub container_name: String,
    /// Paths resolved by an earlier manager of the same container, as
    /// recorded in its state. `None` for a container that was never started.
    pub resolved_paths: Option<HashMap<String, PathBuf>>,
}

pub fn create_cgroup_manager_with_root(
    root_path: &Path,
    config: CgroupConfig,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    if config.backend == CgroupBackend::Rootless {
        tracing::debug!("rootless cgroup manager will be used");
        return Ok(AnyCgroupManager::Rootless(rootless::Manager::new(
            root_path.to_path_buf(),
            config.cgroup,
            config.resolved_paths,
        )));
    }

    let setup = get_cgroup_setup_with_root(root_path)?;
    match (setup, config.backend) {
        (CgroupSetup::Unified, CgroupBackend::Systemd) => {
            Ok(create_systemd_cgroup_manager(root_path, config)?)
        }
        (CgroupSetup::Unified, _) => {
            tracing::info!("cgroup manager V2 will be used");
            Ok(AnyCgroupManager::V2(v2::manager::Manager::new(
                root_path.to_path_buf(),
                &config.cgroup,
                config.resolved_paths.as_ref(),
            )?))
        }
        (CgroupSetup::Legacy | CgroupSetup::Hybrid, backend) => {
            if backend == CgroupBackend::Systemd {
                tracing::warn!("systemd cgroup driver requires cgroup v2, falling back to cgroupfs");
            }
            tracing::info!("cgroup manager V1 will be used");
            Ok(AnyCgroupManager::V1(v1::manager::Manager::new(
                &config.cgroup,
                config.resolved_paths.as_ref(),
            )?))
        }
    }
}

pub fn create_cgroup_manager(
    config: CgroupConfig,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    create_cgroup_manager_with_root(Path::new(DEFAULT_CGROUP_ROOT), config)
}

#[cfg(feature = "systemd")]
fn create_systemd_cgroup_manager(
    root_path: &Path,
    config: CgroupConfig,
) -> Result<AnyCgroupManager, systemd::manager::SystemdManagerError> {
    let use_system = nix::unistd::geteuid().is_root();
    tracing::info!(
        "systemd cgroup manager with system bus {} will be used",
        use_system
    );
    let client = systemd::dbus::DbusClient::connect(use_system)?;
    let manager = systemd::manager::Manager::new(
        root_path.to_path_buf(),
        &config.cgroup,
        config.container_name,
        Box::new(client),
    )?;
    Ok(AnyCgroupManager::Systemd(Box::new(manager)))
}

#[cfg(not(feature = "systemd"))]
fn create_systemd_cgroup_manager(
    _root_path: &Path,
    _config: CgroupConfig,
) -> Result<AnyCgroupManager, systemd::manager::SystemdManagerError> {
    Err(systemd::manager::SystemdManagerError::NotEnabled)
}

fn parse_pids(file_path: &Path, content: &str) -> Result<Vec<Pid>, WrappedIoError> {
    content
        .split_whitespace()
        .map(|pid| {
            pid.parse::<i32>()
                .map(Pid::from_raw)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
                .wrap_other(file_path)
        })
        .collect()
}

/// Reads the pids that are direct members of the cgroup at `path`
pub fn get_pids(path: &Path) -> Result<Vec<Pid>, WrappedIoError> {
    let file_path = path.join(CGROUP_PROCS);
    let content = read_cgroup_file(&file_path)?;
    parse_pids(&file_path, &content)
}

/// Moves a process into existing cgroups without creating or configuring
/// them. Paths that no longer exist are skipped.
pub fn enter_pid(paths: &HashMap<String, PathBuf>, pid: Pid) -> Result<(), WrappedIoError> {
    for path in paths.values() {
        if path.exists() {
            write_cgroup_file(path.join(CGROUP_PROCS), pid)?;
        }
    }
    Ok(())
}

/// Pids of the cgroup at `path` and of every cgroup below it
pub fn get_all_pids(path: &Path) -> Result<Vec<Pid>, WrappedIoError> {
    let mut pids = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if dir.join(CGROUP_PROCS).exists() {
            pids.extend(get_pids(&dir)?);
        }
        for entry in fs::read_dir(&dir).wrap_read(&dir)? {
            let entry = entry.wrap_read(&dir)?;
            if entry.file_type().wrap_read(entry.path())?.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(pids)
}

/// Sends SIGKILL to every process that is still a member of the cgroup
pub fn kill_remaining(path: &Path) -> Result<(), WrappedIoError> {
    for pid in get_all_pids(path)? {
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::SIGKILL);
    }
    Ok(())
}

const RMDIR_ATTEMPTS: u32 = 5;
const RMDIR_MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Removes a cgroup directory bottom up. The kernel refuses the removal for
/// a short while after the last member exited, so failures are retried with
/// a growing pause.
pub fn delete_with_retry<P: AsRef<Path>>(path: P) -> Result<(), WrappedIoError> {
    let path = path.as_ref();
    let mut backoff = Duration::from_millis(10);
    for attempt in 1..RMDIR_ATTEMPTS {
        match remove_dir_tree(path) {
            Ok(()) => return Ok(()),
            Err(err) => tracing::debug!("attempt {} to remove {:?}: {}", attempt, path, err),
        }
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(RMDIR_MAX_BACKOFF);
    }
    remove_dir_tree(path).wrap_other(path)
}

// cgroup directories only go away through rmdir, children first
fn remove_dir_tree(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_dir_tree(&entry.path())?;
        }
    }
    fs::remove_dir(path)
}

/// Joins `path` below `root` even when it is absolute
pub(crate) fn join_under<P: AsRef<Path>>(root: &Path, path: P) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}
