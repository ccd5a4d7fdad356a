//! Entry point of the library. A factory owns a root directory holding one
//! directory per container and creates new containers or reloads existing
//! ones from their state snapshot.
use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use libcgroups::common::{create_cgroup_manager, AnyCgroupManager, CgroupBackend, CgroupConfig};
use libcgroups::resources::Cgroup;
use nix::mount::MsFlags;
use nix::unistd::Pid;
use procfs::process::Process as ProcfsProcess;

use crate::configs::Config;
use crate::container::state::StateError;
use crate::container::{Container, State, Status};
use crate::error::LibcontainerError;
use crate::process::{init, InitProcess};
use crate::rootless::is_rootless;
use crate::validate::{ConfigValidator, RootlessValidator, StandardValidator};
use crate::workload::default::DefaultExecutor;

const MAX_ID_LEN: usize = 1024;
const PROC_SELF_EXE: &str = "/proc/self/exe";

type Result<T> = std::result::Result<T, LibcontainerError>;

/// Settings of a [`Factory`]
#[derive(Debug)]
pub struct FactoryConfig {
    /// Directory holding the container directories
    pub root: PathBuf,
    /// Executable spawned as init process, usually the caller itself
    pub init_path: PathBuf,
    /// Arguments of the init process, the first one is its argv0
    pub init_args: Vec<String>,
    /// Checkpoint/restore tool handed to the containers
    pub criu_path: PathBuf,
    /// Backend used for containers that are not rootless
    pub cgroup_backend: CgroupBackend,
    /// Mount a tmpfs on the root unless it is a mount point already
    pub tmpfs_root: bool,
    pub validator: Box<dyn ConfigValidator>,
}

impl FactoryConfig {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            init_path: PathBuf::from(PROC_SELF_EXE),
            init_args: vec!["init".to_string()],
            criu_path: PathBuf::from("criu"),
            cgroup_backend: CgroupBackend::Fs,
            tmpfs_root: false,
            validator: Box::new(StandardValidator),
        }
    }

    /// Re-executes the calling binary as init. `argv0` is resolved through
    /// `PATH` when possible so the init process is recognizable in process
    /// listings.
    pub fn with_init_args<I, S>(mut self, argv0: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv0 = resolve_executable(argv0)?;
        self.init_path = PathBuf::from(PROC_SELF_EXE);
        self.init_args = std::iter::once(argv0.to_string_lossy().into_owned())
            .chain(args.into_iter().map(Into::into))
            .collect();
        Ok(self)
    }

    pub fn with_cgroup_backend(mut self, backend: CgroupBackend) -> Self {
        self.cgroup_backend = backend;
        self
    }

    pub fn with_criu_path<P: Into<PathBuf>>(mut self, criu_path: P) -> Self {
        self.criu_path = criu_path.into();
        self
    }

    pub fn with_tmpfs_root(mut self, tmpfs_root: bool) -> Self {
        self.tmpfs_root = tmpfs_root;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn ConfigValidator>) -> Self {
        self.validator = validator;
        self
    }
}

fn resolve_executable(argv0: &str) -> Result<PathBuf> {
    let path = Path::new(argv0);
    if path.components().count() > 1 {
        return Ok(std::env::current_dir()?.join(path));
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    let found = std::env::split_paths(&search)
        .map(|dir| dir.join(argv0))
        .find(|candidate| candidate.is_file());
    // the name only labels the init process, /proc/self/exe is executed
    Ok(found.unwrap_or_else(|| {
        tracing::debug!("{} not found in PATH, keeping the bare name", argv0);
        path.to_path_buf()
    }))
}

#[derive(Debug)]
pub struct Factory {
    root: PathBuf,
    init_path: PathBuf,
    init_args: Vec<String>,
    criu_path: PathBuf,
    cgroup_backend: CgroupBackend,
    validator: Box<dyn ConfigValidator>,
}

impl Factory {
    pub fn new(config: FactoryConfig) -> Result<Self> {
        if !config.root.as_os_str().is_empty() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&config.root)?;

            if config.tmpfs_root && !is_mount_point(&config.root)? {
                tracing::debug!("mounting tmpfs on factory root {:?}", config.root);
                nix::mount::mount(
                    Some("tmpfs"),
                    &config.root,
                    Some("tmpfs"),
                    MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                    Some("mode=0700"),
                )?;
            }
        }

        Ok(Self {
            root: config.root,
            init_path: config.init_path,
            init_args: config.init_args,
            criu_path: config.criu_path,
            cgroup_backend: config.cgroup_backend,
            validator: config.validator,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a stopped container with a validated configuration and
    /// writes its first snapshot
    pub fn create(&self, id: &str, config: Config) -> Result<Container> {
        if self.root.as_os_str().is_empty() {
            return Err(LibcontainerError::InvalidConfig(
                "factory root is not set".to_string(),
            ));
        }
        validate_id(id)?;

        self.validator.validate(&config)?;
        let rootless =
            is_rootless(&config).map_err(|err| LibcontainerError::InvalidConfig(err.to_string()))?;
        if rootless {
            RootlessValidator.validate(&config)?;
        }

        let container_root = self.root.join(id);
        if let Err(err) = DirBuilder::new().mode(0o711).create(&container_root) {
            if err.kind() == ErrorKind::AlreadyExists {
                return Err(LibcontainerError::IdInUse(id.to_string()));
            }
            return Err(LibcontainerError::OtherIO(err));
        }

        let result = self
            .cgroup_manager(id, &config.cgroup, rootless, None)
            .and_then(|cgroup_manager| {
                let container = Container {
                    id: id.to_string(),
                    root: container_root.clone(),
                    config,
                    cgroup_manager,
                    created: chrono::Utc::now(),
                    rootless,
                    init_path: self.init_path.clone(),
                    init_args: self.init_args.clone(),
                    criu_path: self.criu_path.clone(),
                    init_process: None,
                    external_descriptors: Vec::new(),
                    status: Status::Stopped,
                };
                container.save()?;
                Ok(container)
            });

        if result.is_err() {
            if let Err(err) = fs::remove_dir_all(&container_root) {
                tracing::warn!("failed to clean up {:?}: {}", container_root, err);
            }
        }
        let container = result?;

        tracing::debug!(
            "created container {} (rootless: {}) in {:?}",
            id,
            rootless,
            container.root
        );
        Ok(container)
    }

    /// Reconstructs a container from its snapshot and checks it against the
    /// system
    pub fn load(&self, id: &str) -> Result<Container> {
        if self.root.as_os_str().is_empty() {
            return Err(LibcontainerError::InvalidConfig(
                "factory root is not set".to_string(),
            ));
        }

        let container_root = self.root.join(id);
        let state = State::load(&container_root).map_err(|err| match err {
            StateError::NotFound { .. } => LibcontainerError::NotExists(id.to_string()),
            err => LibcontainerError::State(err),
        })?;

        let init_process = (state.init_process_pid != 0).then(|| InitProcess::NonChild {
            pid: Pid::from_raw(state.init_process_pid),
            start_time: state.init_process_start,
        });
        let cgroup_manager = self.cgroup_manager(
            id,
            &state.config.cgroup,
            state.rootless,
            Some(state.cgroup_paths),
        )?;

        let mut container = Container {
            id: state.id,
            root: container_root,
            config: state.config,
            cgroup_manager,
            created: state.created,
            rootless: state.rootless,
            init_path: self.init_path.clone(),
            init_args: self.init_args.clone(),
            criu_path: self.criu_path.clone(),
            init_process,
            external_descriptors: state.external_descriptors,
            status: Status::Loaded,
        };
        container.refresh_status()?;

        Ok(container)
    }

    /// Child side of the init protocol, called by the re-executed binary
    pub fn start_initialization(&self) -> Result<()> {
        init::start_initialization(&DefaultExecutor)
    }

    fn cgroup_manager(
        &self,
        id: &str,
        cgroup: &Cgroup,
        rootless: bool,
        resolved_paths: Option<std::collections::HashMap<String, PathBuf>>,
    ) -> Result<AnyCgroupManager> {
        let mut cgroup = cgroup.clone();
        if cgroup.name.is_empty() {
            cgroup.name = id.to_string();
        }
        let backend = if rootless {
            CgroupBackend::Rootless
        } else {
            self.cgroup_backend
        };

        Ok(create_cgroup_manager(CgroupConfig {
            backend,
            cgroup,
            container_name: id.to_string(),
            resolved_paths,
        })?)
    }
}

fn validate_id(id: &str) -> Result<()> {
    let invalid = || LibcontainerError::InvalidId(id.to_string());
    if id.is_empty() || id == "." || id == ".." || id.len() > MAX_ID_LEN {
        return Err(invalid());
    }

    for c in id.chars() {
        match c {
            // word characters and the range `+` through `.`
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '+' | ',' | '-' | '.' => (),
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

fn is_mount_point(path: &Path) -> Result<bool> {
    let path = fs::canonicalize(path)?;
    Ok(ProcfsProcess::myself()?
        .mountinfo()?
        .into_iter()
        .any(|m| m.mount_point == path))
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use libcgroups::common::CgroupManager;

    use super::*;
    use crate::configs::{IdMap, Namespace, NamespaceType};
    use crate::error::ErrorCode;

    fn factory(root: &Path) -> Result<Factory> {
        Ok(Factory::new(
            FactoryConfig::new(root).with_cgroup_backend(CgroupBackend::Rootless),
        )?)
    }

    // Maps container root to the caller, so the container is rootless for
    // an unprivileged caller and a plain user namespace container for root.
    fn config() -> Config {
        Config {
            rootfs: PathBuf::from("/"),
            namespaces: vec![Namespace {
                typ: NamespaceType::User,
                path: None,
            }],
            uid_mappings: vec![IdMap {
                container_id: 0,
                host_id: nix::unistd::geteuid().as_raw(),
                size: 1,
            }],
            gid_mappings: vec![IdMap {
                container_id: 0,
                host_id: nix::unistd::getegid().as_raw(),
                size: 1,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_id() {
        for id in ["c1", "a.b", "A_B+c-d", "pod,1", &"x".repeat(MAX_ID_LEN)] {
            assert!(validate_id(id).is_ok(), "{id}");
        }
        for id in ["", ".", "..", "a/b", "a b", "a:b", "ü", &"x".repeat(MAX_ID_LEN + 1)] {
            assert!(validate_id(id).is_err(), "{id}");
        }
    }

    #[test]
    fn test_init_args_keep_unknown_name() -> Result<()> {
        let config = FactoryConfig::new("").with_init_args("no-such-hutch-binary", ["init"])?;
        assert_eq!(config.init_path, PathBuf::from(PROC_SELF_EXE));
        assert_eq!(config.init_args, ["no-such-hutch-binary", "init"]);

        let config = FactoryConfig::new("").with_init_args("sh", ["init"])?;
        assert!(Path::new(&config.init_args[0]).is_absolute());
        Ok(())
    }

    #[test]
    fn test_new_creates_root() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path().join("nested").join("root");
        factory(&root)?;

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&root)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        Ok(())
    }

    #[test]
    fn test_create_and_load() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;

        let mut container = factory.create("c1", config())?;
        assert_eq!(container.status()?, Status::Stopped);
        assert!(State::file_path(&tmp.path().join("c1")).exists());

        let mut loaded = factory.load("c1")?;
        assert_eq!(loaded.config(), container.config());
        assert_eq!(loaded.created(), container.created());
        assert_eq!(loaded.status()?, Status::Stopped);
        assert!(loaded.pid().is_none());
        Ok(())
    }

    #[test]
    fn test_create_twice() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;

        factory.create("c1", config())?;
        let err = factory.create("c1", config()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IdInUse);
        Ok(())
    }

    #[test]
    fn test_invalid_create_leaves_no_trace() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;

        let err = factory.create("../escape", config()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidIdFormat);

        let err = factory.create("c1", Config::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);

        assert_eq!(fs::read_dir(tmp.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_root() -> Result<()> {
        let factory = Factory::new(FactoryConfig::new(""))?;
        assert_eq!(
            factory.create("c1", config()).unwrap_err().code(),
            ErrorCode::ConfigInvalid
        );
        assert_eq!(
            factory.load("c1").unwrap_err().code(),
            ErrorCode::ConfigInvalid
        );
        Ok(())
    }

    #[test]
    fn test_load_errors() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;

        let err = factory.load("missing").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ContainerNotExists);

        fs::create_dir(tmp.path().join("corrupt"))?;
        fs::write(State::file_path(&tmp.path().join("corrupt")), "not json")?;
        let err = factory.load("corrupt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SystemError);
        Ok(())
    }

    #[test]
    fn test_load_dead_process_is_stopped() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;
        let container = factory.create("c1", config())?;

        let mut state = container.state();
        state.init_process_pid = std::process::id() as i32;
        // a start time that can never match the running process
        state.init_process_start = u64::MAX;
        state.save(container.root())?;

        let mut loaded = factory.load("c1")?;
        assert_eq!(loaded.status()?, Status::Stopped);
        Ok(())
    }

    #[test]
    fn test_rootless_container_is_recorded() -> Result<()> {
        if nix::unistd::geteuid().is_root() {
            return Ok(());
        }

        let tmp = tempfile::tempdir()?;
        let factory = factory(tmp.path())?;
        let container = factory.create("c1", config())?;
        assert!(container.rootless());
        assert!(container.cgroup_manager().is_rootless());

        let loaded = factory.load("c1")?;
        assert!(loaded.rootless());
        assert!(loaded.cgroup_manager().is_rootless());
        assert!(loaded.cgroup_manager().freeze(libcgroups::common::FreezerState::Frozen).is_err());
        Ok(())
    }
}
