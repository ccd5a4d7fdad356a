use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use nix::unistd::Pid;

use super::client::{SystemdClient, SystemdClientError};
use super::controller::Controller;
use super::cpu::{Cpu, SystemdCpuError};
use super::memory::{Memory, SystemdMemoryError};
use super::pids::Pids;
use crate::common::{self, CgroupManager, FreezerState, UNIFIED_KEY};
use crate::resources::{Cgroup, Resources};
use crate::stats::Stats;
use crate::v2::manager::{Manager as FsManager, V2ManagerError};

const DEFAULT_PREFIX: &str = "hutch";
const SLICE_SUFFIX: &str = ".slice";

#[derive(thiserror::Error, Debug)]
pub enum SystemdManagerError {
    #[error("hutch was built without systemd cgroup support")]
    NotEnabled,
    #[error("invalid slice name: {0}")]
    InvalidSliceName(String),
    #[error("bad cgroups path {0}, expected slice:prefix:name")]
    BadCgroupsPath(String),
    #[error("systemd client error: {0}")]
    Client(#[from] SystemdClientError),
    #[error("cpu: {0}")]
    Cpu(#[from] SystemdCpuError),
    #[error("memory: {0}")]
    Memory(#[from] SystemdMemoryError),
    #[error(transparent)]
    Fs(#[from] V2ManagerError),
}

/// `slice:prefix:name` as accepted for systemd managed cgroups. An empty
/// slice means the default slice of the systemd instance.
#[derive(Debug, PartialEq, Eq)]
struct UnitPath {
    slice: String,
    prefix: String,
    name: String,
}

impl UnitPath {
    fn from_cgroup(cgroup: &Cgroup) -> Result<Self, SystemdManagerError> {
        let Some(path) = &cgroup.path else {
            return Ok(UnitPath {
                slice: cgroup.parent.clone(),
                prefix: DEFAULT_PREFIX.to_owned(),
                name: cgroup.name.clone(),
            });
        };

        let path = path.to_string_lossy();
        match path.split(':').collect::<Vec<_>>()[..] {
            [slice, prefix, name] if !name.is_empty() => Ok(UnitPath {
                slice: slice.to_owned(),
                prefix: prefix.to_owned(),
                name: name.to_owned(),
            }),
            _ => Err(SystemdManagerError::BadCgroupsPath(path.to_string())),
        }
    }

    /// A name that is a slice already is used as is, anything else runs in
    /// a `<prefix>-<name>.scope`
    fn unit_name(&self) -> String {
        if self.name.ends_with(SLICE_SUFFIX) {
            self.name.clone()
        } else {
            format!("{}-{}.scope", self.prefix, self.name)
        }
    }

    fn slice_or_default(&self, client: &dyn SystemdClient) -> String {
        match self.slice.as_str() {
            "" if client.is_system() => "system.slice".to_owned(),
            "" => "user.slice".to_owned(),
            slice => slice.to_owned(),
        }
    }
}

impl fmt::Display for UnitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.slice, self.prefix, self.name)
    }
}

/// Turns a slice name into its cgroup path. Dashes nest slices, so
/// `a-b-c.slice` lives at `/a.slice/a-b.slice/a-b-c.slice` and `-.slice`
/// is the root.
fn expand_slice(slice: &str) -> Result<PathBuf, SystemdManagerError> {
    let invalid = || SystemdManagerError::InvalidSliceName(slice.to_owned());
    let stem = slice.strip_suffix(SLICE_SUFFIX).ok_or_else(invalid)?;
    if stem.is_empty() || slice.contains('/') {
        return Err(invalid());
    }
    if stem == "-" {
        return Ok(PathBuf::from("/"));
    }

    let mut path = PathBuf::from("/");
    let mut ancestors: Vec<&str> = Vec::new();
    for part in stem.split('-') {
        if part.is_empty() {
            return Err(invalid());
        }
        ancestors.push(part);
        path.push(format!("{}{SLICE_SUFFIX}", ancestors.join("-")));
    }
    Ok(path)
}

/// Runs the container in a transient systemd unit. Limits become unit
/// properties; whatever systemd cannot express is written to the unit's
/// cgroup directly.
pub struct Manager {
    unit: UnitPath,
    slice: String,
    unit_name: String,
    container_name: String,
    client: Box<dyn SystemdClient>,
    fs: FsManager,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("unit", &self.unit)
            .field("unit_name", &self.unit_name)
            .field("fs", &self.fs)
            .finish_non_exhaustive()
    }
}

impl Manager {
    pub fn new(
        root_path: PathBuf,
        cgroup: &Cgroup,
        container_name: String,
        client: Box<dyn SystemdClient>,
    ) -> Result<Self, SystemdManagerError> {
        let unit = UnitPath::from_cgroup(cgroup)?;
        let slice = unit.slice_or_default(client.as_ref());
        let unit_name = unit.unit_name();
        let relative = Self::unit_cgroup(&slice, &unit_name, client.as_ref())?;
        tracing::debug!("unit {} of {} lives at {:?}", unit_name, unit, relative);

        let fs = FsManager::new(
            root_path.clone(),
            &Cgroup::default(),
            Some(&HashMap::from([(
                UNIFIED_KEY.to_owned(),
                common::join_under(&root_path, &relative),
            )])),
        )?;

        Ok(Manager {
            unit,
            slice,
            unit_name,
            container_name,
            client,
            fs,
        })
    }

    /// Cgroup of the unit relative to the hierarchy root, e.g.
    /// `/system.slice/hutch-c1.scope`
    fn unit_cgroup(
        slice: &str,
        unit_name: &str,
        client: &dyn SystemdClient,
    ) -> Result<PathBuf, SystemdManagerError> {
        let root = client.control_cgroup_root()?;
        Ok(common::join_under(&root, expand_slice(slice)?).join(unit_name))
    }

    fn full_path(&self) -> PathBuf {
        self.fs
            .get_paths()
            .remove(UNIFIED_KEY)
            .unwrap_or_default()
    }
}

impl CgroupManager for Manager {
    type Error = SystemdManagerError;

    fn apply(&self, pid: Pid) -> Result<(), Self::Error> {
        tracing::debug!("starting {:?}", self.unit_name);
        self.client.start_transient_unit(
            &self.container_name,
            pid.as_raw() as u32,
            &self.slice,
            &self.unit_name,
        )?;

        Ok(())
    }

    fn set(&self, resources: &Resources) -> Result<(), Self::Error> {
        let mut properties = HashMap::new();
        let systemd_version = self.client.systemd_version()?;

        Cpu::apply(resources, systemd_version, &mut properties)?;
        Memory::apply(resources, systemd_version, &mut properties)?;
        Pids::apply(resources, systemd_version, &mut properties)
            .unwrap_or_else(|never| match never {});

        if !properties.is_empty() {
            tracing::debug!("{:?}", properties);
            self.client
                .set_unit_properties(&self.unit_name, &properties)?;
        }

        // cpusets and the freezer have no unit property that works on
        // every systemd version
        let fs_only = Resources {
            cpuset_cpus: resources.cpuset_cpus.clone(),
            cpuset_mems: resources.cpuset_mems.clone(),
            freezer: resources.freezer,
            ..Default::default()
        };
        if fs_only != Resources::default() {
            self.fs.set(&fs_only)?;
        }

        Ok(())
    }

    fn get_paths(&self) -> HashMap<String, PathBuf> {
        self.fs.get_paths()
    }

    fn get_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        Ok(self.fs.get_pids()?)
    }

    fn get_all_pids(&self) -> Result<Vec<Pid>, Self::Error> {
        Ok(self.fs.get_all_pids()?)
    }

    fn stats(&self) -> Result<Stats, Self::Error> {
        Ok(self.fs.stats()?)
    }

    fn freeze(&self, state: FreezerState) -> Result<(), Self::Error> {
        Ok(self.fs.freeze(state)?)
    }

    fn freezer_state(&self) -> Result<FreezerState, Self::Error> {
        Ok(self.fs.freezer_state()?)
    }

    fn destroy(&self) -> Result<(), Self::Error> {
        tracing::debug!("remove {}", self.unit_name);
        if let Err(err) = self.client.stop_transient_unit(&self.unit_name) {
            // the unit is gone together with its cgroup
            if self.full_path().exists() {
                return Err(err.into());
            }
            tracing::debug!("unit {} already stopped: {}", self.unit_name, err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::Result;

    use super::*;
    use crate::systemd::client::Variant;

    #[derive(Default)]
    struct Calls {
        started: Vec<(String, u32, String)>,
        stopped: Vec<String>,
        properties: Vec<HashMap<String, Variant>>,
    }

    struct TestSystemdClient {
        calls: Rc<RefCell<Calls>>,
    }

    impl TestSystemdClient {
        fn new() -> (Self, Rc<RefCell<Calls>>) {
            let calls = Rc::new(RefCell::new(Calls::default()));
            (
                TestSystemdClient {
                    calls: Rc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl SystemdClient for TestSystemdClient {
        fn is_system(&self) -> bool {
            true
        }

        fn start_transient_unit(
            &self,
            _container_name: &str,
            pid: u32,
            parent: &str,
            unit_name: &str,
        ) -> Result<(), SystemdClientError> {
            self.calls
                .borrow_mut()
                .started
                .push((unit_name.to_owned(), pid, parent.to_owned()));
            Ok(())
        }

        fn stop_transient_unit(&self, unit_name: &str) -> Result<(), SystemdClientError> {
            self.calls.borrow_mut().stopped.push(unit_name.to_owned());
            Ok(())
        }

        fn set_unit_properties(
            &self,
            _unit_name: &str,
            properties: &HashMap<&str, Variant>,
        ) -> Result<(), SystemdClientError> {
            self.calls.borrow_mut().properties.push(
                properties
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            );
            Ok(())
        }

        fn systemd_version(&self) -> Result<u32, SystemdClientError> {
            Ok(245)
        }

        fn control_cgroup_root(&self) -> Result<PathBuf, SystemdClientError> {
            Ok(PathBuf::from("/"))
        }
    }

    fn cgroup_with_path(path: &str) -> Cgroup {
        Cgroup {
            path: Some(PathBuf::from(path)),
            ..Default::default()
        }
    }

    fn unit_cgroup_of(path: &str) -> Result<PathBuf> {
        let (client, _) = TestSystemdClient::new();
        let unit = UnitPath::from_cgroup(&cgroup_with_path(path))?;
        let slice = unit.slice_or_default(&client);
        Ok(Manager::unit_cgroup(&slice, &unit.unit_name(), &client)?)
    }

    #[test]
    fn test_expand_slice() -> Result<()> {
        assert_eq!(
            expand_slice("team-a-b.slice")?,
            PathBuf::from("/team.slice/team-a.slice/team-a-b.slice")
        );
        assert_eq!(expand_slice("machine.slice")?, PathBuf::from("/machine.slice"));
        assert_eq!(expand_slice("-.slice")?, PathBuf::from("/"));
        for bad in ["team--a.slice", "-team.slice", ".slice", "team", "a/b.slice"] {
            assert!(expand_slice(bad).is_err(), "{bad} was accepted");
        }
        Ok(())
    }

    #[test]
    fn test_unit_cgroup() -> Result<()> {
        assert_eq!(
            unit_cgroup_of("team-a.slice:podman:c1")?,
            PathBuf::from("/team.slice/team-a.slice/podman-c1.scope")
        );
        assert_eq!(
            unit_cgroup_of(":hutch:c1")?,
            PathBuf::from("/system.slice/hutch-c1.scope")
        );
        assert_eq!(
            unit_cgroup_of("machine.slice:hutch:inner.slice")?,
            PathBuf::from("/machine.slice/inner.slice")
        );
        Ok(())
    }

    #[test]
    fn test_unit_path_parsing() -> Result<()> {
        let unit = UnitPath::from_cgroup(&cgroup_with_path("machine.slice:hutch:c1"))?;
        assert_eq!(unit.to_string(), "machine.slice:hutch:c1");
        assert_eq!(unit.unit_name(), "hutch-c1.scope");

        for bad in ["/hutch/c1", "a:b", "machine.slice:hutch:", "a:b:c:d"] {
            assert!(matches!(
                UnitPath::from_cgroup(&cgroup_with_path(bad)),
                Err(SystemdManagerError::BadCgroupsPath(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn default_path_from_name() -> Result<()> {
        let (client, calls) = TestSystemdClient::new();
        let cgroup = Cgroup {
            name: "c1".to_owned(),
            ..Default::default()
        };
        let manager = Manager::new(
            PathBuf::from("/sys/fs/cgroup"),
            &cgroup,
            "c1".to_owned(),
            Box::new(client),
        )?;

        assert_eq!(
            manager.get_paths()[UNIFIED_KEY],
            PathBuf::from("/sys/fs/cgroup/system.slice/hutch-c1.scope")
        );

        manager.apply(Pid::from_raw(42))?;
        manager.destroy()?;
        let calls = calls.borrow();
        assert_eq!(
            calls.started,
            vec![("hutch-c1.scope".to_owned(), 42, "system.slice".to_owned())]
        );
        assert_eq!(calls.stopped, vec!["hutch-c1.scope".to_owned()]);
        Ok(())
    }

    #[test]
    fn set_sends_unit_properties() -> Result<()> {
        let (client, calls) = TestSystemdClient::new();
        let manager = Manager::new(
            PathBuf::from("/sys/fs/cgroup"),
            &cgroup_with_path("machine.slice:hutch:c1"),
            "c1".to_owned(),
            Box::new(client),
        )?;
        let resources = Resources {
            memory: Some(1 << 20),
            pids_limit: Some(64),
            ..Default::default()
        };

        manager.set(&resources)?;
        let calls = calls.borrow();
        assert_eq!(calls.properties.len(), 1);
        assert_eq!(calls.properties[0]["MemoryMax"], Variant::U64(1 << 20));
        assert_eq!(calls.properties[0]["TasksMax"], Variant::U64(64));
        Ok(())
    }
}
