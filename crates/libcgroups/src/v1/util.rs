use std::collections::HashMap;
use std::path::PathBuf;

use procfs::process::Process;
use procfs::ProcError;

use super::ControllerType;

#[derive(thiserror::Error, Debug)]
pub enum V1MountPointError {
    #[error("failed to read the mount table: {0}")]
    MountInfo(#[from] ProcError),
    #[error("no {0} hierarchy is mounted")]
    NotFound(ControllerType),
}

/// Controllers attached to a mount, taken from its super options. A
/// comounted `cpu,cpuacct` hierarchy carries both.
fn attached_controllers<'a>(
    fs_type: &str,
    super_options: &'a HashMap<String, Option<String>>,
) -> impl Iterator<Item = ControllerType> + 'a {
    let is_cgroup = fs_type == "cgroup";
    super_options
        .keys()
        .filter(move |_| is_cgroup)
        .filter_map(|option| ControllerType::from_name(option))
}

/// First mount point of every supported controller that is mounted
pub fn subsystem_mount_points() -> Result<HashMap<ControllerType, PathBuf>, V1MountPointError> {
    let mut mount_points = HashMap::new();
    for mount in Process::myself()?.mountinfo()? {
        for controller in attached_controllers(&mount.fs_type, &mount.super_options) {
            mount_points
                .entry(controller)
                .or_insert_with(|| mount.mount_point.clone());
        }
    }
    Ok(mount_points)
}

pub fn subsystem_mount_point(controller: ControllerType) -> Result<PathBuf, V1MountPointError> {
    subsystem_mount_points()?
        .remove(&controller)
        .ok_or(V1MountPointError::NotFound(controller))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn options(names: &[&str]) -> HashMap<String, Option<String>> {
        names.iter().map(|name| (name.to_string(), None)).collect()
    }

    #[test]
    fn test_attached_controllers() {
        let comounted = options(&["rw", "cpu", "cpuacct"]);
        let found: HashSet<_> = attached_controllers("cgroup", &comounted).collect();
        assert_eq!(
            found,
            HashSet::from([ControllerType::Cpu, ControllerType::CpuAcct])
        );

        let named = options(&["rw", "name=systemd"]);
        assert_eq!(attached_controllers("cgroup", &named).count(), 0);

        let unified = options(&["rw", "memory"]);
        assert_eq!(attached_controllers("cgroup2", &unified).count(), 0);
    }
}
