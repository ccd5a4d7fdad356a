use libcgroups::resources::Resources;

use super::{ConfigValidator, Result, ValidateError};
use crate::configs::Config;

/// Additional checks for containers created by an unprivileged user. Such
/// a user can neither limit resources nor chown mounts to other ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct RootlessValidator;

impl ConfigValidator for RootlessValidator {
    fn validate(&self, config: &Config) -> Result<()> {
        if let Some(field) = non_default_resource(&config.cgroup.resources) {
            return Err(ValidateError::Rootless(format!(
                "cannot specify resource limits in rootless container: field {field:?} is non-default"
            )));
        }

        for mount in &config.mounts {
            if let Some(option) = mount.options.iter().find(|o| maps_other_id(o)) {
                return Err(ValidateError::Rootless(format!(
                    "cannot specify {option} mount option for rootless container: \
                     user namespaces only support a single mapped id"
                )));
            }
        }

        Ok(())
    }
}

/// Name of the first field that differs from the default. Device rules are
/// ignored, they are never enforced for rootless containers.
fn non_default_resource(resources: &Resources) -> Option<&'static str> {
    let default = Resources::default();
    let differs = [
        ("memory", resources.memory != default.memory),
        (
            "memory_reservation",
            resources.memory_reservation != default.memory_reservation,
        ),
        ("memory_swap", resources.memory_swap != default.memory_swap),
        (
            "memory_swappiness",
            resources.memory_swappiness != default.memory_swappiness,
        ),
        (
            "oom_kill_disable",
            resources.oom_kill_disable != default.oom_kill_disable,
        ),
        ("cpu_shares", resources.cpu_shares != default.cpu_shares),
        ("cpu_quota", resources.cpu_quota != default.cpu_quota),
        ("cpu_period", resources.cpu_period != default.cpu_period),
        ("cpuset_cpus", resources.cpuset_cpus != default.cpuset_cpus),
        ("cpuset_mems", resources.cpuset_mems != default.cpuset_mems),
        ("pids_limit", resources.pids_limit != default.pids_limit),
        ("freezer", resources.freezer != default.freezer),
    ];

    differs
        .into_iter()
        .find(|(_, differs)| *differs)
        .map(|(name, _)| name)
}

/// Any `uid=`/`gid=` option other than the literal `uid=0`/`gid=0`
fn maps_other_id(option: &str) -> bool {
    match option
        .strip_prefix("uid=")
        .or_else(|| option.strip_prefix("gid="))
    {
        Some(value) => value != "0",
        None => false,
    }
}
