//! Consistency checks of a container configuration. Validation never touches
//! the filesystem.
use std::collections::HashSet;

use libcgroups::resources::Resources;

use crate::configs::{Config, IdMap, NamespaceType};

pub mod rootless;

pub use rootless::RootlessValidator;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("invalid rootfs: {0}")]
    Rootfs(String),
    #[error("invalid namespaces: {0}")]
    Namespaces(String),
    #[error("invalid id mappings: {0}")]
    Mappings(String),
    #[error("invalid mount: {0}")]
    Mounts(String),
    #[error("invalid process: {0}")]
    Process(String),
    #[error("invalid resources: {0}")]
    Resources(String),
    #[error("{0}")]
    Rootless(String),
}

type Result<T> = std::result::Result<T, ValidateError>;

pub trait ConfigValidator: std::fmt::Debug {
    fn validate(&self, config: &Config) -> Result<()>;
}

/// Validator used by the factory unless the caller provides its own
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardValidator;

impl ConfigValidator for StandardValidator {
    fn validate(&self, config: &Config) -> Result<()> {
        rootfs(config)?;
        namespaces(config)?;
        user_namespace(config)?;
        mounts(config)?;
        process(config)?;
        resources(&config.cgroup.resources)?;
        Ok(())
    }
}

fn rootfs(config: &Config) -> Result<()> {
    if config.rootfs.as_os_str().is_empty() {
        return Err(ValidateError::Rootfs("rootfs is empty".to_string()));
    }
    if !config.rootfs.is_absolute() {
        return Err(ValidateError::Rootfs(format!(
            "{:?} is not an absolute path",
            config.rootfs
        )));
    }
    Ok(())
}

fn namespaces(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for ns in &config.namespaces {
        if !seen.insert(ns.typ) {
            return Err(ValidateError::Namespaces(format!(
                "{} namespace is specified more than once",
                ns.typ
            )));
        }
        if let Some(path) = &ns.path {
            if !path.is_absolute() {
                return Err(ValidateError::Namespaces(format!(
                    "path {path:?} of the {} namespace is not absolute",
                    ns.typ
                )));
            }
        }
    }

    if config.hostname.is_some() && !config.has_namespace(NamespaceType::Uts) {
        return Err(ValidateError::Namespaces(
            "unable to set hostname without a private UTS namespace".to_string(),
        ));
    }
    Ok(())
}

fn user_namespace(config: &Config) -> Result<()> {
    let has_mappings = !config.uid_mappings.is_empty() || !config.gid_mappings.is_empty();
    if config.has_namespace(NamespaceType::User) {
        if config.uid_mappings.is_empty() || config.gid_mappings.is_empty() {
            return Err(ValidateError::Mappings(
                "user namespace enabled, but no uid or gid mappings found".to_string(),
            ));
        }
    } else if has_mappings {
        return Err(ValidateError::Mappings(
            "id mappings specified, but no user namespace enabled".to_string(),
        ));
    }

    let zero_sized = |m: &IdMap| m.size == 0;
    if config.uid_mappings.iter().any(zero_sized) || config.gid_mappings.iter().any(zero_sized) {
        return Err(ValidateError::Mappings(
            "id mappings of size 0 are not allowed".to_string(),
        ));
    }
    Ok(())
}

fn mounts(config: &Config) -> Result<()> {
    for mount in &config.mounts {
        if !mount.destination.is_absolute() {
            return Err(ValidateError::Mounts(format!(
                "destination {:?} is not absolute",
                mount.destination
            )));
        }
        if mount.is_bind() && mount.source.is_none() {
            return Err(ValidateError::Mounts(format!(
                "bind mount to {:?} has no source",
                mount.destination
            )));
        }
    }
    Ok(())
}

fn process(config: &Config) -> Result<()> {
    let process = &config.process;
    if process.args.is_empty() {
        return Err(ValidateError::Process("args must not be empty".to_string()));
    }
    if !process.cwd.is_absolute() {
        return Err(ValidateError::Process(format!(
            "cwd {:?} is not an absolute path",
            process.cwd
        )));
    }
    Ok(())
}

fn resources(resources: &Resources) -> Result<()> {
    for (name, value) in [
        ("memory", resources.memory),
        ("memory_reservation", resources.memory_reservation),
        ("memory_swap", resources.memory_swap),
    ] {
        if let Some(v) = value {
            if v < -1 {
                return Err(ValidateError::Resources(format!(
                    "{name} must be -1 or positive, got {v}"
                )));
            }
        }
    }

    if let (Some(limit), Some(reservation)) = (resources.memory, resources.memory_reservation) {
        if limit > 0 && reservation > 0 && reservation > limit {
            return Err(ValidateError::Resources(format!(
                "memory reservation {reservation} exceeds memory limit {limit}"
            )));
        }
    }

    if let (Some(limit), Some(swap)) = (resources.memory, resources.memory_swap) {
        if limit > 0 && swap > 0 && swap < limit {
            return Err(ValidateError::Resources(format!(
                "memory+swap limit {swap} is lower than memory limit {limit}"
            )));
        }
    }

    if let Some(swappiness) = resources.memory_swappiness {
        if swappiness > 100 {
            return Err(ValidateError::Resources(format!(
                "swappiness {swappiness} is out of range 0..=100"
            )));
        }
    }

    if let Some(shares) = resources.cpu_shares {
        if !(2..=262144).contains(&shares) {
            return Err(ValidateError::Resources(format!(
                "cpu shares {shares} out of range 2..=262144"
            )));
        }
    }

    if let Some(period) = resources.cpu_period {
        if !(1000..=1_000_000).contains(&period) {
            return Err(ValidateError::Resources(format!(
                "cpu period {period} out of range 1000..=1000000"
            )));
        }
    }

    if let Some(quota) = resources.cpu_quota {
        if quota < -1 || (quota > 0 && quota < 1000) {
            return Err(ValidateError::Resources(format!(
                "cpu quota {quota} must be -1 or at least 1000"
            )));
        }
    }

    if let Some(pids) = resources.pids_limit {
        if pids < -1 {
            return Err(ValidateError::Resources(format!(
                "pids limit {pids} must be -1 or positive"
            )));
        }
    }

    for (name, list) in [
        ("cpuset cpus", &resources.cpuset_cpus),
        ("cpuset mems", &resources.cpuset_mems),
    ] {
        if let Some(list) = list {
            if !is_valid_cpu_list(list) {
                return Err(ValidateError::Resources(format!(
                    "{name} {list:?} is not a valid list"
                )));
            }
        }
    }

    Ok(())
}

/// Accepts the kernel list format, e.g. `0-3,5`
fn is_valid_cpu_list(list: &str) -> bool {
    if list.is_empty() {
        return true;
    }

    list.split(',').all(|item| match item.split_once('-') {
        Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
            (Ok(start), Ok(end)) => start <= end,
            _ => false,
        },
        None => item.parse::<u32>().is_ok(),
    })
}
