//! Description of a control group and the resource limits applied to it.
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::FreezerState;

/// Describes the control group a container is placed in.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Cgroup {
    /// Name of the cgroup, usually the container id.
    #[serde(default)]
    pub name: String,
    /// Parent of the cgroup, e.g. a systemd slice.
    #[serde(default)]
    pub parent: String,
    /// Path of the cgroup relative to the hierarchy root. For the systemd
    /// backend this is `slice:prefix:name`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Absolute paths of existing cgroups to join, keyed by subsystem.
    /// When set no new cgroup is created.
    #[serde(default)]
    pub paths: Option<HashMap<String, PathBuf>>,
    #[serde(default)]
    pub resources: Resources,
}

impl Cgroup {
    /// Path of the cgroup relative to the root of a hierarchy.
    pub fn relative_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }

        let parent = if self.parent.is_empty() {
            "hutch"
        } else {
            self.parent.as_str()
        };
        PathBuf::from("/").join(parent).join(&self.name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    #[serde(rename = "a")]
    All,
    #[serde(rename = "c")]
    Char,
    #[serde(rename = "b")]
    Block,
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            DeviceType::All => "a",
            DeviceType::Char => "c",
            DeviceType::Block => "b",
        };

        write!(f, "{print}")
    }
}

/// A single device access rule of the devices controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceRule {
    pub allow: bool,
    #[serde(rename = "type", default)]
    pub typ: DeviceType,
    /// `None` matches all majors.
    #[serde(default)]
    pub major: Option<i64>,
    /// `None` matches all minors.
    #[serde(default)]
    pub minor: Option<i64>,
    /// Combination of `r`, `w` and `m`.
    pub access: String,
}

impl DeviceRule {
    /// Renders the rule in the `type major:minor access` form used by the
    /// devices controller.
    pub fn to_rule_string(&self) -> String {
        let major = self
            .major
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());
        let minor = self
            .minor
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());
        format!("{} {}:{} {}", self.typ, major, minor, self.access)
    }
}

/// Resource limits of a cgroup. `Resources::default()` means "nothing set".
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Resources {
    pub devices: Vec<DeviceRule>,
    /// Memory limit in bytes, -1 for unlimited.
    pub memory: Option<i64>,
    /// Soft memory limit in bytes.
    pub memory_reservation: Option<i64>,
    /// Memory plus swap limit in bytes, -1 for unlimited.
    pub memory_swap: Option<i64>,
    pub memory_swappiness: Option<u64>,
    pub oom_kill_disable: bool,
    /// Relative cpu weight (cgroup v1 semantics, 2..=262144).
    pub cpu_shares: Option<u64>,
    /// Allowed cpu time in a period in microseconds, -1 for unlimited.
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<u64>,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    /// Maximum number of tasks, -1 for unlimited.
    pub pids_limit: Option<i64>,
    pub freezer: Option<FreezerState>,
}

impl Resources {
    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
            || self.memory_reservation.is_some()
            || self.memory_swap.is_some()
            || self.memory_swappiness.is_some()
            || self.oom_kill_disable
    }

    pub fn has_cpu(&self) -> bool {
        self.cpu_shares.is_some() || self.cpu_quota.is_some() || self.cpu_period.is_some()
    }

    pub fn has_cpuset(&self) -> bool {
        self.cpuset_cpus.is_some() || self.cpuset_mems.is_some()
    }
}
