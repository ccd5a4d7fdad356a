//! Configuration of a container as consumed by the factory. It is supplied
//! by the caller (usually translated from an OCI bundle, see `specconv`)
//! and is never modified after validation.
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use libcgroups::resources::Cgroup;
use serde::{Deserialize, Serialize};

/// Label carrying the bundle directory of the container
pub const BUNDLE_LABEL: &str = "bundle";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Mount,
    Uts,
    Ipc,
    Network,
    Pid,
    User,
    Cgroup,
}

impl Display for NamespaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            NamespaceType::Mount => "mount",
            NamespaceType::Uts => "uts",
            NamespaceType::Ipc => "ipc",
            NamespaceType::Network => "network",
            NamespaceType::Pid => "pid",
            NamespaceType::User => "user",
            NamespaceType::Cgroup => "cgroup",
        };

        write!(f, "{print}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub typ: NamespaceType,
    /// Existing namespace to join instead of creating a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    /// Filesystem type, `bind` for bind mounts
    pub device: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Mount {
    pub fn is_bind(&self) -> bool {
        self.device == "bind" || self.options.iter().any(|o| o == "bind" || o == "rbind")
    }
}

/// Maps a range of ids inside the container to a range on the host
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

/// The process executed in the container
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub cwd: PathBuf,
    #[serde(default)]
    pub no_new_privileges: bool,
}

impl Default for Process {
    fn default() -> Self {
        Self {
            args: vec!["sh".to_string()],
            env: vec!["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()],
            cwd: PathBuf::from("/"),
            no_new_privileges: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub rootfs: PathBuf,
    #[serde(default)]
    pub readonly_rootfs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub uid_mappings: Vec<IdMap>,
    #[serde(default)]
    pub gid_mappings: Vec<IdMap>,
    #[serde(default)]
    pub cgroup: Cgroup,
    #[serde(default)]
    pub process: Process,
    /// `key=value` pairs. `bundle=<path>` records the bundle directory.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Config {
    pub fn namespace(&self, typ: NamespaceType) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.typ == typ)
    }

    pub fn has_namespace(&self, typ: NamespaceType) -> bool {
        self.namespace(typ).is_some()
    }

    /// Host uid that container root is mapped to. Without a user namespace
    /// container root is host root. `None` if a user namespace is requested
    /// but root is not mapped.
    pub fn host_uid(&self) -> Option<u32> {
        if !self.has_namespace(NamespaceType::User) {
            return Some(0);
        }
        host_id_for_root(&self.uid_mappings)
    }

    /// Host gid that container root is mapped to, see [`Config::host_uid`]
    pub fn host_gid(&self) -> Option<u32> {
        if !self.has_namespace(NamespaceType::User) {
            return Some(0);
        }
        host_id_for_root(&self.gid_mappings)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find_map(|label| {
            label
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    pub fn bundle(&self) -> Option<&Path> {
        self.label(BUNDLE_LABEL).map(Path::new)
    }

    /// Every label except the bundle one, as a map
    pub fn annotations(&self) -> HashMap<String, String> {
        self.labels
            .iter()
            .filter_map(|label| label.split_once('='))
            .filter(|(k, _)| *k != BUNDLE_LABEL)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

fn host_id_for_root(mappings: &[IdMap]) -> Option<u32> {
    mappings
        .iter()
        .find(|m| m.container_id == 0 && m.size > 0)
        .map(|m| m.host_id)
}
