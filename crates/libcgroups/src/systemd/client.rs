use std::collections::HashMap;
use std::path::PathBuf;

/// Value of a unit property sent to systemd
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    U64(u64),
    U32(u32),
    Bool(bool),
    String(String),
    ArrayU32(Vec<u32>),
}

#[derive(thiserror::Error, Debug)]
pub enum SystemdClientError {
    #[cfg(feature = "systemd")]
    #[error("dbus call {method} failed: {err}")]
    Dbus {
        method: &'static str,
        #[source]
        err: ::dbus::Error,
    },
    #[error("could not parse systemd version from {0:?}")]
    SystemdVersion(String),
    #[error("failed to {action} unit {unit}: {message}")]
    Unit {
        action: &'static str,
        unit: String,
        message: String,
    },
}

/// Operations of the systemd manager used to run a container in a
/// transient unit.
pub trait SystemdClient {
    /// Whether the client talks to the system instance of systemd
    fn is_system(&self) -> bool;

    fn start_transient_unit(
        &self,
        container_name: &str,
        pid: u32,
        parent: &str,
        unit_name: &str,
    ) -> Result<(), SystemdClientError>;

    fn stop_transient_unit(&self, unit_name: &str) -> Result<(), SystemdClientError>;

    fn set_unit_properties(
        &self,
        unit_name: &str,
        properties: &HashMap<&str, Variant>,
    ) -> Result<(), SystemdClientError>;

    fn systemd_version(&self) -> Result<u32, SystemdClientError>;

    /// Cgroup of systemd's own control process, relative to the hierarchy
    /// root. Units are placed below it.
    fn control_cgroup_root(&self) -> Result<PathBuf, SystemdClientError>;
}

/// Extracts the numeric version from strings such as `249.11-0ubuntu3` or `v245`.
#[cfg(feature = "systemd")]
pub(crate) fn parse_systemd_version(version: &str) -> Result<u32, SystemdClientError> {
    version
        .trim_matches('"')
        .chars()
        .skip_while(|c| c.is_alphabetic())
        .take_while(|c| c.is_numeric())
        .collect::<String>()
        .parse::<u32>()
        .map_err(|_| SystemdClientError::SystemdVersion(version.to_owned()))
}
