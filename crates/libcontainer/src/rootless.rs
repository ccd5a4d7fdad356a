//! Detection of rootless containers, i.e. containers whose creator is not
//! root on the host and which therefore live in a user namespace that maps
//! exactly the creator's ids.
use std::env;

use nix::unistd::{Gid, Uid};

use crate::configs::{Config, IdMap, NamespaceType};

/// Forces rootless behaviour even for root when set
pub const USE_ROOTLESS_ENV: &str = "HUTCH_USE_ROOTLESS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RootlessError {
    #[error("rootless containers require user namespaces")]
    NoUserNamespace,
    #[error("rootless containers cannot map container root to a different host user")]
    ForeignUser,
    #[error("rootless containers cannot map more than one user")]
    MultipleUsers,
    #[error("rootless containers cannot map more than one group")]
    MultipleGroups,
    #[error("rootless containers cannot map container root to a different host group")]
    ForeignGroup,
}

/// Decides whether a container with this config created by the current
/// user is rootless
pub fn is_rootless(config: &Config) -> Result<bool, RootlessError> {
    is_rootless_with(config, Uid::effective(), Gid::effective())
}

/// Root never creates rootless containers. Anybody else must request a
/// user namespace in which container root is mapped to themselves and to
/// nobody else.
pub fn is_rootless_with(config: &Config, euid: Uid, egid: Gid) -> Result<bool, RootlessError> {
    if euid.is_root() {
        return Ok(false);
    }

    if !config.has_namespace(NamespaceType::User) {
        return Err(RootlessError::NoUserNamespace);
    }

    if config.host_uid() != Some(euid.as_raw()) {
        return Err(RootlessError::ForeignUser);
    }
    if !is_single_mapping(&config.uid_mappings) {
        return Err(RootlessError::MultipleUsers);
    }
    if !is_single_mapping(&config.gid_mappings) {
        return Err(RootlessError::MultipleGroups);
    }
    if config.host_gid() != Some(egid.as_raw()) {
        return Err(RootlessError::ForeignGroup);
    }

    Ok(true)
}

fn is_single_mapping(mappings: &[IdMap]) -> bool {
    matches!(mappings, [mapping] if mapping.size == 1)
}

/// True if the runtime itself has to behave rootless, e.g. when choosing
/// the directory that holds container state
pub fn rootless_required() -> bool {
    if !nix::unistd::geteuid().is_root() {
        return true;
    }

    matches!(env::var(USE_ROOTLESS_ENV).as_deref(), Ok(value) if !value.is_empty() && value != "false")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use serial_test::serial;

    use super::*;
    use crate::configs::Namespace;

    fn rootless_config(uid: u32, gid: u32) -> Config {
        Config {
            rootfs: PathBuf::from("/rootfs"),
            namespaces: vec![Namespace {
                typ: NamespaceType::User,
                path: None,
            }],
            uid_mappings: vec![IdMap {
                container_id: 0,
                host_id: uid,
                size: 1,
            }],
            gid_mappings: vec![IdMap {
                container_id: 0,
                host_id: gid,
                size: 1,
            }],
            ..Default::default()
        }
    }

    fn user() -> (Uid, Gid) {
        (Uid::from_raw(1000), Gid::from_raw(1000))
    }

    #[test]
    fn test_root_is_never_rootless() -> Result<()> {
        let root = (Uid::from_raw(0), Gid::from_raw(0));
        assert!(!is_rootless_with(&Config::default(), root.0, root.1)?);
        assert!(!is_rootless_with(
            &rootless_config(1000, 1000),
            root.0,
            root.1
        )?);
        Ok(())
    }

    #[test]
    fn test_rootless_config() -> Result<()> {
        let (uid, gid) = user();
        assert!(is_rootless_with(&rootless_config(1000, 1000), uid, gid)?);
        Ok(())
    }

    #[test]
    fn test_rootless_failures() {
        let (uid, gid) = user();

        assert_eq!(
            is_rootless_with(&Config::default(), uid, gid),
            Err(RootlessError::NoUserNamespace)
        );

        assert_eq!(
            is_rootless_with(&rootless_config(2000, 1000), uid, gid),
            Err(RootlessError::ForeignUser)
        );

        let mut config = rootless_config(1000, 1000);
        config.uid_mappings[0].size = 2;
        assert_eq!(
            is_rootless_with(&config, uid, gid),
            Err(RootlessError::MultipleUsers)
        );

        let mut config = rootless_config(1000, 1000);
        config.gid_mappings.push(IdMap {
            container_id: 1,
            host_id: 100000,
            size: 65536,
        });
        assert_eq!(
            is_rootless_with(&config, uid, gid),
            Err(RootlessError::MultipleGroups)
        );

        assert_eq!(
            is_rootless_with(&rootless_config(1000, 2000), uid, gid),
            Err(RootlessError::ForeignGroup)
        );
    }

    #[test]
    #[serial]
    fn test_rootless_required_env() {
        let was_set = env::var_os(USE_ROOTLESS_ENV);
        env::set_var(USE_ROOTLESS_ENV, "true");
        assert!(rootless_required());

        env::remove_var(USE_ROOTLESS_ENV);
        assert_eq!(rootless_required(), !nix::unistd::geteuid().is_root());

        if let Some(value) = was_set {
            env::set_var(USE_ROOTLESS_ENV, value);
        }
    }
}
