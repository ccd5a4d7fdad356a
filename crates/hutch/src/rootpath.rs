//! Location of the directory that holds the state of all containers
use std::fs::DirBuilder;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use libcontainer::rootless::rootless_required;
use nix::unistd::geteuid;

const PRIVILEGED_ROOT: &str = "/run/hutch";
const PRIVATE_MODE: u32 = 0o700;

/// Returns the state root. `--root` is used as given, created when missing.
/// Without it root uses `/run/hutch` and everyone else the first per user
/// location that can be made private to them.
pub fn determine(root_path: Option<PathBuf>) -> Result<PathBuf> {
    let uid = geteuid().as_raw();

    if let Some(path) = root_path {
        if !path.exists() {
            ensure_private_dir(&path, uid)?;
        }
        return path
            .canonicalize()
            .with_context(|| format!("failed to resolve {path:?}"));
    }

    if !rootless_required() {
        let path = PathBuf::from(PRIVILEGED_ROOT);
        ensure_private_dir(&path, uid)?;
        return Ok(path);
    }

    let lookup = |key: &str| std::env::var_os(key).map(PathBuf::from);
    for candidate in rootless_candidates(uid, lookup) {
        match ensure_private_dir(&candidate, uid) {
            Ok(()) => return Ok(candidate),
            Err(err) => tracing::debug!("skipping state root {:?}: {:#}", candidate, err),
        }
    }
    bail!("no usable state root for uid {uid}, pass one with --root")
}

/// Per user locations in order of preference
fn rootless_candidates<F>(uid: u32, lookup: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let mut candidates = Vec::new();
    if let Some(runtime_dir) = lookup("XDG_RUNTIME_DIR") {
        candidates.push(runtime_dir.join("hutch"));
    }
    candidates.push(PathBuf::from(format!("/run/user/{uid}/hutch")));
    if let Some(home) = lookup("HOME").and_then(|home| home.canonicalize().ok()) {
        candidates.push(home.join(".hutch/run"));
    }
    candidates.push(PathBuf::from(format!("/tmp/hutch-{uid}")));
    candidates
}

/// Creates `path` with mode 0700, or checks that an existing one belongs to
/// `owner` and is accessible to it
fn ensure_private_dir(path: &Path, owner: u32) -> Result<()> {
    if !path.exists() {
        DirBuilder::new()
            .recursive(true)
            .mode(PRIVATE_MODE)
            .create(path)
            .with_context(|| format!("failed to create {path:?}"))?;
    }

    let metadata = path.metadata()?;
    if !metadata.is_dir() {
        bail!("{path:?} is not a directory");
    }
    if metadata.uid() != owner {
        bail!("{path:?} is owned by uid {}", metadata.uid());
    }
    if metadata.mode() & PRIVATE_MODE != PRIVATE_MODE {
        bail!("{path:?} has mode {:o}", metadata.mode() & 0o7777);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_explicit_root_is_created_and_resolved() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path().join("state");
        let path = determine(Some(root.join("../state")))?;
        assert_eq!(path, root.canonicalize()?);
        assert_eq!(fs::metadata(&path)?.mode() & 0o777, PRIVATE_MODE);

        // an existing directory is taken as is
        assert_eq!(determine(Some(root.clone()))?, path);
        Ok(())
    }

    #[test]
    fn test_private_dir_checks() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let uid = geteuid().as_raw();
        let dir = tmp.path().join("a/b");
        ensure_private_dir(&dir, uid)?;
        ensure_private_dir(&dir, uid)?;

        assert!(ensure_private_dir(&dir, uid.wrapping_add(1)).is_err());

        fs::set_permissions(&dir, Permissions::from_mode(0o500))?;
        assert!(ensure_private_dir(&dir, uid).is_err());

        let file = tmp.path().join("file");
        fs::write(&file, "")?;
        assert!(ensure_private_dir(&file, uid).is_err());
        Ok(())
    }

    #[test]
    fn test_rootless_candidates() -> Result<()> {
        let home = tempfile::tempdir()?;
        let home_path = home.path().to_path_buf();
        let candidates = rootless_candidates(1000, |key| match key {
            "XDG_RUNTIME_DIR" => Some(PathBuf::from("/run/user/1000")),
            "HOME" => Some(home_path.clone()),
            _ => None,
        });
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/run/user/1000/hutch"),
                PathBuf::from("/run/user/1000/hutch"),
                home.path().canonicalize()?.join(".hutch/run"),
                PathBuf::from("/tmp/hutch-1000"),
            ]
        );

        let candidates = rootless_candidates(1000, |_| None);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/run/user/1000/hutch"),
                PathBuf::from("/tmp/hutch-1000"),
            ]
        );
        Ok(())
    }
}
