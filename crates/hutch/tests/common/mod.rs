use std::path::Path;

use nix::unistd::{access, geteuid, AccessFlags};

/// Whether containers can be run here. Root needs cgroups it may create,
/// and a namespaced v2 root that has member processes refuses to enable
/// controllers for its children.
pub fn can_run_containers() -> bool {
    if !geteuid().is_root() {
        return true;
    }

    let root = Path::new("/sys/fs/cgroup");
    if !root.join("cgroup.controllers").exists() {
        return access(&root.join("freezer"), AccessFlags::W_OK).is_ok();
    }

    let busy = root.join("cgroup.type").exists()
        && std::fs::read_to_string(root.join("cgroup.procs"))
            .map(|procs| !procs.trim().is_empty())
            .unwrap_or(true);
    !busy && access(root, AccessFlags::W_OK).is_ok()
}
