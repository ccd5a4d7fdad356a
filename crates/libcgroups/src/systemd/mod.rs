use std::fs;

pub mod client;
mod controller;
mod cpu;
#[cfg(feature = "systemd")]
pub mod dbus;
pub mod manager;
mod memory;
mod pids;

/// Checks if the system was booted with systemd
pub fn booted() -> bool {
    fs::symlink_metadata("/run/systemd/system")
        .map(|p| p.is_dir())
        .unwrap_or_default()
}
