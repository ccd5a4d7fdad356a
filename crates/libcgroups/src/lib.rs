//! Control groups provide a way of controlling groups of processes.
//! This crate places container processes into cgroups, applies resource
//! limits, freezes and thaws them and reads usage statistics, either by
//! writing to the cgroup filesystem directly, by asking systemd, or not at
//! all for rootless containers.
mod test;

pub mod common;
pub mod resources;
pub mod rootless;
pub mod stats;
pub mod systemd;
pub mod v1;
pub mod v2;
