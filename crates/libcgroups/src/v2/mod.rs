//! Cgroup v2: a single unified hierarchy where controllers are enabled per
//! subtree through `cgroup.subtree_control`.
mod controller;
pub mod controller_type;
pub(crate) mod cpu;
mod cpuset;
mod freezer;
pub mod manager;
mod memory;
mod pids;
pub mod util;
