//! Cgroup v1: every controller is mounted as its own hierarchy and a
//! container owns one directory per controller.
mod controller;
mod controller_type;
mod cpu;
mod cpuacct;
mod cpuset;
mod devices;
mod freezer;
pub mod manager;
mod memory;
mod pids;
pub mod util;

pub use controller_type::ControllerType;
