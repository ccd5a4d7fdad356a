//! Container management
/// A container is a directory under the factory root holding its state
/// snapshot, plus the live init process and cgroup it controls. The
/// lifecycle operations are split over one file each.
#[allow(clippy::module_inception)]
mod container;
mod container_delete;
mod container_events;
mod container_exec;
mod container_kill;
mod container_pause;
mod container_resume;
mod container_start;
pub mod state;
pub use container::Container;
pub use state::{State, Status};
