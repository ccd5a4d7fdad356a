use std::fmt;

/// Controllers of the unified hierarchy that hutch configures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerType {
    Cpu,
    CpuSet,
    Memory,
    Pids,
}

impl ControllerType {
    pub const ALL: [ControllerType; 4] = [Self::Cpu, Self::CpuSet, Self::Memory, Self::Pids];

    /// Name used in `cgroup.controllers` and `cgroup.subtree_control`
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::CpuSet => "cpuset",
            Self::Memory => "memory",
            Self::Pids => "pids",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|controller| controller.name() == name)
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
