use std::fmt;

/// Subsystems hutch manages on a v1 host, each mounted as its own hierarchy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerType {
    Cpu,
    CpuAcct,
    CpuSet,
    Devices,
    Memory,
    Pids,
    Freezer,
}

impl ControllerType {
    pub const ALL: [ControllerType; 7] = [
        Self::Cpu,
        Self::CpuAcct,
        Self::CpuSet,
        Self::Devices,
        Self::Memory,
        Self::Pids,
        Self::Freezer,
    ];

    /// Subsystem name as it appears in the mount options and in `/proc/<pid>/cgroup`
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::CpuAcct => "cpuacct",
            Self::CpuSet => "cpuset",
            Self::Devices => "devices",
            Self::Memory => "memory",
            Self::Pids => "pids",
            Self::Freezer => "freezer",
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
