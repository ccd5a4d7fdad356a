use std::path::Path;

use super::controller::Controller;
use crate::common::WrappedIoError;
use crate::resources::Resources;
use crate::stats::{read_u64, KeyedFile, ReadStats, Stats, StatsError};

// user and system time in clock ticks
const CGROUP_CPUACCT_STAT: &str = "cpuacct.stat";
// total time in nanoseconds
const CGROUP_CPUACCT_USAGE: &str = "cpuacct.usage";

/// Accounting only, there is nothing to configure.
pub struct CpuAcct {}

impl Controller for CpuAcct {
    type Error = WrappedIoError;

    fn apply(_resources: &Resources, _cgroup_path: &Path) -> Result<(), Self::Error> {
        Ok(())
    }

    fn needs_to_handle(_resources: &Resources) -> bool {
        false
    }
}

impl ReadStats for CpuAcct {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        let ticks = KeyedFile::read(cgroup_path.join(CGROUP_CPUACCT_STAT))?;
        let ns_per_tick = 1_000_000_000 / clock_ticks_per_second();

        stats.cpu.total_ns = read_u64(&cgroup_path.join(CGROUP_CPUACCT_USAGE))?;
        stats.cpu.user_ns = ticks.get("user")? * ns_per_tick;
        stats.cpu.system_ns = ticks.get("system")? * ns_per_tick;
        Ok(())
    }
}

fn clock_ticks_per_second() -> u64 {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => 100,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_cpu_usage() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        set_fixture(tmp.path(), CGROUP_CPUACCT_USAGE, "12262454190222160\n")?;
        set_fixture(tmp.path(), CGROUP_CPUACCT_STAT, "user 1300\nsystem 364\n")?;

        let mut stats = Stats::default();
        CpuAcct::read_stats(tmp.path(), &mut stats)?;
        let ns_per_tick = 1_000_000_000 / clock_ticks_per_second();
        assert_eq!(stats.cpu.total_ns, 12262454190222160);
        assert_eq!(stats.cpu.user_ns, 1300 * ns_per_tick);
        assert_eq!(stats.cpu.system_ns, 364 * ns_per_tick);
        Ok(())
    }
}
