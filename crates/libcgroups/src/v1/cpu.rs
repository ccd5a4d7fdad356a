use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;
use crate::stats::{KeyedFile, ReadStats, Stats, StatsError};

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
const CGROUP_CPU_STAT: &str = "cpu.stat";

pub struct Cpu {}

impl Controller for Cpu {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Cpu cgroup config");

        if let Some(shares) = resources.cpu_shares.filter(|s| *s != 0) {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_SHARES), shares)?;
        }

        // the period has to be written first, the kernel validates the quota against it
        if let Some(period) = resources.cpu_period.filter(|p| *p != 0) {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_PERIOD), period)?;
        }

        if let Some(quota) = resources.cpu_quota.filter(|q| *q != 0) {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_QUOTA), quota)?;
        }

        Ok(())
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        resources.has_cpu()
    }
}

impl ReadStats for Cpu {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        let stat = KeyedFile::read(cgroup_path.join(CGROUP_CPU_STAT))?;
        stats.cpu.periods = stat.get("nr_periods")?;
        stats.cpu.throttled_periods = stat.get("nr_throttled")?;
        stats.cpu.throttled_ns = stat.get("throttled_time")?;
        Ok(())
    }
}
