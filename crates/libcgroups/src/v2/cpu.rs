use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;
use crate::stats::{KeyedFile, ReadStats, Stats, StatsError};

const CGROUP_CPU_WEIGHT: &str = "cpu.weight";
const CGROUP_CPU_MAX: &str = "cpu.max";
const CPU_STAT: &str = "cpu.stat";
const NO_QUOTA: &str = "max";
const MAX_CPU_WEIGHT: u64 = 10000;

pub struct Cpu {}

impl Controller for Cpu {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, path: &Path) -> Result<(), Self::Error> {
        // a weight of 0 is out of range (ERANGE), 0 shares means unset
        if let Some(weight) = resources.cpu_shares.map(shares_to_weight).filter(|w| *w != 0) {
            common::write_cgroup_file(path.join(CGROUP_CPU_WEIGHT), weight)?;
        }

        let cpu_max_file = path.join(CGROUP_CPU_MAX);
        let current_quota = || -> Result<String, WrappedIoError> {
            let content = common::read_cgroup_file(&cpu_max_file)?;
            Ok(content.split_whitespace().next().unwrap_or(NO_QUOTA).to_owned())
        };
        let cpu_max = match (resources.cpu_quota, resources.cpu_period) {
            (None, None) => return Ok(()),
            (None, Some(period)) => format!("{} {period}", current_quota()?),
            (Some(quota), period) => {
                let quota = if quota > 0 { quota.to_string() } else { NO_QUOTA.to_owned() };
                match period {
                    Some(period) => format!("{quota} {period}"),
                    None => quota,
                }
            }
        };
        common::write_cgroup_file_str(&cpu_max_file, &cpu_max)
    }
}

/// Maps v1 cpu shares (2..262144) linearly onto v2 weights (1..10000)
pub(crate) fn shares_to_weight(shares: u64) -> u64 {
    if shares == 0 {
        return 0;
    }
    (1 + shares.saturating_sub(2) * 9999 / 262142).min(MAX_CPU_WEIGHT)
}

impl ReadStats for Cpu {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        let stat = KeyedFile::read(cgroup_path.join(CPU_STAT))?;
        let cpu = &mut stats.cpu;
        // microseconds here, nanoseconds in the snapshot
        cpu.total_ns = stat.get("usage_usec")? * 1000;
        cpu.user_ns = stat.get("user_usec")? * 1000;
        cpu.system_ns = stat.get("system_usec")? * 1000;
        // throttling is only accounted with the cpu controller enabled
        cpu.periods = stat.get_or_zero("nr_periods");
        cpu.throttled_periods = stat.get_or_zero("nr_throttled");
        cpu.throttled_ns = stat.get_or_zero("throttled_usec") * 1000;
        Ok(())
    }
}
