use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;
use crate::stats::{self, ReadStats, Stats, StatsError};

const CGROUP_PIDS_MAX: &str = "pids.max";

pub struct Pids {}

impl Controller for Pids {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply pids cgroup config");

        if let Some(limit) = resources.pids_limit {
            common::write_cgroup_file_str(cgroup_root.join(CGROUP_PIDS_MAX), &pids_max(limit))?;
        }

        Ok(())
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        resources.pids_limit.is_some()
    }
}

impl ReadStats for Pids {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        stats::read_pid_stats(cgroup_path, stats)
    }
}

// non-positive limits mean no limit
fn pids_max(limit: i64) -> String {
    if limit > 0 {
        limit.to_string()
    } else {
        "max".to_string()
    }
}
