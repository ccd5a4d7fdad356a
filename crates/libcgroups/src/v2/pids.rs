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
        tracing::debug!("Apply pids cgroup v2 config");
        if let Some(limit) = resources.pids_limit {
            let value = if limit > 0 {
                limit.to_string()
            } else {
                "max".to_string()
            };
            common::write_cgroup_file_str(cgroup_root.join(CGROUP_PIDS_MAX), &value)?;
        }

        Ok(())
    }
}

impl ReadStats for Pids {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        stats::read_pid_stats(cgroup_path, stats)
    }
}
