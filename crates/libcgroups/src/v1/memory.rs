use std::path::Path;

use nix::errno::Errno;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;
use crate::stats::{read_u64, KeyedFile, MemoryStats, ReadStats, Stats, StatsError};

const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_USAGE: &str = "memory.usage_in_bytes";
const CGROUP_MEMORY_MAX_USAGE: &str = "memory.max_usage_in_bytes";
const CGROUP_MEMORY_SWAPPINESS: &str = "memory.swappiness";
const CGROUP_MEMORY_RESERVATION: &str = "memory.soft_limit_in_bytes";
const CGROUP_MEMORY_OOM_CONTROL: &str = "memory.oom_control";
const CGROUP_MEMORY_FAILCNT: &str = "memory.failcnt";
const MEMORY_STAT: &str = "memory.stat";
// v1 reports an unlimited cgroup with the largest page aligned i64
const UNLIMITED: u64 = 0x7FFF_FFFF_FFFF_F000;

#[derive(thiserror::Error, Debug)]
pub enum V1MemoryControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("swappiness {0} is outside of 0-100")]
    SwappinessOutOfRange(u64),
    #[error("unable to set memory limit to {target} (current usage: {current}, peak usage: {peak})")]
    UnableToSet { target: i64, current: u64, peak: u64 },
}

pub struct Memory {}

impl Controller for Memory {
    type Error = V1MemoryControllerError;

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        if let Some(reservation) = resources.memory_reservation {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_RESERVATION), reservation)?;
        }

        if resources.oom_kill_disable {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_OOM_CONTROL), 1)?;
        }

        if let Some(swappiness) = resources.memory_swappiness {
            if swappiness > 100 {
                return Err(V1MemoryControllerError::SwappinessOutOfRange(swappiness));
            }
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_SWAPPINESS), swappiness)?;
        }

        Self::apply_limits(resources, cgroup_root)
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        resources.has_memory()
    }
}

impl ReadStats for Memory {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        let limit = read_u64(&cgroup_path.join(CGROUP_MEMORY_LIMIT))?;
        stats.memory = MemoryStats {
            usage: read_u64(&cgroup_path.join(CGROUP_MEMORY_USAGE))?,
            max_usage: read_u64(&cgroup_path.join(CGROUP_MEMORY_MAX_USAGE))?,
            limit: (limit < UNLIMITED).then_some(limit),
            failcnt: read_u64(&cgroup_path.join(CGROUP_MEMORY_FAILCNT))?,
            stat: KeyedFile::read(cgroup_path.join(MEMORY_STAT))?.into_entries(),
        };
        Ok(())
    }
}

impl Memory {
    /// Writes a limit in bytes, 0 leaves the current value alone. A memory
    /// limit below the current usage is refused by the kernel with EBUSY.
    fn write_limit(
        cgroup_root: &Path,
        file: &str,
        value: i64,
    ) -> Result<(), V1MemoryControllerError> {
        if value == 0 {
            return Ok(());
        }

        let result = common::write_cgroup_file(cgroup_root.join(file), value);
        let busy = |err: &WrappedIoError| err.inner().raw_os_error() == Some(Errno::EBUSY as i32);
        match result {
            Err(err) if file == CGROUP_MEMORY_LIMIT && busy(&err) => {
                Err(V1MemoryControllerError::UnableToSet {
                    target: value,
                    current: read_u64(&cgroup_root.join(CGROUP_MEMORY_USAGE))?,
                    peak: read_u64(&cgroup_root.join(CGROUP_MEMORY_MAX_USAGE))?,
                })
            }
            result => Ok(result?),
        }
    }

    fn apply_limits(
        resources: &Resources,
        cgroup_root: &Path,
    ) -> Result<(), V1MemoryControllerError> {
        let limit = resources.memory.unwrap_or(0);
        let swap = resources.memory_swap.unwrap_or(0);
        if limit == 0 && swap == 0 {
            return Ok(());
        }

        // memsw can never be below the memory limit: a growing memsw goes
        // first, a shrinking one last
        let current_limit =
            i64::try_from(read_u64(&cgroup_root.join(CGROUP_MEMORY_LIMIT))?).unwrap_or(i64::MAX);
        let mut writes = [(CGROUP_MEMORY_LIMIT, limit), (CGROUP_MEMORY_SWAP_LIMIT, swap)];
        if swap == -1 || (swap > 0 && current_limit < swap) {
            writes.reverse();
        }
        for (file, value) in writes {
            Self::write_limit(cgroup_root, file, value)?;
        }
        Ok(())
    }
}
