use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;
use crate::stats::{read_limit, read_u64, KeyedFile, MemoryStats, ReadStats, Stats, StatsError};

const CGROUP_MEMORY_SWAP: &str = "memory.swap.max";
const CGROUP_MEMORY_MAX: &str = "memory.max";
const CGROUP_MEMORY_LOW: &str = "memory.low";
const CGROUP_MEMORY_CURRENT: &str = "memory.current";
const MEMORY_STAT: &str = "memory.stat";
const MEMORY_EVENTS: &str = "memory.events";

#[derive(thiserror::Error, Debug)]
pub enum V2MemoryControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("invalid memory value {0}")]
    MemoryValue(i64),
    #[error("invalid swap value {0}")]
    SwapValue(i64),
    #[error("swap memory ({swap}) should be bigger than memory limit ({limit})")]
    SwapTooSmall { swap: i64, limit: i64 },
    #[error("unable to set swap limit without memory limit")]
    SwapWithoutLimit,
}

pub struct Memory {}

impl Controller for Memory {
    type Error = V2MemoryControllerError;

    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        if resources.has_memory() {
            tracing::debug!("Apply memory cgroup v2 config");
        }

        if resources.oom_kill_disable {
            tracing::warn!("cgroup v2 cannot disable the oom killer, ignoring");
        }
        if resources.memory_swappiness.is_some() {
            tracing::warn!("cgroup v2 does not support memory swappiness, ignoring");
        }

        Self::set_limits(resources, cgroup_path)?;

        if let Some(reservation) = resources.memory_reservation {
            Self::set(cgroup_path.join(CGROUP_MEMORY_LOW), reservation)?;
        }

        Ok(())
    }
}

impl ReadStats for Memory {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
        let events = KeyedFile::read(cgroup_path.join(MEMORY_EVENTS))?;
        stats.memory = MemoryStats {
            usage: read_u64(&cgroup_path.join(CGROUP_MEMORY_CURRENT))?,
            max_usage: 0,
            limit: read_limit(&cgroup_path.join(CGROUP_MEMORY_MAX))?,
            failcnt: events.get_or_zero("max"),
            stat: KeyedFile::read(cgroup_path.join(MEMORY_STAT))?.into_entries(),
        };
        Ok(())
    }
}

impl Memory {
    fn set<P: AsRef<Path>>(path: P, val: i64) -> Result<(), WrappedIoError> {
        if val == 0 {
            Ok(())
        } else if val == -1 {
            common::write_cgroup_file_str(path, "max")
        } else {
            common::write_cgroup_file(path, val)
        }
    }

    // The v1 swap value is memory plus swap, v2 only limits swap. The
    // difference is written to memory.swap.max.
    fn set_limits(resources: &Resources, path: &Path) -> Result<(), V2MemoryControllerError> {
        let limit = resources.memory;
        let swap = resources.memory_swap;

        match (limit, swap) {
            (_, Some(swap)) if swap < -1 => Err(V2MemoryControllerError::SwapValue(swap)),
            (Some(limit), _) if limit < -1 => Err(V2MemoryControllerError::MemoryValue(limit)),
            (None, Some(_)) => Err(V2MemoryControllerError::SwapWithoutLimit),
            (Some(limit), Some(swap)) => {
                let swap_only = match (limit, swap) {
                    (_, -1) => -1,
                    (-1, _) => -1,
                    (limit, swap) if swap < limit => {
                        return Err(V2MemoryControllerError::SwapTooSmall { swap, limit })
                    }
                    (limit, swap) => swap - limit,
                };
                Self::set(path.join(CGROUP_MEMORY_MAX), limit)?;
                if swap_only == 0 {
                    common::write_cgroup_file_str(path.join(CGROUP_MEMORY_SWAP), "0")?;
                } else {
                    Self::set(path.join(CGROUP_MEMORY_SWAP), swap_only)?;
                }
                Ok(())
            }
            (Some(limit), None) => {
                Self::set(path.join(CGROUP_MEMORY_MAX), limit)?;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use anyhow::Result;

    use super::*;
    use crate::test::{set_fixture, setup};

    #[test]
    fn test_set_memory_and_swap() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        setup(tmp.path(), &[CGROUP_MEMORY_MAX, CGROUP_MEMORY_SWAP, CGROUP_MEMORY_LOW])?;
        let resources = Resources {
            memory: Some(1024),
            memory_swap: Some(4096),
            memory_reservation: Some(512),
            ..Default::default()
        };

        Memory::apply(&resources, tmp.path())?;
        assert_eq!(read_to_string(tmp.path().join(CGROUP_MEMORY_MAX))?, "1024");
        assert_eq!(read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP))?, "3072");
        assert_eq!(read_to_string(tmp.path().join(CGROUP_MEMORY_LOW))?, "512");
        Ok(())
    }

    #[test]
    fn test_unlimited_memory() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        setup(tmp.path(), &[CGROUP_MEMORY_MAX, CGROUP_MEMORY_SWAP])?;
        let resources = Resources {
            memory: Some(-1),
            memory_swap: Some(-1),
            ..Default::default()
        };

        Memory::apply(&resources, tmp.path())?;
        assert_eq!(read_to_string(tmp.path().join(CGROUP_MEMORY_MAX))?, "max");
        assert_eq!(read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP))?, "max");
        Ok(())
    }

    #[test]
    fn test_invalid_limits() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        setup(tmp.path(), &[CGROUP_MEMORY_MAX, CGROUP_MEMORY_SWAP])?;

        let swap_only = Resources {
            memory_swap: Some(1024),
            ..Default::default()
        };
        assert!(matches!(
            Memory::apply(&swap_only, tmp.path()),
            Err(V2MemoryControllerError::SwapWithoutLimit)
        ));

        let too_small = Resources {
            memory: Some(2048),
            memory_swap: Some(1024),
            ..Default::default()
        };
        assert!(matches!(
            Memory::apply(&too_small, tmp.path()),
            Err(V2MemoryControllerError::SwapTooSmall { .. })
        ));

        let negative = Resources {
            memory: Some(-2),
            ..Default::default()
        };
        assert!(matches!(
            Memory::apply(&negative, tmp.path()),
            Err(V2MemoryControllerError::MemoryValue(-2))
        ));
        Ok(())
    }

    #[test]
    fn test_stats() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        set_fixture(tmp.path(), CGROUP_MEMORY_CURRENT, "12288\n")?;
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "max\n")?;
        set_fixture(
            tmp.path(),
            MEMORY_EVENTS,
            "low 0\nhigh 0\nmax 3\noom 1\noom_kill 1\n",
        )?;
        set_fixture(tmp.path(), MEMORY_STAT, "anon 4096\nfile 8192\n")?;

        let mut stats = Stats::default();
        Memory::read_stats(tmp.path(), &mut stats)?;
        assert_eq!(stats.memory.usage, 12288);
        assert_eq!(stats.memory.limit, None);
        assert_eq!(stats.memory.failcnt, 3);
        assert_eq!(stats.memory.stat["file"], 8192);

        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "65536\n")?;
        Memory::read_stats(tmp.path(), &mut stats)?;
        assert_eq!(stats.memory.limit, Some(65536));
        Ok(())
    }
}
