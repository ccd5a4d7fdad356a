//! Resource usage of a container cgroup. Every manager fills in the same
//! [`Stats`], so callers never learn which hierarchy was read.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::{self, WrapIoResult, WrappedIoError};

/// A controller that contributes its share of a [`Stats`] snapshot
pub(crate) trait ReadStats {
    fn read_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub pids: PidStats,
}

/// Cpu time in nanoseconds and cfs throttling counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CpuStats {
    pub total_ns: u64,
    pub user_ns: u64,
    pub system_ns: u64,
    pub periods: u64,
    pub throttled_periods: u64,
    pub throttled_ns: u64,
}

/// Memory usage in bytes
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub usage: u64,
    /// High watermark, cgroup v2 does not keep one
    pub max_usage: u64,
    /// None when the cgroup is not limited
    pub limit: Option<u64>,
    /// How often the limit was hit
    pub failcnt: u64,
    /// The `memory.stat` table as the kernel reports it
    pub stat: BTreeMap<String, u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PidStats {
    pub current: u64,
    pub limit: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum StatsError {
    #[error(transparent)]
    WrappedIo(#[from] WrappedIoError),
    #[error("malformed line {line:?} in {path:?}")]
    Malformed { path: PathBuf, line: String },
    #[error("{path:?} has no {key} entry")]
    MissingKey { path: PathBuf, key: &'static str },
}

/// Reads an interface file holding one unsigned number
pub fn read_u64(path: &Path) -> Result<u64, WrappedIoError> {
    let content = common::read_cgroup_file(path)?;
    content
        .trim()
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        .wrap_other(path)
}

/// Reads a limit file such as `pids.max`, where `max` stands for no limit
pub fn read_limit(path: &Path) -> Result<Option<u64>, WrappedIoError> {
    if common::read_cgroup_file(path)?.trim() == "max" {
        return Ok(None);
    }
    read_u64(path).map(Some)
}

/// Contents of a file of `key value` lines such as `cpu.stat`
pub(crate) struct KeyedFile {
    path: PathBuf,
    entries: BTreeMap<String, u64>,
}

impl KeyedFile {
    pub fn read(path: PathBuf) -> Result<Self, StatsError> {
        let content = common::read_cgroup_file(&path)?;
        let mut entries = BTreeMap::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let parsed = line
                .split_once(' ')
                .and_then(|(key, value)| Some((key, value.trim().parse::<u64>().ok()?)));
            match parsed {
                Some((key, value)) if !key.is_empty() => {
                    entries.insert(key.to_owned(), value);
                }
                _ => {
                    return Err(StatsError::Malformed {
                        path,
                        line: line.to_owned(),
                    })
                }
            }
        }

        Ok(Self { path, entries })
    }

    pub fn get(&self, key: &'static str) -> Result<u64, StatsError> {
        self.entries
            .get(key)
            .copied()
            .ok_or_else(|| StatsError::MissingKey {
                path: self.path.clone(),
                key,
            })
    }

    /// Entries that only exist with some kernel options count as zero
    pub fn get_or_zero(&self, key: &str) -> u64 {
        self.entries.get(key).copied().unwrap_or_default()
    }

    pub fn into_entries(self) -> BTreeMap<String, u64> {
        self.entries
    }
}

/// `pids.current` and `pids.max` look the same in both hierarchies
pub(crate) fn read_pid_stats(cgroup_path: &Path, stats: &mut Stats) -> Result<(), StatsError> {
    stats.pids = PidStats {
        current: read_u64(&cgroup_path.join("pids.current"))?,
        limit: read_limit(&cgroup_path.join("pids.max"))?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_read_limit() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let file = set_fixture(tmp.path(), "memory.max", "max\n")?;
        assert_eq!(read_limit(&file)?, None);

        let file = set_fixture(tmp.path(), "memory.max", "4096\n")?;
        assert_eq!(read_limit(&file)?, Some(4096));

        let file = set_fixture(tmp.path(), "memory.max", "lots")?;
        assert!(read_limit(&file).is_err());
        Ok(())
    }

    #[test]
    fn test_keyed_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let file = set_fixture(tmp.path(), "cpu.stat", "usage_usec 100\nnr_periods 7\n\n")?;

        let keyed = KeyedFile::read(file)?;
        assert_eq!(keyed.get("usage_usec")?, 100);
        assert_eq!(keyed.get_or_zero("nr_throttled"), 0);
        assert!(matches!(
            keyed.get("user_usec"),
            Err(StatsError::MissingKey { key: "user_usec", .. })
        ));
        assert_eq!(keyed.into_entries().len(), 2);
        Ok(())
    }

    #[test]
    fn test_keyed_file_rejects_malformed_lines() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        for content in ["anon 1 2\n", "anon\n", "anon -1\n", " 5\n"] {
            let file = set_fixture(tmp.path(), "memory.stat", content)?;
            assert!(
                matches!(KeyedFile::read(file), Err(StatsError::Malformed { .. })),
                "{content:?} was accepted"
            );
        }
        Ok(())
    }

    #[test]
    fn test_pid_stats() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        set_fixture(tmp.path(), "pids.current", "5\n")?;
        set_fixture(tmp.path(), "pids.max", "max\n")?;

        let mut stats = Stats::default();
        read_pid_stats(tmp.path(), &mut stats)?;
        assert_eq!(
            stats.pids,
            PidStats {
                current: 5,
                limit: None
            }
        );

        set_fixture(tmp.path(), "pids.max", "30\n")?;
        read_pid_stats(tmp.path(), &mut stats)?;
        assert_eq!(stats.pids.limit, Some(30));
        Ok(())
    }
}
