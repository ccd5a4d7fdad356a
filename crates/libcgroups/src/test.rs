//! Fake cgroup directories for controller tests
#![cfg(test)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Writes a fake interface file, replacing an existing one
pub fn set_fixture(dir: &Path, file: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(file);
    std::fs::write(&path, content).with_context(|| format!("failed to write fixture {path:?}"))?;
    Ok(path)
}

/// Empty interface files, as a freshly created cgroup has them
pub fn setup(dir: &Path, files: &[&str]) -> Result<()> {
    files
        .iter()
        .try_for_each(|file| set_fixture(dir, file, "").map(drop))
}
