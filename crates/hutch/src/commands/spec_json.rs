use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::oci_spec::runtime::Spec as OciSpec;
use libcontainer::specconv;
use serde_json::to_writer_pretty;

/// Write a template config.json for a new bundle
#[derive(Parser, Debug)]
pub struct Spec {
    /// directory to write config.json to
    #[clap(short, long, default_value = ".")]
    pub bundle: PathBuf,
    /// generate a config for a container run by an unprivileged user
    #[clap(long)]
    pub rootless: bool,
}

pub fn get_spec(rootless: bool) -> Result<OciSpec> {
    let mut spec = specconv::example();
    if rootless {
        specconv::to_rootless(
            &mut spec,
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        )?;
    }
    Ok(spec)
}

fn write_spec(spec: &OciSpec, path: &Path) -> Result<()> {
    // an existing config is never overwritten
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    to_writer_pretty(&mut writer, spec)?;
    writer.flush()?;
    Ok(())
}

/// spec Cli command
pub fn spec(args: Spec) -> Result<()> {
    let spec = get_spec(args.rootless)?;
    write_spec(&spec, &args.bundle.join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_json() -> Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("config.json");
        write_spec(&get_spec(true)?, &path)?;

        let written = OciSpec::load(&path)?;
        let linux = written.linux().as_ref().context("no linux section")?;
        assert_eq!(
            linux.uid_mappings().as_ref().map(Vec::len),
            Some(1),
            "rootless spec maps exactly one uid"
        );
        Ok(())
    }

    #[test]
    fn test_spec_json_no_overwrite() -> Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("config.json");
        std::fs::write(&path, "{}")?;
        assert!(write_spec(&get_spec(false)?, &path).is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "{}");
        Ok(())
    }
}
