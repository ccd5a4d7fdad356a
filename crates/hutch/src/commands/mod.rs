use anyhow::{Context, Result};
use libcgroups::common::CgroupBackend;
use libcontainer::container::Container;
use libcontainer::factory::{Factory, FactoryConfig};

use crate::{rootpath, GlobalOpts};

pub mod delete;
pub mod init;
pub mod kill;
pub mod list;
pub mod pause;
pub mod ps;
pub mod resume;
pub mod run;
pub mod spec_json;
pub mod state;

/// Builds the factory for the state directory selected by the global
/// options. Containers are initialized by re-executing this binary.
pub fn factory(opts: &GlobalOpts) -> Result<Factory> {
    let root_path =
        rootpath::determine(opts.root.clone()).context("failed to determine the root directory")?;
    let backend = if opts.systemd_cgroup {
        CgroupBackend::Systemd
    } else {
        CgroupBackend::Fs
    };

    let argv0 = std::env::args().next().unwrap_or_else(|| "hutch".to_string());
    let config = FactoryConfig::new(root_path)
        .with_init_args(&argv0, init_args(opts))?
        .with_cgroup_backend(backend)
        .with_criu_path(&opts.criu);

    Ok(Factory::new(config)?)
}

/// Arguments of the re-executed init process. It logs where its parent does.
fn init_args(opts: &GlobalOpts) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(log) = &opts.log {
        args.push("--log".to_string());
        args.push(log.display().to_string());
    }
    if let Some(format) = &opts.log_format {
        args.push("--log-format".to_string());
        args.push(format.clone());
    }
    if let Some(level) = &opts.log_level {
        args.push("--log-level".to_string());
        args.push(level.clone());
    } else if opts.debug {
        args.push("--debug".to_string());
    }
    args.push("init".to_string());
    args
}

fn load_container(factory: &Factory, container_id: &str) -> Result<Container> {
    factory
        .load(container_id)
        .with_context(|| format!("could not load state for container {container_id}"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_init_args_follow_logging() {
        let mut opts = GlobalOpts {
            root: None,
            log: None,
            log_format: None,
            log_level: None,
            debug: false,
            systemd_cgroup: false,
            criu: PathBuf::from("criu"),
        };
        assert_eq!(init_args(&opts), ["init"]);

        opts.log = Some(PathBuf::from("/var/log/hutch.log"));
        opts.log_format = Some("json".to_string());
        opts.debug = true;
        assert_eq!(
            init_args(&opts),
            [
                "--log",
                "/var/log/hutch.log",
                "--log-format",
                "json",
                "--debug",
                "init"
            ]
        );
    }
}
