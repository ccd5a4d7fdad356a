//! # hutch
//! Command line front end of the hutch container library. It translates OCI
//! bundles into container configurations and drives their lifecycle. The
//! same binary is re-executed as the init process of every container.
mod commands;
mod observability;
mod rootpath;

use std::path::PathBuf;

use anyhow::Result;
use clap::{crate_version, Args, Parser, Subcommand};

use crate::commands::{delete, init, kill, list, pause, ps, resume, run, spec_json, state};

/// Options shared by every command
#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// root directory to store container state
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// file to write the log to, stderr if not set
    #[clap(long, global = true)]
    pub log: Option<PathBuf>,
    /// log format, text or json
    #[clap(long, global = true)]
    pub log_format: Option<String>,
    /// log level, overrides --debug
    #[clap(long, global = true)]
    pub log_level: Option<String>,
    /// enable debug logging
    #[clap(long, global = true)]
    pub debug: bool,
    /// use systemd to manage the cgroups of the containers
    #[clap(long, global = true)]
    pub systemd_cgroup: bool,
    /// checkpoint/restore tool handed to the containers
    #[clap(long, global = true, default_value = "criu")]
    pub criu: PathBuf,
}

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    #[clap(hide = true)]
    Init(init::Init),
    Run(run::Run),
    State(state::State),
    List(list::List),
    Ps(ps::Ps),
    Kill(kill::Kill),
    Pause(pause::Pause),
    Resume(resume::Resume),
    Delete(delete::Delete),
    Spec(spec_json::Spec),
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if let Err(e) = observability::init(&opts) {
        eprintln!("log init failed: {e:?}");
    }

    tracing::debug!(
        "started by user {} with {:?}",
        nix::unistd::geteuid(),
        std::env::args_os()
    );

    // init and spec never touch the state directory
    match opts.subcmd {
        SubCommand::Init(args) => init::init(args),
        SubCommand::Spec(args) => spec_json::spec(args),
        SubCommand::Run(args) => run::run(args, &commands::factory(&opts.global)?),
        SubCommand::State(args) => state::state(args, &commands::factory(&opts.global)?),
        SubCommand::List(args) => list::list(args, &commands::factory(&opts.global)?),
        SubCommand::Ps(args) => ps::ps(args, &commands::factory(&opts.global)?),
        SubCommand::Kill(args) => kill::kill(args, &commands::factory(&opts.global)?),
        SubCommand::Pause(args) => pause::pause(args, &commands::factory(&opts.global)?),
        SubCommand::Resume(args) => resume::resume(args, &commands::factory(&opts.global)?),
        SubCommand::Delete(args) => delete::delete(args, &commands::factory(&opts.global)?),
    }
}
