//! Contains functionality of the kill command
use std::convert::TryInto;

use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::factory::Factory;
use libcontainer::signal::Signal;

use crate::commands::load_container;

/// Send a signal to the container
#[derive(Parser, Debug)]
pub struct Kill {
    #[clap(required = true)]
    container_id: String,
    #[clap(default_value = "SIGTERM")]
    signal: String,
    /// signal every process of the container, not only its init
    #[clap(short, long)]
    all: bool,
}

pub fn kill(args: Kill, factory: &Factory) -> Result<()> {
    let signal: Signal = args.signal.as_str().try_into()?;
    let mut container = load_container(factory, &args.container_id)?;
    tracing::debug!("kill {} with {}", args.container_id, signal);
    container
        .signal(signal, args.all)
        .with_context(|| format!("failed to signal container {}", args.container_id))
}
