//! Contains functionality of the pause command
use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::factory::Factory;

use crate::commands::load_container;

/// Suspend the processes within the container
#[derive(Parser, Debug)]
pub struct Pause {
    #[clap(required = true)]
    pub container_id: String,
}

pub fn pause(args: Pause, factory: &Factory) -> Result<()> {
    tracing::debug!("start pausing container {}", args.container_id);
    let mut container = load_container(factory, &args.container_id)?;
    container
        .pause()
        .with_context(|| format!("failed to pause container {}", args.container_id))
}
