//! Contains functionality of the resume command
use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::factory::Factory;

use crate::commands::load_container;

/// Resume the processes within a paused container
#[derive(Parser, Debug)]
pub struct Resume {
    #[clap(required = true)]
    pub container_id: String,
}

pub fn resume(args: Resume, factory: &Factory) -> Result<()> {
    tracing::debug!("start resuming container {}", args.container_id);
    let mut container = load_container(factory, &args.container_id)?;
    container
        .resume()
        .with_context(|| format!("failed to resume container {}", args.container_id))
}
