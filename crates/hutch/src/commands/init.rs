use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::factory::{Factory, FactoryConfig};

/// Set up the container from inside its namespaces and exec the workload.
/// Only meant to be invoked by hutch itself.
#[derive(Parser, Debug)]
pub struct Init {}

pub fn init(_: Init) -> Result<()> {
    // the init side never touches the state directory
    let factory = Factory::new(FactoryConfig::new(""))?;
    factory
        .start_initialization()
        .context("container initialization failed")
}
