use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use libcontainer::factory::Factory;
use serde::Serialize;

use crate::commands::load_container;

/// Show the state of a container
#[derive(Parser, Debug)]
pub struct State {
    #[clap(required = true)]
    pub container_id: String,
}

#[derive(Serialize, Debug)]
struct ContainerState {
    id: String,
    pid: i32,
    status: String,
    bundle: Option<PathBuf>,
    rootfs: PathBuf,
    created: DateTime<Utc>,
    annotations: HashMap<String, String>,
}

pub fn state(args: State, factory: &Factory) -> Result<()> {
    let mut container = load_container(factory, &args.container_id)?;
    let status = container.status()?;
    let state = ContainerState {
        id: container.id().to_string(),
        pid: container.pid().map(|pid| pid.as_raw()).unwrap_or(0),
        status: status.to_string(),
        bundle: container.config().bundle().map(PathBuf::from),
        rootfs: container.config().rootfs.clone(),
        created: container.created(),
        annotations: container.config().annotations(),
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
