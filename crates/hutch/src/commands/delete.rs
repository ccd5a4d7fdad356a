use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use libcontainer::container::{Container, Status};
use libcontainer::factory::Factory;
use nix::sys::signal::Signal;

use crate::commands::load_container;

const KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Release any resources held by the container
#[derive(Parser, Debug)]
pub struct Delete {
    #[clap(required = true)]
    pub container_id: String,
    /// kill the container first if it is still running
    #[clap(short, long)]
    pub force: bool,
}

pub fn delete(args: Delete, factory: &Factory) -> Result<()> {
    tracing::debug!("start deleting {}", args.container_id);
    let mut container = load_container(factory, &args.container_id)?;

    if args.force && container.status()? != Status::Stopped {
        kill_and_wait(&mut container)?;
    }

    container
        .destroy()
        .with_context(|| format!("failed to delete container {}", args.container_id))
}

fn kill_and_wait(container: &mut Container) -> Result<()> {
    container.signal(Signal::SIGKILL, true)?;

    let deadline = Instant::now() + KILL_TIMEOUT;
    while container.status()? != Status::Stopped {
        if Instant::now() > deadline {
            bail!("container {} did not stop after SIGKILL", container.id());
        }
        thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}
