use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::factory::Factory;
use libcontainer::oci_spec::runtime::Spec;
use libcontainer::specconv;
use nix::sys::signal::{self, kill};
use nix::sys::signalfd::SigSet;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Create a container from an OCI bundle and start it
#[derive(Parser, Debug)]
pub struct Run {
    /// path to the bundle directory, containing config.json and root filesystem
    #[clap(short, long, default_value = ".")]
    pub bundle: PathBuf,
    /// detach from the container process
    #[clap(short, long)]
    pub detach: bool,
    #[clap(required = true)]
    pub container_id: String,
}

pub fn run(args: Run, factory: &Factory) -> Result<()> {
    let bundle = args
        .bundle
        .canonicalize()
        .with_context(|| format!("failed to resolve bundle {}", args.bundle.display()))?;
    let spec = Spec::load(bundle.join("config.json"))
        .with_context(|| format!("failed to load the config of bundle {}", bundle.display()))?;
    let config = specconv::create_config(&bundle, &spec)?;

    // SIGCHLD of a workload that exits right away must stay pending until
    // the foreground loop collects it
    if !args.detach {
        SigSet::all()
            .thread_set_mask()
            .with_context(|| "failed to call pthread_sigmask")?;
    }

    let mut container = factory
        .create(&args.container_id, config)
        .with_context(|| format!("failed to create container {}", args.container_id))?;
    if let Err(err) = container.start() {
        if let Err(destroy_err) = container.destroy() {
            tracing::warn!("failed to clean up container {}: {}", args.container_id, destroy_err);
        }
        return Err(err).with_context(|| format!("failed to start container {}", args.container_id));
    }

    if args.detach {
        return Ok(());
    }

    let init_pid = container
        .pid()
        .with_context(|| format!("container {} has no init process", args.container_id))?;
    let status = handle_foreground(init_pid)?;
    container
        .destroy()
        .with_context(|| format!("failed to destroy container {}", args.container_id))?;
    std::process::exit(status);
}

// Waits for the container init process, forwarding most signals to it, and
// returns its exit code. Expects every signal to be blocked already.
fn handle_foreground(init_pid: Pid) -> Result<i32> {
    let signal_set = SigSet::all();
    signal_set
        .thread_set_mask()
        .with_context(|| "failed to call pthread_sigmask")?;
    loop {
        if let Some(code) = reap_children(init_pid)? {
            return Ok(code);
        }

        match signal_set
            .wait()
            .with_context(|| "failed to call sigwait")?
        {
            signal::SIGCHLD => {}
            // used by the Go runtime of some workloads, never forwarded
            signal::SIGURG => {}
            signal::SIGWINCH => {}
            signal => {
                let _ = kill(init_pid, Some(signal));
            }
        }
    }
}

/// Reaps every exited child, returning the exit code of the init process
/// once it is among them
fn reap_children(init_pid: Pid) -> Result<Option<i32>> {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG))
            .with_context(|| format!("failed to wait for init process {init_pid}"))?
        {
            WaitStatus::Exited(pid, status) if pid == init_pid => return Ok(Some(status)),
            WaitStatus::Signaled(pid, signal, _) if pid == init_pid => {
                return Ok(Some(128 + signal as i32))
            }
            WaitStatus::StillAlive => return Ok(None),
            // some other child, nothing to do
            _ => {}
        }
    }
}
