//! Runtime side of the init protocol: spawns the init process and drives
//! the handshake until the workload has been executed or has failed.
use std::os::fd::AsRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command};

use libcgroups::common::{self, AnyCgroupManager, CgroupManager};
use nix::unistd::Pid;

use super::init::INIT_PIPE_ENV;
use super::message::{InitHandoff, InitType, Message};
use crate::channel::{channel, ChannelError, Endpoint};
use crate::error::LibcontainerError;

type Result<T> = std::result::Result<T, LibcontainerError>;

/// A spawned init process that has not received its handoff yet
pub struct InitParent {
    child: Child,
    channel: Endpoint<Message>,
}

impl InitParent {
    /// Spawns `init_path` with `init_args[0]` as argv0 and the remaining
    /// arguments. The environment only carries the channel descriptor.
    pub fn spawn(init_path: &Path, init_args: &[String]) -> Result<Self> {
        let (parent_end, child_end) = channel::<Message>()?;
        let child_fd = child_end.as_raw_fd();

        let mut cmd = Command::new(init_path);
        if let Some((arg0, args)) = init_args.split_first() {
            cmd.arg0(arg0).args(args);
        }
        cmd.env_clear().env(INIT_PIPE_ENV, child_fd.to_string());

        // SAFETY: only the async-signal-safe fcntl runs between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                if libc::fcntl(child_fd, libc::F_SETFD, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(LibcontainerError::Spawn)?;
        drop(child_end);
        tracing::debug!("spawned init process {} from {:?}", child.id(), init_path);

        Ok(Self {
            child,
            channel: parent_end,
        })
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Places the process in the cgroup, sends the handoff and waits for
    /// the outcome. The resources of the config are applied once a standard
    /// init reports ready. On failure the process is killed and reaped.
    pub fn run(mut self, handoff: InitHandoff, cgroup_manager: &AnyCgroupManager) -> Result<Child> {
        match self.handshake(handoff, cgroup_manager) {
            Ok(()) => Ok(self.child),
            Err(err) => {
                tracing::warn!("init process {} failed: {}", self.child.id(), err);
                let _ = self.child.kill();
                let _ = self.child.wait();
                Err(err)
            }
        }
    }

    fn handshake(&mut self, handoff: InitHandoff, cgroup_manager: &AnyCgroupManager) -> Result<()> {
        let init_type = handoff.init_type;
        let resources = handoff.config.cgroup.resources.clone();
        self.attach(init_type, cgroup_manager)?;
        self.channel.send(&Message::Handoff(Box::new(handoff)))?;

        if init_type == InitType::Standard {
            match self.recv()? {
                Some(Message::Ready) => {}
                Some(Message::ProcError) => return Err(self.terminal_error()),
                Some(msg) => return Err(LibcontainerError::UnexpectedMessage(msg)),
                None => return Err(self.exited_early()),
            }

            cgroup_manager.set(&resources)?;
            self.channel.send(&Message::Run)?;
        }

        match self.recv()? {
            None => self.check_exec(),
            Some(Message::ProcError) => Err(self.terminal_error()),
            Some(Message::Error(record)) => Err(LibcontainerError::InitFailed {
                code: record.code,
                message: record.message,
            }),
            Some(msg) => Err(LibcontainerError::UnexpectedMessage(msg)),
        }
    }

    /// A standard init gets a cgroup of its own, a tenant joins the cgroups
    /// of the running container
    fn attach(&self, init_type: InitType, cgroup_manager: &AnyCgroupManager) -> Result<()> {
        match init_type {
            InitType::Standard => cgroup_manager.apply(self.pid())?,
            InitType::Setns => {
                match common::enter_pid(&cgroup_manager.get_paths(), self.pid()) {
                    Err(err) if cgroup_manager.is_rootless() => {
                        tracing::warn!("rootless process could not join the cgroup: {}", err)
                    }
                    result => result?,
                }
            }
        }
        Ok(())
    }

    /// Next message, `None` once the init process closed the channel
    fn recv(&self) -> Result<Option<Message>> {
        match self.channel.recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(ChannelError::BrokenChannel) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn terminal_error(&self) -> LibcontainerError {
        match self.recv() {
            Ok(Some(Message::Error(record))) => LibcontainerError::InitFailed {
                code: record.code,
                message: record.message,
            },
            Ok(Some(msg)) => LibcontainerError::UnexpectedMessage(msg),
            Ok(None) => LibcontainerError::Other(
                "init process reported an error but sent no details".to_string(),
            ),
            Err(err) => err,
        }
    }

    fn exited_early(&mut self) -> LibcontainerError {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                LibcontainerError::Other(format!("init process exited early with {status}"))
            }
            _ => LibcontainerError::Other("init process closed the channel early".to_string()),
        }
    }

    /// The channel closes on exec, so the process is either running the
    /// workload or the workload already exited. Only a process that was
    /// killed gets here without having executed anything.
    fn check_exec(&mut self) -> Result<()> {
        match self.child.try_wait()? {
            Some(status) if status.signal().is_some() => Err(LibcontainerError::Other(format!(
                "init process was terminated with {status} before reporting"
            ))),
            _ => Ok(()),
        }
    }
}
