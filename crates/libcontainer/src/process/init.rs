//! Child side of the init protocol. Runs in the re-executed runtime binary
//! and ends in an `exec` of the workload.
use std::any::Any;
use std::env;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd;

use super::message::{InitErrorRecord, InitHandoff, InitType, Message};
use crate::channel::Endpoint;
use crate::configs::Process;
use crate::error::{ErrorCode, LibcontainerError};
use crate::workload::Executor;

/// Environment variable carrying the descriptor of the init channel
pub const INIT_PIPE_ENV: &str = "_HUTCH_INITPIPE";

type Result<T> = std::result::Result<T, LibcontainerError>;

/// Entry point of the init process. On success the workload replaces the
/// current process and this function never returns, so the result is
/// always an error that has already been reported to the runtime.
pub fn start_initialization(executor: &dyn Executor) -> Result<()> {
    let fd = init_pipe_fd()?;
    clear_environment();

    // SAFETY: the descriptor was inherited from the runtime for this purpose
    // and nothing else in this process refers to it.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    let channel = Endpoint::<Message>::from(fd);

    // unknown until the handoff has been decoded
    let mut init_type = None;
    let message = match panic::catch_unwind(AssertUnwindSafe(|| {
        let handoff = receive_handoff(&channel)?;
        init_type = Some(handoff.init_type);
        run_init(&channel, &handoff, executor)
    })) {
        Ok(Ok(())) => "workload returned without error".to_string(),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panic in init process: {}", panic_message(payload.as_ref())),
    };

    tracing::error!("init process failed: {}", message);
    // the runtime expects the token on every path except a decoded setns
    if init_type != Some(InitType::Setns) {
        let _ = channel.send(&Message::ProcError);
    }
    let record = InitErrorRecord {
        code: ErrorCode::SystemError,
        message,
    };
    let _ = channel.send(&Message::Error(record.clone()));

    Err(LibcontainerError::InitFailed {
        code: record.code,
        message: record.message,
    })
}

fn init_pipe_fd() -> Result<RawFd> {
    let value = env::var(INIT_PIPE_ENV).map_err(|_| {
        LibcontainerError::InvalidConfig(format!("{INIT_PIPE_ENV} is not set"))
    })?;
    value.parse().map_err(|_| {
        LibcontainerError::InvalidConfig(format!("{INIT_PIPE_ENV}={value:?} is not a descriptor"))
    })
}

fn clear_environment() {
    for (key, _) in env::vars_os() {
        env::remove_var(key);
    }
}

fn receive_handoff(channel: &Endpoint<Message>) -> Result<InitHandoff> {
    let handoff = match channel.recv()? {
        Message::Handoff(handoff) => *handoff,
        msg => return Err(LibcontainerError::UnexpectedMessage(msg)),
    };
    tracing::debug!(
        "init process of container {} received {:?} handoff",
        handoff.container_id,
        handoff.init_type
    );
    Ok(handoff)
}

fn run_init(
    channel: &Endpoint<Message>,
    handoff: &InitHandoff,
    executor: &dyn Executor,
) -> Result<()> {
    match handoff.init_type {
        InitType::Standard => {
            executor.validate(&handoff.process)?;
            channel.send(&Message::Ready)?;
            match channel.recv()? {
                Message::Run => {}
                msg => return Err(LibcontainerError::UnexpectedMessage(msg)),
            }
        }
        InitType::Setns => {}
    }

    finalize_process(&handoff.process)?;
    executor.exec(&handoff.process)?;
    Ok(())
}

fn finalize_process(process: &Process) -> Result<()> {
    for entry in &process.env {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => env::set_var(key, value),
            _ => tracing::warn!("ignoring malformed environment entry {:?}", entry),
        }
    }
    unistd::chdir(&process.cwd)?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
