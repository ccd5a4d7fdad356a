use std::fmt::Display;

use libcgroups::common::{AnyManagerError, CreateCgroupSetupError, WrappedIoError};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;
use crate::container::state::StateError;
use crate::process::message::Message;
use crate::rootless::RootlessError;
use crate::specconv::SpecConvError;
use crate::validate::ValidateError;
use crate::workload::ExecutorError;

/// Stable classification of every error returned by the library. Callers
/// match on the code, the message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidIdFormat,
    IdInUse,
    ConfigInvalid,
    ContainerNotExists,
    ContainerPaused,
    ContainerNotStopped,
    ContainerNotRunning,
    ContainerNotPaused,
    SystemError,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            ErrorCode::InvalidIdFormat => "invalid id format",
            ErrorCode::IdInUse => "id already in use",
            ErrorCode::ConfigInvalid => "invalid configuration",
            ErrorCode::ContainerNotExists => "container does not exist",
            ErrorCode::ContainerPaused => "container paused",
            ErrorCode::ContainerNotStopped => "container still running",
            ErrorCode::ContainerNotRunning => "container not running",
            ErrorCode::ContainerNotPaused => "container not paused",
            ErrorCode::SystemError => "system error",
        };

        write!(f, "{print}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibcontainerError {
    #[error("invalid container id format: {0:?}")]
    InvalidId(String),
    #[error("container with id {0} already exists")]
    IdInUse(String),
    #[error("container {0} does not exist")]
    NotExists(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Rootless(#[from] RootlessError),
    #[error(transparent)]
    SpecConv(#[from] SpecConvError),
    #[error("container {0} is paused")]
    ContainerPaused(String),
    #[error("container {0} is not stopped")]
    ContainerNotStopped(String),
    #[error("container {0} is not running")]
    ContainerNotRunning(String),
    #[error("container {0} is not paused")]
    ContainerNotPaused(String),
    #[error("init process failed ({code}): {message}")]
    InitFailed { code: ErrorCode, message: String },
    #[error("unexpected message {0} from the other end of the init channel")]
    UnexpectedMessage(Message),
    #[error("init process {0} has no child handle")]
    NotChild(i32),
    #[error("failed to spawn init process")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Cgroup(#[from] AnyManagerError),
    #[error(transparent)]
    CreateCgroup(#[from] CreateCgroupSetupError),
    #[error(transparent)]
    CgroupIo(#[from] WrappedIoError),
    #[error(transparent)]
    Procfs(#[from] procfs::ProcError),
    #[error(transparent)]
    OtherIO(#[from] std::io::Error),
    #[error(transparent)]
    OtherSyscall(#[from] nix::Error),
    #[error("{0}")]
    Other(String),
}

impl LibcontainerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LibcontainerError::InvalidId(_) => ErrorCode::InvalidIdFormat,
            LibcontainerError::IdInUse(_) => ErrorCode::IdInUse,
            LibcontainerError::NotExists(_) => ErrorCode::ContainerNotExists,
            LibcontainerError::InvalidConfig(_)
            | LibcontainerError::Validate(_)
            | LibcontainerError::Rootless(_)
            | LibcontainerError::SpecConv(_) => ErrorCode::ConfigInvalid,
            LibcontainerError::ContainerPaused(_) => ErrorCode::ContainerPaused,
            LibcontainerError::ContainerNotStopped(_) => ErrorCode::ContainerNotStopped,
            LibcontainerError::ContainerNotRunning(_) => ErrorCode::ContainerNotRunning,
            LibcontainerError::ContainerNotPaused(_) => ErrorCode::ContainerNotPaused,
            LibcontainerError::InitFailed { code, .. } => *code,
            _ => ErrorCode::SystemError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LibcontainerError::InvalidId("..".to_string()).code(),
            ErrorCode::InvalidIdFormat
        );
        assert_eq!(
            LibcontainerError::Rootless(RootlessError::NoUserNamespace).code(),
            ErrorCode::ConfigInvalid
        );
        assert_eq!(
            LibcontainerError::InitFailed {
                code: ErrorCode::SystemError,
                message: "boom".to_string(),
            }
            .code(),
            ErrorCode::SystemError
        );
        assert_eq!(
            LibcontainerError::OtherIO(std::io::Error::from(std::io::ErrorKind::Other)).code(),
            ErrorCode::SystemError
        );
    }
}
