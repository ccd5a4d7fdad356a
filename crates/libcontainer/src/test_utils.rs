//! Helpers for tests that need a process of their own, e.g. because they
//! rewrite the environment, take over descriptors or exit.
use std::panic::{self, UnwindSafe};
use std::process;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use crate::channel::{channel, ChannelError};

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("failed to set up the report channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),
    #[error("failed to reap the child: {0}")]
    Wait(#[source] nix::Error),
    #[error("child failed: {0}")]
    Failed(String),
    #[error("child panicked")]
    Panic,
    #[error("child ended without a report: {0:?}")]
    NoReport(WaitStatus),
}

/// What a child callback can fail with
#[derive(Debug, thiserror::Error)]
pub enum TestCallbackError {
    #[error("{0}")]
    Custom(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<&str> for TestCallbackError {
    fn from(s: &str) -> Self {
        TestCallbackError::Custom(s.to_owned())
    }
}

impl From<String> for TestCallbackError {
    fn from(s: String) -> Self {
        TestCallbackError::Custom(s)
    }
}

/// Outcome of the callback as sent back to the parent. `None` means a panic.
type Report = Option<Result<(), String>>;

/// Runs `cb` in a forked child and turns its outcome into the result of the
/// caller. The child always exits once the callback is done.
pub fn test_in_child_process<F>(cb: F) -> Result<(), TestError>
where
    F: FnOnce() -> Result<(), TestCallbackError> + UnwindSafe,
{
    let (sender, receiver) = channel::<Report>()?;
    // SAFETY: the child only runs the callback and exits
    match unsafe { fork() }.map_err(TestError::Fork)? {
        ForkResult::Child => {
            drop(receiver);
            let report: Report = match panic::catch_unwind(cb) {
                Ok(outcome) => Some(outcome.map_err(|err| err.to_string())),
                Err(_) => None,
            };
            let _ = sender.send(&report);
            process::exit(0);
        }
        ForkResult::Parent { child } => {
            drop(sender);
            let report = receiver.recv();
            let status = waitpid(child, None).map_err(TestError::Wait)?;
            match report {
                Ok(Some(Ok(()))) => Ok(()),
                Ok(Some(Err(message))) => Err(TestError::Failed(message)),
                Ok(None) => Err(TestError::Panic),
                Err(_) => Err(TestError::NoReport(status)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_child_outcome_is_reported() -> Result<()> {
        test_in_child_process(|| Ok(()))?;

        let err = test_in_child_process(|| Err("broken".into())).unwrap_err();
        assert!(matches!(err, TestError::Failed(message) if message == "broken"));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_child_panic() {
        let err = test_in_child_process(|| panic!("in child")).unwrap_err();
        assert!(matches!(err, TestError::Panic));
    }

    #[test]
    #[serial]
    fn test_child_exit_without_report() {
        let err = test_in_child_process(|| process::exit(3)).unwrap_err();
        assert!(matches!(
            err,
            TestError::NoReport(WaitStatus::Exited(_, 3))
        ));
    }
}
