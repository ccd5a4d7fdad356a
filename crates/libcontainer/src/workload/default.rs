use std::ffi::CString;

use nix::unistd;

use super::{Executor, ExecutorError};
use crate::configs::Process;

/// Runs the first argument of the process through `execvp`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

fn to_cstrings(args: &[String]) -> Result<Vec<CString>, ExecutorError> {
    args.iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|err| {
                tracing::error!(?arg, %err, "failed to convert argument to cstring");
                ExecutorError::InvalidArg
            })
        })
        .collect()
}

impl Executor for DefaultExecutor {
    fn validate(&self, process: &Process) -> Result<(), ExecutorError> {
        if process.args.is_empty() {
            tracing::error!("no arguments provided to execute");
            return Err(ExecutorError::InvalidArg);
        }
        to_cstrings(&process.args)?;
        Ok(())
    }

    fn exec(&self, process: &Process) -> Result<(), ExecutorError> {
        tracing::debug!("executing workload with default handler");
        self.validate(process)?;
        let args = to_cstrings(&process.args)?;

        let err = match unistd::execvp(&args[0], &args) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        tracing::error!(?err, filename = ?args[0], ?args, "failed to execvp");
        Err(ExecutorError::Execution(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let mut process = Process {
            args: vec![],
            ..Default::default()
        };
        assert!(matches!(
            DefaultExecutor.validate(&process),
            Err(ExecutorError::InvalidArg)
        ));

        process.args = vec!["echo".to_string(), "a\0b".to_string()];
        assert!(matches!(
            DefaultExecutor.validate(&process),
            Err(ExecutorError::InvalidArg)
        ));

        process.args = vec!["echo".to_string(), "hello".to_string()];
        assert!(DefaultExecutor.validate(&process).is_ok());
    }
}
