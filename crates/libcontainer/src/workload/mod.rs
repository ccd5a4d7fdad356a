//! The workload is the user program the init process finally turns into.
use crate::configs::Process;

pub mod default;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid argument")]
    InvalidArg,
    #[error("failed to execute workload")]
    Execution(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("{0}")]
    Other(String),
}

/// Replaces the init process with the workload
pub trait Executor {
    /// Checks that the process can be executed before the runtime is told
    /// the init process is ready
    fn validate(&self, process: &Process) -> Result<(), ExecutorError>;

    /// Executes the workload. Only returns on failure.
    fn exec(&self, process: &Process) -> Result<(), ExecutorError>;
}
