use core::fmt;

use serde::{Deserialize, Serialize};

use crate::configs::{Config, Process};
use crate::error::ErrorCode;

/// What the init process does after the handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitType {
    /// First process of a new container
    Standard,
    /// Additional process joining a running container
    Setns,
}

/// Everything the init process needs, sent as the first message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitHandoff {
    pub init_type: InitType,
    pub container_id: String,
    pub config: Config,
    pub process: Process,
}

/// Terminal failure report of the init process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitErrorRecord {
    pub code: ErrorCode,
    pub message: String,
}

/// Used as a wrapper for messages to be sent between the runtime and the
/// init process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Handoff(Box<InitHandoff>),
    Ready,
    Run,
    ProcError,
    Error(InitErrorRecord),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Handoff(h) => write!(f, "Handoff({:?}, {})", h.init_type, h.container_id),
            Message::Ready => write!(f, "Ready"),
            Message::Run => write!(f, "Run"),
            Message::ProcError => write!(f, "ProcError"),
            Message::Error(e) => write!(f, "Error({}: {})", e.code, e.message),
        }
    }
}
