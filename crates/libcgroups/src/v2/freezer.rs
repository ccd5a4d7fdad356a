//! `cgroup.freeze` requests a state, the `frozen` entry of `cgroup.events`
//! reports once every task of the cgroup has actually stopped.
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::controller::Controller;
use crate::common::{self, FreezerState, WrappedIoError};
use crate::resources::Resources;

const CGROUP_FREEZE: &str = "cgroup.freeze";
const CGROUP_EVENTS: &str = "cgroup.events";
const FREEZE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const FREEZE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum V2FreezerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("the kernel has no cgroup v2 freezer, {0:?} is missing")]
    NotSupported(PathBuf),
    #[error("cgroup was asked to be {expected:?} but is {actual:?}")]
    Mismatch {
        expected: FreezerState,
        actual: FreezerState,
    },
    #[error("unexpected {CGROUP_FREEZE} content {0:?}")]
    UnknownState(String),
    #[error("cgroup did not freeze within {0:?}")]
    Timeout(Duration),
}

pub struct Freezer {}

impl Controller for Freezer {
    type Error = V2FreezerError;

    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        match resources.freezer {
            Some(state) => Self::set_state(state, cgroup_path),
            None => Ok(()),
        }
    }
}

impl Freezer {
    /// Requests `state` and checks that the cgroup reached it. Thawing a
    /// cgroup without freezer succeeds, there is nothing frozen.
    pub fn set_state(state: FreezerState, path: &Path) -> Result<(), V2FreezerError> {
        let value = match state {
            FreezerState::Undefined => return Ok(()),
            FreezerState::Frozen => "1",
            FreezerState::Thawed => "0",
        };

        let freeze_file = path.join(CGROUP_FREEZE);
        if !freeze_file.exists() {
            return match state {
                FreezerState::Frozen => Err(V2FreezerError::NotSupported(freeze_file)),
                _ => Ok(()),
            };
        }
        common::write_cgroup_file_str(&freeze_file, value)?;

        let actual = Self::state(path)?;
        if actual != state {
            return Err(V2FreezerError::Mismatch {
                expected: state,
                actual,
            });
        }
        Ok(())
    }

    /// Undefined when the kernel has no freezer
    pub fn state(path: &Path) -> Result<FreezerState, V2FreezerError> {
        let freeze_file = path.join(CGROUP_FREEZE);
        if !freeze_file.exists() {
            return Ok(FreezerState::Undefined);
        }

        match common::read_cgroup_file(&freeze_file)?.trim() {
            "0" => Ok(FreezerState::Thawed),
            "1" => Self::wait_frozen(path),
            other => Err(V2FreezerError::UnknownState(other.to_owned())),
        }
    }

    fn wait_frozen(path: &Path) -> Result<FreezerState, V2FreezerError> {
        let events_file = path.join(CGROUP_EVENTS);
        let deadline = Instant::now() + FREEZE_TIMEOUT;
        let mut polls = 0;
        loop {
            let events = common::read_cgroup_file(&events_file)?;
            match events.lines().find_map(|line| line.strip_prefix("frozen ")) {
                Some("1") => {
                    if polls > 0 {
                        tracing::debug!("cgroup {:?} frozen after {} polls", path, polls);
                    }
                    return Ok(FreezerState::Frozen);
                }
                Some(_) => {}
                None => return Ok(FreezerState::Undefined),
            }

            if Instant::now() >= deadline {
                return Err(V2FreezerError::Timeout(FREEZE_TIMEOUT));
            }
            polls += 1;
            thread::sleep(FREEZE_POLL_INTERVAL);
        }
    }
}
