use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::controller::Controller;
use crate::common::{self, FreezerState, WrapIoResult, WrappedIoError};
use crate::resources::Resources;

const CGROUP_FREEZER_STATE: &str = "freezer.state";
const THAWED: &str = "THAWED";
const FROZEN: &str = "FROZEN";
const FREEZING: &str = "FREEZING";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const FREEZE_TIMEOUT: Duration = Duration::from_secs(10);
const STATE_TIMEOUT: Duration = Duration::from_secs(1);
/// Attempts after which a stuck FREEZING cgroup is thawed and tried again
const THAW_EVERY: u32 = 50;

#[derive(thiserror::Error, Debug)]
pub enum V1FreezerControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("unexpected {CGROUP_FREEZER_STATE} content {0:?}")]
    UnexpectedState(String),
    #[error("cgroup did not freeze within {0:?}")]
    Timeout(Duration),
}

pub struct Freezer {}

impl Controller for Freezer {
    type Error = V1FreezerControllerError;

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        std::fs::create_dir_all(cgroup_root).wrap_create_dir(cgroup_root)?;
        match resources.freezer {
            Some(state) => Self::set_state(state, cgroup_root),
            None => Ok(()),
        }
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        resources.freezer.is_some()
    }
}

/// `None` while the kernel is still FREEZING
fn parse_state(content: &str) -> Result<Option<FreezerState>, V1FreezerControllerError> {
    match content.trim() {
        THAWED => Ok(Some(FreezerState::Thawed)),
        FROZEN => Ok(Some(FreezerState::Frozen)),
        FREEZING => Ok(None),
        other => Err(V1FreezerControllerError::UnexpectedState(other.to_owned())),
    }
}

impl Freezer {
    pub fn set_state(
        state: FreezerState,
        cgroup_root: &Path,
    ) -> Result<(), V1FreezerControllerError> {
        let state_file = cgroup_root.join(CGROUP_FREEZER_STATE);
        match state {
            FreezerState::Undefined => Ok(()),
            FreezerState::Thawed => Ok(common::write_cgroup_file_str(&state_file, THAWED)?),
            FreezerState::Frozen => {
                let result = Self::freeze(&state_file);
                if result.is_err() {
                    // a failed freeze must not leave tasks stopped
                    let _ = common::write_cgroup_file_str(&state_file, THAWED);
                }
                result
            }
        }
    }

    /// Keeps requesting FROZEN until the kernel reports it. A cgroup can
    /// hang in FREEZING, so it is thawed briefly now and then.
    fn freeze(state_file: &Path) -> Result<(), V1FreezerControllerError> {
        let deadline = Instant::now() + FREEZE_TIMEOUT;
        let mut attempt = 0u32;
        while Instant::now() < deadline {
            attempt += 1;
            if attempt % THAW_EVERY == 0 {
                common::write_cgroup_file_str(state_file, THAWED)?;
                thread::sleep(POLL_INTERVAL);
            }

            common::write_cgroup_file_str(state_file, FROZEN)?;
            if let Some(FreezerState::Frozen) =
                parse_state(&common::read_cgroup_file(state_file)?)?
            {
                tracing::debug!("cgroup frozen after {} attempts", attempt);
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        Err(V1FreezerControllerError::Timeout(FREEZE_TIMEOUT))
    }

    /// Reports a cgroup that stays FREEZING as frozen, its tasks are at
    /// least partially stopped
    pub fn state(cgroup_root: &Path) -> Result<FreezerState, V1FreezerControllerError> {
        let state_file = cgroup_root.join(CGROUP_FREEZER_STATE);
        let deadline = Instant::now() + STATE_TIMEOUT;
        loop {
            if let Some(state) = parse_state(&common::read_cgroup_file(&state_file)?)? {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Ok(FreezerState::Frozen);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
