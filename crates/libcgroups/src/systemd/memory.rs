use std::collections::HashMap;

use super::client::Variant;
use super::controller::Controller;
use crate::resources::Resources;

pub const MEMORY_LOW: &str = "MemoryLow";
pub const MEMORY_MAX: &str = "MemoryMax";
pub const MEMORY_SWAP: &str = "MemorySwapMax";

#[derive(thiserror::Error, Debug)]
pub enum SystemdMemoryError {
    #[error("invalid memory reservation value: {0}")]
    ReservationValue(i64),
    #[error("invalid memory limit value: {0}")]
    MemoryLimit(i64),
    #[error("cgroup v2 swap value cannot be calculated from swap of {swap} and limit of {limit}")]
    SwapValue { swap: i64, limit: String },
}

pub struct Memory {}

impl Controller for Memory {
    type Error = SystemdMemoryError;

    fn apply(
        resources: &Resources,
        _: u32,
        properties: &mut HashMap<&str, Variant>,
    ) -> Result<(), Self::Error> {
        if !resources.has_memory() {
            return Ok(());
        }

        tracing::debug!("applying memory resource restrictions");
        if let Some(reservation) = resources.memory_reservation {
            properties.insert(
                MEMORY_LOW,
                Variant::U64(to_limit(reservation).ok_or(
                    SystemdMemoryError::ReservationValue(reservation),
                )?),
            );
        }

        if let Some(limit) = resources.memory {
            properties.insert(
                MEMORY_MAX,
                Variant::U64(to_limit(limit).ok_or(SystemdMemoryError::MemoryLimit(limit))?),
            );
        }

        Self::apply_swap(resources.memory_swap, resources.memory, properties)
    }
}

// -1 is unlimited, zero and other negative values are invalid
fn to_limit(value: i64) -> Option<u64> {
    match value {
        1..=i64::MAX => Some(value as u64),
        -1 => Some(u64::MAX),
        _ => None,
    }
}

impl Memory {
    // The swap value is memory plus swap like memory.memsw.limit_in_bytes
    // in v1, MemorySwapMax is swap alone.
    fn apply_swap(
        swap: Option<i64>,
        limit: Option<i64>,
        properties: &mut HashMap<&str, Variant>,
    ) -> Result<(), SystemdMemoryError> {
        let value: u64 = match (limit, swap) {
            (None, None) => return Ok(()),
            (_, Some(-1)) => u64::MAX,
            (Some(-1), None) => u64::MAX,
            (Some(limit), None) if limit > 0 => return Ok(()),
            (Some(limit), Some(swap)) if limit > 0 && swap >= limit => (swap - limit) as u64,
            (None, Some(0)) | (Some(_), Some(0)) => 0,
            (limit, Some(swap)) => {
                return Err(SystemdMemoryError::SwapValue {
                    swap,
                    limit: limit.map_or("none".to_owned(), |l| l.to_string()),
                })
            }
            (Some(_), None) => return Ok(()),
        };

        properties.insert(MEMORY_SWAP, Variant::U64(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_limits() -> Result<()> {
        let resources = Resources {
            memory: Some(1024),
            memory_reservation: Some(512),
            memory_swap: Some(3072),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        Memory::apply(&resources, 245, &mut properties)?;
        assert_eq!(properties[MEMORY_MAX], Variant::U64(1024));
        assert_eq!(properties[MEMORY_LOW], Variant::U64(512));
        assert_eq!(properties[MEMORY_SWAP], Variant::U64(2048));
        Ok(())
    }

    #[test]
    fn test_unlimited() -> Result<()> {
        let resources = Resources {
            memory: Some(-1),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        Memory::apply(&resources, 245, &mut properties)?;
        assert_eq!(properties[MEMORY_MAX], Variant::U64(u64::MAX));
        assert_eq!(properties[MEMORY_SWAP], Variant::U64(u64::MAX));
        Ok(())
    }

    #[test]
    fn test_invalid_values() {
        let mut properties = HashMap::new();
        let zero_limit = Resources {
            memory: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Memory::apply(&zero_limit, 245, &mut properties),
            Err(SystemdMemoryError::MemoryLimit(0))
        ));

        let small_swap = Resources {
            memory: Some(2048),
            memory_swap: Some(1024),
            ..Default::default()
        };
        assert!(matches!(
            Memory::apply(&small_swap, 245, &mut properties),
            Err(SystemdMemoryError::SwapValue { swap: 1024, .. })
        ));
    }
}
