use std::collections::HashMap;

use super::client::Variant;
use super::controller::Controller;
use crate::resources::Resources;
use crate::v2::cpu::shares_to_weight;

pub const CPU_WEIGHT: &str = "CPUWeight";
pub const CPU_QUOTA: &str = "CPUQuotaPerSecUSec";
pub const CPU_PERIOD: &str = "CPUQuotaPeriodUSec";
const MICROSECS_PER_SEC: u64 = 1_000_000;
const DEFAULT_PERIOD: u64 = 100_000;
// CPUQuotaPeriodUSec is understood since systemd 242
const MIN_PERIOD_VERSION: u32 = 242;

#[derive(thiserror::Error, Debug)]
pub enum SystemdCpuError {
    #[error("setting the cpu quota period requires systemd {MIN_PERIOD_VERSION}, found {0}")]
    OldSystemd(u32),
}

pub(crate) struct Cpu {}

impl Controller for Cpu {
    type Error = SystemdCpuError;

    fn apply(
        resources: &Resources,
        systemd_version: u32,
        properties: &mut HashMap<&str, Variant>,
    ) -> Result<(), Self::Error> {
        if !resources.has_cpu() {
            return Ok(());
        }

        tracing::debug!("applying cpu resource restrictions");
        if let Some(weight) = resources.cpu_shares.map(shares_to_weight).filter(|w| *w != 0) {
            properties.insert(CPU_WEIGHT, Variant::U64(weight));
        }

        let period = resources
            .cpu_period
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PERIOD);

        if resources.cpu_quota.is_some() || resources.cpu_period.is_some() {
            // quota in systemd is microseconds of cpu time per second,
            // u64::MAX means unrestricted
            let quota = match resources.cpu_quota {
                Some(quota) if quota > 0 => quota as u64 * MICROSECS_PER_SEC / period,
                _ => u64::MAX,
            };
            properties.insert(CPU_QUOTA, Variant::U64(quota));
        }

        if resources.cpu_period.is_some() {
            if systemd_version < MIN_PERIOD_VERSION {
                return Err(SystemdCpuError::OldSystemd(systemd_version));
            }
            properties.insert(CPU_PERIOD, Variant::U64(period));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_set_shares() -> Result<()> {
        let resources = Resources {
            cpu_shares: Some(22000),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        Cpu::apply(&resources, 245, &mut properties)?;
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[CPU_WEIGHT], Variant::U64(840));
        Ok(())
    }

    #[test]
    fn test_set_quota_and_period() -> Result<()> {
        let resources = Resources {
            cpu_quota: Some(50_000),
            cpu_period: Some(200_000),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        Cpu::apply(&resources, 245, &mut properties)?;
        assert_eq!(properties[CPU_QUOTA], Variant::U64(250_000));
        assert_eq!(properties[CPU_PERIOD], Variant::U64(200_000));
        Ok(())
    }

    #[test]
    fn test_unrestricted_quota() -> Result<()> {
        let resources = Resources {
            cpu_quota: Some(-1),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        Cpu::apply(&resources, 245, &mut properties)?;
        assert_eq!(properties[CPU_QUOTA], Variant::U64(u64::MAX));
        assert!(!properties.contains_key(CPU_PERIOD));
        Ok(())
    }

    #[test]
    fn test_period_needs_recent_systemd() {
        let resources = Resources {
            cpu_period: Some(100_000),
            ..Default::default()
        };
        let mut properties = HashMap::new();

        let result = Cpu::apply(&resources, 240, &mut properties);
        assert!(matches!(result, Err(SystemdCpuError::OldSystemd(240))));
    }
}
