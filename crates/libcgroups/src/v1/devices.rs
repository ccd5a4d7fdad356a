use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::{DeviceRule, Resources};

const CGROUP_DEVICES_ALLOW: &str = "devices.allow";
const CGROUP_DEVICES_DENY: &str = "devices.deny";

pub struct Devices {}

impl Controller for Devices {
    type Error = WrappedIoError;

    fn apply(resources: &Resources, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("Apply Devices cgroup config");

        for rule in &resources.devices {
            Self::apply_device(rule, cgroup_root)?;
        }

        Ok(())
    }

    fn needs_to_handle(resources: &Resources) -> bool {
        !resources.devices.is_empty()
    }
}

impl Devices {
    fn apply_device(rule: &DeviceRule, cgroup_root: &Path) -> Result<(), WrappedIoError> {
        let path = if rule.allow {
            cgroup_root.join(CGROUP_DEVICES_ALLOW)
        } else {
            cgroup_root.join(CGROUP_DEVICES_DENY)
        };

        common::write_cgroup_file_str(path, &rule.to_rule_string())
    }
}
