use std::collections::HashMap;

use super::client::Variant;
use crate::resources::Resources;

/// Translates resources into unit properties
pub(super) trait Controller {
    type Error;

    fn apply(
        resources: &Resources,
        systemd_version: u32,
        properties: &mut HashMap<&str, Variant>,
    ) -> Result<(), Self::Error>;
}
