use std::collections::HashMap;

use super::client::Variant;
use super::controller::Controller;
use crate::resources::Resources;

pub const TASKS_MAX: &str = "TasksMax";

pub struct Pids {}

impl Controller for Pids {
    type Error = std::convert::Infallible;

    fn apply(
        resources: &Resources,
        _: u32,
        properties: &mut HashMap<&str, Variant>,
    ) -> Result<(), Self::Error> {
        if let Some(limit) = resources.pids_limit {
            tracing::debug!("applying pids resource restrictions");
            let limit = if limit > 0 { limit as u64 } else { u64::MAX };
            properties.insert(TASKS_MAX, Variant::U64(limit));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_max() {
        let mut properties = HashMap::new();
        let resources = Resources {
            pids_limit: Some(10),
            ..Default::default()
        };
        let _ = Pids::apply(&resources, 245, &mut properties);
        assert_eq!(properties[TASKS_MAX], Variant::U64(10));

        let resources = Resources {
            pids_limit: Some(-1),
            ..Default::default()
        };
        let _ = Pids::apply(&resources, 245, &mut properties);
        assert_eq!(properties[TASKS_MAX], Variant::U64(u64::MAX));
    }
}
