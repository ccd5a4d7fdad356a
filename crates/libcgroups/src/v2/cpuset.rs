use std::path::Path;

use super::controller::Controller;
use crate::common::{self, WrappedIoError};
use crate::resources::Resources;

pub struct CpuSet {}

impl Controller for CpuSet {
    type Error = WrappedIoError;

    /// `cpuset.cpus` and `cpuset.mems` left unset keep following the parent
    fn apply(resources: &Resources, cgroup_path: &Path) -> Result<(), Self::Error> {
        let values = [
            ("cpuset.cpus", &resources.cpuset_cpus),
            ("cpuset.mems", &resources.cpuset_mems),
        ];
        values
            .into_iter()
            .filter_map(|(file, value)| value.as_deref().map(|value| (file, value)))
            .try_for_each(|(file, value)| {
                common::write_cgroup_file_str(cgroup_path.join(file), value)
            })
    }
}
