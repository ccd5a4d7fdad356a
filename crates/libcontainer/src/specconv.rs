//! Translation of an OCI runtime bundle (`config.json`) into a container
//! [`Config`], and the templates written by `hutch spec`.
use std::path::{Path, PathBuf};

use libcgroups::resources::{Cgroup, DeviceRule, DeviceType, Resources};
use oci_spec::runtime::{
    LinuxDeviceType, LinuxIdMapping, LinuxIdMappingBuilder, LinuxNamespaceBuilder,
    LinuxNamespaceType, LinuxResources, Spec,
};

use crate::configs::{Config, IdMap, Mount, Namespace, NamespaceType, Process, BUNDLE_LABEL};

#[derive(Debug, thiserror::Error)]
pub enum SpecConvError {
    #[error("bundle config has no root")]
    MissingRoot,
    #[error("bundle config has no process")]
    MissingProcess,
    #[error("namespace {0:?} is not supported")]
    UnsupportedNamespace(LinuxNamespaceType),
    #[error(transparent)]
    OciSpec(#[from] oci_spec::OciSpecError),
}

type Result<T> = std::result::Result<T, SpecConvError>;

/// Builds the container configuration for the bundle in `bundle`. Relative
/// paths of the OCI spec are resolved against the bundle directory.
pub fn create_config(bundle: &Path, spec: &Spec) -> Result<Config> {
    let root = spec.root().as_ref().ok_or(SpecConvError::MissingRoot)?;
    let rootfs = if root.path().is_absolute() {
        root.path().clone()
    } else {
        bundle.join(root.path())
    };

    let mut config = Config {
        rootfs,
        readonly_rootfs: root.readonly().unwrap_or(false),
        hostname: spec.hostname().clone(),
        mounts: spec
            .mounts()
            .iter()
            .flatten()
            .map(|mount| {
                let options = mount.options().clone().unwrap_or_default();
                let device = mount.typ().clone().unwrap_or_else(|| {
                    if options.iter().any(|o| o == "bind" || o == "rbind") {
                        "bind".to_string()
                    } else {
                        "none".to_string()
                    }
                });
                Mount {
                    source: mount.source().clone(),
                    destination: mount.destination().clone(),
                    device,
                    options,
                }
            })
            .collect(),
        process: convert_process(spec)?,
        labels: vec![format!("{}={}", BUNDLE_LABEL, bundle.display())],
        ..Default::default()
    };

    if let Some(annotations) = spec.annotations() {
        let mut annotations: Vec<_> = annotations.iter().collect();
        annotations.sort();
        config
            .labels
            .extend(annotations.into_iter().map(|(k, v)| format!("{k}={v}")));
    }

    if let Some(linux) = spec.linux() {
        for namespace in linux.namespaces().iter().flatten() {
            config.namespaces.push(Namespace {
                typ: convert_namespace_type(namespace.typ())?,
                path: namespace.path().clone(),
            });
        }
        config.uid_mappings = convert_mappings(linux.uid_mappings());
        config.gid_mappings = convert_mappings(linux.gid_mappings());
        config.cgroup = Cgroup {
            path: linux.cgroups_path().clone(),
            resources: linux
                .resources()
                .as_ref()
                .map(convert_resources)
                .unwrap_or_default(),
            ..Default::default()
        };
    }

    Ok(config)
}

fn convert_process(spec: &Spec) -> Result<Process> {
    let process = spec.process().as_ref().ok_or(SpecConvError::MissingProcess)?;
    Ok(Process {
        args: process.args().clone().unwrap_or_default(),
        env: process.env().clone().unwrap_or_default(),
        cwd: process.cwd().clone(),
        no_new_privileges: process.no_new_privileges().unwrap_or(false),
    })
}

fn convert_namespace_type(typ: LinuxNamespaceType) -> Result<NamespaceType> {
    Ok(match typ {
        LinuxNamespaceType::Mount => NamespaceType::Mount,
        LinuxNamespaceType::Uts => NamespaceType::Uts,
        LinuxNamespaceType::Ipc => NamespaceType::Ipc,
        LinuxNamespaceType::Network => NamespaceType::Network,
        LinuxNamespaceType::Pid => NamespaceType::Pid,
        LinuxNamespaceType::User => NamespaceType::User,
        LinuxNamespaceType::Cgroup => NamespaceType::Cgroup,
        other => return Err(SpecConvError::UnsupportedNamespace(other)),
    })
}

fn convert_mappings(mappings: &Option<Vec<LinuxIdMapping>>) -> Vec<IdMap> {
    mappings
        .iter()
        .flatten()
        .map(|m| IdMap {
            container_id: m.container_id(),
            host_id: m.host_id(),
            size: m.size(),
        })
        .collect()
}

fn convert_resources(resources: &LinuxResources) -> Resources {
    let mut converted = Resources {
        devices: resources
            .devices()
            .iter()
            .flatten()
            .map(|rule| DeviceRule {
                allow: rule.allow(),
                typ: match rule.typ() {
                    Some(LinuxDeviceType::C) | Some(LinuxDeviceType::U) => DeviceType::Char,
                    Some(LinuxDeviceType::B) => DeviceType::Block,
                    _ => DeviceType::All,
                },
                major: rule.major(),
                minor: rule.minor(),
                access: rule.access().clone().unwrap_or_else(|| "rwm".to_string()),
            })
            .collect(),
        ..Default::default()
    };

    if let Some(memory) = resources.memory() {
        converted.memory = memory.limit();
        converted.memory_reservation = memory.reservation();
        converted.memory_swap = memory.swap();
        converted.memory_swappiness = memory.swappiness();
        converted.oom_kill_disable = memory.disable_oom_killer().unwrap_or(false);
    }
    if let Some(cpu) = resources.cpu() {
        converted.cpu_shares = cpu.shares();
        converted.cpu_quota = cpu.quota();
        converted.cpu_period = cpu.period();
        converted.cpuset_cpus = cpu.cpus().clone();
        converted.cpuset_mems = cpu.mems().clone();
    }
    if let Some(pids) = resources.pids() {
        converted.pids_limit = Some(pids.limit());
    }

    converted
}

/// The OCI spec written by `hutch spec`
pub fn example() -> Spec {
    Spec::default()
}

/// Turns `spec` into one an unprivileged user with the given effective ids
/// can run: a user namespace mapping container root to the caller, no
/// network namespace, no mount options naming other owners and no resource
/// limits.
pub fn to_rootless(spec: &mut Spec, euid: u32, egid: u32) -> Result<()> {
    let mapping = |host_id: u32| {
        LinuxIdMappingBuilder::default()
            .host_id(host_id)
            .container_id(0_u32)
            .size(1_u32)
            .build()
    };

    let mut linux = spec.linux().clone().unwrap_or_default();
    let mut namespaces: Vec<_> = linux
        .namespaces()
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|ns| {
            ns.typ() != LinuxNamespaceType::Network && ns.typ() != LinuxNamespaceType::User
        })
        .collect();
    namespaces.push(
        LinuxNamespaceBuilder::default()
            .typ(LinuxNamespaceType::User)
            .build()?,
    );
    linux
        .set_namespaces(Some(namespaces))
        .set_uid_mappings(Some(vec![mapping(euid)?]))
        .set_gid_mappings(Some(vec![mapping(egid)?]))
        .set_resources(None);

    let mut mounts = spec.mounts().clone().unwrap_or_default();
    for mount in &mut mounts {
        if mount.destination() == Path::new("/sys") {
            // sysfs cannot be mounted without owning the network namespace
            mount
                .set_source(Some(PathBuf::from("/sys")))
                .set_typ(Some("none".to_string()))
                .set_options(Some(
                    ["rbind", "nosuid", "noexec", "nodev", "ro"]
                        .iter()
                        .map(|o| o.to_string())
                        .collect(),
                ));
            continue;
        }
        let options = mount
            .options()
            .iter()
            .flatten()
            .filter(|o| !o.starts_with("uid=") && !o.starts_with("gid="))
            .cloned()
            .collect();
        mount.set_options(Some(options));
    }

    spec.set_linux(Some(linux)).set_mounts(Some(mounts));
    Ok(())
}
