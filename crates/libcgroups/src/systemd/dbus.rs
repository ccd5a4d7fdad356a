//! [`SystemdClient`] on top of the dbus system or session bus.
//! See https://www.freedesktop.org/wiki/Software/systemd/dbus/
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dbus::arg::{RefArg, Variant as DbusVariant};
use dbus::blocking::stdintf::org_freedesktop_dbus::Properties;
use dbus::blocking::{Connection, Proxy};

use super::client::{self, SystemdClient, SystemdClientError, Variant};

const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER: &str = "org.freedesktop.systemd1.Manager";

type Property<'a> = (&'a str, DbusVariant<Box<dyn RefArg>>);

pub struct DbusClient {
    conn: Connection,
    system: bool,
}

impl DbusClient {
    /// Connects to the system bus when running as root, the session bus otherwise
    pub fn connect(use_system: bool) -> Result<Self, SystemdClientError> {
        let conn = if use_system {
            Connection::new_system()
        } else {
            Connection::new_session()
        }
        .map_err(|err| SystemdClientError::Dbus {
            method: "connect",
            err,
        })?;

        Ok(DbusClient {
            conn,
            system: use_system,
        })
    }

    fn create_proxy(&self) -> Proxy<&Connection> {
        self.conn
            .with_proxy(SYSTEMD_DESTINATION, SYSTEMD_PATH, Duration::from_millis(5000))
    }

    fn to_dbus(value: &Variant) -> DbusVariant<Box<dyn RefArg>> {
        match value {
            Variant::U64(v) => DbusVariant(Box::new(*v)),
            Variant::U32(v) => DbusVariant(Box::new(*v)),
            Variant::Bool(v) => DbusVariant(Box::new(*v)),
            Variant::String(v) => DbusVariant(Box::new(v.clone())),
            Variant::ArrayU32(v) => DbusVariant(Box::new(v.clone())),
        }
    }
}

impl SystemdClient for DbusClient {
    fn is_system(&self) -> bool {
        self.system
    }

    fn start_transient_unit(
        &self,
        container_name: &str,
        pid: u32,
        parent: &str,
        unit_name: &str,
    ) -> Result<(), SystemdClientError> {
        // the same accounting properties runc sets on its units
        let mut properties: Vec<Property> = vec![(
            "Description",
            DbusVariant(Box::new(format!("hutch container {container_name}"))),
        )];

        // a slice is attached to its parent with Wants=, a scope with Slice=
        if unit_name.ends_with("slice") {
            properties.push(("Wants", DbusVariant(Box::new(parent.to_owned()))));
        } else {
            properties.push(("Slice", DbusVariant(Box::new(parent.to_owned()))));
            properties.push(("Delegate", DbusVariant(Box::new(true))));
        }

        properties.push(("MemoryAccounting", DbusVariant(Box::new(true))));
        properties.push(("CPUAccounting", DbusVariant(Box::new(true))));
        properties.push(("IOAccounting", DbusVariant(Box::new(true))));
        properties.push(("TasksAccounting", DbusVariant(Box::new(true))));
        properties.push(("DefaultDependencies", DbusVariant(Box::new(false))));
        properties.push(("PIDs", DbusVariant(Box::new(vec![pid]))));

        let aux: Vec<(&str, Vec<Property>)> = Vec::new();
        let _: (dbus::Path<'static>,) = self
            .create_proxy()
            .method_call(
                SYSTEMD_MANAGER,
                "StartTransientUnit",
                (unit_name, "replace", properties, aux),
            )
            .map_err(|err| SystemdClientError::Dbus {
                method: "StartTransientUnit",
                err,
            })?;
        Ok(())
    }

    fn stop_transient_unit(&self, unit_name: &str) -> Result<(), SystemdClientError> {
        let _: (dbus::Path<'static>,) = self
            .create_proxy()
            .method_call(SYSTEMD_MANAGER, "StopUnit", (unit_name, "replace"))
            .map_err(|err| SystemdClientError::Dbus {
                method: "StopUnit",
                err,
            })?;
        Ok(())
    }

    fn set_unit_properties(
        &self,
        unit_name: &str,
        properties: &HashMap<&str, Variant>,
    ) -> Result<(), SystemdClientError> {
        let props: Vec<Property> = properties
            .iter()
            .map(|(name, value)| (*name, Self::to_dbus(value)))
            .collect();

        self.create_proxy()
            .method_call(SYSTEMD_MANAGER, "SetUnitProperties", (unit_name, true, props))
            .map_err(|err| SystemdClientError::Dbus {
                method: "SetUnitProperties",
                err,
            })
    }

    fn systemd_version(&self) -> Result<u32, SystemdClientError> {
        let version: String = self
            .create_proxy()
            .get(SYSTEMD_MANAGER, "Version")
            .map_err(|err| SystemdClientError::Dbus {
                method: "Get(Version)",
                err,
            })?;

        client::parse_systemd_version(&version)
    }

    fn control_cgroup_root(&self) -> Result<PathBuf, SystemdClientError> {
        let cgroup: String = self
            .create_proxy()
            .get(SYSTEMD_MANAGER, "ControlGroup")
            .map_err(|err| SystemdClientError::Dbus {
                method: "Get(ControlGroup)",
                err,
            })?;

        Ok(PathBuf::from(cgroup))
    }
}
