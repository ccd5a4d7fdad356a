//! One row per container directory under the factory root. Containers that
//! cannot be loaded still get a row so a broken state file never hides a
//! container from the operator.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;

use chrono::{DateTime, Utc};
use nix::unistd::{Uid, User};
use serde::Serialize;

use crate::error::LibcontainerError;
use crate::factory::Factory;

const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerListing {
    pub id: String,
    /// Pid of the init process, 0 if it never ran and -1 if unknown
    pub pid: i32,
    pub status: String,
    pub bundle: String,
    pub created: Option<DateTime<Utc>>,
    pub annotations: HashMap<String, String>,
    pub owner: String,
}

impl ContainerListing {
    fn placeholder(id: String, owner: String) -> Self {
        Self {
            id,
            pid: -1,
            status: PLACEHOLDER.to_string(),
            bundle: PLACEHOLDER.to_string(),
            created: None,
            annotations: HashMap::new(),
            owner,
        }
    }
}

/// Lists the containers of `factory`, sorted by id
pub fn list_containers(factory: &Factory) -> Result<Vec<ContainerListing>, LibcontainerError> {
    let mut listing = Vec::new();
    for entry in fs::read_dir(factory.root())? {
        let entry = entry?;
        let id = entry.file_name().to_string_lossy().into_owned();
        if let Some(row) = listing_row(factory, id, entry.metadata()) {
            listing.push(row);
        }
    }

    listing.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(listing)
}

/// None for entries that are not directories. An entry that cannot be
/// inspected is listed with an unknown owner.
fn listing_row(
    factory: &Factory,
    id: String,
    metadata: io::Result<fs::Metadata>,
) -> Option<ContainerListing> {
    let owner = match metadata {
        Ok(metadata) if !metadata.is_dir() => return None,
        Ok(metadata) => owner_name(metadata.uid()),
        Err(err) => {
            tracing::warn!("failed to inspect container directory {}: {}", id, err);
            PLACEHOLDER.to_string()
        }
    };

    let row = load_row(factory, &id, &owner).unwrap_or_else(|err| {
        tracing::warn!("failed to load container {}: {}", id, err);
        ContainerListing::placeholder(id, owner)
    });
    Some(row)
}

fn load_row(
    factory: &Factory,
    id: &str,
    owner: &str,
) -> Result<ContainerListing, LibcontainerError> {
    let mut container = factory.load(id)?;
    let status = container.status()?;
    let config = container.config();

    Ok(ContainerListing {
        id: id.to_string(),
        pid: container.pid().map(|pid| pid.as_raw()).unwrap_or(0),
        status: status.to_string(),
        bundle: config
            .bundle()
            .map(|bundle| bundle.display().to_string())
            .unwrap_or_default(),
        created: Some(container.created()),
        annotations: config.annotations(),
        owner: owner.to_string(),
    })
}

fn owner_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}
