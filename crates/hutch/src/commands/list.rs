//! Contains functionality of the list command
use std::fmt::Write as _;
use std::io;
use std::io::Write;

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use libcontainer::factory::Factory;
use libcontainer::list::{list_containers, ContainerListing};
use tabwriter::TabWriter;

/// List the containers in the state directory
#[derive(Parser, Debug)]
pub struct List {
    /// output format, table or json
    #[clap(long, short, default_value = "table")]
    pub format: String,
    /// only print the container ids
    #[clap(long, short)]
    pub quiet: bool,
}

pub fn list(args: List, factory: &Factory) -> Result<()> {
    let containers = list_containers(factory)?;

    if args.quiet {
        for container in &containers {
            println!("{}", container.id);
        }
        return Ok(());
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string(&containers)?),
        "table" => print_table(&containers)?,
        unknown => bail!("unknown list format: {}", unknown),
    }
    Ok(())
}

fn print_table(containers: &[ContainerListing]) -> Result<()> {
    let mut content = String::new();
    for container in containers {
        let created = container
            .created
            .map(|utc| {
                let local: DateTime<Local> = DateTime::from(utc);
                local.to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
            })
            .unwrap_or_default();
        let pid = if container.pid > 0 {
            container.pid.to_string()
        } else {
            "".to_owned()
        };

        let _ = writeln!(
            content,
            "{}\t{}\t{}\t{}\t{}\t{}",
            container.id, pid, container.status, container.bundle, created, container.owner
        );
    }

    let mut tab_writer = TabWriter::new(io::stdout());
    writeln!(&mut tab_writer, "ID\tPID\tSTATUS\tBUNDLE\tCREATED\tOWNER")?;
    write!(&mut tab_writer, "{content}")?;
    tab_writer.flush()?;

    Ok(())
}
