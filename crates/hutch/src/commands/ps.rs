use std::process::Command;

use anyhow::{bail, Result};
use clap::Parser;
use libcontainer::factory::Factory;

use crate::commands::load_container;

/// Display the processes inside a container
#[derive(Parser, Debug)]
pub struct Ps {
    /// output format, table or json
    #[clap(short, long, default_value = "table")]
    pub format: String,
    #[clap(required = true)]
    pub container_id: String,
    /// options handed to ps(1), `-ef` when empty
    #[clap(last = true)]
    pub ps_options: Vec<String>,
}

pub fn ps(args: Ps, factory: &Factory) -> Result<()> {
    let container = load_container(factory, &args.container_id)?;
    let pids: Vec<i32> = container
        .processes()?
        .iter()
        .map(|pid| pid.as_raw())
        .collect();

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string(&pids)?),
        "table" => {
            let default_ps_options = vec![String::from("-ef")];
            let ps_options = if args.ps_options.is_empty() {
                &default_ps_options
            } else {
                &args.ps_options
            };
            let output = Command::new("ps").args(ps_options).output()?;
            if !output.status.success() {
                bail!("ps failed: {}", String::from_utf8_lossy(&output.stderr));
            }
            let lines = std::str::from_utf8(&output.stdout)?;
            for line in filter_ps_output(lines, &pids)? {
                println!("{line}");
            }
        }
        unknown => bail!("unknown ps format: {}", unknown),
    }
    Ok(())
}

/// Keeps the title line and the lines of the given processes
fn filter_ps_output<'a>(output: &'a str, pids: &[i32]) -> Result<Vec<&'a str>> {
    let mut lines = output.lines();
    let title = match lines.next() {
        Some(title) => title,
        None => bail!("empty ps output"),
    };
    let pid_index = get_pid_index(title)?;

    let mut filtered = vec![title];
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let pid: i32 = match line.split_whitespace().nth(pid_index) {
            Some(field) => field.parse()?,
            None => continue,
        };
        if pids.contains(&pid) {
            filtered.push(line);
        }
    }
    Ok(filtered)
}

fn get_pid_index(title: &str) -> Result<usize> {
    match title.split_whitespace().position(|name| name == "PID") {
        Some(index) => Ok(index),
        None => bail!("couldn't find PID field in ps output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_ps_output() -> Result<()> {
        let output = "UID PID PPID C STIME TTY TIME CMD\n\
                      root 1 0 0 10:00 ? 00:00:01 /sbin/init\n\
                      root 4242 1 0 10:01 ? 00:00:00 sleep 100\n";
        let lines = filter_ps_output(output, &[4242])?;
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("sleep 100"));
        Ok(())
    }

    #[test]
    fn test_missing_pid_column() {
        assert!(get_pid_index("UID PPID CMD").is_err());
        assert!(filter_ps_output("", &[1]).is_err());
    }
}
