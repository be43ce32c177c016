//! Host resource probes backing the node-status command.
//!
//! Shells out to `free`/`df` the same way an operator would; any probe
//! failure degrades to absent values rather than an error, since node status
//! is informational.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStats {
    /// Gigabytes, e.g. "62.50 GB".
    pub total_memory: Option<String>,
    pub used_memory: Option<String>,
    /// As reported by `df -h`, e.g. "450G".
    pub total_disk: Option<String>,
    pub used_disk: Option<String>,
}

pub async fn host_stats() -> HostStats {
    let memory = match run("free", &["-m"]).await {
        Some(out) => parse_free_mb(&out),
        None => None,
    };
    let disk = match run("df", &["-h", "/"]).await {
        Some(out) => parse_df(&out),
        None => None,
    };

    HostStats {
        total_memory: memory.map(|(total, _)| format!("{:.2} GB", total as f64 / 1024.0)),
        used_memory: memory.map(|(_, used)| format!("{:.2} GB", used as f64 / 1024.0)),
        total_disk: disk.clone().map(|(total, _)| total),
        used_disk: disk.map(|(_, used)| used),
    }
}

async fn run(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            warn!(program, status = ?output.status, "Probe exited non-zero");
            None
        }
        Err(e) => {
            warn!(program, error = %e, "Probe failed to run");
            None
        }
    }
}

/// Total and used memory in MB from `free -m` output.
fn parse_free_mb(output: &str) -> Option<(u64, u64)> {
    let line = output.lines().find(|l| l.starts_with("Mem:"))?;
    let mut fields = line.split_whitespace().skip(1);
    let total = fields.next()?.parse().ok()?;
    let used = fields.next()?.parse().ok()?;
    Some((total, used))
}

/// Total and used size of the root filesystem from `df -h /` output.
fn parse_df(output: &str) -> Option<(String, String)> {
    let line = output.lines().nth(1)?;
    let mut fields = line.split_whitespace().skip(1);
    let total = fields.next()?.to_string();
    let used = fields.next()?.to_string();
    Some((total, used))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_free_output() {
        let output = "\
               total        used        free      shared  buff/cache   available\n\
Mem:           64213       12894        1022         310       50297       50564\n\
Swap:           8191           0        8191\n";
        assert_eq!(parse_free_mb(output), Some((64213, 12894)));
    }

    #[test]
    fn test_parse_free_garbage() {
        assert_eq!(parse_free_mb("no such command"), None);
        assert_eq!(parse_free_mb(""), None);
    }

    #[test]
    fn test_parse_df_output() {
        let output = "\
Filesystem      Size  Used Avail Use% Mounted on\n\
/dev/vda1       451G  187G  241G  44% /\n";
        assert_eq!(
            parse_df(output),
            Some(("451G".to_string(), "187G".to_string()))
        );
    }

    #[test]
    fn test_parse_df_garbage() {
        assert_eq!(parse_df("header only\n"), None);
        assert_eq!(parse_df(""), None);
    }
}
