//! CLI passthrough helpers: `remove` and the `volume_*` operations invoke
//! the manager binary directly (not over the RPC pipe) and parse its JSON
//! stdout. Ported from `matchlock/client.py::Client.remove` /
//! `volume_create` / `volume_list` / `volume_remove`.

use tokio::process::Command;

use crate::config::Config;
use crate::error::ClientError;
use crate::error::Result;

/// One entry of `<binary> volume {create|ls} --json` output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub size: i64,
    pub path: String,
}

fn command(config: &Config) -> Command {
    if config.use_sudo {
        let mut cmd = Command::new("sudo");
        cmd.arg(&config.binary_path);
        cmd
    } else {
        Command::new(&config.binary_path)
    }
}

async fn run(config: &Config, args: &[&str]) -> Result<String> {
    let output = command(config)
        .args(args)
        .output()
        .await
        .map_err(|e| ClientError::Transport(format!("failed to run {}: {e}", config.binary_path)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(ClientError::Transport(format!(
            "{} {} exited with {}: {stderr}",
            config.binary_path,
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `<binary> rm <vm_id>`. Best-effort from the caller's point of view
/// (`Client::remove` logs and swallows the error); this function itself
/// still surfaces failures so callers that want to know can.
pub async fn remove(config: &Config, vm_id: &str) -> Result<()> {
    run(config, &["rm", vm_id]).await?;
    Ok(())
}

pub async fn volume_create(config: &Config, size_mb: u64) -> Result<VolumeInfo> {
    let size_arg = size_mb.to_string();
    let stdout = run(config, &["volume", "create", "--size", &size_arg, "--json"]).await?;
    serde_json::from_str(&stdout)
        .map_err(|e| ClientError::Transport(format!("malformed volume create output: {e}")))
}

pub async fn volume_list(config: &Config) -> Result<Vec<VolumeInfo>> {
    let stdout = run(config, &["volume", "ls", "--json"]).await?;
    serde_json::from_str(&stdout)
        .map_err(|e| ClientError::Transport(format!("malformed volume ls output: {e}")))
}

pub async fn volume_remove(config: &Config, name: &str) -> Result<()> {
    run(config, &["volume", "rm", name]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn volume_info_parses_from_json_object() {
        let v: VolumeInfo = serde_json::from_str(r#"{"name":"data","size":1024,"path":"/var/lib/x"}"#).unwrap();
        assert_eq!(v.name, "data");
        assert_eq!(v.size, 1024);
    }

    #[test]
    fn volume_list_parses_json_array() {
        let vs: Vec<VolumeInfo> =
            serde_json::from_str(r#"[{"name":"a","size":1,"path":"/a"},{"name":"b","size":2,"path":"/b"}]"#).unwrap();
        assert_eq!(vs.len(), 2);
        assert_eq!(vs[1].name, "b");
    }
}
