//! Subprocess transport: spawns the sandbox-manager binary in RPC mode and
//! exposes a line-oriented read/write surface over its stdio.
//!
//! Grounded in `codex-core::exec::spawn_child_async` for the `Command`
//! configuration, and in `mcp-server/src/lib.rs` for splitting stdin/stdout
//! into independently owned reader/writer halves so a multiplexer can run
//! them as separate tasks.

use std::process::Stdio;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;

use crate::config::Config;
use crate::error::ClientError;
use crate::error::Result;

/// Write half of a spawned transport. Owned by the multiplexer's writer
/// task; only one task should ever hold this.
pub struct TransportWriter {
    stdin: ChildStdin,
}

impl TransportWriter {
    /// Writes one JSON-RPC frame (already serialized, no trailing newline)
    /// followed by `\n`, then flushes.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClientError::Transport(format!("write failed: {e}")))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ClientError::Transport(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ClientError::Transport(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Drops stdin, signalling EOF to the child.
    pub fn shutdown(self) {
        drop(self.stdin);
    }
}

/// Read half of a spawned transport. Owned by the multiplexer's reader task.
pub struct TransportReader {
    lines: Lines<BufReader<ChildStdout>>,
}

impl TransportReader {
    /// Reads the next non-empty line from the subprocess's stdout.
    /// Returns `Ok(None)` on clean EOF.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ClientError::Transport(format!("read failed: {e}")))?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line)),
            }
        }
    }
}

/// Handle to the child process itself, used only for the final wait/kill on
/// shutdown. Held separately from the stdio halves so it can outlive both
/// the reader and writer tasks.
pub struct TransportHandle {
    child: Child,
}

impl TransportHandle {
    /// Waits up to `grace_seconds` for the child to exit on its own (the
    /// writer having already dropped stdin), killing it if it doesn't.
    pub async fn close(mut self, grace_seconds: u64) -> Result<()> {
        let grace = std::time::Duration::from_secs(grace_seconds);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_status)) => Ok(()),
            Ok(Err(e)) => Err(ClientError::Transport(format!("wait failed: {e}"))),
            Err(_) => {
                let _ = self.child.kill().await;
                Ok(())
            }
        }
    }
}

/// Spawns `<binary_path> rpc` (optionally under `sudo`), wiring stdin and
/// stdout as pipes and discarding stderr (spec §4.1: the manager's own
/// diagnostic output is not this crate's concern). Returns the three
/// independently owned handles a multiplexer needs: a writer, a reader, and
/// the child itself.
pub async fn spawn(config: &Config) -> Result<(TransportWriter, TransportReader, TransportHandle)> {
    let mut cmd = if config.use_sudo {
        let mut cmd = Command::new("sudo");
        cmd.arg(&config.binary_path);
        cmd
    } else {
        Command::new(&config.binary_path)
    };
    cmd.arg("rpc");
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ClientError::Transport(format!("failed to spawn {}: {e}", config.binary_path)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ClientError::Transport("child stdin was not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::Transport("child stdout was not piped".to_string()))?;
    let lines = BufReader::new(stdout).lines();

    Ok((
        TransportWriter { stdin },
        TransportReader { lines },
        TransportHandle { child },
    ))
}
