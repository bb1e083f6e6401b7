use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;

/// Raw `exec` RPC result as it appears on the wire: `stdout`/`stderr` are
/// base64-encoded so they survive JSON's UTF-8-only string type unscathed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResultWire {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

/// Decoded `exec` result handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

impl ExecResultWire {
    pub fn decode(&self) -> Result<ExecResult, base64::DecodeError> {
        let stdout = BASE64.decode(&self.stdout)?;
        let stderr = BASE64.decode(&self.stderr)?;
        Ok(ExecResult {
            exit_code: self.exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms: self.duration_ms,
        })
    }
}

/// Result of a streaming `exec_stream` RPC. `stdout`/`stderr` are delivered
/// out-of-band via notifications, so the final result only carries the exit
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStreamResultWire {
    pub exit_code: i64,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn decodes_base64_stdout_stderr() {
        let wire = ExecResultWire {
            exit_code: 0,
            stdout: BASE64.encode(b"hi\n"),
            stderr: BASE64.encode(b""),
            duration_ms: 12,
        };
        let decoded = wire.decode().unwrap();
        assert_eq!(decoded.stdout, "hi\n");
        assert_eq!(decoded.stderr, "");
        assert_eq!(decoded.exit_code, 0);
    }
}
