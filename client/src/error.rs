use matchlock_wire::RequestId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the Matchlock client.
///
/// `ClientError::Rpc` is the only variant that originates from the
/// sandbox-manager itself; every other variant is local (configuration
/// invariant violations, transport failure, protocol malformation, or a
/// local timeout). Call sites distinguish the two by matching on the enum,
/// mirroring spec §7's client-error/RPC-error split.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A `CreateOptions`/hook-rule invariant was violated before any RPC was
    /// sent.
    #[error("{0}")]
    Config(String),

    /// The subprocess is not running, died unexpectedly, or a frame could
    /// not be written/parsed.
    #[error("{0}")]
    Transport(String),

    /// A request with a `timeout` did not receive a response in time. A
    /// `cancel` RPC referencing `request_id` has already been sent.
    #[error("request {method} (id={request_id}) timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        request_id: RequestId,
        timeout_ms: u64,
    },

    /// A JSON-RPC error object returned by the sandbox-manager.
    #[error("[{code}] {message}")]
    Rpc { code: i64, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_vm_error(&self) -> bool {
        matches!(self, ClientError::Rpc { code, .. } if *code == matchlock_wire::error_codes::VM_FAILED)
    }

    pub fn is_exec_error(&self) -> bool {
        matches!(self, ClientError::Rpc { code, .. } if *code == matchlock_wire::error_codes::EXEC_FAILED)
    }

    pub fn is_file_error(&self) -> bool {
        matches!(self, ClientError::Rpc { code, .. } if *code == matchlock_wire::error_codes::FILE_FAILED)
    }
}
