//! Thin base64 wrapper shared by `write_file`/`read_file` bodies and the
//! hook server's `set_body_base64`, matching `matchlock_wire`'s encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

pub(crate) fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn decode(s: &str) -> crate::error::Result<Vec<u8>> {
    BASE64
        .decode(s)
        .map_err(|e| crate::error::ClientError::Transport(format!("invalid base64 payload: {e}")))
}
