//! Minimal stand-in for the `matchlock rpc` subprocess, used only by
//! `matchlock-client`'s integration tests. It speaks just enough of the
//! wire protocol (§6 of the spec) to exercise the multiplexer end to end:
//! `create`, `exec`, `exec_stream`, `write_file`/`read_file`, `list_files`,
//! `close`, and `cancel`. Commands are not actually executed; responses are
//! synthesized from the request so tests stay deterministic.

use std::collections::HashMap;
use std::io::Write as _;

use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};

fn b64_encode(bytes: &[u8]) -> String {
    const TABLE: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(TABLE[((n >> 18) & 0x3f) as usize] as char);
        out.push(TABLE[((n >> 12) & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 {
            TABLE[((n >> 6) & 0x3f) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[(n & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn write_line(stdout: &mut std::io::Stdout, value: &Value) {
    let line = serde_json::to_string(value).unwrap_or_default();
    let _ = stdout.write_all(line.as_bytes());
    let _ = stdout.write_all(b"\n");
    let _ = stdout.flush();
}

fn log_cancel(target: &Value) {
    eprintln!("{}", json!({"cancelled": target}));
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut files: HashMap<String, String> = HashMap::new();
    let mut stdout = std::io::stdout();
    // Every method name received so far, in order. Exposed via the
    // `debug_calls` method so integration tests can assert a given RPC never
    // reached the manager (e.g. a before-hook blocked it client-side).
    let mut received_methods: Vec<String> = Vec::new();

    while let Some(line) = lines.next_line().await.unwrap_or(None) {
        if line.trim().is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let id = msg.get("id").cloned();
        let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or(Value::Null);
        received_methods.push(method.to_string());

        match method {
            "debug_calls" => {
                write_line(
                    &mut stdout,
                    &json!({"jsonrpc":"2.0","id":id,"result":{"methods":received_methods}}),
                );
            }
            "create" => {
                write_line(&mut stdout, &json!({"jsonrpc":"2.0","id":id,"result":{"id":"vm-1"}}));
            }
            "exec" => {
                let command = params
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if command.starts_with("sleep") {
                    // Never respond: the client is expected to time out and
                    // cancel this call.
                    continue;
                }
                let stdout_text = if let Some(rest) = command.strip_prefix("echo ") {
                    format!("{rest}\n")
                } else {
                    String::new()
                };
                write_line(
                    &mut stdout,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "exit_code": 0,
                            "stdout": b64_encode(stdout_text.as_bytes()),
                            "stderr": b64_encode(b""),
                            "duration_ms": 1,
                        }
                    }),
                );
            }
            "exec_stream" => {
                if let Some(id) = id.clone() {
                    write_line(
                        &mut stdout,
                        &json!({"jsonrpc":"2.0","method":"exec_stream.stdout","params":{"id":id,"data":b64_encode(b"A\n")}}),
                    );
                    write_line(
                        &mut stdout,
                        &json!({"jsonrpc":"2.0","method":"exec_stream.stdout","params":{"id":id,"data":b64_encode(b"B\n")}}),
                    );
                }
                write_line(
                    &mut stdout,
                    &json!({"jsonrpc":"2.0","id":id,"result":{"exit_code":0,"duration_ms":2}}),
                );
            }
            "write_file" => {
                let path = params.get("path").and_then(Value::as_str).unwrap_or("").to_string();
                let content = params.get("content").and_then(Value::as_str).unwrap_or("").to_string();
                files.insert(path, content);
                write_line(&mut stdout, &json!({"jsonrpc":"2.0","id":id,"result":{}}));
            }
            "read_file" => {
                let path = params.get("path").and_then(Value::as_str).unwrap_or("");
                let content = files.get(path).cloned().unwrap_or_default();
                write_line(&mut stdout, &json!({"jsonrpc":"2.0","id":id,"result":{"content":content}}));
            }
            "list_files" => {
                write_line(&mut stdout, &json!({"jsonrpc":"2.0","id":id,"result":{"files":[]}}));
            }
            "close" => {
                write_line(&mut stdout, &json!({"jsonrpc":"2.0","id":id,"result":{}}));
            }
            "cancel" => {
                log_cancel(params.get("id").unwrap_or(&Value::Null));
            }
            _ => {
                write_line(
                    &mut stdout,
                    &json!({"jsonrpc":"2.0","id":id,"error":{"code":-32601,"message":"method not found"}}),
                );
            }
        }
    }
}
