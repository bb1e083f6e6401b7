//! Local Unix-domain-socket server the sandbox-manager dials back into to
//! invoke SDK-local network hook callbacks.
//!
//! Ported from `matchlock/client.py`'s `_start_network_hook_server` /
//! `_network_hook_accept_loop` / `_serve_network_hook_conn`. One accept
//! loop, one spawned task per connection, one line of JSON in and one line
//! of JSON out per connection (§6.3).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::UnixListener;

use crate::error::ClientError;
use crate::error::Result;
use crate::hooks::types::LocalNetworkHook;
use crate::hooks::types::NetworkHookRequest;
use crate::hooks::types::NetworkHookResult;

/// Owns the listening socket and its backing temp directory. Dropping this
/// (or calling [`HookServer::stop`]) closes the listener and removes the
/// directory.
pub(crate) struct HookServer {
    socket_path: String,
    _temp_dir: tempfile::TempDir,
    accept_task: tokio::task::JoinHandle<()>,
}

impl HookServer {
    /// Binds a fresh socket under a freshly created temp directory and
    /// starts the accept loop. Returns the socket path to embed in the
    /// wire `NetworkInterceptionWire::callback_socket` field.
    pub(crate) fn start(hooks: HashMap<String, LocalNetworkHook>) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("matchlock-network-hook-")
            .tempdir()
            .map_err(|e| ClientError::Transport(format!("failed to create hook server temp dir: {e}")))?;
        let socket_path = temp_dir.path().join("hook.sock");

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| ClientError::Transport(format!("failed to bind hook socket: {e}")))?;

        let hooks = Arc::new(hooks);
        let accept_task = tokio::spawn(accept_loop(listener, hooks));

        Ok(Self {
            socket_path: socket_path.to_string_lossy().into_owned(),
            _temp_dir: temp_dir,
            accept_task,
        })
    }

    pub(crate) fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Stops accepting new connections. Connections already in flight are
    /// left to finish on their own; the temp directory is removed once
    /// `self` drops.
    pub(crate) fn stop(self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: UnixListener, hooks: Arc<HashMap<String, LocalNetworkHook>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let hooks = hooks.clone();
                tokio::spawn(async move {
                    serve_conn(stream, &hooks).await;
                });
            }
            Err(e) => {
                tracing::warn!("hook server accept failed: {e}");
                return;
            }
        }
    }
}

async fn serve_conn(stream: tokio::net::UnixStream, hooks: &HashMap<String, LocalNetworkHook>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let line = match lines.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            let _ = write_response(&mut write_half, &json!({ "error": e.to_string() })).await;
            return;
        }
    };

    let payload: Value = match serde_json::from_str(&line) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) => {
            let _ = write_response(
                &mut write_half,
                &json!({ "error": "network hook callback request must be an object" }),
            )
            .await;
            return;
        }
        Err(e) => {
            let _ = write_response(&mut write_half, &json!({ "error": e.to_string() })).await;
            return;
        }
    };

    let callback_id = payload.get("callback_id").and_then(Value::as_str).unwrap_or("").trim().to_string();
    let phase = match payload.get("phase").and_then(Value::as_str).map(str::to_lowercase).as_deref() {
        Some("before") => "before".to_string(),
        Some("after") => "after".to_string(),
        _ => String::new(),
    };

    let Some(hook) = hooks.get(&callback_id) else {
        let _ = write_response(&mut write_half, &json!({ "error": "network hook callback not found" })).await;
        return;
    };
    if !hook.phase.is_empty() && hook.phase != phase {
        let _ = write_response(&mut write_half, &json!({ "error": "network hook phase mismatch" })).await;
        return;
    }

    let request = NetworkHookRequest {
        phase,
        host: payload.get("host").and_then(Value::as_str).unwrap_or("").to_string(),
        method: payload.get("method").and_then(Value::as_str).unwrap_or("").to_string(),
        path: payload.get("path").and_then(Value::as_str).unwrap_or("").to_string(),
        query: to_string_map(payload.get("query")),
        request_headers: to_string_slice_map(payload.get("request_headers")),
        status_code: payload.get("status_code").and_then(Value::as_u64).unwrap_or(0) as u16,
        response_headers: to_string_slice_map(payload.get("response_headers")),
        is_sse: payload.get("is_sse").and_then(Value::as_bool).unwrap_or(false),
    };

    tracing::debug!(hook = %hook.name, callback_id = %callback_id, "invoking network hook");
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (hook.hook)(&request)));
    let response = match outcome {
        Ok(result) => match result_to_wire(result) {
            Ok(body) => body,
            Err(e) => json!({ "error": e.to_string() }),
        },
        Err(panic) => json!({ "error": panic_message(&panic) }),
    };
    let _ = write_response(&mut write_half, &response).await;
}

fn result_to_wire(result: Option<NetworkHookResult>) -> Result<Value> {
    let Some(result) = result else {
        return Ok(json!({}));
    };

    let mut resp = serde_json::Map::new();
    let action = result.action.trim();
    if !action.is_empty() {
        resp.insert("action".to_string(), json!(action));
    }

    if let Some(request) = result.request {
        let mut req = serde_json::Map::new();
        if let Some(headers) = request.headers {
            req.insert("headers".to_string(), json!(headers));
        }
        if let Some(query) = request.query {
            req.insert("query".to_string(), json!(query));
        }
        if !request.path.is_empty() {
            req.insert("path".to_string(), json!(request.path));
        }
        if !req.is_empty() {
            resp.insert("request".to_string(), Value::Object(req));
        }
    }

    if let Some(response) = result.response {
        let mut resp_obj = serde_json::Map::new();
        if let Some(headers) = response.headers {
            resp_obj.insert("headers".to_string(), json!(headers));
        }
        if !response.body_replacements.is_empty() {
            let replacements: Vec<Value> = response
                .body_replacements
                .iter()
                .map(|t| json!({ "find": t.find, "replace": t.replace }))
                .collect();
            resp_obj.insert("body_replacements".to_string(), Value::Array(replacements));
        }
        if let Some(body) = response.set_body {
            resp_obj.insert(
                "set_body_base64".to_string(),
                json!(crate::b64::encode(&body)),
            );
        }
        if !resp_obj.is_empty() {
            resp.insert("response".to_string(), Value::Object(resp_obj));
        }
    }

    Ok(Value::Object(resp))
}

async fn write_response(write_half: &mut tokio::net::unix::OwnedWriteHalf, value: &Value) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

fn to_string_map(value: Option<&Value>) -> Option<HashMap<String, String>> {
    let Value::Object(map) = value? else {
        return None;
    };
    Some(
        map.iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect(),
    )
}

fn to_string_slice_map(value: Option<&Value>) -> Option<HashMap<String, Vec<String>>> {
    let Value::Object(map) = value? else {
        return None;
    };
    Some(
        map.iter()
            .map(|(k, v)| {
                let values = match v {
                    Value::Array(items) => items.iter().map(value_to_string).collect(),
                    other => vec![value_to_string(other)],
                };
                (k.clone(), values)
            })
            .collect(),
    )
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Best-effort extraction of a panic payload's message, mirroring spec
/// §4.5's "any exception in user code becomes `{error: str(exception)}`".
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "network hook panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hooks::types::NetworkHookRequestMutation;
    use crate::hooks::types::NetworkHookResponseMutation;

    #[test]
    fn result_to_wire_omits_empty_sections() {
        let wire = result_to_wire(None).unwrap();
        assert_eq!(wire, json!({}));
    }

    #[test]
    fn result_to_wire_encodes_set_body_as_base64() {
        let result = NetworkHookResult {
            action: "mutate".to_string(),
            request: None,
            response: Some(NetworkHookResponseMutation {
                headers: None,
                body_replacements: vec![],
                set_body: Some(b"hi".to_vec()),
            }),
        };
        let wire = result_to_wire(Some(result)).unwrap();
        assert_eq!(wire["action"], json!("mutate"));
        assert_eq!(wire["response"]["set_body_base64"], json!("aGk="));
    }

    #[test]
    fn result_to_wire_carries_request_mutation() {
        let result = NetworkHookResult {
            action: "mutate".to_string(),
            request: Some(NetworkHookRequestMutation {
                headers: None,
                query: None,
                path: "/rewritten".to_string(),
            }),
            response: None,
        };
        let wire = result_to_wire(Some(result)).unwrap();
        assert_eq!(wire["request"]["path"], json!("/rewritten"));
    }

    /// Spec §8 property 7 / scenario S6: dial the server exactly the way the
    /// sandbox-manager is expected to, over a live Unix socket, rather than
    /// calling `serve_conn`'s pieces directly.
    #[tokio::test]
    async fn live_socket_round_trip_invokes_registered_hook_and_returns_mutation() {
        let mut hooks = HashMap::new();
        hooks.insert(
            "network_hook_1".to_string(),
            LocalNetworkHook {
                name: "inject-header".to_string(),
                phase: "before".to_string(),
                timeout_ms: 0,
                hook: Box::new(|_req| {
                    Some(NetworkHookResult {
                        action: "mutate".to_string(),
                        request: Some(NetworkHookRequestMutation {
                            headers: Some(HashMap::from([(
                                "X-Injected".to_string(),
                                vec!["1".to_string()],
                            )])),
                            query: None,
                            path: String::new(),
                        }),
                        response: None,
                    })
                }),
            },
        );
        let server = HookServer::start(hooks).unwrap();

        let response = send_one_line_request(
            server.socket_path(),
            &json!({
                "callback_id": "network_hook_1",
                "phase": "before",
                "host": "api.example.com",
                "method": "GET",
                "path": "/v1/resource",
            }),
        )
        .await;

        assert_eq!(response["action"], json!("mutate"));
        assert_eq!(response["request"]["headers"]["X-Injected"], json!(["1"]));

        server.stop();
    }

    #[tokio::test]
    async fn live_socket_unknown_callback_id_replies_with_error_and_skips_the_hook() {
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let mut hooks = HashMap::new();
        hooks.insert(
            "network_hook_1".to_string(),
            LocalNetworkHook {
                name: "never-called".to_string(),
                phase: String::new(),
                timeout_ms: 0,
                hook: Box::new(move |_req| {
                    invoked2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    None
                }),
            },
        );
        let server = HookServer::start(hooks).unwrap();

        let response = send_one_line_request(
            server.socket_path(),
            &json!({"callback_id": "no-such-callback", "phase": "before", "host": "x", "method": "GET", "path": "/"}),
        )
        .await;

        assert!(response.get("error").is_some());
        assert_eq!(invoked.load(std::sync::atomic::Ordering::SeqCst), 0);

        server.stop();
    }

    #[tokio::test]
    async fn live_socket_phase_mismatch_replies_with_error() {
        let mut hooks = HashMap::new();
        hooks.insert(
            "network_hook_1".to_string(),
            LocalNetworkHook {
                name: "after-only".to_string(),
                phase: "after".to_string(),
                timeout_ms: 0,
                hook: Box::new(|_req| None),
            },
        );
        let server = HookServer::start(hooks).unwrap();

        let response = send_one_line_request(
            server.socket_path(),
            &json!({"callback_id": "network_hook_1", "phase": "before", "host": "x", "method": "GET", "path": "/"}),
        )
        .await;

        assert!(response.get("error").is_some());

        server.stop();
    }

    /// Connects to `socket_path` over a real `UnixStream`, writes one line of
    /// JSON, and reads exactly one line back, mirroring the §6.3 protocol.
    async fn send_one_line_request(socket_path: &str, request: &Value) -> Value {
        let stream = tokio::net::UnixStream::connect(socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let mut line = serde_json::to_string(request).unwrap();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.unwrap();
        write_half.flush().await.unwrap();

        let response_line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&response_line).unwrap()
    }
}
