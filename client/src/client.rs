//! Public API surface (spec §4.7): a `Client` owning a subprocess
//! multiplexer, the local hook server, and the compiled VFS hook tables,
//! behind the session state machine of spec §4.7:
//!
//! `NEW -> STARTED -> { CREATED -> OPERATING* } -> CLOSING -> CLOSED`
//!
//! Ported from `matchlock/client.py::Client`. Every public method takes
//! `&self`; `Client` is cheaply `Clone` (an `Arc` around shared state) so
//! dangerous VFS hooks can be handed an owned handle to call back into the
//! session from a spawned task.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use matchlock_wire::ExecResult;
use matchlock_wire::ExecResultWire;
use matchlock_wire::ExecStreamResultWire;
use matchlock_wire::FileInfo;
use matchlock_wire::ListFilesResult;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;

use crate::cli;
use crate::config::Config;
use crate::error::ClientError;
use crate::error::Result;
use crate::hook_server::HookServer;
use crate::hooks::compiler;
use crate::hooks::types::VfsHookEvent;
use crate::hooks::vfs_dispatcher;
use crate::hooks::VfsHookState;
use crate::multiplexer::Multiplexer;
use crate::multiplexer::MultiplexerShutdown;
use crate::options::CreateOptions;
use crate::sandbox::Sandbox;

/// Result of `Client::exec_stream`: the final exit status, with stdout/
/// stderr already delivered out-of-band to the caller's writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStreamResult {
    pub exit_code: i64,
    pub duration_ms: i64,
}

/// Session state machine (spec §4.7). Transitions are one-way except that a
/// second `create()` from `Created` is legal and loops back to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Started,
    Created,
    Closing,
    Closed,
}

struct Started {
    mux: Multiplexer,
    shutdown: Mutex<Option<MultiplexerShutdown>>,
}

struct Inner {
    config: Config,
    state: Mutex<SessionState>,
    started: Mutex<Option<Started>>,
    vm_id: Mutex<Option<String>>,
    last_vm_id: Mutex<Option<String>>,
    vfs_hook_state: Arc<Mutex<VfsHookState>>,
    hook_server: Mutex<Option<HookServer>>,
}

/// A handle to one sandbox-manager session. Clone freely; clones share the
/// same subprocess, pending-call table, and hook state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SessionState::New),
                started: Mutex::new(None),
                vm_id: Mutex::new(None),
                last_vm_id: Mutex::new(None),
                vfs_hook_state: Arc::new(Mutex::new(VfsHookState::default())),
                hook_server: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn vfs_hook_state(&self) -> Arc<Mutex<VfsHookState>> {
        self.inner.vfs_hook_state.clone()
    }

    /// Spawns the sandbox-manager subprocess and starts the background
    /// reader/writer tasks. Legal only from `NEW`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if *state != SessionState::New {
                return Err(ClientError::Config("Client::start called more than once".to_string()));
            }
            *state = SessionState::Started;
        }

        let (mux, shutdown) = Multiplexer::start(&self.inner.config).await?;

        let on_closed_client = self.clone();
        mux.set_on_closed(Box::new(move || {
            let client = on_closed_client.clone();
            tokio::spawn(async move {
                client.handle_transport_closed().await;
            });
        }))
        .await;

        let event_client = self.clone();
        mux.set_event_handler(Box::new(move |params| {
            let client = event_client.clone();
            tokio::spawn(async move {
                client.dispatch_file_event(params).await;
            });
        }))
        .await;

        *self.inner.started.lock().await = Some(Started {
            mux,
            shutdown: Mutex::new(Some(shutdown)),
        });
        Ok(())
    }

    async fn handle_transport_closed(&self) {
        tracing::warn!("matchlock subprocess closed unexpectedly; stopping hook server");
        if let Some(server) = self.inner.hook_server.lock().await.take() {
            server.stop();
        }
        *self.inner.vm_id.lock().await = None;
    }

    async fn dispatch_file_event(&self, params: Value) {
        let Some(file) = params.get("file") else {
            return;
        };
        let event = VfsHookEvent {
            op: file.get("op").and_then(Value::as_str).unwrap_or("").to_string(),
            path: file.get("path").and_then(Value::as_str).unwrap_or("").to_string(),
            size: file.get("size").and_then(Value::as_u64).unwrap_or(0),
            mode: file.get("mode").and_then(Value::as_u64).unwrap_or(0) as u32,
            uid: file.get("uid").and_then(Value::as_u64).unwrap_or(0) as u32,
            gid: file.get("gid").and_then(Value::as_u64).unwrap_or(0) as u32,
        };
        vfs_dispatcher::handle_vfs_file_event(self, event).await;
    }

    async fn mux(&self) -> Result<Multiplexer> {
        let started = self.inner.started.lock().await;
        started
            .as_ref()
            .map(|s| s.mux.clone())
            .ok_or_else(|| ClientError::Transport("matchlock client not started".to_string()))
    }

    async fn require_vm_id(&self) -> Result<String> {
        self.inner
            .vm_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::Config("no sandbox created; call create() first".to_string()))
    }

    /// Compiles `opts`'s hooks, starts/replaces the local hook server as
    /// needed, and issues the `create` RPC. On any failure (invariant
    /// violation or RPC error) tears down a freshly started hook server
    /// before propagating, per spec §4.7.
    pub async fn create(&self, mut opts: CreateOptions) -> Result<String> {
        {
            let state = self.inner.state.lock().await;
            if *state != SessionState::Started && *state != SessionState::Created {
                return Err(ClientError::Config(format!(
                    "create() is only legal in STARTED or CREATED, current state is {state:?}"
                )));
            }
        }

        opts.validate()?;

        let vfs_cfg = opts.vfs_interception.take();
        let network_cfg = opts.network_interception.take();
        let compiled_vfs = compiler::compile_vfs_hooks(vfs_cfg)?;
        let (mut network_wire, network_hooks) = compiler::compile_network_hooks(network_cfg)?;

        let hook_server = if network_hooks.is_empty() {
            None
        } else {
            match HookServer::start(network_hooks) {
                Ok(server) => {
                    if let Some(wire) = network_wire.as_mut() {
                        wire.callback_socket = Some(server.socket_path().to_string());
                    }
                    Some(server)
                }
                Err(e) => return Err(e),
            }
        };

        let params = build_create_params(&opts, compiled_vfs.wire.clone(), network_wire);

        let result = self.mux().await?.call("create", Some(params), None, None).await;
        let result = match result {
            Ok(v) => v,
            Err(e) => {
                if let Some(server) = hook_server {
                    server.stop();
                }
                return Err(e);
            }
        };

        let vm_id = result
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Transport("create response missing \"id\"".to_string()))?
            .to_string();

        let previous_server = std::mem::replace(&mut *self.inner.hook_server.lock().await, hook_server);
        if let Some(old_server) = previous_server {
            old_server.stop();
        }

        *self.inner.vm_id.lock().await = Some(vm_id.clone());
        *self.inner.last_vm_id.lock().await = Some(vm_id.clone());

        {
            let mut hooks = self.inner.vfs_hook_state.lock().await;
            hooks.after_hooks = compiled_vfs.after_hooks;
            hooks.mutate_hooks = compiled_vfs.mutate_hooks;
            hooks.action_hooks = compiled_vfs.action_hooks;
            hooks.active = false;
        }

        *self.inner.state.lock().await = SessionState::Created;
        Ok(vm_id)
    }

    /// Thin adapter: reads `CreateOptions` out of a builder object (spec
    /// §4.7's "launch(sandbox)").
    pub async fn launch(&self, sandbox: Sandbox) -> Result<String> {
        self.create(sandbox.into_options()).await
    }

    pub async fn exec(
        &self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        self.require_vm_id().await?;
        let mut params = serde_json::Map::new();
        params.insert("command".to_string(), json!(command));
        if let Some(dir) = working_dir {
            params.insert("working_dir".to_string(), json!(dir));
        }
        let result = self
            .mux()
            .await?
            .call("exec", Some(Value::Object(params)), timeout.map(duration_ms), None)
            .await?;
        let wire: ExecResultWire = serde_json::from_value(result)?;
        wire.decode()
            .map_err(|e| ClientError::Transport(format!("invalid base64 in exec result: {e}")))
    }

    pub async fn exec_stream(
        &self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<Duration>,
        stdout: Option<Box<dyn std::io::Write + Send>>,
        stderr: Option<Box<dyn std::io::Write + Send>>,
    ) -> Result<ExecStreamResult> {
        self.require_vm_id().await?;
        let mut params = serde_json::Map::new();
        params.insert("command".to_string(), json!(command));
        if let Some(dir) = working_dir {
            params.insert("working_dir".to_string(), json!(dir));
        }

        let stdout = stdout.map(std::sync::Mutex::new);
        let stderr = stderr.map(std::sync::Mutex::new);
        let sink: crate::multiplexer::NotificationSink = Box::new(move |method, notif_params| {
            let target = match method {
                "exec_stream.stdout" => stdout.as_ref(),
                "exec_stream.stderr" => stderr.as_ref(),
                _ => None,
            };
            let Some(target) = target else {
                return;
            };
            let Some(data) = notif_params.get("data").and_then(Value::as_str) else {
                return;
            };
            let Ok(bytes) = crate::b64::decode(data) else {
                return;
            };
            if let Ok(mut writer) = target.lock() {
                let _ = writer.write_all(&bytes);
                let _ = writer.flush();
            }
        });

        let result = self
            .mux()
            .await?
            .call(
                "exec_stream",
                Some(Value::Object(params)),
                timeout.map(duration_ms),
                Some(sink),
            )
            .await?;
        let wire: ExecStreamResultWire = serde_json::from_value(result)?;
        Ok(ExecStreamResult {
            exit_code: wire.exit_code,
            duration_ms: wire.duration_ms,
        })
    }

    pub async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        mode: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.require_vm_id().await?;
        let (uid, gid) = current_uid_gid();
        vfs_dispatcher::apply_action_hooks(self, "write", path, content.len() as u64, mode, uid, gid).await?;
        let mutated = vfs_dispatcher::apply_write_mutations(self, path, content.to_vec(), mode, uid, gid).await;

        let params = json!({
            "path": path,
            "content": crate::b64::encode(&mutated),
            "mode": mode,
        });
        self.mux()
            .await?
            .call("write_file", Some(params), timeout.map(duration_ms), None)
            .await?;
        Ok(())
    }

    pub async fn read_file(&self, path: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.require_vm_id().await?;
        let (uid, gid) = current_uid_gid();
        vfs_dispatcher::apply_action_hooks(self, "read", path, 0, 0, uid, gid).await?;

        let params = json!({ "path": path });
        let result = self
            .mux()
            .await?
            .call("read_file", Some(params), timeout.map(duration_ms), None)
            .await?;
        let content = result
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Transport("read_file response missing \"content\"".to_string()))?;
        crate::b64::decode(content)
    }

    pub async fn list_files(&self, path: &str, timeout: Option<Duration>) -> Result<Vec<FileInfo>> {
        self.require_vm_id().await?;
        let (uid, gid) = current_uid_gid();
        vfs_dispatcher::apply_action_hooks(self, "readdir", path, 0, 0, uid, gid).await?;

        let params = json!({ "path": path });
        let result = self
            .mux()
            .await?
            .call("list_files", Some(params), timeout.map(duration_ms), None)
            .await?;
        let parsed: ListFilesResult = serde_json::from_value(result)?;
        Ok(parsed.files)
    }

    /// Idempotent: clears hook state, stops the hook server, attempts a
    /// graceful `close` RPC (best-effort, never raises), then hard-
    /// terminates the subprocess. Calling it more than once performs at
    /// most one teardown.
    pub async fn close(&self, timeout_seconds: u64) {
        {
            let mut state = self.inner.state.lock().await;
            if *state == SessionState::Closing || *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closing;
        }

        if let Some(server) = self.inner.hook_server.lock().await.take() {
            server.stop();
        }

        {
            let mut hooks = self.inner.vfs_hook_state.lock().await;
            hooks.after_hooks.clear();
            hooks.mutate_hooks.clear();
            hooks.action_hooks.clear();
            hooks.active = false;
        }

        if let Some(vm_id) = self.inner.vm_id.lock().await.take() {
            *self.inner.last_vm_id.lock().await = Some(vm_id);
        }

        let started = self.inner.started.lock().await.take();
        if let Some(started) = started {
            let Started { mux, shutdown } = started;
            let close_rpc_timeout_ms = timeout_seconds.max(1).saturating_mul(1_000);
            let _ = mux
                .call(
                    "close",
                    Some(json!({ "timeout_seconds": timeout_seconds })),
                    Some(close_rpc_timeout_ms),
                    None,
                )
                .await;
            if let Some(shutdown) = shutdown.lock().await.take() {
                let _ = shutdown.shutdown(mux, timeout_seconds).await;
            }
        }

        *self.inner.state.lock().await = SessionState::Closed;
    }

    /// Closes the session (if not already closed), then shells out to
    /// `<binary> rm <vm_id>`. Best-effort: never raises.
    pub async fn remove(&self) {
        self.close(0).await;
        let Some(vm_id) = self.inner.last_vm_id.lock().await.clone() else {
            return;
        };
        if let Err(e) = cli::remove(&self.inner.config, &vm_id).await {
            tracing::warn!("matchlock rm {vm_id} failed: {e}");
        }
    }

    pub async fn volume_create(&self, size_mb: u64) -> Result<cli::VolumeInfo> {
        cli::volume_create(&self.inner.config, size_mb).await
    }

    pub async fn volume_list(&self) -> Result<Vec<cli::VolumeInfo>> {
        cli::volume_list(&self.inner.config).await
    }

    pub async fn volume_remove(&self, name: &str) -> Result<()> {
        cli::volume_remove(&self.inner.config, name).await
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Real caller identity, ported from `Client._apply_local_action_hooks`'s
/// `os.geteuid()`/`os.getegid()` calls so hooks that branch on uid/gid see
/// the process's actual identity rather than a placeholder.
#[cfg(unix)]
fn current_uid_gid() -> (u32, u32) {
    // SAFETY: geteuid/getegid take no arguments and cannot fail.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

#[cfg(not(unix))]
fn current_uid_gid() -> (u32, u32) {
    (0, 0)
}

fn build_create_params(
    opts: &CreateOptions,
    vfs_wire: Option<matchlock_wire::VfsInterceptionWire>,
    network_wire: Option<matchlock_wire::NetworkInterceptionWire>,
) -> Value {
    let mut params = serde_json::Map::new();
    params.insert("image".to_string(), json!(opts.image));

    if let Some(resources) = &opts.resources {
        let mut r = serde_json::Map::new();
        if let Some(v) = resources.cpus {
            r.insert("cpus".to_string(), json!(v));
        }
        if let Some(v) = resources.memory_mb {
            r.insert("memory_mb".to_string(), json!(v));
        }
        if let Some(v) = resources.disk_size_mb {
            r.insert("disk_size_mb".to_string(), json!(v));
        }
        if let Some(v) = resources.timeout_seconds {
            r.insert("timeout_seconds".to_string(), json!(v));
        }
        params.insert("resources".to_string(), Value::Object(r));
    }

    if let Some(network) = build_network_params(opts, network_wire) {
        params.insert("network".to_string(), network);
    }

    let vfs = build_vfs_params(opts, vfs_wire);
    if let Some(vfs) = vfs {
        params.insert("vfs".to_string(), vfs);
    }

    if !opts.env.is_empty() {
        params.insert("env".to_string(), json!(opts.env));
    }

    if let Some(image_config) = &opts.image_config {
        params.insert("image_config".to_string(), image_config.clone());
    }

    Value::Object(params)
}

/// Builds the `create` RPC's `"network"` param, or `None` if the caller
/// never touched anything network-related. Ported from
/// `Client._build_create_network_params`'s `include_network` gate: a
/// vanilla `CreateOptions` with no network fields set must not inject
/// `block_private_ips`/`intercept` defaults the caller never asked for.
fn build_network_params(opts: &CreateOptions, network_wire: Option<matchlock_wire::NetworkInterceptionWire>) -> Option<Value> {
    let (_block_private_ips, block_private_ips_explicit) = opts.resolve_block_private_ips();
    let include_network = !opts.allowed_hosts.is_empty()
        || !opts.secrets.is_empty()
        || !opts.dns_servers.is_empty()
        || opts.hostname.is_some()
        || opts.mtu.is_some()
        || opts.no_network
        || block_private_ips_explicit
        || opts.force_interception
        || network_wire.is_some();
    if !include_network {
        return None;
    }

    if opts.no_network {
        let mut n = serde_json::Map::new();
        n.insert("no_network".to_string(), json!(true));
        if !opts.dns_servers.is_empty() {
            n.insert("dns_servers".to_string(), json!(opts.dns_servers));
        }
        if let Some(hostname) = &opts.hostname {
            n.insert("hostname".to_string(), json!(hostname));
        }
        return Some(Value::Object(n));
    }

    let (block_private_ips, _explicit) = opts.resolve_block_private_ips();
    let mut n = serde_json::Map::new();
    if !opts.allowed_hosts.is_empty() {
        n.insert("allowed_hosts".to_string(), json!(opts.allowed_hosts));
    }
    n.insert("block_private_ips".to_string(), json!(block_private_ips));

    let has_callback = network_wire.as_ref().is_some_and(|w| w.callback_socket.is_some());
    let intercept = opts.force_interception || network_wire.is_some() || has_callback;
    n.insert("intercept".to_string(), json!(intercept));

    if let Some(wire) = network_wire {
        n.insert("interception".to_string(), serde_json::to_value(wire).unwrap_or(Value::Null));
    }

    if !opts.secrets.is_empty() {
        let secrets: HashMap<&String, Value> = opts
            .secrets
            .iter()
            .map(|(name, spec)| (name, json!({ "value": spec.value, "hosts": spec.hosts })))
            .collect();
        n.insert("secrets".to_string(), json!(secrets));
    }
    if !opts.dns_servers.is_empty() {
        n.insert("dns_servers".to_string(), json!(opts.dns_servers));
    }
    if let Some(hostname) = &opts.hostname {
        n.insert("hostname".to_string(), json!(hostname));
    }
    if let Some(mtu) = opts.mtu {
        n.insert("mtu".to_string(), json!(mtu));
    }
    Some(Value::Object(n))
}

fn build_vfs_params(opts: &CreateOptions, vfs_wire: Option<matchlock_wire::VfsInterceptionWire>) -> Option<Value> {
    if opts.mounts.is_empty() && opts.workspace.is_none() && vfs_wire.is_none() {
        return None;
    }
    let mut v = serde_json::Map::new();
    if !opts.mounts.is_empty() {
        let mounts: Vec<Value> = opts
            .mounts
            .iter()
            .map(|m| json!({ "source": m.source, "target": m.target, "readonly": m.readonly }))
            .collect();
        v.insert("mounts".to_string(), Value::Array(mounts));
    }
    if let Some(workspace) = &opts.workspace {
        v.insert("workspace".to_string(), json!(workspace));
    }
    if let Some(wire) = vfs_wire {
        v.insert("interception".to_string(), serde_json::to_value(wire).unwrap_or(Value::Null));
    }
    Some(Value::Object(v))
}

/// Spec §8 scenario S5: a before-phase action hook blocking `write_file`
/// before any RPC reaches the transport. Lives alongside `Client` (rather
/// than under `tests/`) because it needs `mux()` to assert on the fake
/// manager's received method list, which is not part of the public surface.
#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::process::Command as StdCommand;

    use assert_cmd::prelude::*;

    use super::*;
    use crate::hooks::VfsHookRule;
    use crate::hooks::VfsInterceptionConfig;

    fn fake_manager_config() -> Config {
        let std_cmd = StdCommand::cargo_bin("matchlock-fake-manager")
            .expect("matchlock-fake-manager binary should be built by cargo test");
        let binary_path = std_cmd.get_program().to_string_lossy().into_owned();
        Config {
            binary_path,
            use_sudo: false,
        }
    }

    #[tokio::test]
    async fn before_action_hook_blocks_write_file_before_any_rpc_is_sent() {
        let client = Client::new(fake_manager_config());
        client.start().await.expect("client should start the fake manager");

        let mut rule = VfsHookRule::new();
        rule.name = "deny-blocked".to_string();
        rule.phase = "before".to_string();
        rule.path = "/workspace/blocked.txt".to_string();
        rule.action_hook = Some(Box::new(|_req| "block".to_string()));

        let mut opts = CreateOptions::new("alpine:latest");
        opts.vfs_interception = Some(VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        });
        client.create(opts).await.expect("create should succeed");

        let err = client
            .write_file("/workspace/blocked.txt", b"x", 0o644, None)
            .await
            .expect_err("the action hook must block the write locally");
        assert!(matches!(err, ClientError::Config(_)));

        let debug = client
            .mux()
            .await
            .expect("client should still have a live multiplexer")
            .call("debug_calls", None, None, None)
            .await
            .expect("debug_calls should succeed");
        let methods = debug["methods"].as_array().expect("methods array");
        assert!(
            !methods.iter().any(|m| m == "write_file"),
            "write_file must never reach the manager once the action hook blocks it: {methods:?}"
        );

        client.close(5).await;
    }
}
