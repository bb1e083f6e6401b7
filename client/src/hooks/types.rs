//! Builder-style hook rule types and the data passed to/returned from
//! callback hooks. Ported from `matchlock/types.py`'s `VFSHookRule`,
//! `NetworkHookRule`, and their request/result dataclasses.

use std::collections::HashMap;

/// `before`/`after` in lowercase, or empty (server-side default).
pub type HookPhase = String;

/// `allow`/`block` for VFS rules, `allow`/`block`/`mutate` for network
/// rules.
pub type HookAction = String;

/// Event delivered to a safe or dangerous after-hook.
#[derive(Debug, Clone)]
pub struct VfsHookEvent {
    pub op: String,
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Input to a `mutate_hook`.
#[derive(Debug, Clone)]
pub struct VfsMutateRequest {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Input to an `action_hook`.
#[derive(Debug, Clone)]
pub struct VfsActionRequest {
    pub op: String,
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// At most one of the four callback slots below may be set per rule — the
/// compiler rejects rules that set more than one (`compile_vfs_hooks`).
#[derive(Default)]
pub struct VfsHookRule {
    pub name: String,
    pub phase: HookPhase,
    pub ops: Vec<String>,
    pub path: String,
    pub action: HookAction,
    pub timeout_ms: u64,

    /// Safe after-hook: runs off the reader task, never re-entrant.
    pub hook: Option<std::sync::Arc<dyn Fn(&VfsHookEvent) + Send + Sync>>,

    /// Dangerous after-hook: always runs on a fresh task, may itself call
    /// back into the client (hence the cheaply-cloneable `Client` handle,
    /// mirroring `dangerous_hook(client, event)` in the original SDK).
    pub dangerous_hook: Option<std::sync::Arc<dyn Fn(crate::client::Client, &VfsHookEvent) + Send + Sync>>,

    /// Before-write mutate hook: returns replacement content, or `None` to
    /// leave the content unchanged.
    pub mutate_hook: Option<Box<dyn Fn(&VfsMutateRequest) -> Option<Vec<u8>> + Send + Sync>>,

    /// Before-op action hook: returns `"allow"` or `"block"`.
    pub action_hook: Option<Box<dyn Fn(&VfsActionRequest) -> String + Send + Sync>>,
}

impl VfsHookRule {
    pub fn new() -> Self {
        Self::default()
    }

    fn callback_count(&self) -> usize {
        [
            self.hook.is_some(),
            self.dangerous_hook.is_some(),
            self.mutate_hook.is_some(),
            self.action_hook.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }

    pub(crate) fn has_any_callback(&self) -> bool {
        self.callback_count() > 0
    }

    pub(crate) fn has_multiple_callbacks(&self) -> bool {
        self.callback_count() > 1
    }
}

#[derive(Default)]
pub struct VfsInterceptionConfig {
    pub emit_events: bool,
    pub rules: Vec<VfsHookRule>,
}

/// Literal find/replace applied to a response body.
#[derive(Debug, Clone)]
pub struct NetworkBodyTransform {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkHookRequest {
    pub phase: String,
    pub host: String,
    pub method: String,
    pub path: String,
    pub query: Option<HashMap<String, String>>,
    pub request_headers: Option<HashMap<String, Vec<String>>>,
    pub status_code: u16,
    pub response_headers: Option<HashMap<String, Vec<String>>>,
    pub is_sse: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkHookRequestMutation {
    pub headers: Option<HashMap<String, Vec<String>>>,
    pub query: Option<HashMap<String, String>>,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkHookResponseMutation {
    pub headers: Option<HashMap<String, Vec<String>>>,
    pub body_replacements: Vec<NetworkBodyTransform>,
    pub set_body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkHookResult {
    pub action: String,
    pub request: Option<NetworkHookRequestMutation>,
    pub response: Option<NetworkHookResponseMutation>,
}

#[derive(Default)]
pub struct NetworkHookRule {
    pub name: String,
    pub phase: HookPhase,
    pub hosts: Vec<String>,
    pub methods: Vec<String>,
    pub path: String,
    pub action: HookAction,
    pub set_headers: HashMap<String, String>,
    pub delete_headers: Vec<String>,
    pub set_query: HashMap<String, String>,
    pub delete_query: Vec<String>,
    pub rewrite_path: String,
    pub set_response_headers: HashMap<String, String>,
    pub delete_response_headers: Vec<String>,
    pub body_replacements: Vec<NetworkBodyTransform>,
    pub timeout_ms: u64,

    /// SDK-local callback, invoked by the hook server when the manager
    /// dials back for this rule's `callback_id`.
    pub hook: Option<Box<dyn Fn(&NetworkHookRequest) -> Option<NetworkHookResult> + Send + Sync>>,
}

#[derive(Default)]
pub struct NetworkInterceptionConfig {
    pub rules: Vec<NetworkHookRule>,
}

/// A compiled safe or dangerous VFS after-hook, ready for dispatch.
///
/// Held as `Arc` rather than `Box` so the dispatcher can clone the handful
/// of hooks matching one event out of the lock and run them after
/// releasing it, instead of holding the hook-list lock across a spawned
/// task's lifetime.
pub(crate) enum VfsAfterHook {
    Safe(std::sync::Arc<dyn Fn(&VfsHookEvent) + Send + Sync>),
    Dangerous(std::sync::Arc<dyn Fn(crate::client::Client, &VfsHookEvent) + Send + Sync>),
}

impl Clone for VfsAfterHook {
    fn clone(&self) -> Self {
        match self {
            VfsAfterHook::Safe(f) => VfsAfterHook::Safe(f.clone()),
            VfsAfterHook::Dangerous(f) => VfsAfterHook::Dangerous(f.clone()),
        }
    }
}

pub(crate) struct LocalVfsHook {
    pub name: String,
    pub ops: Vec<String>,
    pub path: String,
    pub hook: VfsAfterHook,
}

pub(crate) struct LocalVfsMutateHook {
    pub name: String,
    pub ops: Vec<String>,
    pub path: String,
    pub hook: Box<dyn Fn(&VfsMutateRequest) -> Option<Vec<u8>> + Send + Sync>,
}

pub(crate) struct LocalVfsActionHook {
    pub name: String,
    pub ops: Vec<String>,
    pub path: String,
    pub hook: Box<dyn Fn(&VfsActionRequest) -> String + Send + Sync>,
}

pub(crate) struct LocalNetworkHook {
    pub name: String,
    pub phase: String,
    #[allow(dead_code)]
    pub timeout_ms: u64,
    pub hook: Box<dyn Fn(&NetworkHookRequest) -> Option<NetworkHookResult> + Send + Sync>,
}
