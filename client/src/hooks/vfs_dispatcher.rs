//! Dispatches VFS file events to locally compiled hooks, applies
//! before-write mutate hooks, and enforces before-op action hooks.
//!
//! Ported from `matchlock/client.py`'s `_handle_vfs_file_event` /
//! `_run_vfs_safe_hooks_for_event` / `_apply_local_write_mutations` /
//! `_apply_local_action_hooks`. The re-entrancy latch there is a
//! `threading.Lock`-guarded bool; here it is folded into the same
//! `tokio::sync::Mutex` that guards the hook lists, matching spec §5's
//! `vfs_hook_mutex` combining both concerns.

use wildmatch::WildMatch;

use crate::client::Client;
use crate::error::ClientError;
use crate::error::Result;
use crate::hooks::types::LocalVfsActionHook;
use crate::hooks::types::LocalVfsHook;
use crate::hooks::types::LocalVfsMutateHook;
use crate::hooks::types::VfsActionRequest;
use crate::hooks::types::VfsAfterHook;
use crate::hooks::types::VfsHookEvent;
use crate::hooks::types::VfsMutateRequest;

const VFS_HOOK_ACTION_ALLOW: &str = "allow";
const VFS_HOOK_ACTION_BLOCK: &str = "block";

/// Local VFS hook state for one session, guarded by a single lock so the
/// re-entrancy latch and the hook lists stay consistent.
#[derive(Default)]
pub(crate) struct VfsHookState {
    pub after_hooks: Vec<LocalVfsHook>,
    pub mutate_hooks: Vec<LocalVfsMutateHook>,
    pub action_hooks: Vec<LocalVfsActionHook>,
    /// `true` while a batch of safe after-hooks is running for some event;
    /// prevents a nested event (triggered by a safe hook's own file access)
    /// from starting a second batch.
    pub active: bool,
}

fn path_matches(pattern: &str, path: &str) -> bool {
    pattern.is_empty() || WildMatch::new(pattern).matches(path)
}

fn ops_match(ops: &[String], op: &str) -> bool {
    ops.is_empty() || ops.iter().any(|o| o == op)
}

/// Routes one `event` notification's `file` payload to matching hooks.
/// Dangerous hooks always run on a fresh task each (re-entrant by design);
/// matching safe hooks run together as one batch on a fresh task, only if
/// no other batch is currently active for this client.
pub(crate) async fn handle_vfs_file_event(client: &Client, event: VfsHookEvent) {
    let state = client.vfs_hook_state();

    let (mut safe, mut dangerous) = (Vec::new(), Vec::new());
    {
        let guard = state.lock().await;
        if guard.after_hooks.is_empty() {
            return;
        }
        for hook in &guard.after_hooks {
            if !ops_match(&hook.ops, &event.op) || !path_matches(&hook.path, &event.path) {
                continue;
            }
            match hook.hook.clone() {
                VfsAfterHook::Safe(f) => safe.push((hook.name.clone(), f)),
                VfsAfterHook::Dangerous(f) => dangerous.push((hook.name.clone(), f)),
            }
        }
    }

    for (name, hook) in dangerous {
        let client = client.clone();
        let event = event.clone();
        tokio::spawn(async move {
            tracing::debug!(hook = %name, op = %event.op, path = %event.path, "running dangerous vfs hook");
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(client, &event))).is_err() {
                tracing::warn!(hook = %name, "dangerous vfs hook panicked");
            }
        });
    }

    if safe.is_empty() {
        return;
    }

    {
        let mut guard = state.lock().await;
        if guard.active {
            return;
        }
        guard.active = true;
    }

    let client = client.clone();
    tokio::spawn(async move {
        for (name, hook) in safe {
            tracing::debug!(hook = %name, op = %event.op, path = %event.path, "running safe vfs hook");
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(&event)));
            if outcome.is_err() {
                tracing::warn!(hook = %name, "safe vfs hook panicked");
            }
        }
        let state = client.vfs_hook_state();
        let mut guard = state.lock().await;
        guard.active = false;
    });
}

/// Applies before-write mutate hooks in registration order, each seeing the
/// previous hook's output. Returns the (possibly unchanged) content to
/// actually write.
pub(crate) async fn apply_write_mutations(
    client: &Client,
    path: &str,
    content: Vec<u8>,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Vec<u8> {
    let state = client.vfs_hook_state();
    let guard = state.lock().await;
    if guard.mutate_hooks.is_empty() {
        return content;
    }

    let mut current = content;
    for hook in &guard.mutate_hooks {
        if !ops_match(&hook.ops, "write") || !path_matches(&hook.path, path) {
            continue;
        }
        let request = VfsMutateRequest {
            path: path.to_string(),
            size: current.len() as u64,
            mode,
            uid,
            gid,
        };
        tracing::debug!(hook = %hook.name, path = %path, "running vfs mutate hook");
        if let Some(mutated) = (hook.hook)(&request) {
            current = mutated;
        }
    }
    current
}

/// Applies before-op action hooks, returning an error if any hook blocks
/// the operation or returns an invalid decision.
pub(crate) async fn apply_action_hooks(
    client: &Client,
    op: &str,
    path: &str,
    size: u64,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let state = client.vfs_hook_state();
    let guard = state.lock().await;
    if guard.action_hooks.is_empty() {
        return Ok(());
    }

    let req = VfsActionRequest {
        op: op.to_string(),
        path: path.to_string(),
        size,
        mode,
        uid,
        gid,
    };
    for hook in &guard.action_hooks {
        if !ops_match(&hook.ops, op) || !path_matches(&hook.path, path) {
            continue;
        }
        let decision = (hook.hook)(&req).trim().to_lowercase();
        if decision.is_empty() || decision == VFS_HOOK_ACTION_ALLOW {
            continue;
        }
        if decision == VFS_HOOK_ACTION_BLOCK {
            return Err(ClientError::Config(format!(
                "vfs action hook blocked operation: op={op} path={path} hook={:?}",
                hook.name
            )));
        }
        return Err(ClientError::Config(format!(
            "invalid action_hook return value for {:?}: expected \"allow\"|\"block\", got {decision:?}",
            hook.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn path_matches_glob_across_separators() {
        assert!(path_matches("/etc/*", "/etc/passwd"));
        assert!(path_matches("*.secret", "/a/b/c.secret"));
        assert!(!path_matches("/etc/*", "/home/user/file"));
        assert!(path_matches("", "/anything"));
    }

    #[test]
    fn ops_match_empty_filter_matches_all() {
        assert!(ops_match(&[], "write"));
        assert!(ops_match(&["write".to_string()], "write"));
        assert!(!ops_match(&["read".to_string()], "write"));
    }

    #[tokio::test]
    async fn action_hook_block_produces_config_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let hook = LocalVfsActionHook {
            name: "deny-etc".to_string(),
            ops: vec![],
            path: "/etc/*".to_string(),
            hook: Box::new(move |_req| {
                calls2.fetch_add(1, Ordering::SeqCst);
                "block".to_string()
            }),
        };
        let mut state = VfsHookState::default();
        state.action_hooks.push(hook);
        let state = tokio::sync::Mutex::new(state);

        let guard = state.lock().await;
        let req_path = "/etc/passwd";
        let mut blocked = false;
        for h in &guard.action_hooks {
            if !path_matches(&h.path, req_path) {
                continue;
            }
            let decision = (h.hook)(&VfsActionRequest {
                op: "open".to_string(),
                path: req_path.to_string(),
                size: 0,
                mode: 0,
                uid: 0,
                gid: 0,
            });
            if decision == "block" {
                blocked = true;
            }
        }
        assert!(blocked);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
