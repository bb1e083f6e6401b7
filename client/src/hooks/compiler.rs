//! Compiles builder-style hook configuration into a wire-transmissible rule
//! set plus a local dispatch table. Pure functions, no I/O — ported from
//! `matchlock/client.py::Client._compile_vfs_hooks` /
//! `_compile_network_hooks`.

use std::collections::HashMap;

use matchlock_wire::NetworkHookRuleWire;
use matchlock_wire::NetworkInterceptionWire;
use matchlock_wire::VfsHookRuleWire;
use matchlock_wire::VfsInterceptionWire;

use crate::error::ClientError;
use crate::error::Result;
use crate::hooks::types::LocalNetworkHook;
use crate::hooks::types::LocalVfsActionHook;
use crate::hooks::types::LocalVfsHook;
use crate::hooks::types::LocalVfsMutateHook;
use crate::hooks::types::NetworkHookRule;
use crate::hooks::types::NetworkInterceptionConfig;
use crate::hooks::types::VfsAfterHook;
use crate::hooks::types::VfsHookRule;
use crate::hooks::types::VfsInterceptionConfig;

const VFS_HOOK_ACTION_ALLOW: &str = "allow";
const VFS_HOOK_PHASE_BEFORE: &str = "before";
const VFS_HOOK_PHASE_AFTER: &str = "after";
const NETWORK_HOOK_ACTION_ALLOW: &str = "allow";

pub(crate) struct CompiledVfsHooks {
    pub wire: Option<VfsInterceptionWire>,
    pub after_hooks: Vec<LocalVfsHook>,
    pub mutate_hooks: Vec<LocalVfsMutateHook>,
    pub action_hooks: Vec<LocalVfsActionHook>,
}

fn lower(s: &str) -> String {
    s.trim().to_lowercase()
}

fn lower_ops(ops: &[String]) -> Vec<String> {
    ops.iter().filter(|o| !o.is_empty()).map(|o| lower(o)).collect()
}

/// Splits `cfg.rules` into declarative wire rules and compiled local hook
/// entries, validating the phase/action invariants §4.4 of the spec
/// requires for each of the four callback kinds.
pub(crate) fn compile_vfs_hooks(cfg: Option<VfsInterceptionConfig>) -> Result<CompiledVfsHooks> {
    let Some(cfg) = cfg else {
        return Ok(CompiledVfsHooks {
            wire: None,
            after_hooks: Vec::new(),
            mutate_hooks: Vec::new(),
            action_hooks: Vec::new(),
        });
    };

    let mut wire = VfsInterceptionWire {
        emit_events: cfg.emit_events,
        rules: Vec::new(),
    };
    let mut after_hooks = Vec::new();
    let mut mutate_hooks = Vec::new();
    let mut action_hooks = Vec::new();

    for rule in cfg.rules {
        if rule.has_multiple_callbacks() {
            return Err(ClientError::Config(format!(
                "invalid vfs hook {:?}: cannot set more than one callback hook",
                rule.name
            )));
        }

        if !rule.has_any_callback() {
            let action = lower(&rule.action);
            if action == "mutate_write" {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {:?}: mutate_write requires mutate_hook callback",
                    rule.name
                )));
            }
            wire.rules.push(VfsHookRuleWire {
                name: rule.name,
                phase: rule.phase,
                ops: rule.ops,
                path: rule.path,
                action: rule.action,
                timeout_ms: if rule.timeout_ms > 0 { Some(rule.timeout_ms) } else { None },
            });
            continue;
        }

        let VfsHookRule {
            name,
            phase,
            ops,
            path,
            action,
            timeout_ms: _,
            hook,
            dangerous_hook,
            mutate_hook,
            action_hook,
        } = rule;

        if let Some(hook) = hook {
            let action = lower(&action);
            if !action.is_empty() && action != VFS_HOOK_ACTION_ALLOW {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: callback hooks cannot set action={action:?}"
                )));
            }
            if lower(&phase) != VFS_HOOK_PHASE_AFTER {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: callback hooks must use phase=after"
                )));
            }
            after_hooks.push(LocalVfsHook {
                name,
                ops: lower_ops(&ops),
                path,
                hook: VfsAfterHook::Safe(hook),
            });
            continue;
        }

        if let Some(dangerous_hook) = dangerous_hook {
            let action = lower(&action);
            if !action.is_empty() && action != VFS_HOOK_ACTION_ALLOW {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: dangerous_hook cannot set action={action:?}"
                )));
            }
            if lower(&phase) != VFS_HOOK_PHASE_AFTER {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: dangerous_hook must use phase=after"
                )));
            }
            after_hooks.push(LocalVfsHook {
                name,
                ops: lower_ops(&ops),
                path,
                hook: VfsAfterHook::Dangerous(dangerous_hook),
            });
            continue;
        }

        if let Some(action_hook) = action_hook {
            let action = lower(&action);
            if !action.is_empty() && action != VFS_HOOK_ACTION_ALLOW {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: action_hook cannot set action={action:?}"
                )));
            }
            if !phase.is_empty() && lower(&phase) != VFS_HOOK_PHASE_BEFORE {
                return Err(ClientError::Config(format!(
                    "invalid vfs hook {name:?}: action_hook must use phase=before"
                )));
            }
            action_hooks.push(LocalVfsActionHook {
                name,
                ops: lower_ops(&ops),
                path,
                hook: action_hook,
            });
            continue;
        }

        let Some(mutate_hook) = mutate_hook else {
            unreachable!("rule.has_any_callback() guarantees one callback");
        };
        let action = lower(&action);
        if !action.is_empty() && action != VFS_HOOK_ACTION_ALLOW {
            return Err(ClientError::Config(format!(
                "invalid vfs hook {name:?}: mutate_hook cannot set action={action:?}"
            )));
        }
        if !phase.is_empty() && lower(&phase) != VFS_HOOK_PHASE_BEFORE {
            return Err(ClientError::Config(format!(
                "invalid vfs hook {name:?}: mutate_hook must use phase=before"
            )));
        }
        mutate_hooks.push(LocalVfsMutateHook {
            name,
            ops: lower_ops(&ops),
            path,
            hook: mutate_hook,
        });
    }

    if !after_hooks.is_empty() {
        wire.emit_events = true;
    }
    let wire_out = if wire.rules.is_empty() && !wire.emit_events {
        None
    } else {
        Some(wire)
    };

    Ok(CompiledVfsHooks {
        wire: wire_out,
        after_hooks,
        mutate_hooks,
        action_hooks,
    })
}

/// Compiles network interception rules, assigning each callback-bearing
/// rule a `callback_id` the hook server uses to route manager-initiated
/// connections back to the right local hook.
pub(crate) fn compile_network_hooks(
    cfg: Option<NetworkInterceptionConfig>,
) -> Result<(Option<NetworkInterceptionWire>, HashMap<String, LocalNetworkHook>)> {
    let Some(cfg) = cfg else {
        return Ok((None, HashMap::new()));
    };

    let mut wire_rules = Vec::new();
    let mut local = HashMap::new();

    for (i, rule) in cfg.rules.into_iter().enumerate() {
        let NetworkHookRule {
            name,
            phase,
            hosts,
            methods,
            path,
            action,
            set_headers,
            delete_headers,
            set_query,
            delete_query,
            rewrite_path,
            set_response_headers,
            delete_response_headers,
            body_replacements,
            timeout_ms,
            hook,
        } = rule;

        let mut wire_rule = NetworkHookRuleWire {
            name,
            phase,
            hosts,
            methods,
            path,
            action,
            set_headers,
            delete_headers,
            set_query,
            delete_query,
            rewrite_path,
            set_response_headers,
            delete_response_headers,
            body_replacements: body_replacements
                .into_iter()
                .map(|t| matchlock_wire::NetworkBodyTransformWire {
                    find: t.find,
                    replace: t.replace,
                })
                .collect(),
            timeout_ms: if timeout_ms > 0 { Some(timeout_ms) } else { None },
            callback_id: None,
        };

        if let Some(hook) = hook {
            let action = lower(&wire_rule.action);
            if !action.is_empty() && action != NETWORK_HOOK_ACTION_ALLOW {
                return Err(ClientError::Config(format!(
                    "invalid network hook {:?}: callback hooks cannot set action={action:?}",
                    wire_rule.name
                )));
            }
            let callback_id = format!("network_hook_{}", i + 1);
            local.insert(
                callback_id.clone(),
                LocalNetworkHook {
                    name: wire_rule.name.clone(),
                    phase: lower(&wire_rule.phase),
                    timeout_ms,
                    hook,
                },
            );
            wire_rule.callback_id = Some(callback_id);
        }

        wire_rules.push(wire_rule);
    }

    if wire_rules.is_empty() {
        return Ok((None, local));
    }
    Ok((
        Some(NetworkInterceptionWire {
            rules: wire_rules,
            callback_socket: None,
        }),
        local,
    ))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::hooks::types::VfsHookEvent;

    #[test]
    fn rejects_multiple_callbacks_on_one_rule() {
        let mut rule = VfsHookRule::new();
        rule.name = "dup".to_string();
        rule.phase = "after".to_string();
        rule.hook = Some(std::sync::Arc::new(|_: &VfsHookEvent| {}));
        rule.action_hook = Some(Box::new(|_| "allow".to_string()));
        let cfg = VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        };
        let err = compile_vfs_hooks(Some(cfg)).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn safe_hook_requires_after_phase() {
        let mut rule = VfsHookRule::new();
        rule.name = "bad-phase".to_string();
        rule.phase = "before".to_string();
        rule.hook = Some(std::sync::Arc::new(|_: &VfsHookEvent| {}));
        let cfg = VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        };
        let err = compile_vfs_hooks(Some(cfg)).unwrap_err();
        assert!(matches!(err, ClientError::Config(m) if m.contains("phase=after")));
    }

    #[test]
    fn safe_hook_sets_emit_events_even_if_caller_did_not() {
        let mut rule = VfsHookRule::new();
        rule.name = "watch".to_string();
        rule.phase = "after".to_string();
        rule.hook = Some(std::sync::Arc::new(|_: &VfsHookEvent| {}));
        let cfg = VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        };
        let compiled = compile_vfs_hooks(Some(cfg)).unwrap();
        assert_eq!(compiled.after_hooks.len(), 1);
        assert!(compiled.wire.unwrap().emit_events);
    }

    #[test]
    fn declarative_rule_without_callback_passes_through() {
        let mut rule = VfsHookRule::new();
        rule.name = "block-etc".to_string();
        rule.path = "/etc/*".to_string();
        rule.action = "block".to_string();
        let cfg = VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        };
        let compiled = compile_vfs_hooks(Some(cfg)).unwrap();
        assert!(compiled.after_hooks.is_empty());
        let wire = compiled.wire.unwrap();
        assert_eq!(wire.rules.len(), 1);
        assert_eq!(wire.rules[0].action, "block");
    }

    #[test]
    fn mutate_write_without_hook_is_rejected() {
        let mut rule = VfsHookRule::new();
        rule.name = "mw".to_string();
        rule.action = "mutate_write".to_string();
        let cfg = VfsInterceptionConfig {
            emit_events: false,
            rules: vec![rule],
        };
        let err = compile_vfs_hooks(Some(cfg)).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn network_hook_gets_sequential_callback_id() {
        let mut rule = NetworkHookRule::default();
        rule.name = "intercept".to_string();
        rule.hosts = vec!["api.example.com".to_string()];
        rule.hook = Some(Box::new(|_req| None));
        let cfg = NetworkInterceptionConfig { rules: vec![rule] };
        let (wire, local) = compile_network_hooks(Some(cfg)).unwrap();
        let wire = wire.unwrap();
        assert_eq!(wire.rules[0].callback_id.as_deref(), Some("network_hook_1"));
        assert!(local.contains_key("network_hook_1"));
    }

    #[test]
    fn network_hook_rejects_non_allow_action_with_callback() {
        let mut rule = NetworkHookRule::default();
        rule.name = "bad".to_string();
        rule.action = "block".to_string();
        rule.hook = Some(Box::new(|_req| None));
        let cfg = NetworkInterceptionConfig { rules: vec![rule] };
        let err = compile_network_hooks(Some(cfg)).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
