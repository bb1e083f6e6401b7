use serde::Deserialize;
use serde::Serialize;

/// Wire representation of a declarative (no-callback) VFS hook rule.
///
/// Rules that carry an SDK-local callback never reach the wire: they are
/// elided by the hook compiler in `matchlock-client` and dispatched entirely
/// client-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfsHookRuleWire {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VfsInterceptionWire {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub emit_events: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<VfsHookRuleWire>,
}
