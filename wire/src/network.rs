use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkBodyTransformWire {
    pub find: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replace: String,
}

/// Wire representation of a single network interception rule. Rules backed
/// by an SDK-local callback additionally carry `callback_id`, which the
/// sandbox-manager echoes back on the hook callback socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkHookRuleWire {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub set_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub set_query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_query: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rewrite_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub set_response_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_response_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_replacements: Vec<NetworkBodyTransformWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterceptionWire {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<NetworkHookRuleWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_socket: Option<String>,
}
