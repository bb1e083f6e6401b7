//! `CreateOptions`: the aggregate sandbox configuration passed to
//! `Client::create`. Ported from `matchlock/client.py::CreateOptions` and the
//! `_build_create_*_params` helpers that turn it into the `create` RPC's
//! wire parameters (spec §3, §6.1).

use std::collections::HashMap;

use crate::error::ClientError;
use crate::error::Result;
use crate::hooks::NetworkInterceptionConfig;
use crate::hooks::VfsInterceptionConfig;

/// CPU/memory/disk/time quotas for the sandbox VM.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_size_mb: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

/// A secret made available to processes talking to `hosts`, never written to
/// disk inside the sandbox.
#[derive(Debug, Clone)]
pub struct SecretSpec {
    pub value: String,
    pub hosts: Vec<String>,
}

/// A host-path-to-guest-path bind mount.
#[derive(Debug, Clone)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub readonly: bool,
}

/// Sandbox configuration for `Client::create`.
///
/// Invariants enforced by [`CreateOptions::validate`]: `image` must be
/// non-empty; `no_network` is mutually exclusive with `allowed_hosts`,
/// `secrets`, `force_interception`, and `network_interception`.
pub struct CreateOptions {
    pub image: String,
    pub resources: Option<ResourceOptions>,
    pub allowed_hosts: Vec<String>,

    /// `None` means "caller did not specify" — `resolve_block_private_ips`
    /// then defaults it to `true`, matching the backward-compatibility
    /// quirk called out in spec §9.
    pub block_private_ips: Option<bool>,

    pub secrets: HashMap<String, SecretSpec>,
    pub mounts: Vec<Mount>,
    pub env: HashMap<String, String>,
    pub workspace: Option<String>,
    pub dns_servers: Vec<String>,
    pub hostname: Option<String>,
    pub mtu: Option<u32>,
    pub privileged: bool,
    pub no_network: bool,
    pub force_interception: bool,
    pub vfs_interception: Option<VfsInterceptionConfig>,
    pub network_interception: Option<NetworkInterceptionConfig>,

    /// Opaque, manager-defined image configuration. Spec §6.1 lists
    /// `image_config` as a `create` param without specifying its shape, so
    /// it is passed through verbatim.
    pub image_config: Option<serde_json::Value>,

    pub launch_entrypoint: bool,
}

impl CreateOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resources: None,
            allowed_hosts: Vec::new(),
            block_private_ips: None,
            secrets: HashMap::new(),
            mounts: Vec::new(),
            env: HashMap::new(),
            workspace: None,
            dns_servers: Vec::new(),
            hostname: None,
            mtu: None,
            privileged: false,
            no_network: false,
            force_interception: false,
            vfs_interception: None,
            network_interception: None,
            image_config: None,
            launch_entrypoint: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(ClientError::Config("CreateOptions.image must not be empty".to_string()));
        }
        if self.no_network {
            if !self.allowed_hosts.is_empty() {
                return Err(ClientError::Config(
                    "no_network is mutually exclusive with allowed_hosts".to_string(),
                ));
            }
            if !self.secrets.is_empty() {
                return Err(ClientError::Config(
                    "no_network is mutually exclusive with secrets".to_string(),
                ));
            }
            if self.force_interception {
                return Err(ClientError::Config(
                    "no_network is mutually exclusive with force_interception".to_string(),
                ));
            }
            if self.network_interception.is_some() {
                return Err(ClientError::Config(
                    "no_network is mutually exclusive with network_interception".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Returns `(effective_value, was_explicitly_set)`. Ported from
    /// `Client._resolve_create_block_private_ips`: absent an explicit
    /// override, private IPs are blocked by default whenever any network
    /// field is in play.
    pub(crate) fn resolve_block_private_ips(&self) -> (bool, bool) {
        match self.block_private_ips {
            Some(v) => (v, true),
            None => (true, false),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn rejects_empty_image() {
        let opts = CreateOptions::new("");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn no_network_rejects_allowed_hosts() {
        let mut opts = CreateOptions::new("alpine:latest");
        opts.no_network = true;
        opts.allowed_hosts.push("example.com".to_string());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn block_private_ips_defaults_true_when_unset() {
        let opts = CreateOptions::new("alpine:latest");
        assert_eq!(opts.resolve_block_private_ips(), (true, false));
    }

    #[test]
    fn block_private_ips_honors_explicit_override() {
        let mut opts = CreateOptions::new("alpine:latest");
        opts.block_private_ips = Some(false);
        assert_eq!(opts.resolve_block_private_ips(), (false, true));
    }
}
