//! Client-side control plane for the Matchlock sandbox SDK.
//!
//! This crate drives an external sandbox-manager subprocess over
//! newline-delimited JSON-RPC: it serializes concurrent calls onto a single
//! stdin pipe, demultiplexes responses and streaming notifications off
//! stdout back to the right caller, runs a local Unix-socket callback
//! server so the manager can dial back for network-hook decisions, and
//! compiles a builder-style hook configuration into the wire rule set plus
//! a local dispatch table.
//!
//! The wire-level data transfer objects live in the sibling
//! `matchlock-wire` crate; this crate is where the behavior is.

mod b64;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
mod hook_server;
pub mod hooks;
mod multiplexer;
pub mod options;
pub mod sandbox;
mod transport;

pub use client::Client;
pub use client::ExecStreamResult;
pub use config::Config;
pub use error::ClientError;
pub use error::Result;
pub use options::CreateOptions;
pub use options::Mount;
pub use options::ResourceOptions;
pub use options::SecretSpec;
pub use sandbox::Sandbox;

pub use matchlock_wire::ExecResult;
pub use matchlock_wire::FileInfo;
