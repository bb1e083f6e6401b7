//! Wire-level data transfer objects for the Matchlock JSON-RPC protocol.
//!
//! This crate carries no behavior: just the frame codec and the plain-data
//! shapes that cross the subprocess stdio pipe. Everything with a callback
//! or a local dispatch table lives in `matchlock-client`.

mod exec;
mod fs;
mod frame;
mod network;
mod vfs;

pub mod error_codes;

pub use exec::ExecResult;
pub use exec::ExecResultWire;
pub use exec::ExecStreamResultWire;
pub use frame::JSONRPC_VERSION;
pub use frame::Frame;
pub use frame::NotificationFrame;
pub use frame::RequestFrame;
pub use frame::RequestId;
pub use frame::ResponseFrame;
pub use frame::RpcErrorObject;
pub use fs::FileInfo;
pub use fs::ListFilesResult;
pub use network::NetworkBodyTransformWire;
pub use network::NetworkHookRuleWire;
pub use network::NetworkInterceptionWire;
pub use vfs::VfsHookRuleWire;
pub use vfs::VfsInterceptionWire;
