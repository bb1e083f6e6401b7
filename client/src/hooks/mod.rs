//! Builder-style hook configuration: compiling it into wire rules plus a
//! local dispatch table (§4.4), and dispatching VFS events against that
//! table at runtime (§4.6).

pub(crate) mod compiler;
pub(crate) mod types;
pub(crate) mod vfs_dispatcher;

pub use types::NetworkBodyTransform;
pub use types::NetworkHookRequest;
pub use types::NetworkHookRequestMutation;
pub use types::NetworkHookResponseMutation;
pub use types::NetworkHookResult;
pub use types::NetworkHookRule;
pub use types::NetworkInterceptionConfig;
pub use types::VfsActionRequest;
pub use types::VfsHookEvent;
pub use types::VfsHookRule;
pub use types::VfsInterceptionConfig;
pub use types::VfsMutateRequest;

pub(crate) use vfs_dispatcher::VfsHookState;
