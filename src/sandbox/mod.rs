//! The Sandbox Runtime: pooled, bounded execution of user-authored scripts.
//!
//! Exposes one operation, [`runtime::execute`], backed by a process-wide
//! [`pool::SandboxPool`] and a small embedded language ([`lang`]) that is the
//! only thing a script can run — no OS, filesystem, or network primitives
//! are reachable except through the narrow [`lang::Helpers`] surface.

pub mod errors;
pub mod lang;
pub mod pool;
pub mod runtime;

pub use errors::SandboxError;
pub use lang::{CompiledScript, DefaultHelpers, Helpers, VaultHelpers, compile};
pub use pool::{PoolConfig, SandboxHandle, SandboxPool};
pub use runtime::{ExecutionReport, execute};
