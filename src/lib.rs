//! In-process information protection: sensitivity labels, rights-protected
//! buffers and files, and the delegates a host application plugs in.
//!
//! Everything starts from a [`MipContext`] built from an immutable
//! [`MipConfiguration`]. Three chains hang off the context:
//!
//! * [`protection`]: `ProtectionProfile` → `ProtectionEngine` → `ProtectionHandler`
//! * [`policy`]: `PolicyProfile` → `PolicyEngine` → `Label`
//! * [`file`]: `FileProfile` → `FileEngine` → `FileHandler`
//!
//! Long-running calls have an `_async` twin returning an
//! [`AsyncOperation`](async_op::AsyncOperation).

pub mod async_op;
pub mod config;
pub mod context;
pub mod delegates;
pub mod error;
pub mod file;
pub mod flighting;
pub mod policy;
pub mod prelude;
pub mod protection;
mod registry;

pub use config::{ApplicationInfo, LogLevel, MipConfiguration};
pub use context::MipContext;
pub use error::{ErrorKind, MipError, NoPermissionsCategory, Result};
pub use flighting::FlightingFeature;
pub use protection::{ProtectionDescriptorBuilder, UserRights};
