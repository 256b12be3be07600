//! Provider selection for the gateway.
//!
//! Provider configuration is read through a TTL-bounded snapshot
//! registry; the router filters a snapshot by tenant and routing
//! strategy and picks deterministically by priority.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod registry;
pub mod router;

pub use context::RouteContext;
pub use registry::{ProviderRegistry, ProviderSnapshot, ProviderSource, StaticProviderSource};
pub use router::Router;
