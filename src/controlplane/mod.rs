//! Volume Control Plane Module
//!
//! The lifecycle logic of the plugin: option resolution, cluster-side
//! transactions, host-side attachment, the mount sequence, and the
//! orchestrating driver behind the plugin API.

pub mod api;
pub mod attachment;
pub mod backends;
pub mod mount;
pub mod orchestrator;
pub mod placement;
pub mod transaction;

pub use api::*;
pub use backends::*;
pub use orchestrator::*;
