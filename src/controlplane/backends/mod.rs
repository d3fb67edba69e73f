//! Controller Backend Adapters
//!
//! Provides the adapter for the cluster storage controller:
//! - LINSTOR: replicated DRBD block storage

pub mod linstor;

pub use linstor::*;

use crate::domain::ports::ControllerClientRef;
use crate::error::Result;
use std::sync::Arc;

/// Factory for creating controller clients
pub struct BackendFactory;

impl BackendFactory {
    /// Build the shared controller client used by every request
    pub fn controller(config: &ConnectionConfig) -> Result<ControllerClientRef> {
        Ok(Arc::new(LinstorClient::new(config)?))
    }
}
