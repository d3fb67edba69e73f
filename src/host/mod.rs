//! Host Module
//!
//! Adapters for the local machine: the mount namespace and block devices.

pub mod mounter;

pub use mounter::SystemMounter;
