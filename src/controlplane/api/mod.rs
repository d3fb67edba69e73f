//! API Module
//!
//! Provides the Docker volume plugin protocol and the metrics endpoint.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
