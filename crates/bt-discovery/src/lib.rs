//! # bt-discovery
//!
//! Provider discovery for bt-p2p.
//!
//! This crate provides:
//! - The [`DiscoveryService`] trait: announce a content ID, stream its providers
//! - [`DiscoveryClient`]: file-level announce and a time-bounded provider search
//! - [`MemoryDiscovery`]: process-local provider table
//! - A UDP provider registry ([`registry::RegistryServer`]) and the matching
//!   [`registry::RegistryDiscovery`] backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod memory;
pub mod registry;
pub mod service;

pub use client::{DiscoveryClient, DiscoveryClientConfig};
pub use error::{DiscoveryError, Result};
pub use memory::MemoryDiscovery;
pub use registry::{RegistryConfig, RegistryDiscovery, RegistryServer};
pub use service::DiscoveryService;
