//! # bt-core
//!
//! Seeding and downloading for bt-p2p.
//!
//! This crate provides:
//! - The chunk transfer protocol: [`ChunkServer`] and [`ChunkClient`]
//! - [`DownloadSession`]: per-chunk slots, failure set, output file
//! - [`ParallelDownloadScheduler`]: worker pool with one bounded retry pass
//! - [`Node`]: wires discovery, connection service and the above together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod session;

pub use config::{NodeConfig, SchedulerConfig, TransferConfig};
pub use error::{BtError, Result};
pub use node::{Node, SeedSession};
pub use protocol::{ChunkClient, ChunkServer, ExpectedLength, PROTOCOL_ID};
pub use scheduler::{DownloadReport, ParallelDownloadScheduler};
pub use session::DownloadSession;
