//! Replication and leadership core for a distributed SQLite-compatible
//! filesystem.
//!
//! Multiple nodes each host a local copy of one or more databases; exactly
//! one node is primary at any time and serves writes, while the others are
//! replicas streaming transaction log ("LTX") files from the primary. This
//! crate is the store-level coordination core only: the filesystem
//! front-end, the HTTP stream endpoint, the LTX codec, the lease backend,
//! and the CLI are external collaborators implemented against the traits
//! and types exposed here.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod halt;
pub mod leaser;
pub mod locks;
pub mod metrics;
mod node_id;
pub mod pos;
pub mod primary_ctx;
pub mod protocol;
pub mod store;
pub mod subscriber;

pub use client::Client;
pub use config::StoreConfig;
pub use db::Db;
pub use error::{Error, Result};
pub use halt::HaltLock;
pub use leaser::{Lease, Leaser, PrimaryInfo};
pub use locks::{LockKind, LockMode};
pub use pos::{LtxHeader, Pos};
pub use primary_ctx::PrimaryCtx;
pub use protocol::LtxCodec;
pub use store::Store;
pub use subscriber::Subscriber;
