//! Corvid Core - Shared types for the bot client runtime
//!
//! This crate provides the domain types shared between the REST
//! admission-control half (corvid-rest) and the shard supervision
//! half (corvid-shard).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, or `todo!()` outside of tests.

pub mod config;
pub mod error;
pub mod quota;
pub mod route;
pub mod shard;

// Re-exports for convenience
pub use config::ShardingConfig;
pub use error::{CoreError, CoreResult};
pub use quota::{Quota, RateLimitHeaders};
pub use route::{Method, Route, MAJOR_PARAMS};
pub use shard::{ShardId, ShardIdentity, ShardState, SHARD_COUNT_ENV, SHARD_ID_ENV};
