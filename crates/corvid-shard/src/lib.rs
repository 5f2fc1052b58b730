//! Corvid Shard - worker process supervision
//!
//! Spawns N worker processes ("shards"), each owning a partition of the
//! realtime connection workload, and provides the correlated
//! request/response and broadcast protocol across the process boundary.
//!
//! ```text
//! ┌─────────────────┐  staggered spawn   ┌──────────────┐
//! │ ShardSupervisor │───────────────────▶│ worker 0..N  │
//! │   (actor)       │◀──────────────────▶│ ShardChannel │
//! └─────────────────┘  stdio JSON lines  └──────────────┘
//! ```
//!
//! Workers and supervisor share no memory; every interaction is a
//! message. A worker that dies is logged and left dead - there is no
//! respawn, and futures correlated to it never resolve. Callers layer
//! timeouts externally where they need bounded latency.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, or `todo!()` outside of tests.

pub mod channel;
pub mod connector;
pub mod error;
pub mod shard;
pub mod supervisor;

pub use channel::{ChannelEvent, ChannelHandle, ShardChannel};
pub use connector::{ProcessConnector, WorkerConnector, WorkerLink};
pub use error::{ShardError, ShardResult};
pub use supervisor::{ShardSupervisor, SupervisorEvent, SupervisorHandle};
