//! Corvid REST - rate-limit admission control
//!
//! Routes outbound REST calls through per-resource quota buckets. Each
//! bucket is a small actor that owns the quota state for one route key,
//! decides send-now versus enqueue, and drains its FIFO backlog exactly
//! as the server replenishes capacity.
//!
//! ```text
//! ┌────────────┐    bucket key    ┌────────────┐
//! │ RestClient │─────────────────▶│   Bucket   │──▶ Transport
//! │  (router)  │  lazily created  │   actor    │
//! └────────────┘                  └─────┬──────┘
//!                                       │ exhausted
//!                                       ▼
//!                                 ┌────────────┐
//!                                 │ FIFO queue │◀── refill timer drains
//!                                 └────────────┘
//! ```
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, or `todo!()` outside of tests.

pub mod bucket;
pub mod error;
pub mod queue;
pub mod router;
pub mod transport;

pub use bucket::BucketHandle;
pub use error::{RestError, RestResult, TransportError};
pub use router::{RestClient, RestEvent};
pub use transport::{ApiRequest, ApiResponse, AttachedFile, Transport};
