//! Corvid Protocol - Wire protocol for shard coordination
//!
//! This crate provides the message types, framing, and correlation
//! machinery for communication between the shard supervisor and its
//! worker processes. Messages travel as newline-delimited JSON over the
//! worker's stdin/stdout pipe, which gives in-order, at-most-once
//! delivery of structured frames.

pub mod codec;
pub mod correlation;
pub mod message;

pub use codec::{decode_line, encode_line, ProtocolError, MAX_FRAME_SIZE};
pub use correlation::{CorrelationId, CorrelationTable};
pub use message::{SupervisorMessage, WorkerMessage};
