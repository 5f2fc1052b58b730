//! REST error taxonomy.
//!
//! The quota-desync variants (401/403/429) are terminal for the single
//! call that produced them: the client's quota model has fallen out of
//! step with the server, and retrying without evidence would amplify a
//! real outage.

use thiserror::Error;

use corvid_core::CoreError;

/// Errors surfaced to the caller of a REST request.
#[derive(Error, Debug)]
pub enum RestError {
    /// Server rejected the client's credentials (401)
    #[error("Unauthorized: credentials rejected by the server")]
    Unauthorized,

    /// Server denied permission for this resource (403)
    #[error("Forbidden: missing permission for this resource")]
    Forbidden,

    /// Server reported a rate-limit violation despite client tracking (429)
    #[error("Rate limit violated despite client-side quota tracking")]
    QuotaDesync,

    /// Network-level failure reaching the remote service
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Route could not be rendered into an endpoint
    #[error(transparent)]
    Route(#[from] CoreError),

    /// The bucket actor has shut down
    #[error("Bucket channel closed")]
    ChannelClosed,
}

/// Result type for REST operations.
pub type RestResult<T> = Result<T, RestError>;

/// Errors raised by a transport implementation.
///
/// A transport failure leaves bucket quota untouched: there is no
/// evidence the request consumed or freed any server-side capacity.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not reach the remote service
    #[error("Connection failed: {0}")]
    Connection(String),

    /// I/O error during the request
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
