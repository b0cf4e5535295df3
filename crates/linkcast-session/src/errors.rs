use thiserror::Error;

use linkcast_capture::{CaptureError, HostError};
use linkcast_codec::EncoderError;
use linkcast_crypto::CryptoError;
use linkcast_discovery::DiscoveryError;
use linkcast_wire::WireError;

/// Top-level session error taxonomy (`spec.md` §7). Transport, Protocol,
/// Crypto, and Auth variants are fatal to the session — the controller
/// transitions to `Teardown` and the caller reports a non-zero outcome.
/// Capture and Encoder errors are handled per-tick by the frame pipeline
/// and never reach here directly; Host errors during setup and Resource
/// errors are always fatal.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] WireError),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("auth failed: {reason}")]
    Auth { reason: String },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("display host error: {0}")]
    Host(#[from] HostError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("resource error: {reason}")]
    Resource { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out: {what}")]
    Timeout { what: &'static str },
}
