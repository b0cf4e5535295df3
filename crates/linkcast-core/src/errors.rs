use thiserror::Error;

/// Errors that can originate directly from `linkcast-core` (config parsing,
/// USB-tether detection). Per-component errors (wire, crypto, discovery,
/// capture, encoder, host) live in their owning crates and are aggregated
/// into `linkcast_session::SessionError`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
