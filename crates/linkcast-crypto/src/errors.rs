use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("noise handshake failed: {reason}")]
    HandshakeFailed { reason: String },
    #[error("stream closed during handshake")]
    HandshakeEof,
    #[error("AEAD verification failed")]
    DecryptFailed,
    #[error("plaintext of {len} bytes exceeds the {cap}-byte cipher limit")]
    MessageTooLarge { len: usize, cap: usize },
    #[error("channel used before handshake completed")]
    NotReady,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
