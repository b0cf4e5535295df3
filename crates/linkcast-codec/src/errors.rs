use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("no usable H.264 encoder element available: {reason}")]
    Unavailable { reason: String },
    #[error("encode step failed: {reason}")]
    EncodeFailed { reason: String },
}
