use thiserror::Error;

/// Transport/Protocol error kinds for the framing layer (`spec.md` §7).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("peer closed the connection cleanly")]
    CleanClose,

    #[error("eof mid-message")]
    UnexpectedEof,

    #[error("payload length {len} exceeds the {cap}-byte cap for control messages")]
    PayloadTooLarge { len: u32, cap: u32 },

    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
