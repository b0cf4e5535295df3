use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no framebuffer available for output {0:?}")]
    NoFramebuffer(linkcast_core::OutputId),
    #[error("failed to map framebuffer for CPU read: {reason}")]
    MapFailed { reason: String },
    #[error("framebuffer dimensions changed mid-capture")]
    DimensionMismatch,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("display host refused to create virtual output: {reason}")]
    CreateRefused { reason: String },
    #[error("display host refused to delete virtual output {0:?}")]
    DeleteRefused(linkcast_core::OutputId),
    #[error("display host refused to install modes on output {0:?}")]
    InstallRefused(linkcast_core::OutputId),
}
