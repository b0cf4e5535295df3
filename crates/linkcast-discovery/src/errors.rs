use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no receiver responded within the discovery timeout")]
    NoReceiver,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
