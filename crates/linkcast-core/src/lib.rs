pub mod config;
pub mod errors;
pub mod types;
pub mod usb;

pub use config::{CryptoPreference, SessionConfig};
pub use errors::CoreError;
pub use types::*;
