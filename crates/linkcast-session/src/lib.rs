//! Session controller crate: ties together discovery, the wire codec,
//! crypto, change detection, the H.264 codec adapter, and capture into the
//! streamer-side session lifecycle described by `spec.md` §4.7-§4.9.

pub mod conn;
pub mod controller;
pub mod errors;
pub mod io_task;
pub mod pipeline;
pub mod reader;
pub mod shared;

pub use controller::{decide_crypto, establish_transport, run_session};
pub use errors::SessionError;
pub use io_task::{InboundEvent, OutboundSender};
pub use pipeline::FramePipeline;
pub use shared::{SessionShared, StopHandle};
