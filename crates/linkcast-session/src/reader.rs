//! Receiver reader (C9, `spec.md` §4.9): reacts to inbound control
//! messages once the session has left capability exchange and entered
//! steady state. The very first `HELLO` is consumed directly by the
//! controller (§4.8) before this loop starts; everything after is this
//! module's job.

use linkcast_wire::MessageType;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::io_task::{InboundEvent, OutboundSender};
use crate::shared::SessionShared;

/// Runs until the peer closes cleanly (`Ok(())`) or a fatal error occurs
/// (`Err`). Also returns early once `shared` observes `stop()`.
pub async fn run(
    shared: SessionShared,
    mut inbound: mpsc::Receiver<InboundEvent>,
    outbound: OutboundSender,
) -> Result<(), SessionError> {
    while shared.is_running() {
        let Some(event) = inbound.recv().await else {
            return Ok(());
        };
        match event {
            InboundEvent::Message(MessageType::Ping, _) => {
                outbound.send(MessageType::Pong, Vec::new()).await?;
            }
            InboundEvent::Message(MessageType::Pause, _) => {
                shared.lock().await.paused = true;
                info!("receiver requested pause");
            }
            InboundEvent::Message(MessageType::Resume, _) => {
                shared.lock().await.paused = false;
                info!("receiver requested resume");
            }
            InboundEvent::Message(MessageType::Config, payload) => {
                debug!("received CONFIG from receiver ({} bytes), logged only (§4.9)", payload.len());
            }
            InboundEvent::Message(other, payload) => {
                warn!("ignoring unexpected message type {:?} ({} bytes)", other, payload.len());
            }
            InboundEvent::Closed => {
                info!("receiver closed the connection");
                shared.stop();
                return Ok(());
            }
            InboundEvent::Fatal(err) => {
                shared.stop();
                return Err(err);
            }
        }
    }
    Ok(())
}
