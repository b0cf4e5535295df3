//! Single IO task multiplexing the one underlying stream (`spec.md` §5,
//! §9): "Guard the outbound stream with an exclusive lock or a
//! single-writer queue with an encoder task... an implementation should
//! make the invariant explicit." One task owns the `Conn` outright and
//! alternates between servicing outbound send requests and reading the
//! next inbound message, so writes from the frame pipeline and the
//! reader's `PONG` replies never interleave on the wire and no lock is
//! ever held across an `.await` on network IO.

use linkcast_wire::MessageType;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::conn::Conn;
use crate::errors::SessionError;
use crate::shared::SessionShared;

pub enum OutboundItem {
    Message { msg_type: MessageType, payload: Vec<u8> },
    RawBody(Vec<u8>),
}

struct OutboundRequest {
    item: OutboundItem,
    ack: oneshot::Sender<Result<(), SessionError>>,
}

pub enum InboundEvent {
    Message(MessageType, Vec<u8>),
    /// Peer closed the connection cleanly (§4.9: "EOF → record clean
    /// disconnect and signal session shutdown").
    Closed,
    /// A decode or transport error occurred; fatal to the session (§4.9).
    Fatal(SessionError),
}

/// Handle used by the frame pipeline and the receiver-reader's `PONG`
/// replies to submit writes; cheap to clone.
#[derive(Clone)]
pub struct OutboundSender(mpsc::UnboundedSender<OutboundRequest>);

impl OutboundSender {
    pub async fn send(&self, msg_type: MessageType, payload: Vec<u8>) -> Result<(), SessionError> {
        self.submit(OutboundItem::Message { msg_type, payload }).await
    }

    pub async fn send_raw_body(&self, body: Vec<u8>) -> Result<(), SessionError> {
        self.submit(OutboundItem::RawBody(body)).await
    }

    async fn submit(&self, item: OutboundItem) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.0
            .send(OutboundRequest { item, ack: ack_tx })
            .map_err(|_| SessionError::Protocol { reason: "io task has shut down".into() })?;
        ack_rx.await.map_err(|_| SessionError::Protocol { reason: "io task dropped the ack channel".into() })?
    }
}

/// Spawns the IO task, returning a sender for outbound writes and a
/// receiver of inbound events. The task exits once the connection fails,
/// every [`OutboundSender`] clone is dropped, or `shared` observes
/// `stop()` — whichever comes first. On any exit it drops `conn`, which
/// closes the underlying stream and unblocks whatever's still parked
/// reading from the peer side (`spec.md` §5: "join the reader task...
/// close the stream").
pub fn spawn<S>(conn: Conn<S>, shared: SessionShared) -> (OutboundSender, mpsc::Receiver<InboundEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::channel(32);
    tokio::spawn(run(conn, out_rx, in_tx, shared));
    (OutboundSender(out_tx), in_rx)
}

async fn run<S>(
    mut conn: Conn<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundRequest>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    shared: SessionShared,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shared.stopped() => {
                // stop() requested: drop `conn` (closing the stream) rather
                // than waiting on whatever `conn.recv()` is parked on.
                return;
            }
            maybe_req = outbound_rx.recv() => {
                let Some(req) = maybe_req else {
                    // All senders dropped: the session is tearing down, nothing left to write.
                    return;
                };
                let result = match req.item {
                    OutboundItem::Message { msg_type, payload } => conn.send(msg_type, &payload).await,
                    OutboundItem::RawBody(body) => conn.write_raw_body(&body).await,
                };
                let fatal = result.is_err();
                let _ = req.ack.send(result);
                if fatal {
                    return;
                }
            }
            result = conn.recv() => {
                match result {
                    Ok((msg_type, payload)) => {
                        if inbound_tx.send(InboundEvent::Message(msg_type, payload)).await.is_err() {
                            return;
                        }
                    }
                    Err(SessionError::Transport(linkcast_wire::WireError::CleanClose)) => {
                        let _ = inbound_tx.send(InboundEvent::Closed).await;
                        return;
                    }
                    Err(e) => {
                        let _ = inbound_tx.send(InboundEvent::Fatal(e)).await;
                        return;
                    }
                }
            }
        }
    }
}
