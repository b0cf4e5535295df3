//! `Conn` — the wire-framing layer (C1) optionally layered atop the secure
//! channel (C2), per `spec.md` §4.1/§4.2: "the wire-framing semantics of
//! §4.1 are layered *inside* the encrypted channel... this keeps the
//! wire-framing semantics identical whether or not the session is
//! encrypted."

use linkcast_crypto::{CryptoError, Role, SecureChannel};
use linkcast_wire::{
    recv_control, send_control, FrameHeader, MessageType, SequenceCounter, HEADER_SIZE,
    MAX_CONTROL_PAYLOAD,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::errors::SessionError;

/// One framed connection: a byte stream, an optional secure channel once
/// `handshake()` has completed, and this connection's own sequence
/// counter (`spec.md` §9: "thread-local sequence counter" — owned by the
/// connection, not a process global).
pub struct Conn<S> {
    stream: S,
    secure: Option<SecureChannel<S>>,
    seq: SequenceCounter,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn plain(stream: S) -> Self {
        Self { stream, secure: None, seq: SequenceCounter::new() }
    }

    pub fn is_encrypted(&self) -> bool {
        self.secure.is_some()
    }

    /// Drives the Noise handshake (§4.2) over the underlying stream and
    /// upgrades this connection to an encrypted one on success.
    pub async fn upgrade_to_secure(&mut self, role: Role) -> Result<(), SessionError> {
        let channel = SecureChannel::init(role).map_err(SessionError::Crypto)?;
        let channel = channel.handshake(&mut self.stream).await.map_err(SessionError::Crypto)?;
        self.secure = Some(channel);
        Ok(())
    }

    /// Sends one control message: header + payload, capped at
    /// [`MAX_CONTROL_PAYLOAD`] either way (§4.1).
    pub async fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() as u32 > MAX_CONTROL_PAYLOAD {
            return Err(SessionError::Transport(linkcast_wire::WireError::PayloadTooLarge {
                len: payload.len() as u32,
                cap: MAX_CONTROL_PAYLOAD,
            }));
        }
        match &mut self.secure {
            Some(secure) => {
                let header =
                    FrameHeader { msg_type: msg_type.into(), length: payload.len() as u32, sequence: self.seq.next() }
                        .encode();
                secure.send(&mut self.stream, &header).await.map_err(SessionError::Crypto)?;
                if !payload.is_empty() {
                    secure.send(&mut self.stream, payload).await.map_err(SessionError::Crypto)?;
                }
            }
            None => send_control(&mut self.stream, &mut self.seq, msg_type, payload).await?,
        }
        Ok(())
    }

    /// Receives one control message. Translates an immediate EOF on the
    /// secure channel's length prefix to the same `CleanClose` signal the
    /// plaintext path produces (§4.1).
    pub async fn recv(&mut self) -> Result<(MessageType, Vec<u8>), SessionError> {
        let (raw_type, payload) = match &mut self.secure {
            Some(secure) => {
                let header_bytes = secure.recv(&mut self.stream).await.map_err(map_secure_eof)?;
                if header_bytes.len() != HEADER_SIZE {
                    return Err(SessionError::Protocol { reason: "encrypted header record has the wrong size".into() });
                }
                let mut hb = [0u8; HEADER_SIZE];
                hb.copy_from_slice(&header_bytes);
                let header = FrameHeader::decode(&hb);
                if header.length > MAX_CONTROL_PAYLOAD {
                    return Err(SessionError::Transport(linkcast_wire::WireError::PayloadTooLarge {
                        len: header.length,
                        cap: MAX_CONTROL_PAYLOAD,
                    }));
                }
                let payload = if header.length == 0 {
                    Vec::new()
                } else {
                    secure.recv(&mut self.stream).await.map_err(map_secure_eof)?
                };
                if payload.len() != header.length as usize {
                    return Err(SessionError::Protocol { reason: "encrypted payload length mismatch".into() });
                }
                (header.msg_type, payload)
            }
            None => {
                let (header, payload) = recv_control(&mut self.stream).await?;
                (header.msg_type, payload)
            }
        };
        let msg_type = MessageType::try_from(raw_type)
            .map_err(|e| SessionError::Protocol { reason: e.to_string() })?;
        Ok((msg_type, payload))
    }

    /// Writes a `FRAME` body directly to the transport, bypassing the
    /// per-message framing cap (§4.7). Still goes through the secure
    /// channel, chunked under its plaintext record limit, when encrypted
    /// (§3 invariant (iv): every subsequent payload is encrypted once the
    /// channel is ready).
    pub async fn write_raw_body(&mut self, mut body: &[u8]) -> Result<(), SessionError> {
        match &mut self.secure {
            Some(secure) => {
                while !body.is_empty() {
                    let chunk_len = body.len().min(linkcast_crypto::MAX_PLAINTEXT);
                    let (chunk, rest) = body.split_at(chunk_len);
                    secure.send(&mut self.stream, chunk).await.map_err(SessionError::Crypto)?;
                    body = rest;
                }
            }
            None => self.stream.write_all(body).await.map_err(linkcast_wire::WireError::Io)?,
        }
        Ok(())
    }
}

fn map_secure_eof(err: CryptoError) -> SessionError {
    if let CryptoError::Io(ref io_err) = err {
        if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
            return SessionError::Transport(linkcast_wire::WireError::CleanClose);
        }
    }
    SessionError::Crypto(err)
}
