//! Noise-pattern secure channel (`spec.md` §4.2), built on the `snow`
//! crate. The wire-framing semantics of `linkcast-wire` are unchanged
//! whether or not a session runs through this channel; the frame header
//! and payload simply become two encrypted records (or one, for an
//! empty payload) once the handshake completes.

pub mod errors;

pub use errors::CryptoError;

use snow::{Builder, HandshakeState, TransportState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// `NX`: the responder carries a long-lived static key that it transmits
/// during the handshake; the initiator has none (`spec.md` §4.2: "responder
/// holds a long-lived static key, initiator is ephemeral").
const NOISE_PATTERN: &str = "Noise_NX_25519_ChaChaPoly_SHA256";

/// Plaintext bound on an encrypted record (`spec.md` §4.2): 65,535 minus the
/// 16-byte AEAD tag.
pub const MAX_PLAINTEXT: usize = 65_519;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// A Noise handshake in progress. Built with [`SecureChannel::init`],
/// driven to completion with [`SecureChannel::handshake`].
pub struct SecureChannel<S> {
    state: ChannelState,
    _stream: std::marker::PhantomData<S>,
}

enum ChannelState {
    Handshaking(HandshakeState),
    Ready(TransportState),
}

impl<S> SecureChannel<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    /// Creates handshake state for the given role. A responder generates
    /// its own static keypair since nothing upstream supplies one; an
    /// initiator carries none (per the `NX` pattern).
    pub fn init(role: Role) -> Result<Self, CryptoError> {
        let builder = Builder::new(NOISE_PATTERN.parse().map_err(|e| CryptoError::HandshakeFailed {
            reason: format!("bad noise params: {e}"),
        })?);

        let state = match role {
            Role::Initiator => builder
                .build_initiator()
                .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?,
            Role::Responder => {
                let keypair = builder
                    .generate_keypair()
                    .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?;
                Builder::new(NOISE_PATTERN.parse().unwrap())
                    .local_private_key(&keypair.private)
                    .build_responder()
                    .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?
            }
        };

        Ok(Self { state: ChannelState::Handshaking(state), _stream: std::marker::PhantomData })
    }

    /// Drives the handshake pattern to completion over `stream`, exchanging
    /// length-prefixed (2-byte big-endian) handshake messages for each
    /// write/read action, then splits into send/recv ciphers. The channel
    /// is `Ready` on success.
    pub async fn handshake(mut self, stream: &mut S) -> Result<Self, CryptoError> {
        let ChannelState::Handshaking(mut hs) = self.state else {
            return Ok(self);
        };

        let mut buf = [0u8; 65_535];
        while !hs.is_handshake_finished() {
            if hs.is_my_turn() {
                let len = hs
                    .write_message(&[], &mut buf)
                    .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?;
                stream.write_all(&(len as u16).to_be_bytes()).await?;
                stream.write_all(&buf[..len]).await?;
            } else {
                let mut len_buf = [0u8; 2];
                stream.read_exact(&mut len_buf).await.map_err(|_| CryptoError::HandshakeEof)?;
                let len = u16::from_be_bytes(len_buf) as usize;
                let mut msg = vec![0u8; len];
                stream.read_exact(&mut msg).await.map_err(|_| CryptoError::HandshakeEof)?;
                hs.read_message(&msg, &mut buf)
                    .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?;
            }
        }

        let transport = hs
            .into_transport_mode()
            .map_err(|e| CryptoError::HandshakeFailed { reason: e.to_string() })?;
        self.state = ChannelState::Ready(transport);
        Ok(self)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ChannelState::Ready(_))
    }

    /// Encrypts `plaintext` and writes a length-prefixed ciphertext record.
    pub async fn send(&mut self, stream: &mut S, plaintext: &[u8]) -> Result<(), CryptoError> {
        let ChannelState::Ready(ref mut transport) = self.state else {
            return Err(CryptoError::NotReady);
        };
        if plaintext.len() > MAX_PLAINTEXT {
            return Err(CryptoError::MessageTooLarge { len: plaintext.len(), cap: MAX_PLAINTEXT });
        }
        let mut buf = vec![0u8; plaintext.len() + 16];
        let len = transport
            .write_message(plaintext, &mut buf)
            .map_err(|_| CryptoError::DecryptFailed)?;
        stream.write_all(&(len as u16).to_be_bytes()).await?;
        stream.write_all(&buf[..len]).await?;
        Ok(())
    }

    /// Reads a length-prefixed ciphertext record and decrypts it.
    pub async fn recv(&mut self, stream: &mut S) -> Result<Vec<u8>, CryptoError> {
        let ChannelState::Ready(ref mut transport) = self.state else {
            return Err(CryptoError::NotReady);
        };
        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut ciphertext = vec![0u8; len];
        stream.read_exact(&mut ciphertext).await?;

        let mut out = vec![0u8; len];
        let n = transport
            .read_message(&ciphertext, &mut out)
            .map_err(|_| CryptoError::DecryptFailed)?;
        out.truncate(n);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_completes_and_channel_round_trips() {
        let (mut init_stream, mut resp_stream) = duplex(4096);

        let initiator = SecureChannel::init(Role::Initiator).unwrap();
        let responder = SecureChannel::init(Role::Responder).unwrap();

        let (init_result, resp_result) = tokio::join!(
            initiator.handshake(&mut init_stream),
            responder.handshake(&mut resp_stream),
        );
        let mut initiator = init_result.unwrap();
        let mut responder = resp_result.unwrap();
        assert!(initiator.is_ready());
        assert!(responder.is_ready());

        initiator.send(&mut init_stream, b"hello receiver").await.unwrap();
        let received = responder.recv(&mut resp_stream).await.unwrap();
        assert_eq!(received, b"hello receiver");

        responder.send(&mut resp_stream, b"pong").await.unwrap();
        let received = initiator.recv(&mut init_stream).await.unwrap();
        assert_eq!(received, b"pong");
    }

    #[tokio::test]
    async fn oversized_plaintext_is_rejected() {
        let (mut init_stream, mut resp_stream) = duplex(4096);
        let initiator = SecureChannel::init(Role::Initiator).unwrap();
        let responder = SecureChannel::init(Role::Responder).unwrap();
        let (init_result, resp_result) =
            tokio::join!(initiator.handshake(&mut init_stream), responder.handshake(&mut resp_stream));
        let mut initiator = init_result.unwrap();
        let _responder = resp_result.unwrap();

        let big = vec![0u8; MAX_PLAINTEXT + 1];
        let err = initiator.send(&mut init_stream, &big).await.unwrap_err();
        assert!(matches!(err, CryptoError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn send_before_handshake_fails_with_not_ready() {
        let (mut stream, _peer) = duplex(4096);
        let mut channel = SecureChannel::<tokio::io::DuplexStream>::init(Role::Initiator).unwrap();
        let err = channel.send(&mut stream, b"x").await.unwrap_err();
        assert!(matches!(err, CryptoError::NotReady));
    }
}
