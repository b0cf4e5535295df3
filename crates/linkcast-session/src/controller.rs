//! Session controller (C8, `spec.md` §4.8): discovery, transport/crypto
//! choice, handshake, PIN exchange, capability exchange, and the
//! steady-state loop that hands off to the frame pipeline (C7) and
//! receiver reader (C9).

use std::net::Ipv4Addr;
use std::time::Duration;

use linkcast_capture::{AudioSource, DisplayHost};
use linkcast_core::{CryptoChoice, CryptoPreference, SessionConfig};
use linkcast_crypto::Role;
use linkcast_discovery::{discover, select, DiscoveredReceiver};
use linkcast_wire::{ClientHelloBody, HelloBody, MessageType, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::conn::Conn;
use crate::errors::SessionError;
use crate::io_task;
use crate::pipeline::FramePipeline;
use crate::reader;
use crate::shared::SessionShared;

const CLIENT_HELLO_VERSION: u8 = PROTOCOL_VERSION as u8;

/// Resolving + Connecting (`spec.md` §4.8): run discovery when
/// `config.host` is unset, then dial the chosen endpoint within
/// `config.connect_timeout`.
pub async fn establish_transport(
    config: &SessionConfig,
    discovery_prompt: impl FnOnce(&[DiscoveredReceiver]) -> usize,
) -> Result<(TcpStream, Ipv4Addr, u16), SessionError> {
    let (addr, port) = match &config.host {
        Some(host) => {
            let addr: Ipv4Addr = host
                .parse()
                .map_err(|_| SessionError::Protocol { reason: format!("'{host}' is not an IPv4 address") })?;
            (addr, config.port)
        }
        None => {
            let candidates = discover(config.broadcast_timeout).await?;
            let chosen = select(candidates, discovery_prompt)?;
            (chosen.addr, chosen.tcp_port)
        }
    };

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect((addr, port)))
        .await
        .map_err(|_| SessionError::Timeout { what: "tcp connect" })??;
    info!("connected to {}:{}", addr, port);
    Ok((stream, addr, port))
}

/// Decides crypto and PIN requirement (`spec.md` §4.8): a CLI-forced
/// choice wins outright; otherwise the USB-tethering endpoint gets
/// plaintext and no PIN, everything else gets encryption and a PIN.
/// Forcing encryption on or off via the CLI does not itself waive the
/// PIN — only the trusted tether path does (Open Question, recorded in
/// `DESIGN.md`).
pub fn decide_crypto(preference: CryptoPreference, is_usb_tether: bool) -> CryptoChoice {
    let encrypt = match preference {
        CryptoPreference::Force => true,
        CryptoPreference::Forbid => false,
        CryptoPreference::Auto => !is_usb_tether,
    };
    CryptoChoice { encrypt, require_pin: !is_usb_tether }
}

/// Drives a connected stream through Hello/Handshaking/Auth/CapExchange
/// and into steady-state Streaming, returning once the session tears
/// down cleanly or hits a fatal error (`spec.md` §4.8 state diagram).
#[allow(clippy::too_many_arguments)]
pub async fn run_session<S>(
    stream: S,
    is_usb_tether: bool,
    config: &SessionConfig,
    mut host: Box<dyn DisplayHost>,
    audio: Option<Box<dyn AudioSource>>,
    shared: SessionShared,
    pin_source: impl FnOnce() -> u16,
    now_us: impl Fn() -> u64 + Send + 'static,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = Conn::plain(stream);
    let choice = decide_crypto(config.crypto, is_usb_tether);

    let pin = if choice.require_pin {
        Some(config.pin.unwrap_or_else(pin_source))
    } else {
        None
    };

    // ── Hello: announce the crypto/PIN choice ──────────────────────────
    let hello_body = ClientHelloBody {
        version: CLIENT_HELLO_VERSION,
        encrypt_requested: choice.encrypt,
        pin: if !choice.encrypt { pin } else { None },
    };
    conn.send(MessageType::ClientHello, &hello_body.encode()).await?;

    // ── Handshaking ─────────────────────────────────────────────────────
    if choice.encrypt {
        tokio::time::timeout(config.handshake_timeout, conn.upgrade_to_secure(Role::Initiator))
            .await
            .map_err(|_| SessionError::Timeout { what: "noise handshake" })??;
        info!("secure channel ready");
    }

    // ── Auth: PIN verify over the encrypted channel ────────────────────
    if choice.encrypt {
        if let Some(pin) = pin {
            conn.send(MessageType::PinVerify, &linkcast_wire::encode_pin_verify(pin)).await?;
            let (msg_type, _) = tokio::time::timeout(config.handshake_timeout, conn.recv())
                .await
                .map_err(|_| SessionError::Timeout { what: "pin verify" })??;
            if msg_type != MessageType::PinVerified {
                return Err(SessionError::Auth { reason: "receiver rejected PIN".into() });
            }
        }
    }

    // ── CapExchange ─────────────────────────────────────────────────────
    let (msg_type, payload) = tokio::time::timeout(config.hello_timeout, conn.recv())
        .await
        .map_err(|_| SessionError::Timeout { what: "hello" })??;
    if msg_type != MessageType::Hello {
        return Err(SessionError::Protocol { reason: format!("expected HELLO, got {msg_type:?}") });
    }
    let hello = HelloBody::decode(&payload).map_err(|e| SessionError::Protocol { reason: e.to_string() })?;
    let preferred = hello.modes.first().copied().ok_or(SessionError::Protocol { reason: "HELLO has no modes".into() })?;

    let output = host.create_virtual_output(&hello.name, preferred)?;
    host.install_modes(output, &hello.modes)?;
    {
        let mut fields = shared.lock().await;
        fields.output = Some(output);
        fields.display_name = hello.name.clone();
        fields.refresh_rate_hz = preferred.refresh_hz().round() as u32;
    }
    info!("capability exchange complete: {} ({}x{}@{:.2}Hz)", hello.name, preferred.width, preferred.height, preferred.refresh_hz());

    // ── Streaming ───────────────────────────────────────────────────────
    let (outbound, inbound) = io_task::spawn(conn, shared.clone());
    let reader_shared = shared.clone();
    let reader_handle = tokio::spawn(reader::run(reader_shared, inbound, outbound.clone()));

    let mut pipeline = FramePipeline::new(host, audio, outbound, shared.clone(), now_us);
    let interval_us = 1_000_000u64 / shared.lock().await.refresh_rate_hz.max(1) as u64;
    let frame_interval = Duration::from_micros(interval_us.max(1));
    let mut last_tick_at = tokio::time::Instant::now() - frame_interval;

    // Poll at the windowing-system-fd cadence (`spec.md` §5: "poll...with a
    // 100 ms timeout; on each wakeup it processes display-configuration
    // events, then runs the frame-pipeline tick if the configured
    // inter-frame interval has elapsed..., then drains any available
    // audio"). `process_events`/`tick`/`drain_audio` run every wakeup in
    // that order; `tick` itself no-ops unless `frame_interval` has elapsed.
    let mut poll_ticker = tokio::time::interval(Duration::from_millis(100));
    poll_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let tick_result: Result<(), SessionError> = loop {
        tokio::select! {
            _ = shared.stopped() => break Ok(()),
            _ = poll_ticker.tick() => {
                pipeline.process_events();

                let now = tokio::time::Instant::now();
                if now.saturating_duration_since(last_tick_at) >= frame_interval {
                    last_tick_at = now;
                    if let Err(e) = pipeline.tick().await {
                        break Err(e);
                    }
                }

                if let Err(e) = pipeline.drain_audio().await {
                    break Err(e);
                }
            }
        }
    };

    // ── Teardown ────────────────────────────────────────────────────────
    shared.stop();
    let mut host = pipeline.into_host();
    let reader_result = reader_handle.await;
    let output = shared.lock().await.output.take();
    if let Some(output) = output {
        if let Err(e) = host.delete_virtual_output(output) {
            warn!("display host refused virtual-output deletion: {}", e);
        }
    }

    match (tick_result, reader_result) {
        (Err(e), _) => Err(e),
        (Ok(()), Ok(Err(e))) => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkcast_capture::{CaptureError, DisplayHost, HostError};
    use linkcast_core::{DisplayMode, OutputId};
    use linkcast_wire::MessageType as MT;
    use tokio::io::duplex;

    #[test]
    fn auto_preference_encrypts_and_requires_pin_off_tether() {
        let choice = decide_crypto(CryptoPreference::Auto, false);
        assert!(choice.encrypt);
        assert!(choice.require_pin);
    }

    #[test]
    fn auto_preference_on_tether_is_plaintext_and_pinless() {
        let choice = decide_crypto(CryptoPreference::Auto, true);
        assert!(!choice.encrypt);
        assert!(!choice.require_pin);
    }

    #[test]
    fn forcing_crypto_never_waives_the_pin_off_tether() {
        assert!(decide_crypto(CryptoPreference::Force, false).require_pin);
        assert!(decide_crypto(CryptoPreference::Forbid, false).require_pin);
    }

    #[test]
    fn tether_waives_the_pin_regardless_of_forced_crypto() {
        assert!(!decide_crypto(CryptoPreference::Force, true).require_pin);
        assert!(!decide_crypto(CryptoPreference::Forbid, true).require_pin);
        assert!(decide_crypto(CryptoPreference::Force, true).encrypt);
        assert!(!decide_crypto(CryptoPreference::Forbid, true).encrypt);
    }

    struct NoopHost;

    impl DisplayHost for NoopHost {
        fn framebuffer(&mut self, output: OutputId) -> Result<linkcast_capture::CaptureFrame, CaptureError> {
            Err(CaptureError::NoFramebuffer(output))
        }
        fn create_virtual_output(&mut self, _name: &str, _mode: DisplayMode) -> Result<OutputId, HostError> {
            Ok(OutputId(1))
        }
        fn install_modes(&mut self, _output: OutputId, _modes: &[DisplayMode]) -> Result<(), HostError> {
            Ok(())
        }
        fn delete_virtual_output(&mut self, _output: OutputId) -> Result<(), HostError> {
            Ok(())
        }
        fn process_events(&mut self) -> usize {
            0
        }
    }

    /// Drives `run_session` over an in-memory duplex stream against a fake
    /// peer that answers capability exchange then closes, exercising
    /// Hello→CapExchange→Streaming→Teardown on the plaintext/no-PIN
    /// (USB-tether) path end to end (`spec.md` §4.8).
    #[tokio::test]
    async fn tethered_session_completes_capability_exchange_then_tears_down_on_peer_close() {
        let (our_stream, peer_stream) = duplex(1 << 16);
        let mut peer_conn = Conn::plain(peer_stream);

        let peer = tokio::spawn(async move {
            let (msg_type, _) = peer_conn.recv().await.unwrap();
            assert_eq!(msg_type, MT::ClientHello);

            let hello = HelloBody {
                protocol_version: PROTOCOL_VERSION,
                name: "TV01".into(),
                modes: vec![DisplayMode { width: 1280, height: 720, refresh_centihz: 6000 }],
            };
            peer_conn.send(MessageType::Hello, &hello.encode()).await.unwrap();
            // Drop the peer side once CapExchange is done: the streaming
            // loop's first read observes a clean close and tears down.
        });

        let config = SessionConfig { crypto: CryptoPreference::Forbid, ..SessionConfig::default() };
        let shared = SessionShared::new();
        let result = run_session(
            our_stream,
            true, // USB tether: plaintext, no PIN
            &config,
            Box::new(NoopHost),
            None,
            shared.clone(),
            || 0,
            || 1_000_000,
        )
        .await;

        peer.await.unwrap();
        assert!(result.is_ok(), "expected a clean teardown, got {result:?}");
        assert!(!shared.is_running());
    }

    /// Peer completes capability exchange then goes idle (no further
    /// traffic, no close) — the session must still tear down promptly
    /// once `stop()` is requested, instead of hanging forever waiting on
    /// an idle socket (`spec.md` §5: "`stop()`...is polled by both
    /// threads' loop conditions"; §4.8 teardown "join the reader task...
    /// close the stream").
    #[tokio::test]
    async fn stop_tears_down_promptly_even_with_an_idle_peer() {
        let (our_stream, peer_stream) = duplex(1 << 16);
        let mut peer_conn = Conn::plain(peer_stream);

        let peer = tokio::spawn(async move {
            let (msg_type, _) = peer_conn.recv().await.unwrap();
            assert_eq!(msg_type, MT::ClientHello);

            let hello = HelloBody {
                protocol_version: PROTOCOL_VERSION,
                name: "TV01".into(),
                modes: vec![DisplayMode { width: 1280, height: 720, refresh_centihz: 6000 }],
            };
            peer_conn.send(MessageType::Hello, &hello.encode()).await.unwrap();
            // Stays alive and silent: nothing closes the socket from here.
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(peer_conn);
        });

        let config = SessionConfig { crypto: CryptoPreference::Forbid, ..SessionConfig::default() };
        let shared = SessionShared::new();
        let stop_handle = shared.stop_handle();

        let session = tokio::spawn(run_session(
            our_stream,
            true,
            &config,
            Box::new(NoopHost),
            None,
            shared.clone(),
            || 0,
            || 1_000_000,
        ));

        // Give capability exchange a moment to finish, then request
        // shutdown against an otherwise-idle peer.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_handle.stop();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), session)
            .await
            .expect("run_session must return promptly after stop(), not hang on an idle peer")
            .unwrap();
        assert!(result.is_ok(), "expected a clean teardown, got {result:?}");

        peer.abort();
    }
}
