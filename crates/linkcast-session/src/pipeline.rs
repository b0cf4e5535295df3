//! Frame pipeline (C7, `spec.md` §4.7): one tick captures from the
//! display host, chooses an encoding mode, encodes, transmits, and feeds
//! the result back into the metrics/mode-selector.

use linkcast_capture::{AudioSource, CaptureError, DisplayHost};
use linkcast_changedet::ChangeDetector;
use linkcast_codec::GstEncoder;
use linkcast_core::{AudioChunk, EncodingMode, OutputId, PixelFormat};
use linkcast_metrics::Metrics;
use linkcast_wire::{AudioHeader, DirtyRectHeader, FrameBodyHeader, MessageType, DIRTY_RECT_HEADER_SIZE};
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::io_task::OutboundSender;
use crate::shared::SessionShared;

/// Demote-on-overload thresholds (`spec.md` §4.7): a `DIRTY_RECTS` frame
/// whose total dirty area exceeds half the frame falls back to
/// `FULL_FRAME` for this frame only.
const DIRTY_FRACTION_DEMOTE_THRESHOLD: f64 = 0.5;

pub struct FramePipeline {
    host: Box<dyn DisplayHost>,
    audio: Option<Box<dyn AudioSource>>,
    detector: ChangeDetector,
    encoder: Option<GstEncoder>,
    metrics: Metrics,
    outbound: OutboundSender,
    shared: SessionShared,
    now_us: Box<dyn Fn() -> u64 + Send>,
}

impl FramePipeline {
    pub fn new(
        host: Box<dyn DisplayHost>,
        audio: Option<Box<dyn AudioSource>>,
        outbound: OutboundSender,
        shared: SessionShared,
        now_us: impl Fn() -> u64 + Send + 'static,
    ) -> Self {
        Self {
            host,
            audio,
            detector: ChangeDetector::new(0, 0, PixelFormat::Argb32.bytes_per_pixel()),
            encoder: None,
            metrics: Metrics::new(linkcast_metrics::DEFAULT_WINDOW_SIZE),
            outbound,
            shared,
            now_us: Box::new(now_us),
        }
    }

    /// Runs one tick. A skipped tick (no output, paused, capture miss) is
    /// `Ok(())`; only transport-layer failures propagate, which the
    /// caller treats as fatal per `spec.md` §7.
    pub async fn tick(&mut self) -> Result<(), SessionError> {
        let (output, paused, refresh_rate_hz) = {
            let fields = self.shared.lock().await;
            (fields.output, fields.paused, fields.refresh_rate_hz)
        };

        let Some(output) = output else {
            return Ok(());
        };
        if output == OutputId(0) || paused {
            return Ok(());
        }

        let frame = match self.host.framebuffer(output) {
            Ok(frame) => frame,
            Err(CaptureError::NoFramebuffer(_)) => return Ok(()),
            Err(e) => {
                debug!("capture error this tick, retrying next tick: {}", e);
                return Ok(());
            }
        };

        let target_fps = if refresh_rate_hz > 0 { refresh_rate_hz as f64 } else { 60.0 };
        let bpp = frame.format.bytes_per_pixel();
        let total_pixels = frame.width as u64 * frame.height as u64;
        let capture_ts = (self.now_us)();
        let encode_start = std::time::Instant::now();

        let mut mode = self.metrics.mode();
        let mut num_regions: u8 = 0;
        let mut dirty_pixels: u64 = total_pixels;
        let mut body: Vec<u8>;

        match mode {
            EncodingMode::DirtyRects => {
                let rects = self.detector.detect(&frame.bytes, frame.width, frame.height, bpp);
                dirty_pixels = rects.iter().map(|r| r.width as u64 * r.height as u64).sum();
                if total_pixels > 0 && dirty_pixels as f64 / total_pixels as f64 > DIRTY_FRACTION_DEMOTE_THRESHOLD {
                    mode = EncodingMode::FullFrame;
                    num_regions = 0;
                    dirty_pixels = total_pixels;
                    body = frame.bytes[..(frame.pitch as usize * frame.height as usize).min(frame.bytes.len())].to_vec();
                } else {
                    num_regions = rects.len() as u8;
                    body = Vec::with_capacity(rects.len() * (DIRTY_RECT_HEADER_SIZE + 64));
                    for rect in &rects {
                        let row_bytes = (rect.width * bpp) as usize;
                        let data_size = row_bytes as u32 * rect.height;
                        body.extend_from_slice(&DirtyRectHeader {
                            x: rect.x,
                            y: rect.y,
                            width: rect.width,
                            height: rect.height,
                            data_size,
                        }
                        .encode());
                        for row in 0..rect.height {
                            let src_off = ((rect.y + row) * frame.pitch + rect.x * bpp) as usize;
                            body.extend_from_slice(&frame.bytes[src_off..src_off + row_bytes]);
                        }
                    }
                }
            }
            EncodingMode::FullFrame => {
                body = frame.bytes[..(frame.pitch as usize * frame.height as usize).min(frame.bytes.len())].to_vec();
            }
            EncodingMode::H264 => {
                if self.encoder.as_ref().map(|e| (e.width(), e.height())) != Some((frame.width, frame.height)) {
                    self.encoder = GstEncoder::new(frame.width, frame.height, target_fps.round() as u32, None).ok();
                }
                match self.encoder.as_mut().map(|enc| enc.encode(&frame.bytes, frame.width, frame.height)) {
                    Some(Ok(encoded)) => body = encoded,
                    Some(Err(e)) => {
                        warn!("codec failure, demoting this frame to FULL_FRAME: {}", e);
                        mode = EncodingMode::FullFrame;
                        body = frame.bytes[..(frame.pitch as usize * frame.height as usize).min(frame.bytes.len())].to_vec();
                    }
                    None => {
                        mode = EncodingMode::FullFrame;
                        body = frame.bytes[..(frame.pitch as usize * frame.height as usize).min(frame.bytes.len())].to_vec();
                    }
                }
            }
        }

        let encoding_elapsed_us = encode_start.elapsed().as_micros() as u64;

        let header = FrameBodyHeader {
            timestamp_us: capture_ts,
            output_id: output.0,
            width: frame.width,
            height: frame.height,
            format: 0,
            pitch: frame.pitch,
            size: body.len() as u32,
            encoding_mode: mode,
            num_regions,
        };
        let header_bytes = header.encode();
        let total_bytes = (header_bytes.len() + body.len()) as u64;

        self.outbound.send(MessageType::Frame, header_bytes).await?;
        self.outbound.send_raw_body(body).await?;

        self.metrics.record_frame(capture_ts, total_bytes, dirty_pixels, total_pixels, encoding_elapsed_us, target_fps);
        let codec_available = self.encoder.is_some() || mode != EncodingMode::H264;
        self.metrics.maybe_transition(codec_available, target_fps);

        Ok(())
    }

    /// Hands the display host back to the caller, e.g. for virtual-output
    /// deletion at teardown (`spec.md` §4.8).
    pub fn into_host(self) -> Box<dyn DisplayHost> {
        self.host
    }

    /// Drains pending windowing-system events (display-configuration
    /// changes, hotplug) via the display host. Called every control-thread
    /// wakeup, independent of the frame-pipeline tick cadence (`spec.md`
    /// §5).
    pub fn process_events(&mut self) -> usize {
        self.host.process_events()
    }

    /// Drains whatever audio is queued and ships it as one `AUDIO`
    /// message (`spec.md` §5, §6.1). A no-op when no `AudioSource` was
    /// configured or nothing is ready yet.
    pub async fn drain_audio(&mut self) -> Result<(), SessionError> {
        let Some(audio) = self.audio.as_mut() else { return Ok(()) };
        let Some(AudioChunk { timestamp_us, sample_rate, channels, format_tag, pcm }) = audio.drain() else {
            return Ok(());
        };
        let header = AudioHeader { timestamp_us, sample_rate, channels, format_tag, data_size: pcm.len() as u32 };
        let mut payload = header.encode();
        payload.extend_from_slice(&pcm);
        self.outbound.send(MessageType::Audio, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Conn;
    use crate::io_task;
    use linkcast_capture::HostError;
    use linkcast_core::DisplayMode;
    use linkcast_wire::MessageType as MT;
    use tokio::io::duplex;

    struct FixedHost {
        frame: Option<linkcast_capture::CaptureFrame>,
    }

    impl DisplayHost for FixedHost {
        fn framebuffer(&mut self, _output: OutputId) -> Result<linkcast_capture::CaptureFrame, CaptureError> {
            self.frame.clone().ok_or(CaptureError::NoFramebuffer(OutputId(1)))
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

    fn solid_frame(w: u32, h: u32, value: u8) -> linkcast_capture::CaptureFrame {
        linkcast_capture::CaptureFrame {
            width: w,
            height: h,
            pitch: w * 4,
            format: PixelFormat::Argb32,
            bytes: vec![value; (w * h * 4) as usize],
        }
    }

    async fn harness() -> (FramePipeline, SessionShared, OutboundSender, tokio::sync::mpsc::Receiver<io_task::InboundEvent>) {
        let (a, b) = duplex(1 << 20);
        let shared = SessionShared::new();
        let (out_to_peer, peer_in) = io_task::spawn(Conn::plain(a), shared.clone());
        let (_peer_out, _our_in) = io_task::spawn(Conn::plain(b), shared.clone());
        let pipeline = FramePipeline::new(Box::new(FixedHost { frame: None }), None, out_to_peer.clone(), shared.clone(), || 1_000_000);
        (pipeline, shared, out_to_peer, peer_in)
    }

    #[tokio::test]
    async fn skips_tick_with_no_output_assigned() {
        let (mut pipeline, _shared, _out, _peer_in) = harness().await;
        pipeline.tick().await.unwrap();
    }

    #[tokio::test]
    async fn skips_tick_while_paused() {
        let (mut pipeline, shared, _out, _peer_in) = harness().await;
        shared.lock().await.output = Some(OutputId(1));
        shared.lock().await.paused = true;
        pipeline.tick().await.unwrap();
    }

    #[tokio::test]
    async fn emits_frame_header_with_size_matching_body_on_wire() {
        let (a, b) = duplex(1 << 20);
        let shared = SessionShared::new();
        let (pipeline_out, _pipeline_in) = io_task::spawn(Conn::plain(a), shared.clone());
        let (_peer_out, mut peer_in) = io_task::spawn(Conn::plain(b), shared.clone());
        shared.lock().await.output = Some(OutputId(1));
        shared.lock().await.refresh_rate_hz = 30;

        let mut pipeline = FramePipeline::new(
            Box::new(FixedHost { frame: Some(solid_frame(64, 64, 7)) }),
            None,
            pipeline_out,
            shared,
            || 1_000_000,
        );
        pipeline.tick().await.unwrap();

        let header_payload = match peer_in.recv().await.unwrap() {
            io_task::InboundEvent::Message(MT::Frame, payload) => payload,
            _ => panic!("expected a FRAME message"),
        };
        assert_eq!(header_payload.len(), linkcast_wire::FRAME_HEADER_SIZE);
        let size = u32::from_be_bytes(header_payload[28..32].try_into().unwrap());
        // First tick after construction: change detector reports one full-frame
        // rectangle, same as FULL_FRAME size for an initial all-covered region.
        assert_eq!(size as usize, 64 * 64 * 4);
    }
}
