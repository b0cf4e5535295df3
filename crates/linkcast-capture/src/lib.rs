//! `DisplayHost` / `AudioSource` — the external collaborators `spec.md`
//! §1 carves out of scope, expressed as traits plus one concrete
//! PipeWire-backed `DisplayHost`. Grounded in the teacher's
//! `ScreenCapturer`/`negotiate_portal`/`build_pipeline` (ashpd portal
//! negotiation + GStreamer appsink pull), adapted from a push-based
//! frame channel to the pull-per-tick shape C7 needs.

pub mod errors;

pub use errors::{CaptureError, HostError};

use linkcast_core::{AudioChunk, DisplayMode, OutputId, PixelFormat};

/// An owned, CPU-readable copy of one tick's framebuffer. Build a
/// [`linkcast_core::FramebufferSnapshot`] borrowing `bytes` at the point of
/// use; never retain this across ticks (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub format: PixelFormat,
    pub bytes: Vec<u8>,
}

/// The windowing-system virtual-output/framebuffer collaborator (`spec.md`
/// §1, §3). One session owns at most one virtual output at a time.
pub trait DisplayHost: Send {
    fn framebuffer(&mut self, output: OutputId) -> Result<CaptureFrame, CaptureError>;
    fn create_virtual_output(&mut self, name: &str, mode: DisplayMode) -> Result<OutputId, HostError>;
    fn install_modes(&mut self, output: OutputId, modes: &[DisplayMode]) -> Result<(), HostError>;
    fn delete_virtual_output(&mut self, output: OutputId) -> Result<(), HostError>;
    /// Drains any windowing-system events pending since the last call, such
    /// as a resolution or hotplug change. Returns the number processed.
    fn process_events(&mut self) -> usize;
}

/// The audio-capture collaborator (`spec.md` §1).
pub trait AudioSource: Send {
    fn drain(&mut self) -> Option<AudioChunk>;
}

#[cfg(target_os = "linux")]
pub use linux::PipewireDisplayHost;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    use std::os::unix::io::IntoRawFd;

    use ashpd::desktop::screencast::{CaptureType, Persist, ScreenCast, SourceType};
    use ashpd::WindowIdentifier;
    use gstreamer::prelude::*;
    use gstreamer_app::{AppSink, AppSinkCallbacks};
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    /// A `DisplayHost` backed by the XDG desktop portal's PipeWire
    /// screen-cast stream. Virtual-output creation/deletion is bookkeeping
    /// only: the real windowing-system-side mechanism is the external
    /// collaborator `spec.md` §1 excludes.
    pub struct PipewireDisplayHost {
        next_output_id: u32,
        outputs: std::collections::HashMap<u32, OutputState>,
    }

    struct OutputState {
        name: String,
        mode: DisplayMode,
        frame_rx: Option<mpsc::Receiver<CaptureFrame>>,
        _pipeline: Option<gstreamer::Pipeline>,
    }

    impl Default for PipewireDisplayHost {
        fn default() -> Self {
            Self { next_output_id: 1, outputs: std::collections::HashMap::new() }
        }
    }

    impl PipewireDisplayHost {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl DisplayHost for PipewireDisplayHost {
        fn framebuffer(&mut self, output: OutputId) -> Result<CaptureFrame, CaptureError> {
            let state = self
                .outputs
                .get_mut(&output.0)
                .ok_or(CaptureError::NoFramebuffer(output))?;
            let rx = state.frame_rx.as_mut().ok_or(CaptureError::NoFramebuffer(output))?;
            rx.try_recv().map_err(|_| CaptureError::NoFramebuffer(output))
        }

        fn create_virtual_output(&mut self, name: &str, mode: DisplayMode) -> Result<OutputId, HostError> {
            if !self.outputs.is_empty() {
                return Err(HostError::CreateRefused {
                    reason: "a session owns at most one virtual output at a time".into(),
                });
            }
            let id = self.next_output_id;
            self.next_output_id += 1;
            info!("creating virtual output {:?} for receiver '{}' at {}x{}", id, name, mode.width, mode.height);

            let (pipeline, frame_rx) = match negotiate_and_build(mode) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("PipeWire portal negotiation failed: {:#}", e);
                    (None, None)
                }
            };

            self.outputs.insert(id, OutputState { name: name.to_owned(), mode, frame_rx, _pipeline: pipeline });
            Ok(OutputId(id))
        }

        fn install_modes(&mut self, output: OutputId, modes: &[DisplayMode]) -> Result<(), HostError> {
            let state = self.outputs.get_mut(&output.0).ok_or(HostError::InstallRefused(output))?;
            debug!("installing {} modes on output {:?}", modes.len(), output);
            if let Some(&preferred) = modes.first() {
                state.mode = preferred;
            }
            Ok(())
        }

        fn delete_virtual_output(&mut self, output: OutputId) -> Result<(), HostError> {
            self.outputs.remove(&output.0).ok_or(HostError::DeleteRefused(output))?;
            info!("deleted virtual output {:?}", output);
            Ok(())
        }

        fn process_events(&mut self) -> usize {
            0
        }
    }

    /// Negotiates a PipeWire stream via the XDG portal and wires it to a
    /// GStreamer `appsink`, synchronously (this runs on session setup, not
    /// per tick).
    fn negotiate_and_build(
        mode: DisplayMode,
    ) -> anyhow::Result<(Option<gstreamer::Pipeline>, Option<mpsc::Receiver<CaptureFrame>>)> {
        gstreamer::init()?;
        let handle = tokio::runtime::Handle::try_current()?;
        let (node_id, fd_raw) = handle.block_on(negotiate_portal())?;

        let w = mode.width;
        let h = mode.height;
        let fps = mode.refresh_hz().round() as u32;

        let desc = format!(
            "pipewiresrc fd={fd_raw} path={node_id} do-timestamp=true \
             ! videoconvert \
             ! video/x-raw,format=BGRA,width={w},height={h},framerate={fps}/1 \
             ! appsink name=sink max-buffers=2 drop=true sync=false emit-signals=false"
        );

        let pipeline = gstreamer::parse::launch(&desc)?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("expected a Pipeline element"))?;
        let appsink: AppSink = pipeline
            .by_name("sink")
            .ok_or_else(|| anyhow::anyhow!("appsink 'sink' not found"))?
            .downcast::<AppSink>()
            .map_err(|_| anyhow::anyhow!("expected an AppSink"))?;

        let (frame_tx, frame_rx) = mpsc::channel::<CaptureFrame>(2);
        let pitch = w * PixelFormat::Argb32.bytes_per_pixel();

        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gstreamer::FlowError::Error)?;
                    let frame = CaptureFrame { width: w, height: h, pitch, format: PixelFormat::Argb32, bytes: map.as_slice().to_vec() };
                    if frame_tx.try_send(frame).is_err() {
                        debug!("capture frame dropped, tick consumer behind");
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gstreamer::State::Playing)?;
        Ok((Some(pipeline), Some(frame_rx)))
    }

    async fn negotiate_portal() -> anyhow::Result<(u32, i32)> {
        let proxy = ScreenCast::new().await?;
        let session = proxy.create_session().await?;
        proxy
            .select_sources(&session, CaptureType::SCREEN, SourceType::MONITOR, false, None, Persist::DoNot)
            .await?;
        let response = proxy.start(&session, &WindowIdentifier::default()).await?.response()?;

        let streams: Vec<_> = response.streams().to_vec();
        let stream = streams.first().ok_or_else(|| anyhow::anyhow!("no PipeWire streams returned by portal"))?;
        let node_id = stream.pipe_wire_node_id();
        let fd = proxy.open_pipe_wire_remote(&session).await?;
        Ok((node_id, fd.into_raw_fd()))
    }
}
