//! Video codec adapter (C5, `spec.md` §4.5). Grounded in the teacher's
//! `encoder.rs`: the `vaapih264enc` → `nvh264enc` → `x264enc` fallback
//! chain and the `appsrc`/`appsink` launch-string pipeline shape, extended
//! with the ARGB→I420 conversion and lazy re-creation the teacher's own
//! BGRx-straight-into-`videoconvert` path never needed.

pub mod errors;
pub mod i420;

pub use errors::EncoderError;

use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use tracing::{debug, info, warn};

/// Keyframe interval as a multiple of the target frame rate (`spec.md` §4.5).
const KEYFRAME_INTERVAL_FPS_MULTIPLE: u32 = 2;
const BITRATE_FLOOR_KBPS: u32 = 1_000;
const BITRATE_PER_MEGAPIXEL_KBPS: f64 = 10_000.0;

fn autoscale_bitrate_kbps(width: u32, height: u32) -> u32 {
    let megapixels = (width as f64 * height as f64) / 1_000_000.0;
    ((megapixels * BITRATE_PER_MEGAPIXEL_KBPS) as u32).max(BITRATE_FLOOR_KBPS)
}

/// Lazily-(re)created low-latency H.264 encode pipeline: `ARGB` in,
/// concatenated NAL units out. Pushes go through `appsrc`; encoded access
/// units are pulled from `appsink` on demand.
pub struct GstEncoder {
    width: u32,
    height: u32,
    fps: u32,
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
}

impl GstEncoder {
    /// Creates (or, if called again with new dimensions, recreates) the
    /// pipeline for `width`×`height` at `fps`, autoscaling bitrate per
    /// `spec.md` §4.5 unless `bitrate_kbps_override` is given.
    pub fn new(width: u32, height: u32, fps: u32, bitrate_kbps_override: Option<u32>) -> Result<Self, EncoderError> {
        gstreamer::init().map_err(|e| EncoderError::Unavailable { reason: e.to_string() })?;

        let bitrate_kbps = bitrate_kbps_override.unwrap_or_else(|| autoscale_bitrate_kbps(width, height));
        let keyframe_interval = fps * KEYFRAME_INTERVAL_FPS_MULTIPLE;

        let encoder_desc = first_available_encoder(bitrate_kbps, keyframe_interval)
            .ok_or_else(|| EncoderError::Unavailable { reason: "no vaapih264enc/nvh264enc/x264enc element found".into() })?;

        let desc = format!(
            "appsrc name=src format=time is-live=true block=true \
               caps=video/x-raw,format=I420,width={width},height={height},framerate={fps}/1 \
             ! videoconvert \
             ! {encoder_desc} \
             ! h264parse \
             ! appsink name=sink max-buffers=4 drop=false sync=false emit-signals=false"
        );
        debug!("codec pipeline: {}", desc);

        let pipeline = gstreamer::parse::launch(&desc)
            .map_err(|e| EncoderError::Unavailable { reason: e.to_string() })?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| EncoderError::Unavailable { reason: "expected a Pipeline element".into() })?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| EncoderError::Unavailable { reason: "appsrc 'src' not found".into() })?
            .downcast::<AppSrc>()
            .map_err(|_| EncoderError::Unavailable { reason: "expected an AppSrc".into() })?;
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| EncoderError::Unavailable { reason: "appsink 'sink' not found".into() })?
            .downcast::<AppSink>()
            .map_err(|_| EncoderError::Unavailable { reason: "expected an AppSink".into() })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| EncoderError::Unavailable { reason: e.to_string() })?;

        info!("codec pipeline ready: {}x{}@{}fps, {} kbps", width, height, fps, bitrate_kbps);
        Ok(Self { width, height, fps, pipeline, appsrc, appsink })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Converts `argb` to I420 and pushes it into the pipeline. Recreates
    /// the pipeline first if `width`/`height` changed since construction.
    pub fn encode(&mut self, argb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EncoderError> {
        if width != self.width || height != self.height {
            *self = Self::new(width, height, self.fps, None)?;
        }

        let planar = i420::argb_to_i420(argb, width, height);
        let buffer = gstreamer::Buffer::from_mut_slice(planar);
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::EncodeFailed { reason: format!("push_buffer: {e:?}") })?;

        let sample = self
            .appsink
            .pull_sample()
            .map_err(|e| EncoderError::EncodeFailed { reason: format!("pull_sample: {e}") })?;
        let buffer = sample.buffer().ok_or_else(|| EncoderError::EncodeFailed { reason: "empty sample".into() })?;
        let map = buffer
            .map_readable()
            .map_err(|e| EncoderError::EncodeFailed { reason: format!("map_readable: {e}") })?;
        Ok(map.as_slice().to_vec())
    }

    pub fn send_eos(&self) {
        let _ = self.appsrc.end_of_stream();
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// Tries encoder elements in priority order, returning the first one
/// GStreamer can instantiate, configured for low-latency streaming
/// (`spec.md` §4.5: ultrafast/zerolatency, no B-frames, single-threaded,
/// intra-refresh keyframing).
fn first_available_encoder(bitrate_kbps: u32, keyframe_interval: u32) -> Option<String> {
    let candidates = [
        format!("vaapih264enc bitrate={bitrate_kbps} keyframe-period={keyframe_interval} rate-control=cbr"),
        format!("nvh264enc bitrate={bitrate_kbps} gop-size={keyframe_interval} zerolatency=true"),
        format!(
            "x264enc bitrate={bitrate_kbps} key-int-max={keyframe_interval} speed-preset=ultrafast \
             tune=zerolatency bframes=0 threads=1"
        ),
    ];

    for desc in candidates {
        let element_name = desc.split_whitespace().next().unwrap_or_default();
        if gstreamer::ElementFactory::find(element_name).is_some() {
            return Some(desc);
        }
        warn!("codec element unavailable: {}", element_name);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_autoscales_per_megapixel_with_a_floor() {
        assert_eq!(autoscale_bitrate_kbps(1280, 720), 9_216);
        assert_eq!(autoscale_bitrate_kbps(100, 100), BITRATE_FLOOR_KBPS);
    }

    #[test]
    fn keyframe_interval_is_double_fps() {
        assert_eq!(30 * KEYFRAME_INTERVAL_FPS_MULTIPLE, 60);
    }
}
