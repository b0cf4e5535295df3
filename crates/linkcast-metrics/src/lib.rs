//! Sliding-window frame metrics and the hysteretic encoding-mode state
//! machine (`spec.md` §4.6), translated from
//! `original_source/x11-streamer/src/encoding_metrics.c`. All threshold
//! constants are carried over verbatim.

use linkcast_core::EncodingMode;

pub const DEFAULT_WINDOW_SIZE: usize = 60;

const SWITCH_TO_H264_HIGH_CHANGE: u32 = 5;
const SWITCH_TO_H264_LOW_FPS: u32 = 5;
const SWITCH_TO_DIRTY_RECTS_LOW_CHANGE: u32 = 10;

const DIRTY_REGION_HIGH_THRESHOLD: f64 = 0.5;
const DIRTY_REGION_LOW_THRESHOLD: f64 = 0.2;
const DIRTY_REGION_H264_FORCE_THRESHOLD: f64 = 0.9;

const FPS_LOW_THRESHOLD: f64 = 0.8;
const FPS_GOOD_THRESHOLD: f64 = 0.95;

const BANDWIDTH_HIGH_THRESHOLD_MBS: f64 = 100.0;
const BANDWIDTH_LOW_THRESHOLD_MBS: f64 = 50.0;

const ENCODING_TIME_LOW_THRESHOLD_US: u64 = 16_000;

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    fps: f64,
    bandwidth_mbs: f64,
    dirty_fraction: f64,
}

/// Ring of recent per-frame samples plus the four consecutive-run counters
/// and the three-state mode selector (`spec.md` §3, §4.6).
pub struct Metrics {
    window: Vec<Sample>,
    window_index: usize,
    last_frame_time_us: Option<u64>,
    last_encoding_time_us: u64,

    high_change: u32,
    low_change: u32,
    low_fps: u32,
    good_fps: u32,

    mode: EncodingMode,
}

impl Metrics {
    pub fn new(window_size: usize) -> Self {
        let window_size = if window_size == 0 { DEFAULT_WINDOW_SIZE } else { window_size };
        Self {
            window: vec![Sample::default(); window_size],
            window_index: 0,
            last_frame_time_us: None,
            last_encoding_time_us: 0,
            high_change: 0,
            low_change: 0,
            low_fps: 0,
            good_fps: 0,
            mode: EncodingMode::DirtyRects,
        }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Per-frame ingestion (§4.6). `now_us` is a monotonic capture
    /// timestamp; `dirty_pixels`/`total_pixels` describe the frame just
    /// transmitted (use `total_pixels` for both on a `FULL_FRAME`/`H264`
    /// frame, per §9's note that dirty-pixel totals come only from
    /// returned rectangles).
    pub fn record_frame(
        &mut self,
        now_us: u64,
        bytes_sent: u64,
        dirty_pixels: u64,
        total_pixels: u64,
        encoding_time_us: u64,
        target_fps: f64,
    ) {
        let frame_fps = match self.last_frame_time_us {
            Some(last) if now_us > last => {
                let elapsed_sec = (now_us - last) as f64 / 1_000_000.0;
                1.0 / elapsed_sec
            }
            _ => target_fps,
        };
        let elapsed_sec = match self.last_frame_time_us {
            Some(last) if now_us > last => (now_us - last) as f64 / 1_000_000.0,
            _ => if target_fps > 0.0 { 1.0 / target_fps } else { 1.0 },
        };
        let bandwidth_mbs = (bytes_sent as f64 / elapsed_sec) / (1024.0 * 1024.0);
        let dirty_fraction = if total_pixels > 0 { dirty_pixels as f64 / total_pixels as f64 } else { 0.0 };

        self.last_frame_time_us = Some(now_us);
        self.last_encoding_time_us = encoding_time_us;

        self.window[self.window_index] = Sample { fps: frame_fps, bandwidth_mbs, dirty_fraction };
        self.window_index = (self.window_index + 1) % self.window.len();

        if dirty_fraction > DIRTY_REGION_HIGH_THRESHOLD {
            self.high_change += 1;
            self.low_change = 0;
        } else if dirty_fraction < DIRTY_REGION_LOW_THRESHOLD {
            self.low_change += 1;
            self.high_change = 0;
        } else {
            self.high_change = 0;
            self.low_change = 0;
        }

        if target_fps > 0.0 {
            let fps_ratio = frame_fps / target_fps;
            if fps_ratio < FPS_LOW_THRESHOLD {
                self.low_fps += 1;
                self.good_fps = 0;
            } else if fps_ratio >= FPS_GOOD_THRESHOLD {
                self.good_fps += 1;
                self.low_fps = 0;
            } else {
                self.low_fps = 0;
                self.good_fps = 0;
            }
        }
    }

    fn rolling_mean(&self, pick: impl Fn(&Sample) -> f64) -> f64 {
        let (sum, count) = self
            .window
            .iter()
            .filter(|s| s.fps > 0.0)
            .fold((0.0, 0u32), |(sum, count), s| (sum + pick(s), count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    pub fn rolling_fps(&self) -> f64 {
        self.rolling_mean(|s| s.fps)
    }

    pub fn rolling_bandwidth_mbs(&self) -> f64 {
        self.rolling_mean(|s| s.bandwidth_mbs)
    }

    pub fn rolling_dirty_fraction(&self) -> f64 {
        self.rolling_mean(|s| s.dirty_fraction)
    }

    fn should_switch_to_h264(&self) -> bool {
        self.high_change >= SWITCH_TO_H264_HIGH_CHANGE
            || self.low_fps >= SWITCH_TO_H264_LOW_FPS
            || self.rolling_bandwidth_mbs() > BANDWIDTH_HIGH_THRESHOLD_MBS
            || self.rolling_dirty_fraction() > DIRTY_REGION_H264_FORCE_THRESHOLD
    }

    fn should_switch_to_dirty_rects(&self, target_fps: f64) -> bool {
        let fps_ok = if target_fps > 0.0 { self.rolling_fps() / target_fps >= FPS_GOOD_THRESHOLD } else { true };
        self.low_change >= SWITCH_TO_DIRTY_RECTS_LOW_CHANGE
            && fps_ok
            && self.rolling_bandwidth_mbs() <= BANDWIDTH_LOW_THRESHOLD_MBS
            && self.last_encoding_time_us <= ENCODING_TIME_LOW_THRESHOLD_US
    }

    fn reset_run_counters(&mut self) {
        self.high_change = 0;
        self.low_change = 0;
        self.low_fps = 0;
        self.good_fps = 0;
    }

    /// Evaluates the mode transitions of §4.6 and applies one if its
    /// condition holds, resetting the run counters. Returns the new mode.
    pub fn maybe_transition(&mut self, codec_available: bool, target_fps: f64) -> EncodingMode {
        let next = match self.mode {
            EncodingMode::DirtyRects if self.should_switch_to_h264() => {
                Some(if codec_available { EncodingMode::H264 } else { EncodingMode::FullFrame })
            }
            EncodingMode::H264 if self.should_switch_to_dirty_rects(target_fps) => Some(EncodingMode::DirtyRects),
            EncodingMode::FullFrame if self.should_switch_to_dirty_rects(target_fps) => Some(EncodingMode::DirtyRects),
            _ => None,
        };

        if let Some(mode) = next {
            self.mode = mode;
            self.reset_run_counters();
        }
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_INTERVAL_US: u64 = 1_000_000 / 30;

    #[test]
    fn default_window_size_applied_when_zero() {
        let m = Metrics::new(0);
        assert_eq!(m.window.len(), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn default_initial_mode_is_dirty_rects() {
        assert_eq!(Metrics::new(60).mode(), EncodingMode::DirtyRects);
    }

    /// Scenario 4 of `spec.md` §8: mode oscillation hysteresis.
    #[test]
    fn high_change_run_of_five_switches_to_h264() {
        let mut m = Metrics::new(60);
        let total_pixels = 1_000_000u64;
        let mut now = 0u64;
        for _ in 0..5 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, (30.0 * 1024.0 * 1024.0 / 30.0) as u64, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(true, 30.0);
        }
        assert_eq!(m.mode(), EncodingMode::H264);
    }

    #[test]
    fn low_change_run_of_ten_switches_back_to_dirty_rects() {
        let mut m = Metrics::new(60);
        let total_pixels = 1_000_000u64;
        let mut now = 0u64;

        for _ in 0..5 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, (30.0 * 1024.0 * 1024.0 / 30.0) as u64, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(true, 30.0);
        }
        assert_eq!(m.mode(), EncodingMode::H264);

        for i in 0..10 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, (10.0 * 1024.0 * 1024.0 / 30.0) as u64, (0.05 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(true, 30.0);
            if i < 9 {
                assert_eq!(m.mode(), EncodingMode::H264, "must not flip back before the 10th sample");
            }
        }
        assert_eq!(m.mode(), EncodingMode::DirtyRects);
    }

    #[test]
    fn one_extra_high_change_sample_after_transition_does_not_flip_back() {
        let mut m = Metrics::new(60);
        let total_pixels = 1_000_000u64;
        let mut now = 0u64;
        for _ in 0..5 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, 1_000, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(true, 30.0);
        }
        assert_eq!(m.mode(), EncodingMode::H264);

        now += FRAME_INTERVAL_US;
        m.record_frame(now, 1_000, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
        let mode = m.maybe_transition(true, 30.0);
        assert_eq!(mode, EncodingMode::H264, "a single post-transition sample must not immediately re-fire");
    }

    #[test]
    fn transition_resets_run_counters() {
        let mut m = Metrics::new(60);
        let total_pixels = 1_000_000u64;
        let mut now = 0u64;
        for _ in 0..5 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, 1_000, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(true, 30.0);
        }
        assert_eq!(m.high_change, 0);
        assert_eq!(m.low_change, 0);
    }

    #[test]
    fn encoder_unavailable_demotes_to_full_frame_instead_of_h264() {
        let mut m = Metrics::new(60);
        let total_pixels = 1_000_000u64;
        let mut now = 0u64;
        for _ in 0..5 {
            now += FRAME_INTERVAL_US;
            m.record_frame(now, 1_000, (0.8 * total_pixels as f64) as u64, total_pixels, 5_000, 30.0);
            m.maybe_transition(false, 30.0);
        }
        assert_eq!(m.mode(), EncodingMode::FullFrame);
    }
}
