use serde::{Deserialize, Serialize};

// MARK: - Resolution / DisplayMode

/// A pixel resolution advertised or requested for a display output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const FHD: Self = Self { width: 1920, height: 1080 };
    pub const QHD: Self = Self { width: 2560, height: 1440 };
    pub const UHD: Self = Self { width: 3840, height: 2160 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One entry of a receiver's advertised `HELLO` mode list (`spec.md` §6.1).
///
/// `refresh_centihz` is hundredths of a hertz, e.g. 59.94 Hz = 5994.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_centihz: u32,
}

impl DisplayMode {
    pub fn refresh_hz(&self) -> f64 {
        self.refresh_centihz as f64 / 100.0
    }
}

// MARK: - OutputId

/// Opaque identifier for a `DisplayHost`-owned virtual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(pub u32);

// MARK: - ReceiverCapabilities

/// Immutable-after-handshake capability set announced by the receiver in
/// its `HELLO` message (`spec.md` §3, §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverCapabilities {
    pub display_name: String,
    pub modes: Vec<DisplayMode>,
}

impl ReceiverCapabilities {
    /// The first advertised mode is "preferred" per `spec.md` §3.
    pub fn preferred_mode(&self) -> Option<DisplayMode> {
        self.modes.first().copied()
    }
}

// MARK: - EncodingMode

/// The three encoding modes of the mode-selector state machine (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingMode {
    FullFrame = 0,
    DirtyRects = 1,
    H264 = 2,
}

impl EncodingMode {
    pub fn as_wire_code(self) -> u8 {
        self as u8
    }
}

// MARK: - PixelFormat

/// Pixel layout of a framebuffer snapshot handed back by the display host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32 bits per pixel, byte order A,R,G,B.
    Argb32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Argb32 => 4,
        }
    }
}

// MARK: - FramebufferSnapshot

/// A transient per-tick view of one output's pixels (`spec.md` §3).
///
/// Lifetime is exactly one frame-pipeline iteration; never retained
/// across ticks.
pub struct FramebufferSnapshot<'a> {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub format: PixelFormat,
    pub bytes: &'a [u8],
}

impl<'a> FramebufferSnapshot<'a> {
    pub fn bytes_per_pixel(&self) -> u32 {
        self.format.bytes_per_pixel()
    }
}

// MARK: - SessionState

/// Session-controller state machine (`spec.md` §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Resolving,
    Connecting,
    Hello,
    Handshaking,
    Auth,
    CapExchange,
    Streaming,
    Teardown,
    Failed(String),
}

// MARK: - CryptoChoice

/// Result of the crypto/PIN decision in `spec.md` §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoChoice {
    pub encrypt: bool,
    pub require_pin: bool,
}

// MARK: - AudioChunk

/// One drained buffer of PCM audio ready to frame as an `AUDIO` message.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub timestamp_us: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 0 = signed 16-bit little-endian interleaved, 1 = signed 32-bit LE.
    pub format_tag: u16,
    pub pcm: bytes::Bytes,
}
