//! Message catalogue (`spec.md` §6.1), cross-checked against
//! `original_source/x11-streamer/include/protocol.h`.

use linkcast_core::{DisplayMode, EncodingMode};

use crate::errors::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    Frame,
    Audio,
    Config,
    Ping,
    Pong,
    Pause,
    Resume,
    DiscoveryRequest,
    DiscoveryResponse,
    PinVerify,
    PinVerified,
    ClientHello,
    Error,
}

impl From<MessageType> for u8 {
    fn from(m: MessageType) -> u8 {
        match m {
            MessageType::Hello => 0x01,
            MessageType::Frame => 0x02,
            MessageType::Audio => 0x03,
            MessageType::Config => 0x05,
            MessageType::Ping => 0x06,
            MessageType::Pong => 0x07,
            MessageType::Pause => 0x08,
            MessageType::Resume => 0x09,
            MessageType::DiscoveryRequest => 0x10,
            MessageType::DiscoveryResponse => 0x11,
            MessageType::PinVerify => 0x12,
            MessageType::PinVerified => 0x13,
            MessageType::ClientHello => 0x14,
            MessageType::Error => 0xFF,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(code: u8) -> Result<Self, WireError> {
        Ok(match code {
            0x01 => Self::Hello,
            0x02 => Self::Frame,
            0x03 => Self::Audio,
            0x05 => Self::Config,
            0x06 => Self::Ping,
            0x07 => Self::Pong,
            0x08 => Self::Pause,
            0x09 => Self::Resume,
            0x10 => Self::DiscoveryRequest,
            0x11 => Self::DiscoveryResponse,
            0x12 => Self::PinVerify,
            0x13 => Self::PinVerified,
            0x14 => Self::ClientHello,
            0xFF => Self::Error,
            other => return Err(WireError::Malformed { reason: format!("unknown message type 0x{other:02x}") }),
        })
    }
}

/// Splits a 64-bit microsecond timestamp into big-endian (high, low) u32
/// halves, per `spec.md` §6.1 and §9 "Byte-order drift".
pub fn split_timestamp(ts_us: u64) -> (u32, u32) {
    ((ts_us >> 32) as u32, ts_us as u32)
}

pub fn join_timestamp(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

// ── HELLO ────────────────────────────────────────────────────────────────

/// `{u16 protocol_version, u16 num_modes, u16 name_len}` + name + modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloBody {
    pub protocol_version: u16,
    pub name: String,
    pub modes: Vec<DisplayMode>,
}

pub const PROTOCOL_VERSION: u16 = 1;

impl HelloBody {
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 6 {
            return Err(WireError::Malformed { reason: "HELLO shorter than fixed header".into() });
        }
        let protocol_version = u16::from_be_bytes([buf[0], buf[1]]);
        let num_modes = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let name_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;

        if num_modes == 0 {
            return Err(WireError::Malformed { reason: "HELLO num_modes == 0".into() });
        }

        let name_start = 6;
        let name_end = name_start + name_len;
        if buf.len() < name_end {
            return Err(WireError::Malformed { reason: "HELLO name truncated".into() });
        }
        // Sender may include a trailing NUL; tolerate either (§6.1).
        let raw_name = &buf[name_start..name_end];
        let trimmed = match raw_name.iter().position(|&b| b == 0) {
            Some(nul) => &raw_name[..nul],
            None => raw_name,
        };
        let name = String::from_utf8(trimmed.to_vec())
            .map_err(|_| WireError::Malformed { reason: "HELLO name not valid UTF-8".into() })?;

        let modes_start = name_end;
        let needed = modes_start + num_modes * 12;
        if buf.len() < needed {
            return Err(WireError::Malformed { reason: "HELLO modes truncated".into() });
        }

        let mut modes = Vec::with_capacity(num_modes);
        for i in 0..num_modes {
            let off = modes_start + i * 12;
            let width = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
            let height = u32::from_be_bytes(buf[off + 4..off + 8].try_into().unwrap());
            let refresh_centihz = u32::from_be_bytes(buf[off + 8..off + 12].try_into().unwrap());
            modes.push(DisplayMode { width, height, refresh_centihz });
        }

        Ok(Self { protocol_version, name, modes })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + self.name.len() + self.modes.len() * 12);
        buf.extend_from_slice(&self.protocol_version.to_be_bytes());
        buf.extend_from_slice(&(self.modes.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.name.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        for mode in &self.modes {
            buf.extend_from_slice(&mode.width.to_be_bytes());
            buf.extend_from_slice(&mode.height.to_be_bytes());
            buf.extend_from_slice(&mode.refresh_centihz.to_be_bytes());
        }
        buf
    }
}

// ── FRAME header ─────────────────────────────────────────────────────────

/// `{u64 timestamp_us, u32 output_id, u32 width, u32 height, u32 format,
///   u32 pitch, u32 size, u8 encoding_mode, u8 num_regions}` (§6.1, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBodyHeader {
    pub timestamp_us: u64,
    pub output_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub pitch: u32,
    pub size: u32,
    pub encoding_mode: EncodingMode,
    pub num_regions: u8,
}

pub const FRAME_HEADER_SIZE: usize = 8 + 4 * 6 + 1 + 1;

impl FrameBodyHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE);
        let (hi, lo) = split_timestamp(self.timestamp_us);
        buf.extend_from_slice(&hi.to_be_bytes());
        buf.extend_from_slice(&lo.to_be_bytes());
        buf.extend_from_slice(&self.output_id.to_be_bytes());
        buf.extend_from_slice(&self.width.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.format.to_be_bytes());
        buf.extend_from_slice(&self.pitch.to_be_bytes());
        buf.extend_from_slice(&self.size.to_be_bytes());
        buf.push(self.encoding_mode.as_wire_code());
        buf.push(self.num_regions);
        buf
    }
}

/// Per-rectangle header for `DIRTY_RECTS` bodies (§4.7):
/// `{u32 x, u32 y, u32 width, u32 height, u32 data_size}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRectHeader {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data_size: u32,
}

pub const DIRTY_RECT_HEADER_SIZE: usize = 20;

impl DirtyRectHeader {
    pub fn encode(&self) -> [u8; DIRTY_RECT_HEADER_SIZE] {
        let mut buf = [0u8; DIRTY_RECT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.x.to_be_bytes());
        buf[4..8].copy_from_slice(&self.y.to_be_bytes());
        buf[8..12].copy_from_slice(&self.width.to_be_bytes());
        buf[12..16].copy_from_slice(&self.height.to_be_bytes());
        buf[16..20].copy_from_slice(&self.data_size.to_be_bytes());
        buf
    }
}

// ── AUDIO header ─────────────────────────────────────────────────────────

/// `{u64 timestamp_us, u32 sample_rate, u16 channels, u16 format_tag, u32 data_size}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub timestamp_us: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub format_tag: u16,
    pub data_size: u32,
}

impl AudioHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        let (hi, lo) = split_timestamp(self.timestamp_us);
        buf.extend_from_slice(&hi.to_be_bytes());
        buf.extend_from_slice(&lo.to_be_bytes());
        buf.extend_from_slice(&self.sample_rate.to_be_bytes());
        buf.extend_from_slice(&self.channels.to_be_bytes());
        buf.extend_from_slice(&self.format_tag.to_be_bytes());
        buf.extend_from_slice(&self.data_size.to_be_bytes());
        buf
    }
}

// ── CONFIG ───────────────────────────────────────────────────────────────

/// `{u32 output_id, u32 width, u32 height, u32 refresh_rate_hz}`.
/// `width=0, height=0` signals "output disconnected".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigBody {
    pub output_id: u32,
    pub width: u32,
    pub height: u32,
    pub refresh_rate_hz: u32,
}

impl ConfigBody {
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.output_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.width.to_be_bytes());
        buf[8..12].copy_from_slice(&self.height.to_be_bytes());
        buf[12..16].copy_from_slice(&self.refresh_rate_hz.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != 16 {
            return Err(WireError::Malformed { reason: "CONFIG must be 16 bytes".into() });
        }
        Ok(Self {
            output_id: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            width: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            height: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            refresh_rate_hz: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

// ── DISCOVERY_RESPONSE ───────────────────────────────────────────────────

/// `{u16 tcp_port, u16 name_len, name[]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponseBody {
    pub tcp_port: u16,
    pub name: String,
}

impl DiscoveryResponseBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.name.len());
        buf.extend_from_slice(&self.tcp_port.to_be_bytes());
        buf.extend_from_slice(&(self.name.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf
    }

    /// Returns `None` (ignored silently) if `buf` is shorter than its own
    /// declared `name_len` (§8 boundary behavior).
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let tcp_port = u16::from_be_bytes([buf[0], buf[1]]);
        let name_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let name_bytes = buf.get(4..4 + name_len)?;
        let name = String::from_utf8(name_bytes.to_vec()).ok()?;
        Some(Self { tcp_port, name })
    }
}

// ── PIN_VERIFY / CLIENT_HELLO ────────────────────────────────────────────

pub fn encode_pin_verify(pin: u16) -> [u8; 2] {
    pin.to_be_bytes()
}

pub fn decode_pin_verify(buf: &[u8]) -> Result<u16, WireError> {
    if buf.len() != 2 {
        return Err(WireError::Malformed { reason: "PIN_VERIFY must be 2 bytes".into() });
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Sentinel meaning "PIN unspecified" in `CLIENT_HELLO` (§4.8).
pub const PIN_UNSPECIFIED: u16 = 0xFFFF;
pub const CLIENT_HELLO_FLAG_ENCRYPT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHelloBody {
    pub version: u8,
    pub encrypt_requested: bool,
    pub pin: Option<u16>,
}

impl ClientHelloBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4);
        buf.push(self.version);
        buf.push(if self.encrypt_requested { CLIENT_HELLO_FLAG_ENCRYPT } else { 0 });
        if let Some(pin) = self.pin {
            buf.extend_from_slice(&pin.to_be_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < 2 {
            return Err(WireError::Malformed { reason: "CLIENT_HELLO shorter than 2 bytes".into() });
        }
        let version = buf[0];
        let encrypt_requested = buf[1] & CLIENT_HELLO_FLAG_ENCRYPT != 0;
        let pin = if buf.len() >= 4 {
            let raw = u16::from_be_bytes([buf[2], buf[3]]);
            if raw == PIN_UNSPECIFIED { None } else { Some(raw) }
        } else {
            None
        };
        Ok(Self { version, encrypt_requested, pin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_codes_match_spec_table() {
        assert_eq!(u8::from(MessageType::Hello), 0x01);
        assert_eq!(u8::from(MessageType::Frame), 0x02);
        assert_eq!(u8::from(MessageType::Audio), 0x03);
        assert_eq!(u8::from(MessageType::Config), 0x05);
        assert_eq!(u8::from(MessageType::Ping), 0x06);
        assert_eq!(u8::from(MessageType::Pong), 0x07);
        assert_eq!(u8::from(MessageType::DiscoveryRequest), 0x10);
        assert_eq!(u8::from(MessageType::DiscoveryResponse), 0x11);
        assert_eq!(u8::from(MessageType::ClientHello), 0x14);
        assert_eq!(u8::from(MessageType::Error), 0xFF);
    }

    /// Scenario 2 of `spec.md` §8: framed HELLO parse.
    #[test]
    fn decodes_concrete_hello_payload() {
        let payload = [
            0x00, 0x01, 0x00, 0x02, 0x00, 0x04, 0x54, 0x56, 0x30, 0x31, 0x00, 0x00, 0x05, 0x00,
            0x00, 0x00, 0x02, 0xD0, 0x00, 0x00, 0x17, 0x70, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x02, 0x58, 0x00, 0x00, 0x17, 0x70,
        ];
        let hello = HelloBody::decode(&payload).unwrap();
        assert_eq!(hello.protocol_version, 1);
        assert_eq!(hello.name, "TV01");
        assert_eq!(
            hello.modes,
            vec![
                DisplayMode { width: 1280, height: 720, refresh_centihz: 6000 },
                DisplayMode { width: 1024, height: 600, refresh_centihz: 6000 },
            ]
        );
    }

    #[test]
    fn hello_num_modes_zero_is_malformed() {
        let payload = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(HelloBody::decode(&payload).is_err());
    }

    #[test]
    fn discovery_response_truncated_is_ignored() {
        let mut buf = DiscoveryResponseBody { tcp_port: 4321, name: "Living".into() }.encode();
        buf.truncate(buf.len() - 2);
        assert!(DiscoveryResponseBody::decode(&buf).is_none());
    }

    #[test]
    fn timestamp_splits_and_joins() {
        let ts = 0x0001_0203_0405_0607u64;
        let (hi, lo) = split_timestamp(ts);
        assert_eq!(join_timestamp(hi, lo), ts);
    }

    #[test]
    fn pin_verify_roundtrip() {
        // 4242 decimal is 0x1092, not the `10 8A` example in `spec.md` §8
        // scenario 6 (that literal is 0x108A = 4234, a typo in the spec's
        // worked example); the encoding itself — big-endian u16 — is
        // unambiguous and is what's asserted here.
        assert_eq!(encode_pin_verify(4242), [0x10, 0x92]);
        assert_eq!(decode_pin_verify(&[0x10, 0x92]).unwrap(), 4242);
    }
}
