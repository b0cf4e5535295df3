use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Forced crypto choice from the CLI (`spec.md` §6.3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptoPreference {
    /// Decide automatically (USB-tether endpoint → plaintext+no PIN, else encrypt+PIN).
    Auto,
    /// `--crypt`: force encryption.
    Force,
    /// `--nocrypt`: force plaintext.
    Forbid,
}

/// Runtime configuration for one streamer session, built from CLI flags.
///
/// Mirrors the field-per-flag, `#[serde(default)]` shape of
/// `duallink-core`'s `StreamConfig`, generalized to the fields
/// `spec.md` §6.3 lists for the streamer CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `None` triggers UDP broadcast discovery (§4.3).
    pub host: Option<String>,
    pub port: u16,
    pub broadcast_timeout: Duration,
    pub crypto: CryptoPreference,
    /// `0..=9999`, `None` means unspecified (prompt on stdin if required).
    pub pin: Option<u16>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub hello_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 4321,
            broadcast_timeout: Duration::from_secs(5),
            crypto: CryptoPreference::Auto,
            pin: None,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            hello_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// `HOST[:PORT]` disables broadcast discovery when present (§6.2/§6.3).
    pub fn parse_host_port(spec: &str) -> (String, Option<u16>) {
        if let Some((host, port)) = spec.rsplit_once(':') {
            if let Ok(p) = port.parse::<u16>() {
                return (host.to_owned(), Some(p));
            }
        }
        (spec.to_owned(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_default_json() {
        let json = r#"{"port": 4321}"#;
        let cfg: SessionConfig = serde_json::from_str(json).expect("valid config");
        assert_eq!(cfg.port, 4321);
        assert_eq!(cfg.crypto, CryptoPreference::Auto);
        assert!(cfg.host.is_none());
    }

    #[test]
    fn parses_host_without_port() {
        let (host, port) = SessionConfig::parse_host_port("192.168.1.10");
        assert_eq!(host, "192.168.1.10");
        assert_eq!(port, None);
    }

    #[test]
    fn parses_host_with_port() {
        let (host, port) = SessionConfig::parse_host_port("tv.local:5555");
        assert_eq!(host, "tv.local");
        assert_eq!(port, Some(5555));
    }
}
