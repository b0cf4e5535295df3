//! Streamer-side process entry point (`spec.md` §6.3): argument parsing,
//! logging setup, and graceful `SIGINT`/`SIGTERM` shutdown wired to
//! `linkcast_session`'s `stop()` handle.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use linkcast_capture::PipewireDisplayHost;
use linkcast_core::config::CryptoPreference;
use linkcast_core::usb::is_usb_tether_address;
use linkcast_core::SessionConfig;
use linkcast_discovery::DiscoveredReceiver;
use linkcast_session::{establish_transport, run_session, SessionShared};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mirror a Linux display to a discovered or directly-addressed receiver.
#[derive(Parser, Debug)]
#[command(name = "linkcast-sender", version)]
struct Args {
    /// `HOST[:PORT]`; when given, skips broadcast discovery (§6.2/§6.3).
    host: Option<String>,

    /// TCP port to use when `HOST` has no `:PORT` suffix, or for discovery fallback.
    #[arg(long, default_value_t = 4321)]
    port: u16,

    /// Discovery listen window, in milliseconds.
    #[arg(long = "broadcast-timeout", default_value_t = 5000)]
    broadcast_timeout_ms: u64,

    /// Force an encrypted session.
    #[arg(long, conflicts_with = "nocrypt")]
    crypt: bool,

    /// Force a plaintext session.
    #[arg(long)]
    nocrypt: bool,

    /// PIN (0..=9999) to present during PIN_VERIFY; prompted on stdin if required and absent.
    #[arg(long)]
    pin: Option<u16>,

    /// Raise the default log level; repeat for more detail (`-vv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn crypto_preference(&self) -> CryptoPreference {
        if self.crypt {
            CryptoPreference::Force
        } else if self.nocrypt {
            CryptoPreference::Forbid
        } else {
            CryptoPreference::Auto
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("linkcast-sender v{}", env!("CARGO_PKG_VERSION"));

    if let Some(pin) = args.pin {
        if pin > 9999 {
            bail!("--pin must be in 0..=9999, got {}", pin);
        }
    }

    let (host, port_override) = match args.host.as_deref() {
        Some(spec) => {
            let (host, port) = SessionConfig::parse_host_port(spec);
            (Some(host), port)
        }
        None => (None, None),
    };

    let config = SessionConfig {
        host,
        port: port_override.unwrap_or(args.port),
        broadcast_timeout: Duration::from_millis(args.broadcast_timeout_ms),
        crypto: args.crypto_preference(),
        pin: args.pin,
        ..SessionConfig::default()
    };

    let (stream, addr, _port) = establish_transport(&config, prompt_for_receiver)
        .await
        .context("resolving and connecting to the receiver")?;
    let is_usb_tether = is_usb_tether_address(addr);

    let host: Box<dyn linkcast_capture::DisplayHost> = Box::new(PipewireDisplayHost::new());
    let shared = SessionShared::new();
    let stop_handle = shared.stop_handle();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown requested, stopping session");
        stop_handle.stop();
    });

    run_session(stream, is_usb_tether, &config, host, None, shared, prompt_for_pin, now_us)
        .await
        .context("session terminated with an error")?;

    info!("session ended cleanly");
    Ok(())
}

/// Picks the first discovered receiver without prompting when there's only
/// one candidate, otherwise the first of several (§4.3 step 4's "UI/CLI
/// asks the user to choose" is out of scope for a non-interactive binary;
/// prefer the first result deterministically).
fn prompt_for_receiver(receivers: &[DiscoveredReceiver]) -> usize {
    if receivers.len() > 1 {
        info!("multiple receivers found, selecting the first: {}", receivers[0].name);
    }
    0
}

fn prompt_for_pin() -> u16 {
    use std::io::Write;
    print!("Enter receiver PIN (0-9999): ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return 0;
    }
    line.trim().parse().unwrap_or(0)
}

/// Monotonic microseconds since process start, immune to NTP adjustment
/// or wall-clock jumps (`spec.md` §4.7: `FRAME.timestamp_us` is "the
/// capture timestamp (monotonic microseconds)").
fn now_us() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(std::time::Instant::now);
    start.elapsed().as_micros() as u64
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
