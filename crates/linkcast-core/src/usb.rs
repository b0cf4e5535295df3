//! USB-tethering interface detection.
//!
//! Used by the session controller's crypto/PIN decision (`spec.md` §4.8):
//! when the chosen endpoint's address matches a detected USB gadget
//! interface, the session uses plaintext and no PIN.

use std::net::Ipv4Addr;

use tracing::debug;

/// Well-known subnet for tethered USB gadget connections.
pub const USB_GADGET_SUBNET: &str = "10.0.1";

/// Detected USB Ethernet (CDC-NCM) interface information.
#[derive(Debug, Clone)]
pub struct UsbTetherInfo {
    pub interface_name: String,
    pub local_ip: Ipv4Addr,
}

/// Scan `/sys/class/net` for an up CDC-NCM-style interface on the gadget
/// subnet. Returns `None` if no USB tether is detected.
pub fn detect_usb_tether() -> Option<UsbTetherInfo> {
    let net_dir = std::path::Path::new("/sys/class/net");
    if !net_dir.exists() {
        return None;
    }

    for entry in std::fs::read_dir(net_dir).ok()? {
        let entry = entry.ok()?;
        let name = entry.file_name().into_string().ok()?;

        if name == "lo" || name.starts_with("wl") || name.starts_with("docker") {
            continue;
        }

        if name.starts_with("usb") || name.starts_with("enx") {
            if let Some(ip) = interface_ipv4(&name) {
                if ip.to_string().starts_with(USB_GADGET_SUBNET) {
                    debug!("detected USB tether interface {} -> {}", name, ip);
                    return Some(UsbTetherInfo { interface_name: name, local_ip: ip });
                }
            }
        }
    }

    None
}

/// Does `addr` belong to the currently-detected USB tether interface?
pub fn is_usb_tether_address(addr: Ipv4Addr) -> bool {
    match detect_usb_tether() {
        Some(info) => info.local_ip == addr || addr.to_string().starts_with(USB_GADGET_SUBNET),
        None => false,
    }
}

fn interface_ipv4(iface: &str) -> Option<Ipv4Addr> {
    let operstate_path = format!("/sys/class/net/{iface}/operstate");
    let operstate = std::fs::read_to_string(&operstate_path).ok()?;
    if operstate.trim() != "up" {
        return None;
    }

    let output = std::process::Command::new("ip")
        .args(["-4", "-o", "addr", "show", iface])
        .output()
        .ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for word in stdout.split_whitespace() {
        if word.contains('.') && word.contains('/') {
            let ip_str = word.split('/').next()?;
            return ip_str.parse().ok();
        }
    }

    None
}
