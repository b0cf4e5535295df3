//! UDP broadcast rendezvous (`spec.md` §4.3). Used only when the operator
//! supplies no explicit host.

pub mod errors;

pub use errors::DiscoveryError;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use linkcast_wire::{FrameHeader, MessageType, HEADER_SIZE};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// UDP port receivers listen on for discovery (`spec.md` §6.2).
pub const DISCOVERY_PORT: u16 = 4321;

#[derive(Debug, Clone)]
pub struct DiscoveredReceiver {
    pub addr: Ipv4Addr,
    pub tcp_port: u16,
    pub name: String,
}

/// Broadcasts a `DISCOVERY_REQUEST` on every non-loopback IPv4 interface and
/// collects `DISCOVERY_RESPONSE`s until `timeout` elapses.
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredReceiver>, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let request = FrameHeader { msg_type: MessageType::DiscoveryRequest.into(), length: 0, sequence: 0 }.encode();

    let mut sent = 0u32;
    for iface in if_addrs::get_if_addrs()?.into_iter().filter(|i| !i.is_loopback()) {
        let if_addrs::IfAddr::V4(v4) = &iface.addr else { continue };
        let broadcast = directed_broadcast(v4.ip, v4.netmask);
        let dest = SocketAddrV4::new(broadcast, DISCOVERY_PORT);
        match socket.send_to(&request, dest).await {
            Ok(_) => {
                debug!("sent DISCOVERY_REQUEST via {} to {}", iface.name, dest);
                sent += 1;
            }
            Err(e) => warn!("discovery send on {} failed: {}", iface.name, e),
        }
    }
    if sent == 0 {
        warn!("no usable IPv4 interface found for discovery broadcast");
    }

    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 2048];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (n, from) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!("discovery recv error: {}", e);
                continue;
            }
            Err(_) => break,
        };

        let Some(receiver) = decode_response(&buf[..n]) else {
            continue;
        };
        let std::net::SocketAddr::V4(from) = from else { continue };
        if found.iter().any(|r: &DiscoveredReceiver| r.addr == *from.ip()) {
            continue;
        }
        info!("discovered receiver {} at {}", receiver.name, from.ip());
        found.push(DiscoveredReceiver { addr: *from.ip(), tcp_port: receiver.tcp_port, name: receiver.name });
    }

    Ok(found)
}

fn decode_response(datagram: &[u8]) -> Option<DiscoveredReceiver> {
    if datagram.len() < HEADER_SIZE {
        return None;
    }
    let mut header_buf = [0u8; HEADER_SIZE];
    header_buf.copy_from_slice(&datagram[..HEADER_SIZE]);
    let header = FrameHeader::decode(&header_buf);
    if header.msg_type != u8::from(MessageType::DiscoveryResponse) {
        return None;
    }
    let payload = &datagram[HEADER_SIZE..];
    if payload.len() < header.length as usize {
        return None;
    }
    let body = linkcast_wire::DiscoveryResponseBody::decode(&payload[..header.length as usize])?;
    Some(DiscoveredReceiver { addr: Ipv4Addr::UNSPECIFIED, tcp_port: body.tcp_port, name: body.name })
}

/// Auto-selects the sole candidate, or defers to `prompt` (a 1-indexed
/// numbered list over stdin in the CLI) when several responded (`spec.md`
/// §4.3 step 4). Fails with [`DiscoveryError::NoReceiver`] on an empty list
/// or an out-of-range selection.
pub fn select<F: FnOnce(&[DiscoveredReceiver]) -> usize>(
    mut receivers: Vec<DiscoveredReceiver>,
    prompt: F,
) -> Result<DiscoveredReceiver, DiscoveryError> {
    match receivers.len() {
        0 => Err(DiscoveryError::NoReceiver),
        1 => Ok(receivers.remove(0)),
        _ => {
            let idx = prompt(&receivers);
            if idx < receivers.len() {
                Ok(receivers.remove(idx))
            } else {
                Err(DiscoveryError::NoReceiver)
            }
        }
    }
}

/// `addr & mask | ~mask` (`spec.md` §4.3), falling back to the limited
/// broadcast address if no usable mask is available.
fn directed_broadcast(addr: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    let mask_bits = u32::from(mask);
    if mask_bits == 0 {
        return Ipv4Addr::new(255, 255, 255, 255);
    }
    let addr_bits = u32::from(addr);
    Ipv4Addr::from(addr_bits & mask_bits | !mask_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directed_broadcast_matches_class_c_subnet() {
        let addr = Ipv4Addr::new(192, 168, 7, 42);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert_eq!(directed_broadcast(addr, mask), Ipv4Addr::new(192, 168, 7, 255));
    }

    #[test]
    fn zero_mask_falls_back_to_limited_broadcast() {
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(directed_broadcast(addr, Ipv4Addr::UNSPECIFIED), Ipv4Addr::new(255, 255, 255, 255));
    }

    /// Scenario 5 of `spec.md` §8: single responder, exact address decode.
    #[test]
    fn decodes_concrete_discovery_response_datagram() {
        let body = linkcast_wire::DiscoveryResponseBody { tcp_port: 4321, name: "Living".into() }.encode();
        let header = FrameHeader {
            msg_type: MessageType::DiscoveryResponse.into(),
            length: body.len() as u32,
            sequence: 0,
        };
        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(&body);

        let decoded = decode_response(&datagram).unwrap();
        assert_eq!(decoded.tcp_port, 4321);
        assert_eq!(decoded.name, "Living");
    }

    #[test]
    fn non_discovery_response_message_is_ignored() {
        let header = FrameHeader { msg_type: MessageType::Ping.into(), length: 0, sequence: 0 };
        assert!(decode_response(&header.encode()).is_none());
    }

    fn fake(name: &str) -> DiscoveredReceiver {
        DiscoveredReceiver { addr: Ipv4Addr::new(192, 168, 7, 5), tcp_port: 4321, name: name.into() }
    }

    #[test]
    fn single_responder_auto_selects_without_prompting() {
        let result = select(vec![fake("Living")], |_| panic!("must not prompt for a single candidate"));
        assert_eq!(result.unwrap().name, "Living");
    }

    #[test]
    fn empty_candidate_list_fails_with_no_receiver() {
        let result = select(Vec::new(), |_| 0);
        assert!(matches!(result, Err(DiscoveryError::NoReceiver)));
    }

    #[test]
    fn multiple_responders_defer_to_prompt() {
        let result = select(vec![fake("Living"), fake("Bedroom")], |list| {
            list.iter().position(|r| r.name == "Bedroom").unwrap()
        });
        assert_eq!(result.unwrap().name, "Bedroom");
    }
}
