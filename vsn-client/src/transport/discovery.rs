//! Server discovery by UDP broadcast.
//!
//! The server periodically broadcasts its own IPv4 address as text to the
//! discovery port. A node takes the first announcement whose payload
//! matches the address it was actually sent from.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{TransportError, TransportResult};

/// Longest dotted-quad text, `255.255.255.255`
pub const ANNOUNCEMENT_MAX_LEN: usize = 15;

/// Accept `payload` only if it names the sender.
pub fn parse_announcement(payload: &[u8], sender: SocketAddr) -> Option<IpAddr> {
    let text = std::str::from_utf8(payload).ok()?;
    let announced: IpAddr = text.trim_end_matches('\0').parse().ok()?;
    (announced == sender.ip()).then_some(announced)
}

/// Wait for the server to announce itself on `port`.
pub async fn discover_server(port: u16) -> TransportResult<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .await
        .map_err(|source| TransportError::Discovery { port, source })?;
    info!("Waiting for server announcement on UDP port {port}");

    let mut buf = [0u8; ANNOUNCEMENT_MAX_LEN];
    loop {
        let (len, sender) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|source| TransportError::Discovery { port, source })?;
        match parse_announcement(&buf[..len], sender) {
            Some(address) => {
                info!("Discovered server at {address}");
                return Ok(address);
            }
            None => debug!("Ignoring announcement from {sender}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 40000)
    }

    #[test]
    fn test_matching_announcement() {
        assert_eq!(
            parse_announcement(b"192.168.1.10", sender("192.168.1.10")),
            Some("192.168.1.10".parse().unwrap())
        );
    }

    #[test]
    fn test_spoofed_announcement_ignored() {
        assert_eq!(parse_announcement(b"10.0.0.1", sender("10.0.0.2")), None);
    }

    #[test]
    fn test_garbage_ignored() {
        assert_eq!(parse_announcement(b"hello", sender("10.0.0.2")), None);
        assert_eq!(parse_announcement(&[0xFF, 0xFE], sender("10.0.0.2")), None);
    }

    #[tokio::test]
    async fn test_discovery_over_loopback() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let discovery = tokio::spawn(discover_server(port));
        let announcer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        // Repeat until the listener is bound, as a real server would
        let address = loop {
            announcer.send_to(b"127.0.0.1", target).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if discovery.is_finished() {
                break discovery.await.unwrap().unwrap();
            }
        };
        assert_eq!(address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
