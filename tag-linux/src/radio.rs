//! Radio emulation over UDP multicast: every daemon on the LAN joined to the
//! group hears every frame, like the real broadcast channel.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tag_core::protocol::MTU;
use tag_core::{LinkAddress, Radio, RadioError, RxProducer};
use tokio::net::UdpSocket;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 70, 71);

/// Sending half, driven synchronously from the node's tick.
pub struct UdpRadio {
    socket: std::net::UdpSocket,
    dest: SocketAddr,
}

impl Radio for UdpRadio {
    fn send(&mut self, _link: LinkAddress, frame: &[u8]) -> Result<(), RadioError> {
        match self.socket.send_to(frame, self.dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RadioError::Busy),
            Err(e) => Err(RadioError::Io(e)),
        }
    }
}

/// Bind the channel. Returns the sending radio and an async socket for the receive loop.
pub fn bind(port: u16) -> std::io::Result<(UdpRadio, UdpSocket)> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    let recv = UdpSocket::from_std(std_sock.try_clone()?)?;
    let radio = UdpRadio {
        socket: std_sock,
        dest: SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, port)),
    };
    Ok((radio, recv))
}

/// Link address for a UDP peer: IPv4 octets then port.
pub fn link_of(addr: SocketAddr) -> LinkAddress {
    let mut out = [0u8; 6];
    if let SocketAddr::V4(v4) = addr {
        out[..4].copy_from_slice(&v4.ip().octets());
        out[4..].copy_from_slice(&v4.port().to_be_bytes());
    }
    LinkAddress(out)
}

/// Receive context: hand every datagram to the node's inbound buffer.
pub async fn recv_loop(socket: UdpSocket, producer: RxProducer) -> std::io::Result<()> {
    // One spare byte so oversized datagrams are seen as such and dropped.
    let mut buf = [0u8; MTU + 1];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        if n > MTU {
            tracing::debug!(%from, "oversized datagram dropped");
            continue;
        }
        producer.on_receive(link_of(from), &buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_address_from_socket() {
        let addr: SocketAddr = "192.168.1.20:47000".parse().unwrap();
        assert_eq!(
            link_of(addr),
            LinkAddress([192, 168, 1, 20, 0xB7, 0x98])
        );
    }
}
