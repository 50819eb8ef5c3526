//! UDP transport implementation

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use catbus_core::{CatbusError, CatbusResult, Destination, MAX_PACKET_SIZE};

fn transport_error(e: std::io::Error) -> CatbusError {
    CatbusError::TransportError(e.to_string())
}

/// UDP socket for one Catbus channel
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    /// Where `Destination::Broadcast` goes: a broadcast or multicast address
    group_addr: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> CatbusResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(transport_error)?;
        let local_addr = socket.local_addr().map_err(transport_error)?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
            group_addr: None,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn group_addr(&self) -> Option<SocketAddr> {
        self.group_addr
    }

    /// Send group traffic to a broadcast address
    pub fn enable_broadcast(&mut self, addr: SocketAddr) -> CatbusResult<()> {
        self.socket.set_broadcast(true).map_err(transport_error)?;
        self.group_addr = Some(addr);
        Ok(())
    }

    /// Join an IPv4 multicast group and send group traffic to it
    pub fn join_multicast(&mut self, group: Ipv4Addr, interface: Ipv4Addr, port: u16) -> CatbusResult<()> {
        if !group.is_multicast() {
            return Err(CatbusError::InvalidArgument(format!("{} is not a multicast group", group)));
        }
        self.socket
            .join_multicast_v4(group, interface)
            .map_err(transport_error)?;
        self.socket.set_multicast_loop_v4(true).map_err(transport_error)?;
        self.group_addr = Some(SocketAddr::from((group, port)));
        Ok(())
    }

    /// Send raw bytes to a destination
    pub async fn send_bytes_to(&self, bytes: &[u8], dest: SocketAddr) -> CatbusResult<()> {
        if bytes.len() > MAX_PACKET_SIZE {
            tracing::warn!(len = bytes.len(), %dest, "sending oversized datagram");
        }
        self.socket.send_to(bytes, dest).await.map_err(transport_error)?;
        Ok(())
    }

    /// Send to a routed destination
    pub async fn send(&self, destination: Destination, bytes: &[u8]) -> CatbusResult<()> {
        let dest = match destination {
            Destination::Unicast(host) => host,
            Destination::Broadcast => self.group_addr.ok_or_else(|| {
                CatbusError::TransportError("no broadcast or multicast address configured".into())
            })?,
        };
        self.send_bytes_to(bytes, dest).await
    }

    /// Receive raw bytes (blocking)
    pub async fn recv_bytes_from(&self) -> CatbusResult<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, addr) = self.socket.recv_from(&mut buf).await.map_err(transport_error)?;
        Ok((buf[..len].to_vec(), addr))
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Packet receiver channel
pub type PacketReceiver = mpsc::Receiver<(Vec<u8>, SocketAddr)>;

/// Start a background receive loop. It ends when the receiver is dropped.
pub fn start_receive_loop(socket: Arc<UdpSocket>, buffer_size: usize) -> PacketReceiver {
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        if tx.send((buf[..len].to_vec(), addr)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("UDP receive error: {}", e);
                    }
                },
            }
        }
    });

    rx
}
