//! Outbound routing for the protocol state machines
//!
//! Managers never touch sockets; they queue `Outbound` records and the
//! runtime maps `Destination::Broadcast` onto the channel's broadcast or
//! multicast address.

use std::net::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every node on the channel
    Broadcast,
    /// One peer
    Unicast(SocketAddr),
}

impl Destination {
    #[inline]
    pub fn is_broadcast(self) -> bool {
        matches!(self, Destination::Broadcast)
    }
}

/// A message waiting to be sent
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound<M> {
    pub destination: Destination,
    pub message: M,
}

impl<M> Outbound<M> {
    pub fn broadcast(message: M) -> Self {
        Outbound {
            destination: Destination::Broadcast,
            message,
        }
    }

    pub fn unicast(host: SocketAddr, message: M) -> Self {
        Outbound {
            destination: Destination::Unicast(host),
            message,
        }
    }
}
