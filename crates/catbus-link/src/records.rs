//! Expiring per-peer bookkeeping for links
//!
//! Every record carries a timeout refreshed by the traffic that created it.
//! `expire` subtracts elapsed time and reports whether the record survives;
//! a record whose timeout would drop below zero is gone.

use std::net::SocketAddr;
use std::time::Duration;

use catbus_core::{KeyHash, LinkHash};
use catbus_wire::DataItem;

/// Subtract `elapsed` from `timeout`, false once it would go negative
fn countdown(timeout: &mut Duration, elapsed: Duration) -> bool {
    match timeout.checked_sub(elapsed) {
        Some(remaining) => {
            *timeout = remaining;
            true
        }
        None => false,
    }
}

/// Our role as a data source for some leader's link
#[derive(Clone, Debug)]
pub struct Producer {
    pub hash: LinkHash,
    pub leader: SocketAddr,
    pub source: KeyHash,
    pub rate: Duration,
    /// Content hash of the last value sent
    pub last_sent: Option<u64>,
    next_send: Duration,
    retransmit: Duration,
    timeout: Duration,
}

impl Producer {
    pub fn new(hash: LinkHash, leader: SocketAddr, source: KeyHash, rate: Duration, timeout: Duration) -> Self {
        Producer {
            hash,
            leader,
            source,
            rate,
            last_sent: None,
            next_send: Duration::ZERO,
            retransmit: Duration::ZERO,
            timeout,
        }
    }

    /// Re-point at the (possibly new) leader and restart the timeout.
    /// A leader change forces the next value out.
    pub fn refresh(&mut self, leader: SocketAddr, rate: Duration, timeout: Duration) {
        if self.leader != leader {
            self.leader = leader;
            self.last_sent = None;
        }
        self.rate = rate;
        self.timeout = timeout;
    }

    pub fn expire(&mut self, elapsed: Duration) -> bool {
        countdown(&mut self.timeout, elapsed)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Advance the send schedule; true when this producer is due to sample
    pub fn due(&mut self, elapsed: Duration) -> bool {
        self.retransmit = self.retransmit.saturating_sub(elapsed);
        if countdown(&mut self.next_send, elapsed) && !self.next_send.is_zero() {
            return false;
        }
        self.next_send = self.rate;
        true
    }

    /// Whether a sampled value must go out: it changed, or it has been
    /// held back for a full retransmit interval
    pub fn should_send(&self, content_hash: u64) -> bool {
        self.last_sent != Some(content_hash) || self.retransmit.is_zero()
    }

    pub fn mark_sent(&mut self, content_hash: u64, retransmit: Duration) {
        self.last_sent = Some(content_hash);
        self.retransmit = retransmit;
    }
}

/// A subscriber the leader pushes aggregated data to
#[derive(Clone, Debug)]
pub struct Consumer {
    pub host: SocketAddr,
    pub hash: LinkHash,
    timeout: Duration,
}

impl Consumer {
    pub fn new(host: SocketAddr, hash: LinkHash, timeout: Duration) -> Self {
        Consumer { host, hash, timeout }
    }

    pub fn refresh(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn expire(&mut self, elapsed: Duration) -> bool {
        countdown(&mut self.timeout, elapsed)
    }
}

/// Last value a contributing producer sent to the leader
#[derive(Clone, Debug)]
pub struct Remote {
    pub hash: LinkHash,
    pub host: SocketAddr,
    pub data: DataItem,
    /// Arrival order, higher is newer
    pub sequence: u64,
    timeout: Duration,
}

impl Remote {
    pub fn new(hash: LinkHash, host: SocketAddr, data: DataItem, sequence: u64, timeout: Duration) -> Self {
        Remote {
            hash,
            host,
            data,
            sequence,
            timeout,
        }
    }

    pub fn update(&mut self, data: DataItem, sequence: u64, timeout: Duration) {
        self.data = data;
        self.sequence = sequence;
        self.timeout = timeout;
    }

    pub fn expire(&mut self, elapsed: Duration) -> bool {
        countdown(&mut self.timeout, elapsed)
    }
}
