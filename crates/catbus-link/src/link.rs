//! A replication contract and its Team membership

use std::net::SocketAddr;
use std::time::Duration;

use catbus_core::{CatbusError, CatbusResult, LinkHash, ServiceKey, LINK_SERVICE};
use catbus_services::{ServiceManager, ServiceState};
use catbus_wire::LinkDef;

/// What this node currently does for a link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkRole {
    /// Elected: aggregates and publishes
    Leader,
    /// Following the leader at this link endpoint
    Follower(SocketAddr),
    /// Election still running
    Idle,
}

#[derive(Clone, Debug)]
pub struct Link {
    def: LinkDef,
    hash: LinkHash,
    rate: Duration,
    next_tick: Duration,
}

impl Link {
    /// Validate a definition. The rate is raised to `min_rate` if below it.
    pub fn new(def: LinkDef, min_rate: Duration) -> CatbusResult<Self> {
        if def.source.is_none() || def.dest.is_none() {
            return Err(CatbusError::InvalidLink(
                "source and dest keys are required".into(),
            ));
        }

        let rate = Duration::from_millis(def.rate as u64).max(min_rate);
        Ok(Link {
            hash: def.link_hash(),
            def,
            rate,
            next_tick: rate,
        })
    }

    #[inline]
    pub fn def(&self) -> &LinkDef {
        &self.def
    }

    #[inline]
    pub fn hash(&self) -> LinkHash {
        self.hash
    }

    #[inline]
    pub fn rate(&self) -> Duration {
        self.rate
    }

    /// Team key: identical definitions land in the same election
    #[inline]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(LINK_SERVICE, self.hash.0)
    }

    pub fn is_leader(&self, services: &ServiceManager) -> bool {
        services.state(self.service_key()) == Some(ServiceState::Server)
    }

    pub fn is_follower(&self, services: &ServiceManager) -> bool {
        services.state(self.service_key()) == Some(ServiceState::Connected)
    }

    pub fn server(&self, services: &ServiceManager) -> Option<SocketAddr> {
        services.server(self.service_key())
    }

    pub fn role(&self, services: &ServiceManager) -> LinkRole {
        if self.is_leader(services) {
            return LinkRole::Leader;
        }
        match self.server(services) {
            Some(server) if self.is_follower(services) => LinkRole::Follower(server),
            _ => LinkRole::Idle,
        }
    }

    /// Advance the rate timer; true when the link should run
    pub fn due(&mut self, elapsed: Duration) -> bool {
        match self.next_tick.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                self.next_tick = remaining;
                false
            }
            _ => {
                self.next_tick = self.rate;
                true
            }
        }
    }
}
