//! Service / Team state machine
//!
//! ```text
//!            timeout, best is SERVER          timeout
//!   LISTEN ---------------------------> CONNECTED ------> LISTEN
//!      |
//!      | timeout, priority > 0, nobody better known
//!      v
//!   SERVER  (plain Service: sticky; Team: steps down to a better SERVER)
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use catbus_core::{Origin, ServiceKey};
use catbus_wire::OfferFlags;
use tracing::{debug, info};

use crate::{Offer, ServiceConfig};

/// Role of the local node for one service key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Undecided, collecting offers
    Listen,
    /// Following a remote SERVER
    Connected,
    /// Leading
    Server,
}

/// Result of processing an incoming offer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Correction {
    None,
    /// The sender is behind: unicast our own offer back to it
    UnicastOffer,
}

/// Best known rival and where it was heard from
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BestOffer {
    pub offer: Offer,
    pub host: SocketAddr,
}

/// Point-in-time view of a Service
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServiceStatus {
    pub key: ServiceKey,
    pub state: ServiceState,
    pub is_team: bool,
    pub priority: u16,
    pub uptime: f64,
    /// Service endpoint of the tracked leader while CONNECTED
    pub server: Option<SocketAddr>,
    pub best: Option<BestOffer>,
}

/// Election state machine for one service key
#[derive(Clone, Debug)]
pub struct Service {
    key: ServiceKey,
    origin: Origin,
    priority: u16,
    port: u16,
    is_team: bool,
    state: ServiceState,
    /// Seconds spent as SERVER
    uptime: f64,
    /// Remaining time in the current state, pinned to zero while SERVER
    timeout: Duration,
    best: Option<BestOffer>,
    listen_timeout: Duration,
    connected_timeout: Duration,
}

impl Service {
    /// A plain Service. With `priority > 0` it assumes leadership
    /// immediately; with `priority == 0` it is a pure follower.
    pub fn new(key: ServiceKey, origin: Origin, port: u16, priority: u16, config: &ServiceConfig) -> Self {
        let mut service = Self::with_role(key, origin, port, priority, false, config);
        if priority > 0 {
            service.promote();
        }
        service
    }

    /// A Team member; always starts in LISTEN
    pub fn team(key: ServiceKey, origin: Origin, port: u16, priority: u16, config: &ServiceConfig) -> Self {
        Self::with_role(key, origin, port, priority, true, config)
    }

    fn with_role(
        key: ServiceKey,
        origin: Origin,
        port: u16,
        priority: u16,
        is_team: bool,
        config: &ServiceConfig,
    ) -> Self {
        Service {
            key,
            origin,
            priority,
            port,
            is_team,
            state: ServiceState::Listen,
            uptime: 0.0,
            timeout: config.listen_timeout,
            best: None,
            listen_timeout: config.listen_timeout,
            connected_timeout: config.connected_timeout,
        }
    }

    #[inline]
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    #[inline]
    pub fn state(&self) -> ServiceState {
        self.state
    }

    #[inline]
    pub fn is_team(&self) -> bool {
        self.is_team
    }

    #[inline]
    pub fn priority(&self) -> u16 {
        self.priority
    }

    #[inline]
    pub fn uptime(&self) -> f64 {
        self.uptime
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.state == ServiceState::Server
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ServiceState::Connected
    }

    #[inline]
    pub fn best(&self) -> Option<&BestOffer> {
        self.best.as_ref()
    }

    /// Address the tracked candidate's packets come from
    pub fn best_host(&self) -> Option<SocketAddr> {
        self.best.map(|b| b.host)
    }

    /// Service endpoint of the leader we follow: its host with the offered port
    pub fn server(&self) -> Option<SocketAddr> {
        match (self.state, self.best) {
            (ServiceState::Connected, Some(best)) => {
                Some(SocketAddr::new(best.host.ip(), best.offer.port))
            }
            _ => None,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            key: self.key,
            state: self.state,
            is_team: self.is_team,
            priority: self.priority,
            uptime: self.uptime,
            server: self.server(),
            best: self.best,
        }
    }

    /// Our own offer as of now
    pub fn offer(&self) -> Offer {
        let mut flags = OfferFlags::NONE;
        flags.set_team(self.is_team);
        flags.set_server_valid(self.is_server());

        Offer {
            origin: self.origin,
            key: self.key,
            priority: self.priority,
            port: self.port,
            uptime: self.uptime,
            flags,
        }
    }

    fn tracks(&self, host: SocketAddr) -> bool {
        self.best.map_or(false, |b| b.host == host)
    }

    fn is_better_than_best(&self, offer: &Offer) -> bool {
        self.best.map_or(true, |b| offer.beats(&b.offer))
    }

    fn adopt(&mut self, offer: &Offer, host: SocketAddr) {
        self.best = Some(BestOffer { offer: *offer, host });
    }

    /// Back to a clean LISTEN
    pub fn reset(&mut self) {
        if self.state != ServiceState::Listen {
            info!(key = %self.key, from = ?self.state, "service reset to LISTEN");
        }
        self.state = ServiceState::Listen;
        self.timeout = self.listen_timeout;
        self.best = None;
        self.uptime = 0.0;
    }

    fn promote(&mut self) {
        info!(key = %self.key, priority = self.priority, "service is now SERVER");
        self.state = ServiceState::Server;
        self.timeout = Duration::ZERO;
        self.best = None;
        self.uptime = 0.0;
    }

    fn connect(&mut self, offer: &Offer, host: SocketAddr) {
        info!(key = %self.key, %host, leader = %offer.origin, "service CONNECTED");
        self.adopt(offer, host);
        self.state = ServiceState::Connected;
        self.timeout = self.connected_timeout;
        self.uptime = 0.0;
    }

    /// Process an offer heard from `host`
    pub fn process_offer(&mut self, offer: &Offer, host: SocketAddr) -> Correction {
        if offer.origin == self.origin || offer.key != self.key {
            return Correction::None;
        }

        if self.is_team {
            if !offer.is_team() {
                return Correction::None;
            }
            self.process_team_offer(offer, host)
        } else {
            if offer.is_server() {
                self.process_service_offer(offer, host);
            }
            Correction::None
        }
    }

    fn process_service_offer(&mut self, offer: &Offer, host: SocketAddr) {
        if self.tracks(host) {
            self.adopt(offer, host);
            if self.is_connected() {
                self.timeout = self.connected_timeout;
            }
            return;
        }

        if self.is_better_than_best(offer) {
            debug!(key = %self.key, %host, "better server offer");
            self.adopt(offer, host);
            if self.is_connected() {
                info!(key = %self.key, %host, "switching to better server");
                self.timeout = self.connected_timeout;
            }
        }
    }

    fn process_team_offer(&mut self, offer: &Offer, host: SocketAddr) -> Correction {
        if self.tracks(host) {
            self.process_heartbeat(offer, host);
            return Correction::None;
        }

        match self.state {
            ServiceState::Server => {
                let ours = self.offer();
                if offer.beats(&ours) {
                    if offer.is_server() {
                        info!(key = %self.key, %host, "better SERVER found, stepping down");
                        self.connect(offer, host);
                    }
                    Correction::None
                } else if offer.is_server() {
                    Correction::UnicastOffer
                } else {
                    Correction::None
                }
            }
            ServiceState::Connected => {
                if offer.is_server() && self.is_better_than_best(offer) {
                    info!(key = %self.key, %host, "handing off to better SERVER");
                    self.connect(offer, host);
                }
                Correction::None
            }
            ServiceState::Listen => {
                if self.is_better_than_best(offer) {
                    self.adopt(offer, host);
                }
                Correction::None
            }
        }
    }

    /// A packet from the host we already track
    fn process_heartbeat(&mut self, offer: &Offer, host: SocketAddr) {
        if !self.is_connected() {
            self.adopt(offer, host);
            return;
        }

        let regressed = self.best.map_or(false, |b| offer.uptime < b.offer.uptime);
        if regressed || !offer.is_server() {
            info!(key = %self.key, %host, regressed, "leader restarted or stepped down");
            self.reset();
            return;
        }

        self.adopt(offer, host);
        self.timeout = self.connected_timeout;

        if self.priority > 0 && self.offer().beats(offer) {
            info!(key = %self.key, %host, "outranking current leader");
            self.promote();
        }
    }

    /// The tracked host announced its shutdown
    pub fn process_shutdown(&mut self, host: SocketAddr) {
        if self.tracks(host) {
            info!(key = %self.key, %host, "leader shut down");
            self.reset();
        }
    }

    /// Advance timers by `elapsed`
    pub fn tick(&mut self, elapsed: Duration) {
        if self.is_server() {
            self.timeout = Duration::ZERO;
            self.uptime += elapsed.as_secs_f64();
            return;
        }

        match self.timeout.checked_sub(elapsed) {
            Some(remaining) => {
                self.timeout = remaining;
                return;
            }
            None => self.timeout = Duration::ZERO,
        }

        match self.state {
            ServiceState::Listen => self.listen_expired(),
            ServiceState::Connected => {
                info!(key = %self.key, "leader timed out");
                self.reset();
            }
            ServiceState::Server => {}
        }
    }

    fn listen_expired(&mut self) {
        let ours = self.offer();
        match self.best {
            Some(best) if best.offer.is_server() => self.connect(&best.offer, best.host),
            best if self.priority > 0 && best.map_or(true, |b| !b.offer.beats(&ours)) => {
                self.promote()
            }
            _ => self.reset(),
        }
    }

    /// CONNECTED and quiet long enough that the leader should be queried
    pub fn needs_ping(&self, threshold: Duration) -> bool {
        self.is_connected() && self.timeout < threshold
    }
}
