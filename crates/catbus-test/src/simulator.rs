//! Cluster simulator for Catbus convergence testing
//!
//! Nodes live at 10.0.0.(index + 1). Every node runs a real
//! `ServiceManager` and `LinkManager`; time is simulated and advances in
//! fixed steps. Broadcasts reach every other running node, unicasts are
//! routed by IP, and every directed pair has its own seeded chaos link.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use catbus_core::{Destination, Origin, ServiceKey, LINK_PORT, SERVICES_PORT};
use catbus_link::{LinkConfig, LinkManager, MemoryDatabase};
use catbus_services::{Offer, ServiceConfig, ServiceManager, ServiceState, ServiceStatus};
use parking_lot::Mutex;
use tracing::debug;

use crate::chaos::{ChaosConfig, ChaosNetwork, ChaosStats};

/// Which socket a datagram belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Services,
    Links,
}

impl Channel {
    fn port(self) -> u16 {
        match self {
            Channel::Services => SERVICES_PORT,
            Channel::Links => LINK_PORT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Datagram {
    pub channel: Channel,
    pub data: Vec<u8>,
}

/// One simulated process
pub struct SimNode {
    pub ip: Ipv4Addr,
    pub origin: Origin,
    pub services: Arc<Mutex<ServiceManager>>,
    pub links: LinkManager,
    pub db: Arc<MemoryDatabase>,
    running: bool,
}

impl SimNode {
    fn new(index: usize, service_config: ServiceConfig, link_config: LinkConfig) -> Self {
        let ip = node_ip(index);
        let origin = Origin::new(index as u64 + 1);
        let services = Arc::new(Mutex::new(ServiceManager::new(origin, service_config)));
        let db = Arc::new(MemoryDatabase::new());
        let links = LinkManager::new(origin, link_config, Arc::clone(&services), db.clone());

        SimNode {
            ip,
            origin,
            services,
            links,
            db,
            running: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn service_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.ip), SERVICES_PORT)
    }

    pub fn state(&self, key: ServiceKey) -> Option<ServiceState> {
        self.services.lock().state(key)
    }

    pub fn status(&self, key: ServiceKey) -> Option<ServiceStatus> {
        self.services.lock().status(key.service_id, key.group)
    }

    pub fn offer(&self, key: ServiceKey) -> Option<Offer> {
        self.services.lock().own_offer(key)
    }

    fn deliver(&mut self, datagram: &Datagram, from: Ipv4Addr) {
        let host = SocketAddr::new(IpAddr::V4(from), datagram.channel.port());
        match datagram.channel {
            Channel::Services => self.services.lock().handle_packet(&datagram.data, host),
            Channel::Links => self.links.handle_packet(&datagram.data, host),
        }
    }

    fn drain(&mut self) -> Vec<(Destination, Datagram)> {
        let services = self.services.lock().drain_encoded();
        let links = self.links.drain_encoded();

        let mut out: Vec<(Destination, Datagram)> = services
            .into_iter()
            .map(|(destination, data)| (destination, Datagram { channel: Channel::Services, data }))
            .collect();
        out.extend(
            links
                .into_iter()
                .map(|(destination, data)| (destination, Datagram { channel: Channel::Links, data })),
        );
        out
    }
}

pub fn node_ip(index: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, index as u8 + 1)
}

/// Chaos links between simulated nodes, keyed by (from, to) index
pub struct NetworkSimulator {
    links: BTreeMap<(usize, usize), ChaosNetwork<Datagram>>,
    default_config: ChaosConfig,
    seed: u64,
}

impl NetworkSimulator {
    pub fn new(default_config: ChaosConfig, seed: u64) -> Self {
        NetworkSimulator {
            links: BTreeMap::new(),
            default_config,
            seed,
        }
    }

    fn link(&mut self, from: usize, to: usize) -> &mut ChaosNetwork<Datagram> {
        let seed = self.seed ^ ((from as u64) << 32 | to as u64);
        let config = &self.default_config;
        self.links
            .entry((from, to))
            .or_insert_with(|| ChaosNetwork::new(config.clone(), seed))
    }

    pub fn send(&mut self, from: usize, to: usize, datagram: Datagram) {
        self.link(from, to).send(datagram);
    }

    /// Advance every link and collect delivered packets
    pub fn tick(&mut self, dt: Duration) -> Vec<(usize, usize, Datagram)> {
        let mut delivered = Vec::new();
        for ((from, to), link) in &mut self.links {
            for datagram in link.tick(dt) {
                delivered.push((*from, *to, datagram));
            }
        }
        delivered
    }

    /// Replace the conditions of one direction
    pub fn set_link_config(&mut self, from: usize, to: usize, config: ChaosConfig) {
        let seed = self.seed ^ ((from as u64) << 32 | to as u64);
        self.links.insert((from, to), ChaosNetwork::new(config, seed));
    }

    pub fn link_stats(&self, from: usize, to: usize) -> Option<&ChaosStats> {
        self.links.get(&(from, to)).map(|l| l.stats())
    }
}

/// A simulated Catbus cluster
pub struct Cluster {
    nodes: Vec<SimNode>,
    network: NetworkSimulator,
    step: Duration,
    service_config: ServiceConfig,
    now: Duration,
    next_state_tick: Duration,
    next_offer: Duration,
}

impl Cluster {
    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut SimNode {
        &mut self.nodes[index]
    }

    pub fn network_mut(&mut self) -> &mut NetworkSimulator {
        &mut self.network
    }

    /// Simulated time since start
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn step_interval(&self) -> Duration {
        self.step
    }

    /// Every node joins the same Team, node `i` with `priorities[i]`
    pub fn join_team(&mut self, key: ServiceKey, priorities: &[u16]) {
        for (node, priority) in self.nodes.iter().zip(priorities) {
            if let Err(e) = node.services.lock().join_team(key.service_id, key.group, 0, *priority) {
                debug!(ip = %node.ip, error = %e, "join failed");
            }
        }
    }

    /// Kill a node without any goodbye
    pub fn crash(&mut self, index: usize) {
        debug!(index, "node crashed");
        self.nodes[index].running = false;
    }

    /// Stop a node cleanly: shutdown offers go out before it disappears
    pub fn stop(&mut self, index: usize) {
        let repeats = self.service_config.shutdown_repeats.max(1);
        let messages = self.nodes[index].services.lock().shutdown_messages();
        for _ in 0..repeats {
            for message in &messages {
                if let Ok(data) = message.encode() {
                    let datagram = Datagram {
                        channel: Channel::Services,
                        data,
                    };
                    self.route(index, Destination::Broadcast, datagram);
                }
            }
        }
        self.nodes[index].running = false;
    }

    fn route(&mut self, from: usize, destination: Destination, datagram: Datagram) {
        match destination {
            Destination::Broadcast => {
                for to in 0..self.nodes.len() {
                    if to != from {
                        self.network.send(from, to, datagram.clone());
                    }
                }
            }
            Destination::Unicast(addr) => {
                if let Some(to) = self.nodes.iter().position(|n| IpAddr::V4(n.ip) == addr.ip()) {
                    self.network.send(from, to, datagram);
                }
            }
        }
    }

    /// Advance the whole cluster by one step
    pub fn step(&mut self) {
        self.now += self.step;

        for (from, to, datagram) in self.network.tick(self.step) {
            let sender = self.nodes[from].ip;
            let node = &mut self.nodes[to];
            if node.running {
                node.deliver(&datagram, sender);
            }
        }

        let state_tick = self.now >= self.next_state_tick;
        if state_tick {
            self.next_state_tick += self.service_config.tick_rate;
        }
        let offer_tick = self.now >= self.next_offer;
        if offer_tick {
            self.next_offer += self.service_config.offer_rate;
        }

        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            if !node.running {
                continue;
            }
            {
                let mut services = node.services.lock();
                if state_tick {
                    services.tick(self.service_config.tick_rate);
                }
                if offer_tick {
                    services.broadcast_offers();
                }
            }
            node.links.tick(self.step);

            for (destination, datagram) in node.drain() {
                self.route(index, destination, datagram);
            }
        }
    }

    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.step();
        }
    }

    /// Step until `done` holds or `limit` passes; true if it held
    pub fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Cluster) -> bool) -> bool {
        let end = self.now + limit;
        while self.now < end {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }

    /// Running nodes in the given state for `key`
    pub fn in_state(&self, key: ServiceKey, state: ServiceState) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.running && n.state(key) == Some(state))
            .map(|(i, _)| i)
            .collect()
    }

    /// Exactly one running SERVER for `key`, every other running node CONNECTED to it
    pub fn converged(&self, key: ServiceKey) -> Option<usize> {
        let servers = self.in_state(key, ServiceState::Server);
        let [leader] = servers.as_slice() else {
            return None;
        };
        let leader = *leader;

        let leader_ip = IpAddr::V4(self.nodes[leader].ip);
        let followers_ok = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.running && *i != leader)
            .all(|(_, n)| {
                n.status(key)
                    .map_or(false, |s| s.state == ServiceState::Connected && s.server.map(|a| a.ip()) == Some(leader_ip))
            });
        followers_ok.then_some(leader)
    }
}

/// Test scenario builder
pub struct ScenarioBuilder {
    nodes: usize,
    config: ChaosConfig,
    seed: u64,
    step: Duration,
    service_config: ServiceConfig,
    link_config: LinkConfig,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder {
            nodes: 2,
            config: ChaosConfig::perfect(),
            seed: 0,
            step: Duration::from_millis(100),
            service_config: ServiceConfig::default(),
            link_config: LinkConfig::default(),
        }
    }

    pub fn with_nodes(mut self, count: usize) -> Self {
        self.nodes = count;
        self
    }

    /// Set network conditions
    pub fn with_config(mut self, config: ChaosConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Simulation step; link ticks run once per step
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.step = interval;
        self
    }

    pub fn with_service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = config;
        self
    }

    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.link_config = config;
        self
    }

    pub fn build(self) -> Cluster {
        let nodes = (0..self.nodes)
            .map(|i| SimNode::new(i, self.service_config.clone(), self.link_config.clone()))
            .collect();

        Cluster {
            nodes,
            network: NetworkSimulator::new(self.config, self.seed),
            step: self.step,
            now: Duration::ZERO,
            next_state_tick: self.service_config.tick_rate,
            next_offer: self.step,
            service_config: self.service_config,
        }
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServiceKey {
        ServiceKey::new(0x1234, 0x5678)
    }

    #[test]
    fn test_broadcast_reaches_others_only() {
        let mut cluster = ScenarioBuilder::new().with_nodes(3).build();
        let datagram = Datagram {
            channel: Channel::Services,
            data: vec![1, 2, 3],
        };
        cluster.route(0, Destination::Broadcast, datagram);
        let delivered = cluster.network.tick(Duration::from_millis(1));
        let mut targets: Vec<usize> = delivered.iter().map(|(_, to, _)| *to).collect();
        targets.sort();
        assert_eq!(targets, vec![1, 2]);
    }

    #[test]
    fn test_unicast_routed_by_ip() {
        let mut cluster = ScenarioBuilder::new().with_nodes(3).build();
        let target = SocketAddr::new(IpAddr::V4(node_ip(2)), 9999);
        let datagram = Datagram {
            channel: Channel::Links,
            data: vec![],
        };
        cluster.route(0, Destination::Unicast(target), datagram);
        let delivered = cluster.network.tick(Duration::from_millis(1));
        assert_eq!(delivered.len(), 1);
        assert_eq!((delivered[0].0, delivered[0].1), (0, 2));
    }

    #[test]
    fn test_single_node_leads_alone() {
        let mut cluster = ScenarioBuilder::new().with_nodes(1).build();
        cluster.join_team(key(), &[3]);
        assert!(cluster.run_until(Duration::from_secs(15), |c| c.converged(key()) == Some(0)));
    }

    #[test]
    fn test_crashed_node_goes_quiet() {
        let mut cluster = ScenarioBuilder::new().with_nodes(2).build();
        cluster.join_team(key(), &[3, 2]);
        cluster.crash(1);
        cluster.run_for(Duration::from_secs(5));
        assert!(!cluster.node(1).is_running());
        assert_eq!(
            cluster.network.link_stats(1, 0).map_or(0, |s| s.packets_sent),
            0
        );
    }
}
