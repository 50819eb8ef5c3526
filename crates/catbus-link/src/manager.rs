//! Link manager - owns every Link and the Producer / Consumer / Remote tables

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use catbus_core::{
    CatbusError, CatbusResult, Destination, KeyHash, LinkHash, Origin, Outbound, LINK_SERVICE,
};
use catbus_services::ServiceManager;
use catbus_wire::{DataItem, LinkDef, LinkMessage, LinkMode, LinkPacket, TagQuery};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{aggregate, Consumer, Database, Link, LinkConfig, LinkRole, Producer, Remote};

/// Outbound link channel packet
pub type LinkOutbound = Outbound<LinkPacket>;

#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    pub packets_in: u64,
    pub packets_dropped: u64,
    pub data_sent: u64,
    pub data_received: u64,
}

/// Snapshot of one link for status reporting
#[derive(Clone, Debug, PartialEq)]
pub struct LinkStatus {
    pub hash: LinkHash,
    pub def: LinkDef,
    pub role: LinkRole,
    pub consumers: usize,
    pub remotes: usize,
}

/// All links of this node.
///
/// Leadership comes from the shared `ServiceManager`; take this manager's
/// lock before the service manager's, never the other way around.
pub struct LinkManager {
    origin: Origin,
    config: LinkConfig,
    services: Arc<Mutex<ServiceManager>>,
    database: Arc<dyn Database>,
    links: BTreeMap<LinkHash, Link>,
    producers: BTreeMap<LinkHash, Producer>,
    consumers: BTreeMap<(LinkHash, SocketAddr), Consumer>,
    remotes: BTreeMap<(LinkHash, SocketAddr), Remote>,
    outgoing: VecDeque<LinkOutbound>,
    next_discover: Duration,
    sequence: u64,
    stats: LinkStats,
}

impl LinkManager {
    pub fn new(
        origin: Origin,
        config: LinkConfig,
        services: Arc<Mutex<ServiceManager>>,
        database: Arc<dyn Database>,
    ) -> Self {
        LinkManager {
            origin,
            next_discover: config.discover_rate,
            config,
            services,
            database,
            links: BTreeMap::new(),
            producers: BTreeMap::new(),
            consumers: BTreeMap::new(),
            remotes: BTreeMap::new(),
            outgoing: VecDeque::new(),
            sequence: 0,
            stats: LinkStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    fn packet(&self, message: LinkMessage) -> LinkPacket {
        LinkPacket::new(self.origin, self.config.universe, message)
    }

    /// Create a link and join its election
    pub fn add_link(&mut self, def: LinkDef) -> CatbusResult<LinkHash> {
        let link = Link::new(def, self.config.min_rate)?;
        let hash = link.hash();
        if self.links.contains_key(&hash) {
            return Err(CatbusError::DuplicateLink(hash));
        }

        let key = link.service_key();
        self.services
            .lock()
            .join_team(key.service_id, key.group, self.config.port, self.config.priority)?;

        info!(%hash, source = %def.source, dest = %def.dest, mode = ?def.mode, "link added");
        self.links.insert(hash, link);
        Ok(hash)
    }

    /// Drop a link, its records, and its Team membership
    pub fn remove_link(&mut self, hash: LinkHash) -> CatbusResult<LinkDef> {
        let link = self.links.remove(&hash).ok_or(CatbusError::LinkNotFound(hash))?;

        if let Err(e) = self.services.lock().cancel(LINK_SERVICE, hash.0) {
            warn!(%hash, error = %e, "link had no team membership");
        }

        self.producers.remove(&hash);
        self.consumers.retain(|(h, _), _| *h != hash);
        self.remotes.retain(|(h, _), _| *h != hash);

        info!(%hash, "link removed");
        Ok(*link.def())
    }

    /// Ask other nodes to create a link
    pub fn announce_add(&mut self, def: LinkDef, destination: Destination) {
        let message = self.packet(LinkMessage::LinkAdd { def });
        self.outgoing.push_back(Outbound { destination, message });
    }

    /// Ask other nodes to drop a link
    pub fn announce_delete(&mut self, hash: LinkHash, destination: Destination) {
        let message = self.packet(LinkMessage::LinkDelete { hash });
        self.outgoing.push_back(Outbound { destination, message });
    }

    pub fn link(&self, hash: LinkHash) -> Option<&Link> {
        self.links.get(&hash)
    }

    pub fn role(&self, hash: LinkHash) -> Option<LinkRole> {
        let link = self.links.get(&hash)?;
        Some(link.role(&self.services.lock()))
    }

    pub fn producer(&self, hash: LinkHash) -> Option<&Producer> {
        self.producers.get(&hash)
    }

    pub fn consumer_count(&self, hash: LinkHash) -> usize {
        self.consumers.keys().filter(|(h, _)| *h == hash).count()
    }

    pub fn remote_count(&self, hash: LinkHash) -> usize {
        self.remotes.keys().filter(|(h, _)| *h == hash).count()
    }

    pub fn status(&self) -> Vec<LinkStatus> {
        let services = self.services.lock();
        self.links
            .values()
            .map(|link| LinkStatus {
                hash: link.hash(),
                def: *link.def(),
                role: link.role(&services),
                consumers: self.consumer_count(link.hash()),
                remotes: self.remote_count(link.hash()),
            })
            .collect()
    }

    fn leads(&self, hash: LinkHash) -> bool {
        self.links
            .get(&hash)
            .map_or(false, |link| link.is_leader(&self.services.lock()))
    }

    fn roles(&self) -> Vec<(LinkHash, LinkRole)> {
        if self.links.is_empty() {
            return Vec::new();
        }
        let services = self.services.lock();
        self.links
            .values()
            .map(|link| (link.hash(), link.role(&services)))
            .collect()
    }

    /// Base tick: prune, run due links, feed producers, and discover
    pub fn tick(&mut self, elapsed: Duration) {
        self.prune(elapsed);

        let roles = self.roles();
        let due: Vec<(LinkHash, LinkRole)> = roles
            .iter()
            .filter(|(hash, _)| self.links.get_mut(hash).map_or(false, |l| l.due(elapsed)))
            .copied()
            .collect();
        for (hash, role) in due {
            self.run_link(hash, role);
        }

        self.run_producers(elapsed);

        match self.next_discover.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => self.next_discover = remaining,
            _ => {
                self.next_discover = self.config.discover_rate;
                self.discover(&roles);
            }
        }
    }

    /// Remove expired records
    fn prune(&mut self, elapsed: Duration) {
        let before = (self.producers.len(), self.consumers.len(), self.remotes.len());

        self.producers.retain(|_, p| p.expire(elapsed));
        self.consumers.retain(|_, c| c.expire(elapsed));
        self.remotes.retain(|_, r| r.expire(elapsed));

        let after = (self.producers.len(), self.consumers.len(), self.remotes.len());
        if before != after {
            debug!(?before, ?after, "pruned link records");
        }
    }

    fn run_link(&mut self, hash: LinkHash, role: LinkRole) {
        let Some(link) = self.links.get(&hash) else {
            return;
        };
        let def = *link.def();
        let rate = link.rate();

        match role {
            LinkRole::Leader => {
                self.producers.remove(&hash);
                self.publish(hash, &def);
            }
            LinkRole::Follower(leader) if def.mode == LinkMode::Send => {
                let timeout = self.config.producer_timeout;
                self.producers
                    .entry(hash)
                    .and_modify(|p| p.refresh(leader, rate, timeout))
                    .or_insert_with(|| Producer::new(hash, leader, def.source, rate, timeout));
            }
            LinkRole::Idle => {
                if self.producers.remove(&hash).is_some() {
                    debug!(%hash, "leader lost, producer dropped");
                }
            }
            LinkRole::Follower(_) => {}
        }
    }

    /// Aggregate the contributors of a led link and push the result out
    fn publish(&mut self, hash: LinkHash, def: &LinkDef) {
        let local = match def.mode {
            LinkMode::Send => match self.database.get_item(def.source) {
                Ok(snapshot) => Some(snapshot.value),
                Err(e) => {
                    debug!(%hash, error = %e, "no local source value");
                    None
                }
            },
            LinkMode::Recv => None,
        };

        let result = {
            let mut remotes: Vec<&Remote> = self.remotes.values().filter(|r| r.hash == hash).collect();
            remotes.sort_by(|a, b| b.sequence.cmp(&a.sequence));

            let contributors: Vec<&DataItem> = remotes.iter().map(|r| &r.data).collect();
            aggregate(def.aggregation, local.as_ref(), &contributors)
        };
        let Some(result) = result else {
            return;
        };

        if def.mode == LinkMode::Recv {
            if let Err(e) = self.database.set(def.dest, result.clone()) {
                warn!(%hash, error = %e, "failed to store aggregate");
            }
        }

        let hosts: Vec<SocketAddr> = self
            .consumers
            .keys()
            .filter(|(h, _)| *h == hash)
            .map(|(_, host)| *host)
            .collect();
        for host in hosts {
            let message = self.packet(LinkMessage::ConsumerData {
                hash,
                key: def.dest,
                data: result.clone(),
            });
            self.outgoing.push_back(Outbound::unicast(host, message));
            self.stats.data_sent += 1;
        }
    }

    /// Sample each due producer and send what changed
    fn run_producers(&mut self, elapsed: Duration) {
        let (origin, universe) = (self.origin, self.config.universe);
        let retransmit = self.config.retransmit_rate;

        for producer in self.producers.values_mut() {
            if !producer.due(elapsed) {
                continue;
            }

            let snapshot = match self.database.get_item(producer.source) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(hash = %producer.hash, error = %e, "producer source unavailable");
                    continue;
                }
            };
            if !producer.should_send(snapshot.content_hash) {
                continue;
            }

            producer.mark_sent(snapshot.content_hash, retransmit);
            let message = LinkMessage::ProducerData {
                hash: producer.hash,
                data: snapshot.value,
            };
            self.outgoing.push_back(Outbound::unicast(
                producer.leader,
                LinkPacket::new(origin, universe, message),
            ));
            self.stats.data_sent += 1;
        }
    }

    fn discover(&mut self, roles: &[(LinkHash, LinkRole)]) {
        for (hash, role) in roles {
            let Some(link) = self.links.get(hash) else {
                continue;
            };
            let def = *link.def();

            let (destination, message) = match (role, def.mode) {
                (LinkRole::Leader, LinkMode::Send) => (
                    Destination::Broadcast,
                    LinkMessage::ConsumerQuery {
                        key: def.dest,
                        query: def.query,
                        mode: def.mode,
                        hash: *hash,
                    },
                ),
                (LinkRole::Leader, LinkMode::Recv) => (
                    Destination::Broadcast,
                    LinkMessage::ProducerQuery {
                        key: def.source,
                        query: def.query,
                        rate: def.rate,
                        hash: *hash,
                    },
                ),
                (LinkRole::Follower(leader), _) => (
                    Destination::Unicast(*leader),
                    LinkMessage::ConsumerMatch { hash: *hash },
                ),
                (LinkRole::Idle, _) => continue,
            };

            let message = self.packet(message);
            self.outgoing.push_back(Outbound { destination, message });
        }
    }

    /// Decode and handle a datagram. Bad packets are logged and dropped.
    pub fn handle_packet(&mut self, data: &[u8], host: SocketAddr) {
        self.stats.packets_in += 1;
        match LinkPacket::decode(data) {
            Ok(packet) => self.handle_message(packet, host),
            Err(e) => {
                self.stats.packets_dropped += 1;
                debug!(%host, error = %e, "dropping link packet");
            }
        }
    }

    pub fn handle_message(&mut self, packet: LinkPacket, host: SocketAddr) {
        let header = &packet.header;
        if header.origin == self.origin {
            return;
        }
        if header.universe != self.config.universe {
            self.stats.packets_dropped += 1;
            debug!(%host, universe = header.universe, "packet from another universe");
            return;
        }

        match packet.message {
            LinkMessage::ConsumerQuery { key, query, hash, .. } => {
                if self.matches(key, &query) {
                    let message = self.packet(LinkMessage::ConsumerMatch { hash });
                    self.outgoing.push_back(Outbound::unicast(host, message));
                }
            }
            LinkMessage::ProducerQuery { key, query, rate, hash } => {
                if self.matches(key, &query) {
                    self.upsert_producer(hash, host, key, rate);
                }
            }
            LinkMessage::ConsumerMatch { hash } => {
                if self.leads(hash) {
                    let timeout = self.config.consumer_timeout;
                    self.consumers
                        .entry((hash, host))
                        .and_modify(|c| c.refresh(timeout))
                        .or_insert_with(|| {
                            debug!(%hash, %host, "new consumer");
                            Consumer::new(host, hash, timeout)
                        });
                }
            }
            LinkMessage::ProducerData { hash, data } => {
                if self.leads(hash) {
                    self.stats.data_received += 1;
                    self.sequence += 1;
                    let (sequence, timeout) = (self.sequence, self.config.remote_timeout);
                    self.remotes
                        .entry((hash, host))
                        .and_modify(|r| r.update(data.clone(), sequence, timeout))
                        .or_insert_with(|| Remote::new(hash, host, data, sequence, timeout));
                }
            }
            LinkMessage::ConsumerData { hash, key, data } => {
                self.stats.data_received += 1;
                if let Err(e) = self.database.set(key, data) {
                    debug!(%hash, %host, error = %e, "consumer data not stored");
                }
            }
            LinkMessage::LinkAdd { def } => {
                if !self.links.contains_key(&def.link_hash()) {
                    if let Err(e) = self.add_link(def) {
                        warn!(%host, error = %e, "remote link add failed");
                    }
                }
            }
            LinkMessage::LinkDelete { hash } => {
                if self.links.contains_key(&hash) {
                    if let Err(e) = self.remove_link(hash) {
                        warn!(%host, error = %e, "remote link delete failed");
                    }
                }
            }
        }
    }

    fn matches(&self, key: KeyHash, query: &TagQuery) -> bool {
        self.database.query(query) && self.database.contains(key)
    }

    fn upsert_producer(&mut self, hash: LinkHash, leader: SocketAddr, source: KeyHash, rate: u16) {
        let rate = Duration::from_millis(rate as u64).max(self.config.min_rate);
        let timeout = self.config.producer_timeout;
        self.producers
            .entry(hash)
            .and_modify(|p| p.refresh(leader, rate, timeout))
            .or_insert_with(|| {
                debug!(%hash, %leader, "producing for remote link");
                Producer::new(hash, leader, source, rate, timeout)
            });
    }

    pub fn pop_outgoing(&mut self) -> Option<LinkOutbound> {
        self.outgoing.pop_front()
    }

    pub fn drain_outgoing(&mut self) -> Vec<LinkOutbound> {
        self.outgoing.drain(..).collect()
    }

    pub fn drain_encoded(&mut self) -> Vec<(Destination, Vec<u8>)> {
        self.outgoing
            .drain(..)
            .map(|out| (out.destination, out.message.encode()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;
    use catbus_core::ServiceKey;
    use catbus_services::ServiceConfig;
    use catbus_wire::{
        Aggregation, OfferFlags, OfferRecord, ServiceHeader, ServiceMessage, ServiceMsgType,
    };

    const STEP: Duration = Duration::from_millis(100);

    fn host(n: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n], 44632))
    }

    fn def(mode: LinkMode, aggregation: Aggregation) -> LinkDef {
        LinkDef {
            source: KeyHash::from_name("temperature"),
            dest: KeyHash::from_name("room_temperature"),
            query: TagQuery::from_tags(&["kitchen"]),
            mode,
            aggregation,
            rate: 100,
        }
    }

    struct Node {
        links: LinkManager,
        services: Arc<Mutex<ServiceManager>>,
        db: Arc<MemoryDatabase>,
    }

    fn node(origin: u64) -> Node {
        let services = Arc::new(Mutex::new(ServiceManager::new(
            Origin::new(origin),
            ServiceConfig::default(),
        )));
        let db = Arc::new(MemoryDatabase::with_tags(&["kitchen"]));
        let links = LinkManager::new(
            Origin::new(origin),
            LinkConfig::default(),
            services.clone(),
            db.clone(),
        );
        Node { links, services, db }
    }

    fn elect(node: &Node) {
        let mut services = node.services.lock();
        for _ in 0..11 {
            services.tick(Duration::from_secs(1));
        }
    }

    fn send(node: &mut Node, from: u64, host: SocketAddr, message: LinkMessage) {
        let packet = LinkPacket::new(Origin::new(from), 0, message);
        node.links.handle_packet(&packet.encode(), host);
    }

    fn consumer_data(out: &[LinkOutbound], to: SocketAddr) -> Vec<DataItem> {
        out.iter()
            .filter(|o| o.destination == Destination::Unicast(to))
            .filter_map(|o| match &o.message.message {
                LinkMessage::ConsumerData { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_add_and_remove() {
        let mut n = node(1);
        let hash = n.links.add_link(def(LinkMode::Send, Aggregation::Any)).unwrap();
        let key = ServiceKey::new(LINK_SERVICE, hash.0);
        assert!(n.services.lock().contains(key));

        assert!(matches!(
            n.links.add_link(def(LinkMode::Send, Aggregation::Any)),
            Err(CatbusError::DuplicateLink(_))
        ));

        n.links.remove_link(hash).unwrap();
        assert!(!n.services.lock().contains(key));
        assert!(matches!(
            n.links.remove_link(hash),
            Err(CatbusError::LinkNotFound(_))
        ));
    }

    #[test]
    fn test_sum_with_local_value() {
        for order in [[3, 4, 5], [5, 3, 4], [4, 5, 3]] {
            let mut n = node(1);
            n.db.insert("temperature", DataItem::int32(2));
            let hash = n.links.add_link(def(LinkMode::Send, Aggregation::Sum)).unwrap();
            elect(&n);

            for (i, value) in order.iter().enumerate() {
                let from = 10 + *value as u8;
                send(&mut n, from as u64, host(from), LinkMessage::ProducerData {
                    hash,
                    data: DataItem::int32(*value),
                });
                // refresh an earlier contributor out of order
                if i == 2 {
                    let first = 10 + order[0] as u8;
                    send(&mut n, first as u64, host(first), LinkMessage::ProducerData {
                        hash,
                        data: DataItem::int32(order[0]),
                    });
                }
            }
            send(&mut n, 9, host(9), LinkMessage::ConsumerMatch { hash });
            assert_eq!(n.links.remote_count(hash), 3);
            assert_eq!(n.links.consumer_count(hash), 1);

            n.links.tick(STEP);
            let out = n.links.drain_outgoing();
            assert_eq!(consumer_data(&out, host(9)), vec![DataItem::int32(14)]);
        }
    }

    #[test]
    fn test_expired_remote_stops_contributing() {
        let mut n = node(1);
        n.db.insert("temperature", DataItem::int32(2));
        let hash = n.links.add_link(def(LinkMode::Send, Aggregation::Sum)).unwrap();
        elect(&n);

        send(&mut n, 5, host(5), LinkMessage::ProducerData {
            hash,
            data: DataItem::int32(3),
        });
        send(&mut n, 9, host(9), LinkMessage::ConsumerMatch { hash });

        n.links.tick(Duration::from_secs(31));
        assert_eq!(consumer_data(&n.links.drain_outgoing(), host(9)), vec![DataItem::int32(5)]);

        send(&mut n, 9, host(9), LinkMessage::ConsumerMatch { hash });
        n.links.tick(Duration::from_secs(2));
        assert_eq!(n.links.remote_count(hash), 0);
        assert_eq!(n.links.consumer_count(hash), 1);
        assert_eq!(consumer_data(&n.links.drain_outgoing(), host(9)), vec![DataItem::int32(2)]);
    }

    #[test]
    fn test_recv_leader_stores_aggregate() {
        let mut n = node(1);
        let dest = n.db.insert("room_temperature", DataItem::int32(0));
        let hash = n.links.add_link(def(LinkMode::Recv, Aggregation::Max)).unwrap();
        elect(&n);

        send(&mut n, 5, host(5), LinkMessage::ProducerData {
            hash,
            data: DataItem::int32(7),
        });
        send(&mut n, 6, host(6), LinkMessage::ProducerData {
            hash,
            data: DataItem::int32(4),
        });
        n.links.tick(STEP);
        assert_eq!(n.db.value(dest), Some(DataItem::int32(7)));
    }

    #[test]
    fn test_data_ignored_when_not_leading() {
        let mut n = node(1);
        let hash = n.links.add_link(def(LinkMode::Send, Aggregation::Sum)).unwrap();
        send(&mut n, 5, host(5), LinkMessage::ProducerData {
            hash,
            data: DataItem::int32(3),
        });
        send(&mut n, 9, host(9), LinkMessage::ConsumerMatch { hash });
        assert_eq!(n.links.remote_count(hash), 0);
        assert_eq!(n.links.consumer_count(hash), 0);
    }

    #[test]
    fn test_leader_discovery_queries() {
        let mut n = node(1);
        let send_hash = n.links.add_link(def(LinkMode::Send, Aggregation::Any)).unwrap();
        let recv_hash = n.links.add_link(def(LinkMode::Recv, Aggregation::Any)).unwrap();
        elect(&n);

        n.links.tick(Duration::from_secs(4));
        let out = n.links.drain_outgoing();
        assert!(out.iter().all(|o| o.destination.is_broadcast()));
        assert!(out.iter().any(|o| matches!(
            o.message.message,
            LinkMessage::ConsumerQuery { hash, .. } if hash == send_hash
        )));
        assert!(out.iter().any(|o| matches!(
            o.message.message,
            LinkMessage::ProducerQuery { hash, .. } if hash == recv_hash
        )));
    }

    #[test]
    fn test_consumer_query_matching() {
        let mut n = node(1);
        n.db.insert("room_temperature", DataItem::int32(0));
        let query = |tags: &[&str]| LinkMessage::ConsumerQuery {
            key: KeyHash::from_name("room_temperature"),
            query: TagQuery::from_tags(tags),
            mode: LinkMode::Send,
            hash: LinkHash::new(42),
        };

        send(&mut n, 2, host(2), query(&["garage"]));
        assert!(n.links.pop_outgoing().is_none());

        send(&mut n, 2, host(2), query(&["kitchen"]));
        let out = n.links.pop_outgoing().unwrap();
        assert_eq!(out.destination, Destination::Unicast(host(2)));
        assert_eq!(out.message.message, LinkMessage::ConsumerMatch { hash: LinkHash::new(42) });
    }

    #[test]
    fn test_producer_query_starts_producing() {
        let mut n = node(1);
        let source = n.db.insert("temperature", DataItem::int32(21));
        let hash = LinkHash::new(42);
        send(&mut n, 2, host(2), LinkMessage::ProducerQuery {
            key: source,
            query: TagQuery::from_tags(&["kitchen"]),
            rate: 100,
            hash,
        });
        assert_eq!(n.links.producer(hash).map(|p| p.leader), Some(host(2)));

        n.links.tick(STEP);
        let out = n.links.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].message.message,
            LinkMessage::ProducerData { hash, data: DataItem::int32(21) }
        );

        // unchanged value is held back until the retransmit interval
        n.links.tick(STEP);
        assert!(n.links.drain_outgoing().is_empty());
        n.db.set(source, DataItem::int32(22)).unwrap();
        n.links.tick(STEP);
        assert_eq!(n.links.drain_outgoing().len(), 1);
    }

    #[test]
    fn test_follower_sends_to_leader() {
        let mut n = node(1);
        n.db.insert("temperature", DataItem::int32(21));
        let link = def(LinkMode::Send, Aggregation::Avg);
        let hash = n.links.add_link(link).unwrap();

        let leader = SocketAddr::from(([10, 0, 0, 9], 32041));
        let offer = ServiceMessage::Offers {
            header: ServiceHeader::new(ServiceMsgType::Offer, Origin::new(9)),
            offers: vec![OfferRecord {
                service_id: LINK_SERVICE,
                group: hash.0,
                priority: 10,
                port: 44632,
                uptime: 30,
                flags: OfferFlags::new(OfferFlags::TEAM | OfferFlags::SERVER_VALID),
            }],
        };
        n.services.lock().handle_message(offer, leader);
        elect(&n);
        assert_eq!(n.links.role(hash), Some(LinkRole::Follower(host(9))));

        n.links.tick(STEP);
        let out = n.links.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, Destination::Unicast(host(9)));
        assert!(matches!(out[0].message.message, LinkMessage::ProducerData { .. }));

        // discovery re-announces interest to the leader
        n.links.tick(Duration::from_secs(4));
        let out = n.links.drain_outgoing();
        assert!(out.iter().any(|o| o.destination == Destination::Unicast(host(9))
            && o.message.message == LinkMessage::ConsumerMatch { hash }));
    }

    #[test]
    fn test_follower_stops_producing_when_leader_lost() {
        let mut n = node(1);
        n.db.insert("temperature", DataItem::int32(21));
        let hash = n.links.add_link(def(LinkMode::Send, Aggregation::Sum)).unwrap();

        let leader = SocketAddr::from(([10, 0, 0, 9], 32041));
        let offer = ServiceMessage::Offers {
            header: ServiceHeader::new(ServiceMsgType::Offer, Origin::new(9)),
            offers: vec![OfferRecord {
                service_id: LINK_SERVICE,
                group: hash.0,
                priority: 10,
                port: 44632,
                uptime: 30,
                flags: OfferFlags::new(OfferFlags::TEAM | OfferFlags::SERVER_VALID),
            }],
        };
        n.services.lock().handle_message(offer, leader);
        elect(&n);
        n.links.tick(STEP);
        assert!(n.links.producer(hash).is_some());
        n.links.drain_outgoing();

        // the leader goes quiet until the team times out
        {
            let mut services = n.services.lock();
            for _ in 0..65 {
                services.tick(Duration::from_secs(1));
            }
        }
        assert_eq!(n.links.role(hash), Some(LinkRole::Idle));

        n.links.tick(STEP);
        assert!(n.links.producer(hash).is_none());

        // a changed value is not sent anywhere
        n.db.insert("temperature", DataItem::int32(30));
        n.links.tick(STEP);
        let out = n.links.drain_outgoing();
        assert!(!out.iter().any(|o| matches!(o.message.message, LinkMessage::ProducerData { .. })));
    }

    #[test]
    fn test_consumer_data_written() {
        let mut n = node(1);
        let dest = n.db.insert("room_temperature", DataItem::int32(0));
        send(&mut n, 2, host(2), LinkMessage::ConsumerData {
            hash: LinkHash::new(42),
            key: dest,
            data: DataItem::int32(17),
        });
        assert_eq!(n.db.value(dest), Some(DataItem::int32(17)));

        // unknown keys are not created
        let other = KeyHash::from_name("other");
        send(&mut n, 2, host(2), LinkMessage::ConsumerData {
            hash: LinkHash::new(42),
            key: other,
            data: DataItem::int32(17),
        });
        assert_eq!(n.db.value(other), None);
    }

    #[test]
    fn test_remote_add_and_delete() {
        let mut n = node(1);
        let link = def(LinkMode::Recv, Aggregation::Min);
        send(&mut n, 2, host(2), LinkMessage::LinkAdd { def: link });
        let hash = link.link_hash();
        assert!(n.links.link(hash).is_some());

        // repeated adds are harmless
        send(&mut n, 2, host(2), LinkMessage::LinkAdd { def: link });
        assert_eq!(n.links.status().len(), 1);

        send(&mut n, 2, host(2), LinkMessage::LinkDelete { hash });
        assert!(n.links.link(hash).is_none());
        assert!(!n.services.lock().contains(ServiceKey::new(LINK_SERVICE, hash.0)));
    }

    #[test]
    fn test_foreign_universe_and_own_origin_dropped() {
        let mut n = node(1);
        n.db.insert("room_temperature", DataItem::int32(0));
        let message = LinkMessage::ConsumerQuery {
            key: KeyHash::from_name("room_temperature"),
            query: TagQuery::default(),
            mode: LinkMode::Send,
            hash: LinkHash::new(42),
        };

        let foreign = LinkPacket::new(Origin::new(2), 7, message.clone());
        n.links.handle_packet(&foreign.encode(), host(2));
        send(&mut n, 1, host(1), message);

        assert!(n.links.pop_outgoing().is_none());
        assert_eq!(n.links.stats().packets_dropped, 1);
    }
}
