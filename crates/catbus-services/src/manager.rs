//! Service manager - owns every local Service and routes the service channel

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use catbus_core::{
    CatbusError, CatbusResult, Destination, Origin, Outbound, ServiceKey, SERVICE_MAX_OFFERS,
};
use catbus_wire::{OfferRecord, ServiceHeader, ServiceMessage, ServiceMsgType};
use tracing::{debug, info, warn};

use crate::{Correction, Offer, Service, ServiceConfig, ServiceState, ServiceStatus};

/// Outbound service channel message
pub type ServiceOutbound = Outbound<ServiceMessage>;

#[derive(Clone, Debug, Default)]
pub struct ServiceStats {
    pub packets_in: u64,
    pub packets_dropped: u64,
    pub offers_in: u64,
    pub queries_in: u64,
    pub corrections: u64,
    pub pings: u64,
}

/// All Services and Teams registered by this process
pub struct ServiceManager {
    origin: Origin,
    config: ServiceConfig,
    services: BTreeMap<ServiceKey, Service>,
    outgoing: VecDeque<ServiceOutbound>,
    stats: ServiceStats,
}

impl ServiceManager {
    pub fn new(origin: Origin, config: ServiceConfig) -> Self {
        ServiceManager {
            origin,
            config,
            services: BTreeMap::new(),
            outgoing: VecDeque::new(),
            stats: ServiceStats::default(),
        }
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[inline]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    fn register(&mut self, service: Service) -> CatbusResult<()> {
        let key = service.key();
        if self.services.contains_key(&key) {
            return Err(CatbusError::DuplicateService(key));
        }
        self.services.insert(key, service);
        Ok(())
    }

    /// Offer a plain service. It leads until a peer proves otherwise.
    pub fn offer(&mut self, service_id: u32, group: u64, port: u16, priority: u16) -> CatbusResult<()> {
        if priority == 0 {
            return Err(CatbusError::InvalidArgument(
                "offered services need a priority above zero".into(),
            ));
        }

        let key = ServiceKey::new(service_id, group);
        self.register(Service::new(key, self.origin, port, priority, &self.config))?;
        info!(%key, port, priority, "offering service");
        Ok(())
    }

    /// Join a Team; every member gossips and the best one leads
    pub fn join_team(&mut self, service_id: u32, group: u64, port: u16, priority: u16) -> CatbusResult<()> {
        let key = ServiceKey::new(service_id, group);
        self.register(Service::team(key, self.origin, port, priority, &self.config))?;
        info!(%key, port, priority, "joined team");
        Ok(())
    }

    /// Follow a service without ever leading it. The query goes to `host`
    /// when given, otherwise to everyone.
    pub fn listen(&mut self, service_id: u32, group: u64, host: Option<SocketAddr>) -> CatbusResult<()> {
        let key = ServiceKey::new(service_id, group);
        self.register(Service::new(key, self.origin, 0, 0, &self.config))?;
        debug!(%key, ?host, "listening for service");

        let query = self.query_message(key);
        let destination = host.map_or(Destination::Broadcast, Destination::Unicast);
        self.outgoing.push_back(Outbound {
            destination,
            message: query,
        });
        Ok(())
    }

    /// Remove a registered service. A leading service announces its
    /// departure so followers reset without waiting for a timeout.
    pub fn cancel(&mut self, service_id: u32, group: u64) -> CatbusResult<()> {
        let key = ServiceKey::new(service_id, group);
        let service = self
            .services
            .remove(&key)
            .ok_or(CatbusError::ServiceNotFound(key))?;

        if service.is_server() {
            let message = self.offers_message(vec![service.offer().to_record()], true);
            for _ in 0..self.config.shutdown_repeats.max(1) {
                self.outgoing.push_back(Outbound::broadcast(message.clone()));
            }
        }
        info!(%key, "service cancelled");
        Ok(())
    }

    pub fn contains(&self, key: ServiceKey) -> bool {
        self.services.contains_key(&key)
    }

    pub fn state(&self, key: ServiceKey) -> Option<ServiceState> {
        self.services.get(&key).map(Service::state)
    }

    pub fn is_server(&self, key: ServiceKey) -> bool {
        self.state(key) == Some(ServiceState::Server)
    }

    pub fn is_connected(&self, key: ServiceKey) -> bool {
        self.state(key) == Some(ServiceState::Connected)
    }

    /// Endpoint of the leader we follow for `key`
    pub fn server(&self, key: ServiceKey) -> Option<SocketAddr> {
        self.services.get(&key).and_then(Service::server)
    }

    /// Our current offer for `key`
    pub fn own_offer(&self, key: ServiceKey) -> Option<Offer> {
        self.services.get(&key).map(Service::offer)
    }

    pub fn status(&self, service_id: u32, group: u64) -> Option<ServiceStatus> {
        self.services
            .get(&ServiceKey::new(service_id, group))
            .map(Service::status)
    }

    pub fn services(&self) -> Vec<ServiceStatus> {
        self.services.values().map(Service::status).collect()
    }

    fn query_message(&self, key: ServiceKey) -> ServiceMessage {
        ServiceMessage::Query {
            header: ServiceHeader::new(ServiceMsgType::Query, self.origin),
            key,
        }
    }

    fn offers_message(&self, offers: Vec<OfferRecord>, shutdown: bool) -> ServiceMessage {
        let mut header = ServiceHeader::new(ServiceMsgType::Offer, self.origin);
        header.flags.set_shutdown(shutdown);
        ServiceMessage::Offers { header, offers }
    }

    fn chunked_offers(&self, records: Vec<OfferRecord>, shutdown: bool) -> Vec<ServiceMessage> {
        records
            .chunks(SERVICE_MAX_OFFERS)
            .map(|chunk| self.offers_message(chunk.to_vec(), shutdown))
            .collect()
    }

    /// Decode and handle a datagram. Bad packets are logged and dropped.
    pub fn handle_packet(&mut self, data: &[u8], host: SocketAddr) {
        self.stats.packets_in += 1;
        match ServiceMessage::decode(data) {
            Ok(message) => self.handle_message(message, host),
            Err(e) => {
                self.stats.packets_dropped += 1;
                debug!(%host, error = %e, "dropping service packet");
            }
        }
    }

    pub fn handle_message(&mut self, message: ServiceMessage, host: SocketAddr) {
        if message.header().origin == self.origin {
            return;
        }

        match message {
            ServiceMessage::Offers { header, offers } => {
                self.stats.offers_in += offers.len() as u64;
                if header.flags.is_shutdown() {
                    self.handle_shutdown(&offers, host);
                } else {
                    self.handle_offers(header.origin, &offers, host);
                }
            }
            ServiceMessage::Query { key, .. } => {
                self.stats.queries_in += 1;
                self.handle_query(key, host);
            }
        }
    }

    fn handle_offers(&mut self, origin: Origin, records: &[OfferRecord], host: SocketAddr) {
        let mut corrections = Vec::new();

        for record in records {
            let Some(service) = self.services.get_mut(&record.key()) else {
                continue;
            };

            let offer = Offer::from_record(origin, record);
            if service.process_offer(&offer, host) == Correction::UnicastOffer {
                corrections.push(service.offer().to_record());
            }
        }

        if !corrections.is_empty() {
            debug!(%host, count = corrections.len(), "correcting stale peer");
            self.stats.corrections += 1;
            for message in self.chunked_offers(corrections, false) {
                self.outgoing.push_back(Outbound::unicast(host, message));
            }
        }
    }

    fn handle_shutdown(&mut self, records: &[OfferRecord], host: SocketAddr) {
        for record in records {
            if let Some(service) = self.services.get_mut(&record.key()) {
                service.process_shutdown(host);
            }
        }
    }

    fn handle_query(&mut self, key: ServiceKey, host: SocketAddr) {
        let Some(service) = self.services.get(&key) else {
            return;
        };

        if service.is_server() {
            let message = self.offers_message(vec![service.offer().to_record()], false);
            self.outgoing.push_back(Outbound::unicast(host, message));
        }
    }

    /// State tick: advance every Service and ping leaders that went quiet
    pub fn tick(&mut self, elapsed: Duration) {
        let mut pings = Vec::new();

        for service in self.services.values_mut() {
            service.tick(elapsed);

            if service.needs_ping(self.config.ping_threshold) {
                if let Some(host) = service.best_host() {
                    pings.push((service.key(), host));
                }
            }
        }

        for (key, host) in pings {
            debug!(%key, %host, "pinging quiet leader");
            self.stats.pings += 1;
            let query = self.query_message(key);
            self.outgoing.push_back(Outbound::unicast(host, query));
        }
    }

    /// Offers to gossip: every SERVER plus every Team member
    fn gossip_records(&self) -> Vec<OfferRecord> {
        self.services
            .values()
            .filter(|s| s.is_server() || s.is_team())
            .map(|s| s.offer().to_record())
            .collect()
    }

    /// Offer tick: broadcast our offers
    pub fn broadcast_offers(&mut self) {
        let records = self.gossip_records();
        if records.is_empty() {
            return;
        }

        for message in self.chunked_offers(records, false) {
            self.outgoing.push_back(Outbound::broadcast(message));
        }
    }

    /// Shutdown announcement for every service we lead; empty if none.
    /// The caller sends it `shutdown_repeats` times.
    pub fn shutdown_messages(&self) -> Vec<ServiceMessage> {
        let records: Vec<_> = self
            .services
            .values()
            .filter(|s| s.is_server())
            .map(|s| s.offer().to_record())
            .collect();

        if records.is_empty() {
            return Vec::new();
        }
        self.chunked_offers(records, true)
    }

    pub fn pop_outgoing(&mut self) -> Option<ServiceOutbound> {
        self.outgoing.pop_front()
    }

    pub fn drain_outgoing(&mut self) -> Vec<ServiceOutbound> {
        self.outgoing.drain(..).collect()
    }

    /// Encode everything queued, dropping (and logging) what fails to encode
    pub fn drain_encoded(&mut self) -> Vec<(Destination, Vec<u8>)> {
        self.outgoing
            .drain(..)
            .filter_map(|out| match out.message.encode() {
                Ok(bytes) => Some((out.destination, bytes)),
                Err(e) => {
                    warn!(error = %e, "failed to encode service message");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catbus_wire::OfferFlags;

    fn host(n: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, n], 32041))
    }

    fn manager(origin: u64) -> ServiceManager {
        ServiceManager::new(Origin::new(origin), ServiceConfig::default())
    }

    fn server_offer(origin: u64, priority: u16, team: bool) -> ServiceMessage {
        let mut flags = OfferFlags::new(OfferFlags::SERVER_VALID);
        flags.set_team(team);
        ServiceMessage::Offers {
            header: ServiceHeader::new(ServiceMsgType::Offer, Origin::new(origin)),
            offers: vec![OfferRecord {
                service_id: 0x1234,
                group: 0x5678,
                priority,
                port: 9000,
                uptime: 20,
                flags,
            }],
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut mgr = manager(1);
        mgr.join_team(0x1234, 0x5678, 0, 5).unwrap();
        assert!(matches!(
            mgr.join_team(0x1234, 0x5678, 0, 5),
            Err(CatbusError::DuplicateService(_))
        ));
        assert!(matches!(
            mgr.offer(0x1234, 0x5678, 0, 5),
            Err(CatbusError::DuplicateService(_))
        ));
        assert!(matches!(
            mgr.listen(0x1234, 0x5678, None),
            Err(CatbusError::DuplicateService(_))
        ));
    }

    #[test]
    fn test_offer_requires_priority() {
        let mut mgr = manager(1);
        assert!(matches!(
            mgr.offer(1, 2, 0, 0),
            Err(CatbusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_listen_sends_query() {
        let mut mgr = manager(1);
        mgr.listen(0x1234, 0x5678, Some(host(9))).unwrap();
        let out = mgr.pop_outgoing().unwrap();
        assert_eq!(out.destination, Destination::Unicast(host(9)));
        assert!(matches!(out.message, ServiceMessage::Query { .. }));

        mgr.listen(0x1234, 0x9999, None).unwrap();
        assert!(mgr.pop_outgoing().unwrap().destination.is_broadcast());
    }

    #[test]
    fn test_query_answered_only_by_server() {
        let mut mgr = manager(1);
        mgr.offer(0x1234, 0x5678, 9000, 5).unwrap();
        mgr.join_team(0x1234, 0x9999, 9000, 5).unwrap();

        let query = |group| ServiceMessage::Query {
            header: ServiceHeader::new(ServiceMsgType::Query, Origin::new(2)),
            key: ServiceKey::new(0x1234, group),
        };

        mgr.handle_message(query(0x9999), host(2));
        assert!(mgr.pop_outgoing().is_none());

        mgr.handle_message(query(0x5678), host(2));
        let out = mgr.pop_outgoing().unwrap();
        assert_eq!(out.destination, Destination::Unicast(host(2)));
        match out.message {
            ServiceMessage::Offers { offers, .. } => {
                assert_eq!(offers.len(), 1);
                assert!(offers[0].flags.is_server_valid());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_lists_servers_and_teams() {
        let mut mgr = manager(1);
        mgr.offer(1, 1, 0, 5).unwrap();
        mgr.join_team(2, 2, 0, 5).unwrap();
        mgr.listen(3, 3, None).unwrap();
        mgr.drain_outgoing();

        mgr.broadcast_offers();
        let out = mgr.drain_outgoing();
        assert_eq!(out.len(), 1);
        match &out[0].message {
            ServiceMessage::Offers { header, offers } => {
                assert!(!header.flags.is_shutdown());
                assert_eq!(offers.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_chunks_large_offer_sets() {
        let mut mgr = manager(1);
        for group in 0..(SERVICE_MAX_OFFERS as u64 + 3) {
            mgr.offer(7, group, 0, 1).unwrap();
        }
        mgr.broadcast_offers();
        assert_eq!(mgr.drain_outgoing().len(), 2);
    }

    #[test]
    fn test_listener_follows_and_pings() {
        let mut mgr = manager(1);
        mgr.listen(0x1234, 0x5678, None).unwrap();
        mgr.drain_outgoing();

        mgr.handle_message(server_offer(2, 5, false), host(2));
        for _ in 0..11 {
            mgr.tick(Duration::from_secs(1));
        }
        let key = ServiceKey::new(0x1234, 0x5678);
        assert!(mgr.is_connected(key));
        assert_eq!(mgr.server(key), Some(SocketAddr::from(([10, 0, 0, 2], 9000))));
        assert!(mgr.drain_outgoing().is_empty());

        // quiet leader: pinged once the timeout drops below the threshold
        for _ in 0..17 {
            mgr.tick(Duration::from_secs(1));
        }
        let out = mgr.drain_outgoing();
        assert!(!out.is_empty());
        assert!(out
            .iter()
            .all(|o| o.destination == Destination::Unicast(host(2))));
    }

    #[test]
    fn test_shutdown_flag_resets_follower() {
        let mut mgr = manager(1);
        mgr.listen(0x1234, 0x5678, None).unwrap();
        mgr.handle_message(server_offer(2, 5, false), host(2));
        for _ in 0..11 {
            mgr.tick(Duration::from_secs(1));
        }
        let key = ServiceKey::new(0x1234, 0x5678);
        assert!(mgr.is_connected(key));

        let mut shutdown = server_offer(2, 5, false);
        if let ServiceMessage::Offers { header, .. } = &mut shutdown {
            header.flags.set_shutdown(true);
        }
        mgr.handle_message(shutdown, host(2));
        assert_eq!(mgr.state(key), Some(ServiceState::Listen));
    }

    #[test]
    fn test_server_corrects_worse_team_peer() {
        let mut mgr = manager(9);
        mgr.join_team(0x1234, 0x5678, 0, 7).unwrap();
        for _ in 0..11 {
            mgr.tick(Duration::from_secs(1));
        }
        assert!(mgr.is_server(ServiceKey::new(0x1234, 0x5678)));

        mgr.handle_message(server_offer(2, 5, true), host(2));
        let out = mgr.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, Destination::Unicast(host(2)));
        assert_eq!(mgr.stats().corrections, 1);
    }

    #[test]
    fn test_server_ignores_follower_gossip() {
        let mut mgr = manager(9);
        mgr.join_team(0x1234, 0x5678, 0, 5).unwrap();
        for _ in 0..11 {
            mgr.tick(Duration::from_secs(1));
        }
        mgr.drain_outgoing();

        let mut gossip = server_offer(2, 3, true);
        if let ServiceMessage::Offers { offers, .. } = &mut gossip {
            offers[0].flags.set_server_valid(false);
        }
        for _ in 0..5 {
            mgr.handle_message(gossip.clone(), host(2));
        }

        assert!(mgr.drain_outgoing().is_empty());
        assert_eq!(mgr.stats().corrections, 0);
        assert!(mgr.is_server(ServiceKey::new(0x1234, 0x5678)));
    }

    #[test]
    fn test_cancel_announces_shutdown() {
        let mut mgr = manager(1);
        mgr.offer(1, 1, 0, 5).unwrap();
        mgr.cancel(1, 1).unwrap();
        assert!(!mgr.contains(ServiceKey::new(1, 1)));

        let out = mgr.drain_outgoing();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|o| match &o.message {
            ServiceMessage::Offers { header, .. } => header.flags.is_shutdown(),
            _ => false,
        }));

        assert!(matches!(mgr.cancel(1, 1), Err(CatbusError::ServiceNotFound(_))));
    }

    #[test]
    fn test_shutdown_messages_cover_servers_only() {
        let mut mgr = manager(1);
        assert!(mgr.shutdown_messages().is_empty());
        mgr.offer(1, 1, 0, 5).unwrap();
        mgr.join_team(2, 2, 0, 5).unwrap();
        let messages = mgr.shutdown_messages();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_garbage_dropped() {
        let mut mgr = manager(1);
        mgr.handle_packet(&[1, 2, 3], host(2));
        assert_eq!(mgr.stats().packets_dropped, 1);
        assert!(mgr.pop_outgoing().is_none());
    }

    #[test]
    fn test_own_packets_ignored() {
        let mut mgr = manager(2);
        mgr.listen(0x1234, 0x5678, None).unwrap();
        mgr.handle_message(server_offer(2, 5, false), host(2));
        assert!(mgr.status(0x1234, 0x5678).unwrap().best.is_none());
    }
}
