//! Catbus Node - socket and timer driver for the managers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use catbus_core::{CatbusError, CatbusResult, Destination, Origin};
use catbus_link::{Database, LinkManager};
use catbus_services::ServiceManager;
use catbus_transport::{start_receive_loop, UdpTransport};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::RuntimeConfig;

/// Receive channel depth per socket
const RECEIVE_BUFFER: usize = 1024;

/// A configured node, not yet on the network
pub struct Node {
    origin: Origin,
    config: RuntimeConfig,
    services: Arc<Mutex<ServiceManager>>,
    database: Arc<dyn Database>,
}

impl Node {
    pub fn new(config: RuntimeConfig, database: Arc<dyn Database>) -> CatbusResult<Self> {
        config.validate()?;
        let origin = config.origin();
        let services = ServiceManager::new(origin, config.services.to_config());

        Ok(Node {
            origin,
            config,
            services: Arc::new(Mutex::new(services)),
            database,
        })
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Register services before (or after) starting
    pub fn services(&self) -> Arc<Mutex<ServiceManager>> {
        Arc::clone(&self.services)
    }

    async fn bind(&self, port: u16, multicast: Option<std::net::Ipv4Addr>) -> CatbusResult<UdpTransport> {
        let mut transport = UdpTransport::bind(SocketAddr::new(self.config.bind_ip, port)).await?;
        let port = transport.local_addr().port();

        match multicast {
            Some(group) => {
                let interface = match self.config.bind_ip {
                    std::net::IpAddr::V4(ip) => ip,
                    std::net::IpAddr::V6(_) => {
                        return Err(CatbusError::TransportError("multicast needs an IPv4 bind address".into()))
                    }
                };
                transport.join_multicast(group, interface, port)?;
            }
            None => transport.enable_broadcast(SocketAddr::from((self.config.broadcast_ip, port)))?,
        }
        Ok(transport)
    }

    /// Bind both channels and spawn the manager tasks
    pub async fn start(self) -> CatbusResult<NodeHandle> {
        let service_transport = self.bind(self.config.services.port, self.config.services.multicast).await?;
        let link_transport = self.bind(self.config.links.port, None).await?;

        let link_config = self.config.links.to_config(link_transport.local_addr().port());
        let links = Arc::new(Mutex::new(LinkManager::new(
            self.origin,
            link_config,
            Arc::clone(&self.services),
            Arc::clone(&self.database),
        )));

        let (stop_tx, stop_rx) = watch::channel(false);
        let service_addr = service_transport.local_addr();
        let link_addr = link_transport.local_addr();

        let tasks = vec![
            tokio::spawn(run_services(
                service_transport,
                Arc::clone(&self.services),
                self.config.clone(),
                stop_rx.clone(),
            )),
            tokio::spawn(run_links(
                link_transport,
                Arc::clone(&links),
                self.config.links.tick_rate,
                stop_rx,
            )),
        ];

        info!(origin = %self.origin, %service_addr, %link_addr, "node started");
        Ok(NodeHandle {
            origin: self.origin,
            services: self.services,
            links,
            service_addr,
            link_addr,
            stop: stop_tx,
            tasks,
        })
    }
}

/// A running node
pub struct NodeHandle {
    origin: Origin,
    services: Arc<Mutex<ServiceManager>>,
    links: Arc<Mutex<LinkManager>>,
    service_addr: SocketAddr,
    link_addr: SocketAddr,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn services(&self) -> Arc<Mutex<ServiceManager>> {
        Arc::clone(&self.services)
    }

    pub fn links(&self) -> Arc<Mutex<LinkManager>> {
        Arc::clone(&self.links)
    }

    pub fn service_addr(&self) -> SocketAddr {
        self.service_addr
    }

    pub fn link_addr(&self) -> SocketAddr {
        self.link_addr
    }

    /// Stop all tasks; led services are announced as shut down first
    pub async fn shutdown(self) -> CatbusResult<()> {
        let _ = self.stop.send(true);
        for task in self.tasks {
            task.await
                .map_err(|e| CatbusError::TransportError(format!("node task failed: {}", e)))?;
        }
        info!(origin = %self.origin, "node stopped");
        Ok(())
    }
}

async fn flush(transport: &UdpTransport, packets: Vec<(Destination, Vec<u8>)>) {
    for (destination, bytes) in packets {
        if let Err(e) = transport.send(destination, &bytes).await {
            warn!(?destination, error = %e, "send failed");
        }
    }
}

async fn run_services(
    transport: UdpTransport,
    services: Arc<Mutex<ServiceManager>>,
    config: RuntimeConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut incoming = start_receive_loop(transport.socket(), RECEIVE_BUFFER);
    let mut state_tick = interval(config.services.tick_rate);
    let mut offer_tick = interval(config.services.offer_rate);
    state_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    offer_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        let outgoing = tokio::select! {
            _ = stop.changed() => break,
            packet = incoming.recv() => {
                let Some((data, host)) = packet else { break };
                let mut services = services.lock();
                services.handle_packet(&data, host);
                services.drain_encoded()
            }
            now = state_tick.tick() => {
                let elapsed = now.duration_since(last_tick);
                last_tick = now;
                let mut services = services.lock();
                services.tick(elapsed);
                services.drain_encoded()
            }
            _ = offer_tick.tick() => {
                let mut services = services.lock();
                services.broadcast_offers();
                services.drain_encoded()
            }
        };
        flush(&transport, outgoing).await;
    }

    let (shutdown, pending) = {
        let mut services = services.lock();
        let shutdown: Vec<Vec<u8>> = services
            .shutdown_messages()
            .iter()
            .filter_map(|message| message.encode().ok())
            .collect();
        (shutdown, services.drain_encoded())
    };
    flush(&transport, pending).await;

    if !shutdown.is_empty() {
        debug!(messages = shutdown.len(), "announcing shutdown");
        for round in 0..config.services.shutdown_repeats {
            if round > 0 {
                tokio::time::sleep(config.services.shutdown_interval).await;
            }
            let packets = shutdown
                .iter()
                .map(|bytes| (Destination::Broadcast, bytes.clone()))
                .collect();
            flush(&transport, packets).await;
        }
    }
}

async fn run_links(
    transport: UdpTransport,
    links: Arc<Mutex<LinkManager>>,
    tick_rate: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut incoming = start_receive_loop(transport.socket(), RECEIVE_BUFFER);
    let mut base_tick = interval(tick_rate);
    base_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        let outgoing = tokio::select! {
            _ = stop.changed() => break,
            packet = incoming.recv() => {
                let Some((data, host)) = packet else { break };
                let mut links = links.lock();
                links.handle_packet(&data, host);
                links.drain_encoded()
            }
            now = base_tick.tick() => {
                let elapsed = now.duration_since(last_tick);
                last_tick = now;
                let mut links = links.lock();
                links.tick(elapsed);
                links.drain_encoded()
            }
        };
        flush(&transport, outgoing).await;
    }
}
