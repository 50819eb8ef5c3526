//! Protocol constants shared by the service and link layers

use std::time::Duration;

/// UDP port of the service (leader election) channel
pub const SERVICES_PORT: u16 = 32041;

/// Multicast group of the service channel
pub const SERVICES_MCAST_ADDR: [u8; 4] = [239, 43, 96, 31];

pub const SERVICES_MAGIC: u32 = 0x5652_4553;
pub const SERVICES_VERSION: u8 = 2;

/// State machine tick
pub const SERVICE_RATE: Duration = Duration::from_secs(1);

/// Offer broadcast interval
pub const SERVICE_OFFER_RATE: Duration = Duration::from_secs(4);

pub const SERVICE_LISTEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const SERVICE_CONNECTED_TIMEOUT: Duration = Duration::from_secs(64);

/// Ping the tracked leader once the remaining CONNECTED timeout drops below this
pub const SERVICE_CONNECTED_PING_THRESHOLD: Duration = Duration::from_secs(48);

/// Uptime difference (seconds) inside which offers tie-break on origin
pub const SERVICE_UPTIME_MIN_DIFF: f64 = 5.0;

pub const SERVICE_SHUTDOWN_REPEATS: u32 = 3;
pub const SERVICE_SHUTDOWN_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum offers carried by one offer message
pub const SERVICE_MAX_OFFERS: usize = 64;

/// UDP port of the link channel
pub const LINK_PORT: u16 = 44632;

pub const LINK_MAGIC: u32 = 0x4b4e_494c;
pub const LINK_VERSION: u8 = 1;

/// Service id used for every link Team
pub const LINK_SERVICE: u32 = 0x4b4e_494c;

pub const LINK_DISCOVER_RATE: Duration = Duration::from_secs(4);
pub const LINK_CONSUMER_TIMEOUT: Duration = Duration::from_secs(32);
pub const LINK_PRODUCER_TIMEOUT: Duration = Duration::from_secs(32);
pub const LINK_REMOTE_TIMEOUT: Duration = Duration::from_secs(32);
pub const LINK_RETRANSMIT_RATE: Duration = Duration::from_secs(8);
pub const LINK_MIN_RATE: Duration = Duration::from_millis(20);

/// Base tick of the link manager; link rates are rounded to it
pub const LINK_BASE_RATE: Duration = Duration::from_millis(20);

/// Number of tag hashes in a link query
pub const LINK_QUERY_LEN: usize = 8;

/// Maximum array length in a data payload
pub const MAX_ARRAY_LEN: usize = 64;

/// Maximum datagram size (MTU-friendly)
pub const MAX_PACKET_SIZE: usize = 1400;
