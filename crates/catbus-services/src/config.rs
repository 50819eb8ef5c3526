//! Service manager configuration

use std::time::Duration;

use catbus_core::{
    SERVICE_CONNECTED_PING_THRESHOLD, SERVICE_CONNECTED_TIMEOUT, SERVICE_LISTEN_TIMEOUT,
    SERVICE_OFFER_RATE, SERVICE_RATE, SERVICE_SHUTDOWN_INTERVAL, SERVICE_SHUTDOWN_REPEATS,
};

/// Timing of the election state machines
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// State machine tick
    pub tick_rate: Duration,
    /// Offer broadcast interval
    pub offer_rate: Duration,
    /// How long a node listens before deciding
    pub listen_timeout: Duration,
    /// How long a follower keeps a silent leader
    pub connected_timeout: Duration,
    /// Query the leader once the remaining CONNECTED timeout drops below this
    pub ping_threshold: Duration,
    /// Copies of the shutdown announcement
    pub shutdown_repeats: u32,
    pub shutdown_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            tick_rate: SERVICE_RATE,
            offer_rate: SERVICE_OFFER_RATE,
            listen_timeout: SERVICE_LISTEN_TIMEOUT,
            connected_timeout: SERVICE_CONNECTED_TIMEOUT,
            ping_threshold: SERVICE_CONNECTED_PING_THRESHOLD,
            shutdown_repeats: SERVICE_SHUTDOWN_REPEATS,
            shutdown_interval: SERVICE_SHUTDOWN_INTERVAL,
        }
    }
}
