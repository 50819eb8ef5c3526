//! Link manager configuration

use std::time::Duration;

use catbus_core::{
    LINK_CONSUMER_TIMEOUT, LINK_DISCOVER_RATE, LINK_MIN_RATE, LINK_PORT, LINK_PRODUCER_TIMEOUT,
    LINK_REMOTE_TIMEOUT, LINK_RETRANSMIT_RATE,
};

#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Link channel port, also offered as the Team port of every link
    pub port: u16,
    /// Only packets carrying this universe are accepted
    pub universe: u32,
    /// Team priority used when joining a link's election
    pub priority: u16,
    pub discover_rate: Duration,
    pub consumer_timeout: Duration,
    pub producer_timeout: Duration,
    pub remote_timeout: Duration,
    /// Unchanged producer data is still resent this often
    pub retransmit_rate: Duration,
    /// Floor applied to every link rate
    pub min_rate: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: LINK_PORT,
            universe: 0,
            priority: 1,
            discover_rate: LINK_DISCOVER_RATE,
            consumer_timeout: LINK_CONSUMER_TIMEOUT,
            producer_timeout: LINK_PRODUCER_TIMEOUT,
            remote_timeout: LINK_REMOTE_TIMEOUT,
            retransmit_rate: LINK_RETRANSMIT_RATE,
            min_rate: LINK_MIN_RATE,
        }
    }
}
