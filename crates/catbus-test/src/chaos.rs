//! Chaos network for Catbus simulations
//!
//! Simulates an unreliable LAN between two endpoints:
//! - Latency with uniform jitter
//! - Packet loss
//! - Duplication

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Network chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Base latency
    pub base_latency: Duration,
    /// Extra latency drawn uniformly from this range, in milliseconds
    pub jitter_ms: (u32, u32),
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Duplicate probability
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::lan()
    }
}

impl ChaosConfig {
    /// Every packet arrives on the next step
    pub fn perfect() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            jitter_ms: (0, 0),
            loss_rate: 0.0,
            duplicate_prob: 0.0,
        }
    }

    /// Typical switched LAN
    pub fn lan() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(1),
            jitter_ms: (0, 5),
            loss_rate: 0.01,
            duplicate_prob: 0.001,
        }
    }

    /// Congested wireless network
    pub fn lossy() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(5),
            jitter_ms: (0, 80),
            loss_rate: 0.2,
            duplicate_prob: 0.05,
        }
    }
}

/// Packet in the chaos network
#[derive(Clone, Debug)]
struct ChaosPacket<T> {
    payload: T,
    delivery_time: Duration,
}

/// Chaos network statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub packets_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

/// One direction of a simulated link
pub struct ChaosNetwork<T> {
    config: ChaosConfig,
    rng: StdRng,
    /// Packets in flight, ordered by delivery time
    in_flight: VecDeque<ChaosPacket<T>>,
    current_time: Duration,
    stats: ChaosStats,
}

impl<T: Clone> ChaosNetwork<T> {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosNetwork {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            current_time: Duration::ZERO,
            stats: ChaosStats::default(),
        }
    }

    fn latency(&mut self) -> Duration {
        let (min, max) = self.config.jitter_ms;
        let jitter = self.rng.gen_range(min..=max.max(min));
        self.config.base_latency + Duration::from_millis(jitter as u64)
    }

    fn schedule(&mut self, payload: T, delivery_time: Duration) {
        let pos = self
            .in_flight
            .iter()
            .position(|p| p.delivery_time > delivery_time)
            .unwrap_or(self.in_flight.len());
        self.in_flight.insert(pos, ChaosPacket { payload, delivery_time });
    }

    /// Send a packet into the chaos network
    pub fn send(&mut self, payload: T) {
        self.stats.packets_sent += 1;

        if self.rng.gen::<f64>() < self.config.loss_rate {
            self.stats.packets_lost += 1;
            return;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            let delivery_time = self.current_time + self.latency();
            self.schedule(payload.clone(), delivery_time);
            self.stats.packets_duplicated += 1;
        }

        let delivery_time = self.current_time + self.latency();
        self.schedule(payload, delivery_time);
    }

    /// Advance time and receive delivered packets
    pub fn tick(&mut self, dt: Duration) -> Vec<T> {
        self.current_time += dt;

        let mut delivered = Vec::new();
        while self
            .in_flight
            .front()
            .map_or(false, |p| p.delivery_time <= self.current_time)
        {
            if let Some(packet) = self.in_flight.pop_front() {
                self.stats.packets_delivered += 1;
                delivered.push(packet.payload);
            }
        }
        delivered
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_delivers_next_tick() {
        let mut network = ChaosNetwork::new(ChaosConfig::perfect(), 1);
        network.send(1u8);
        network.send(2u8);
        assert_eq!(network.tick(Duration::from_millis(10)), vec![1, 2]);
        assert_eq!(network.in_flight(), 0);
    }

    #[test]
    fn test_lossy_drops_some() {
        let mut network = ChaosNetwork::new(ChaosConfig::lossy(), 12345);
        for i in 0..1000u32 {
            network.send(i);
        }
        let mut delivered = 0;
        for _ in 0..100 {
            delivered += network.tick(Duration::from_millis(10)).len();
        }

        let stats = network.stats();
        assert!(stats.loss_rate() > 0.1 && stats.loss_rate() < 0.3);
        assert_eq!(delivered as u64, stats.packets_delivered);
        assert_eq!(network.in_flight(), 0);
    }

    #[test]
    fn test_same_seed_same_fate() {
        let run = || {
            let mut network = ChaosNetwork::new(ChaosConfig::lossy(), 7);
            for i in 0..200u32 {
                network.send(i);
            }
            network.tick(Duration::from_secs(1))
        };
        assert_eq!(run(), run());
    }
}
