//! Offers - candidacy snapshots and their ordering

use std::cmp::Ordering;

use catbus_core::{Origin, ServiceKey, SERVICE_UPTIME_MIN_DIFF};
use catbus_wire::{OfferFlags, OfferRecord};

/// One node's candidacy for one service key.
///
/// Offers are regenerated from the owning Service every time they are
/// needed; the only long-lived copy is a Service's best known rival.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Offer {
    pub origin: Origin,
    pub key: ServiceKey,
    pub priority: u16,
    pub port: u16,
    /// Seconds spent as SERVER
    pub uptime: f64,
    pub flags: OfferFlags,
}

impl Offer {
    pub fn from_record(origin: Origin, record: &OfferRecord) -> Self {
        Offer {
            origin,
            key: record.key(),
            priority: record.priority,
            port: record.port,
            uptime: record.uptime as f64,
            flags: record.flags,
        }
    }

    pub fn to_record(&self) -> OfferRecord {
        OfferRecord {
            service_id: self.key.service_id,
            group: self.key.group,
            priority: self.priority,
            port: self.port,
            uptime: self.uptime.max(0.0).min(u32::MAX as f64) as u32,
            flags: self.flags,
        }
    }

    #[inline]
    pub fn is_team(&self) -> bool {
        self.flags.is_team()
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.flags.is_server_valid()
    }

    /// Ordering used for every leadership decision.
    ///
    /// Higher priority wins. At equal priority a longer uptime wins, but
    /// only once the difference leaves the hysteresis band; inside the band
    /// the higher origin wins so every node picks the same candidate.
    /// Flags take no part in the comparison.
    pub fn compare(&self, other: &Offer) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => {}
            ord => return ord,
        }

        let diff = self.uptime - other.uptime;
        if diff.abs() > SERVICE_UPTIME_MIN_DIFF {
            return if diff > 0.0 {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        self.origin.cmp(&other.origin)
    }

    /// True if this offer strictly wins against `other`
    #[inline]
    pub fn beats(&self, other: &Offer) -> bool {
        self.compare(other) == Ordering::Greater
    }
}
