use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-interface counters of the IPSec container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Current counters for every interface; empty when the container does
    /// not exist or is not running.
    async fn interface_counters(&self) -> Result<Vec<InterfaceCounters>>;
}

/// rx + tx summed over every interface.
pub fn combined_bytes(interfaces: &[InterfaceCounters]) -> u64 {
    interfaces.iter().fold(0u64, |total, iface| {
        total
            .saturating_add(iface.rx_bytes)
            .saturating_add(iface.tx_bytes)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitDelta {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Turns successive combined counter readings into deltas.
///
/// The container only exposes rx+tx per interface, not traffic direction
/// through the tunnel, so every delta is split evenly between sent and
/// received. This is an approximation, not a measurement.
#[derive(Debug, Clone, Default)]
pub struct IpsecDeltaTracker {
    last_observed: Option<u64>,
}

impl IpsecDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_observed(&self) -> Option<u64> {
        self.last_observed
    }

    /// Records `current` as the new baseline and returns the traffic since
    /// the previous reading.
    ///
    /// Returns `None` on the first reading and whenever the counter went
    /// backwards (container restart or counter discontinuity). A zero
    /// reading means the container could not be read; it clears the
    /// baseline so the next real reading only re-establishes it.
    pub fn observe(&mut self, current: u64) -> Option<SplitDelta> {
        if current == 0 {
            self.last_observed = None;
            return None;
        }
        let previous = self.last_observed.replace(current)?;
        let delta = current.checked_sub(previous)?;

        let bytes_sent = delta / 2;
        Some(SplitDelta {
            bytes_sent,
            bytes_received: delta - bytes_sent,
        })
    }

    pub fn reset(&mut self) {
        self.last_observed = None;
    }
}
