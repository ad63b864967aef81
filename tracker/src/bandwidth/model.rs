use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Running totals for one tunnel protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedData {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    #[serde(default)]
    pub session_count: u64,
}

impl AccumulatedData {
    pub fn record(&mut self, bytes_sent: u64, bytes_received: u64) {
        self.total_bytes_sent = self.total_bytes_sent.saturating_add(bytes_sent);
        self.total_bytes_received = self.total_bytes_received.saturating_add(bytes_received);
    }

    pub fn record_sessions_ended(&mut self, count: u64) {
        self.session_count = self.session_count.saturating_add(count);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes_sent.saturating_add(self.total_bytes_received)
    }

    /// Always derived from the byte totals.
    pub fn total_bandwidth_mb(&self) -> f64 {
        bytes_to_mb(self.total_bytes())
    }
}

/// One OpenVPN session as reported by the most recent status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    pub common_name: String,
    pub real_address: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connected_since: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Root of the persisted bandwidth document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthAccumulator {
    pub last_updated: DateTime<Utc>,
    pub last_reset_at: DateTime<Utc>,
    #[serde(default)]
    pub openvpn: AccumulatedData,
    #[serde(default)]
    pub ipsec: AccumulatedData,
    #[serde(default)]
    pub client_states: BTreeMap<String, ClientState>,
}

impl BandwidthAccumulator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_updated: now,
            last_reset_at: now,
            openvpn: AccumulatedData::default(),
            ipsec: AccumulatedData::default(),
            client_states: BTreeMap::new(),
        }
    }

    pub fn metrics(&self) -> BandwidthMetrics {
        let openvpn = OpenVpnMetrics {
            total_bytes_sent: self.openvpn.total_bytes_sent,
            total_bytes_received: self.openvpn.total_bytes_received,
            total_bandwidth_mb: self.openvpn.total_bandwidth_mb(),
            active_clients: self.client_states.len(),
            session_count: self.openvpn.session_count,
        };
        let ipsec = IpsecMetrics {
            total_bytes_sent: self.ipsec.total_bytes_sent,
            total_bytes_received: self.ipsec.total_bytes_received,
            total_bandwidth_mb: self.ipsec.total_bandwidth_mb(),
        };

        BandwidthMetrics {
            timestamp: self.last_updated,
            last_reset_at: self.last_reset_at,
            combined_total_mb: bytes_to_mb(self.openvpn.total_bytes().saturating_add(self.ipsec.total_bytes())),
            openvpn,
            ipsec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthMetrics {
    pub timestamp: DateTime<Utc>,
    pub last_reset_at: DateTime<Utc>,
    pub openvpn: OpenVpnMetrics,
    pub ipsec: IpsecMetrics,
    pub combined_total_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnMetrics {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_bandwidth_mb: f64,
    pub active_clients: usize,
    pub session_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpsecMetrics {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_bandwidth_mb: f64,
}

/// Raw cumulative counters read straight from the sources, bypassing the
/// accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub timestamp: DateTime<Utc>,
    pub openvpn: OpenVpnLive,
    pub ipsec: IpsecMetrics,
    pub combined_total_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenVpnLive {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_bandwidth_mb: f64,
    pub active_clients: usize,
}

/// What one collection cycle added to the totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub openvpn_bytes_sent: u64,
    pub openvpn_bytes_received: u64,
    pub sessions_ended: u64,
    pub active_clients: usize,
    pub ipsec_bytes_sent: u64,
    pub ipsec_bytes_received: u64,
}
