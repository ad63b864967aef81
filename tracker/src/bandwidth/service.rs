use super::docker::DockerStatsProvider;
use super::ipsec::{self, IpsecDeltaTracker, StatsProvider};
use super::model::{
    BandwidthAccumulator, BandwidthMetrics, ClientState, CollectionReport, IpsecMetrics,
    LiveMetrics, OpenVpnLive, bytes_to_mb,
};
use super::openvpn::{self, StatusFile, StatusSource};
use super::store::AccumulatorStore;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct TrackerState {
    accumulator: BandwidthAccumulator,
    ipsec: IpsecDeltaTracker,
}

struct Inner {
    state: RwLock<TrackerState>,
    store: AccumulatorStore,
}

/// Owns the in-memory accumulator and the sources feeding it.
///
/// Collection cycles and resets take the write side of the lock; metric
/// snapshots take the read side. The store is written while the write lock
/// is held, so memory and disk never drift apart by more than one cycle.
pub struct BandwidthService {
    inner: Arc<Inner>,
    status_source: Arc<dyn StatusSource>,
    stats_provider: Arc<dyn StatsProvider>,
}

impl BandwidthService {
    pub fn new(
        store: AccumulatorStore,
        status_source: Arc<dyn StatusSource>,
        stats_provider: Arc<dyn StatsProvider>,
    ) -> Self {
        let accumulator = match store.load() {
            Ok(Some(accumulator)) => {
                info!(
                    path = %store.path().display(),
                    active_clients = accumulator.client_states.len(),
                    "Loaded bandwidth accumulator"
                );
                accumulator
            }
            Ok(None) => {
                info!(path = %store.path().display(), "Starting fresh bandwidth accumulator");
                BandwidthAccumulator::new(Utc::now())
            }
            Err(e) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Failed to load accumulator, initializing new one; the next save overwrites the totals on disk"
                );
                BandwidthAccumulator::new(Utc::now())
            }
        };

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(TrackerState {
                    accumulator,
                    ipsec: IpsecDeltaTracker::new(),
                }),
                store,
            }),
            status_source,
            stats_provider,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        let bandwidth = &config.bandwidth;
        let store = AccumulatorStore::new(config.bandwidth_storage_dir()).with_retry(bandwidth.lock_retry());
        let status_source = Arc::new(StatusFile::new(&bandwidth.openvpn_status_path));
        let stats_provider = Arc::new(DockerStatsProvider::new(
            &bandwidth.docker_socket,
            bandwidth.ipsec_container.clone(),
            bandwidth.docker_timeout(),
        ));
        Self::new(store, status_source, stats_provider)
    }

    /// Runs one collection cycle: reads both sources, merges their deltas
    /// and persists the result.
    ///
    /// A failing source does not stop the other protocol from being merged
    /// and saved; the cycle still reports an error afterwards.
    #[instrument(skip(self))]
    pub async fn collect_once(&self) -> Result<CollectionReport> {
        let clients = self.read_clients().await;
        let ipsec_bytes = self
            .stats_provider
            .interface_counters()
            .await
            .map(|interfaces| ipsec::combined_bytes(&interfaces));

        let inner = self.inner.clone();
        let report = tokio::task::spawn_blocking(move || inner.merge_and_save(clients, ipsec_bytes)).await??;

        debug!(
            openvpn_sent = report.openvpn_bytes_sent,
            openvpn_received = report.openvpn_bytes_received,
            sessions_ended = report.sessions_ended,
            active_clients = report.active_clients,
            ipsec_sent = report.ipsec_bytes_sent,
            ipsec_received = report.ipsec_bytes_received,
            "Bandwidth collection cycle complete"
        );
        Ok(report)
    }

    /// Current totals as of the last completed cycle.
    pub fn metrics(&self) -> BandwidthMetrics {
        self.inner.state.read().accumulator.metrics()
    }

    /// Zeroes every total and persists the fresh accumulator.
    ///
    /// The in-memory state is only replaced once the save succeeded.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.reset()).await??;
        info!("Bandwidth accumulator reset");
        Ok(())
    }

    /// Raw counters straight from both sources, without touching the
    /// accumulator.
    pub async fn live_metrics(&self) -> Result<LiveMetrics> {
        let clients = self.read_clients().await?;
        let interfaces = self.stats_provider.interface_counters().await?;

        let (openvpn_sent, openvpn_received) = openvpn::live_totals(&clients);
        let (ipsec_received, ipsec_sent) = interfaces.iter().fold((0u64, 0u64), |(rx, tx), iface| {
            (rx.saturating_add(iface.rx_bytes), tx.saturating_add(iface.tx_bytes))
        });

        let openvpn_total = openvpn_sent.saturating_add(openvpn_received);
        let ipsec_total = ipsec_sent.saturating_add(ipsec_received);

        Ok(LiveMetrics {
            timestamp: Utc::now(),
            openvpn: OpenVpnLive {
                total_bytes_sent: openvpn_sent,
                total_bytes_received: openvpn_received,
                total_bandwidth_mb: bytes_to_mb(openvpn_total),
                active_clients: clients.len(),
            },
            ipsec: IpsecMetrics {
                total_bytes_sent: ipsec_sent,
                total_bytes_received: ipsec_received,
                total_bandwidth_mb: bytes_to_mb(ipsec_total),
            },
            combined_total_mb: bytes_to_mb(openvpn_total.saturating_add(ipsec_total)),
        })
    }

    async fn read_clients(&self) -> Result<BTreeMap<String, ClientState>> {
        match self.status_source.read_status().await {
            Ok(Some(content)) => Ok(openvpn::parse_status(&content, Utc::now())),
            Ok(None) => Ok(BTreeMap::new()),
            Err(e) => Err(TrackerError::StatusLog(e.to_string())),
        }
    }
}

impl Inner {
    fn merge_and_save(
        &self,
        clients: Result<BTreeMap<String, ClientState>>,
        ipsec_bytes: Result<u64>,
    ) -> Result<CollectionReport> {
        let mut state = self.state.write();
        let mut report = CollectionReport::default();
        let mut failures = Vec::new();

        match clients {
            Ok(current) => {
                let deltas = openvpn::compute_deltas(&state.accumulator.client_states, &current);
                state.accumulator.openvpn.record(deltas.bytes_sent, deltas.bytes_received);
                state.accumulator.openvpn.record_sessions_ended(deltas.sessions_ended);
                report.openvpn_bytes_sent = deltas.bytes_sent;
                report.openvpn_bytes_received = deltas.bytes_received;
                report.sessions_ended = deltas.sessions_ended;
                state.accumulator.client_states = current;
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse OpenVPN clients");
                failures.push(format!("openvpn: {e}"));
            }
        }
        report.active_clients = state.accumulator.client_states.len();

        match ipsec_bytes {
            Ok(current) => {
                if let Some(delta) = state.ipsec.observe(current) {
                    state.accumulator.ipsec.record(delta.bytes_sent, delta.bytes_received);
                    report.ipsec_bytes_sent = delta.bytes_sent;
                    report.ipsec_bytes_received = delta.bytes_received;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to collect IPSec metrics");
                failures.push(format!("ipsec: {e}"));
            }
        }

        state.accumulator.last_updated = Utc::now();
        self.store.save(&state.accumulator)?;
        drop(state);

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(TrackerError::PartialCollection(failures.join("; ")))
        }
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.write();
        let fresh = BandwidthAccumulator::new(Utc::now());
        self.store.save(&fresh)?;
        state.accumulator = fresh;
        state.ipsec.reset();
        Ok(())
    }
}
