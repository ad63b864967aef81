mod docker;
mod ipsec;
mod model;
mod openvpn;
mod scheduler;
mod service;
mod store;

pub use docker::DockerStatsProvider;
pub use ipsec::{InterfaceCounters, IpsecDeltaTracker, SplitDelta, StatsProvider};
pub use model::{
    AccumulatedData, BandwidthAccumulator, BandwidthMetrics, ClientState, CollectionReport,
    IpsecMetrics, LiveMetrics, OpenVpnLive, OpenVpnMetrics,
};
pub use openvpn::{SessionDeltas, StatusFile, StatusSource};
pub use scheduler::CollectionScheduler;
pub use service::BandwidthService;
pub use store::{ACCUMULATOR_FILE, AccumulatorStore};

#[cfg(test)]
pub(crate) use service::tests::Fixture;
