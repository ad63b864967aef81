mod tracker_config;

pub use tracker_config::{BandwidthConfig, TrackerConfig};
