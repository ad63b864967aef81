mod tracker_error;

pub use tracker_error::TrackerError;
pub type Result<T> = std::result::Result<T, TrackerError>;
