use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] common::CommonError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Status log error: {0}")]
    StatusLog(String),

    #[error("Container stats error: {0}")]
    ContainerStats(String),

    #[error("Collection incomplete: {0}")]
    PartialCollection(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
