pub mod api;
pub mod bandwidth;
pub mod config;
pub mod error;
