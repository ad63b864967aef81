use super::ipsec::{InterfaceCounters, StatsProvider};
use crate::error::{Result, TrackerError};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    networks: Option<HashMap<String, NetworkStats>>,
}

#[derive(Debug, Deserialize)]
struct NetworkStats {
    #[serde(default)]
    rx_bytes: u64,
    #[serde(default)]
    tx_bytes: u64,
}

/// Reads container network counters from the Docker Engine API over its
/// Unix socket.
pub struct DockerStatsProvider {
    socket_path: PathBuf,
    container: String,
    timeout: Duration,
}

impl DockerStatsProvider {
    pub fn new<P: AsRef<Path>>(socket_path: P, container: impl Into<String>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            container: container.into(),
            timeout,
        }
    }

    /// One-shot stats body, or `None` when Docker is unreachable or does not
    /// know the container.
    async fn fetch_stats(&self) -> Result<Option<Bytes>> {
        let stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(socket = %self.socket_path.display(), error = %e, "Docker socket unavailable");
                return Ok(None);
            }
        };

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| TrackerError::ContainerStats(format!("Docker API handshake failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Docker API connection closed with error");
            }
        });

        let request = Request::builder()
            .method("GET")
            .uri(format!("/containers/{}/stats?stream=false", self.container))
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| TrackerError::ContainerStats(format!("invalid stats request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TrackerError::ContainerStats(format!("stats request failed: {e}")))?;

        if !response.status().is_success() {
            debug!(
                container = %self.container,
                status = %response.status(),
                "container stats unavailable"
            );
            return Ok(None);
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TrackerError::ContainerStats(format!("failed to read stats body: {e}")))?
            .to_bytes();
        Ok(Some(body))
    }
}

#[async_trait]
impl StatsProvider for DockerStatsProvider {
    async fn interface_counters(&self) -> Result<Vec<InterfaceCounters>> {
        let body = tokio::time::timeout(self.timeout, self.fetch_stats())
            .await
            .map_err(|_| {
                TrackerError::ContainerStats(format!(
                    "stats for {} timed out after {:?}",
                    self.container, self.timeout
                ))
            })??;

        match body {
            Some(body) => parse_stats_response(&body),
            None => Ok(Vec::new()),
        }
    }
}

/// Extracts per-interface counters from a `/containers/{id}/stats` body.
pub fn parse_stats_response(body: &[u8]) -> Result<Vec<InterfaceCounters>> {
    let stats: StatsResponse = serde_json::from_slice(body)
        .map_err(|e| TrackerError::ContainerStats(format!("failed to decode container stats: {e}")))?;

    let mut interfaces: Vec<InterfaceCounters> = stats
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, network)| InterfaceCounters {
            name,
            rx_bytes: network.rx_bytes,
            tx_bytes: network.tx_bytes,
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(interfaces)
}
