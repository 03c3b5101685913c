//! HTTP coordinator probe.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use super::{CoordinatorProbe, PeerError};

/// Polls `GET {peer}/is-coordinator` over HTTP.
#[derive(Clone)]
pub struct HttpCoordinatorProbe {
    client: reqwest::Client,
    timeout: Duration,
    peer_port: u16,
}

impl HttpCoordinatorProbe {
    pub fn new(timeout: Duration, peer_port: u16) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Network(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            peer_port,
        })
    }

    /// Build the coordinator URL for a stored peer address.
    pub fn coordinator_url(&self, address: &str) -> String {
        peer_base_url(address, self.peer_port) + "/is-coordinator"
    }
}

impl CoordinatorProbe for HttpCoordinatorProbe {
    async fn query_coordinator_flag(&self, address: &str) -> Result<bool, PeerError> {
        let url = self.coordinator_url(address);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                PeerError::Timeout(self.timeout)
            } else {
                PeerError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(PeerError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PeerError::Network(e.to_string()))?;

        parse_flag(&body)
    }
}

/// Resolve a peer address to a base URL without a trailing slash.
///
/// Full URLs are kept, socket addresses and `host:port` get a scheme, and a
/// bare host or IP gets `default_port`.
pub fn peer_base_url(address: &str, default_port: u16) -> String {
    let address = address.trim().trim_end_matches('/');

    if address.starts_with("http://") || address.starts_with("https://") {
        return address.to_string();
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return format!("http://{}", addr);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return format!("http://{}", SocketAddr::new(ip, default_port));
    }
    if address.contains(':') {
        format!("http://{}", address)
    } else {
        format!("http://{}:{}", address, default_port)
    }
}

fn parse_flag(body: &str) -> Result<bool, PeerError> {
    match body.trim().trim_matches('"') {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(PeerError::InvalidBody(other.chars().take(64).collect())),
    }
}
