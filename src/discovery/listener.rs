//! UDP broadcast listener for E2E target discovery.
//!
//! Target apps running in E2E mode broadcast their connection info as a JSON datagram
//! on a fixed UDP port:
//!
//! ```json
//! { "app": "flow-editor", "platform": "unity", "port": 51321, "version": "1.0.0" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::error::{E2eError, E2eResult};

/// Well-known UDP port target apps broadcast on
pub const DEFAULT_DISCOVERY_PORT: u16 = 51320;

/// Default listen timeout
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single receive wait, so the outer deadline is re-checked regularly
const POLL_SLICE: Duration = Duration::from_secs(1);

const MAX_DATAGRAM: usize = 4096;

/// A discovered application endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEndpoint {
    pub app: String,
    /// Sender address of the broadcast, never a host claimed in the payload
    pub host: String,
    pub port: u16,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub discovered_at: chrono::DateTime<chrono::Utc>,
}

impl AppEndpoint {
    pub fn new(
        app: &str,
        host: &str,
        port: u16,
        platform: Option<String>,
        version: Option<String>,
    ) -> Self {
        Self {
            app: app.to_string(),
            host: host.to_string(),
            port,
            platform,
            version,
            discovered_at: chrono::Utc::now(),
        }
    }

    /// HTTP base URL of the app's E2E server
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl std::fmt::Display for AppEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.platform {
            Some(ref platform) => write!(f, "{} ({}) at {}", self.app, platform, self.base_url()),
            None => write!(f, "{} at {}", self.app, self.base_url()),
        }
    }
}

/// Listens for broadcasts from E2E target apps.
///
/// The socket is bound on construction and released when the listener is dropped.
pub struct DiscoveryListener {
    socket: UdpSocket,
    port: u16,
}

impl DiscoveryListener {
    /// Bind the discovery socket with address reuse on `0.0.0.0:port`.
    ///
    /// Must be called from within a tokio runtime. Port 0 binds an ephemeral port.
    pub fn bind(port: u16) -> E2eResult<Self> {
        let bind_err = |source: std::io::Error| E2eError::DiscoveryIo { port, source };

        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        socket
            .bind(&socket2::SockAddr::from(addr))
            .map_err(bind_err)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;
        let port = socket.local_addr().map_err(bind_err)?.port();

        Ok(Self { socket, port })
    }

    /// Port the listener is bound to
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Wait for the first broadcast matching the filters.
    pub async fn listen(
        &self,
        timeout: Duration,
        app_filter: Option<&str>,
        platform_filter: Option<&str>,
    ) -> E2eResult<AppEndpoint> {
        let start = Instant::now();
        let mut buf = [0u8; MAX_DATAGRAM];

        log::info!("Listening for E2E target app on UDP port {}", self.port);

        while start.elapsed() < timeout {
            let remaining = timeout.saturating_sub(start.elapsed());
            let Some((len, sender)) = self.recv_slice(&mut buf, remaining).await else {
                continue;
            };
            let Some(endpoint) = parse_broadcast(&buf[..len], sender.ip()) else {
                continue;
            };

            if app_filter.is_some_and(|app| endpoint.app != app) {
                log::debug!("Skipping {}: app filter mismatch", endpoint);
                continue;
            }
            if platform_filter.is_some_and(|p| endpoint.platform.as_deref() != Some(p)) {
                log::debug!("Skipping {}: platform filter mismatch", endpoint);
                continue;
            }

            log::info!("Discovered: {}", endpoint);
            return Ok(endpoint);
        }

        Err(E2eError::DiscoveryTimeout {
            elapsed: start.elapsed(),
            port: self.port,
        })
    }

    /// Collect every app broadcasting during the whole `window`, deduplicated by host:port.
    ///
    /// The first broadcast seen for an address wins; results keep discovery order.
    pub async fn listen_all(
        &self,
        window: Duration,
        app_filter: Option<&str>,
    ) -> E2eResult<Vec<AppEndpoint>> {
        let start = Instant::now();
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut seen = HashSet::new();
        let mut discovered = Vec::new();

        log::info!(
            "Scanning for E2E target apps on UDP port {} ({:?})",
            self.port,
            window
        );

        while start.elapsed() < window {
            let remaining = window.saturating_sub(start.elapsed());
            let Some((len, sender)) = self.recv_slice(&mut buf, remaining).await else {
                continue;
            };
            let Some(endpoint) = parse_broadcast(&buf[..len], sender.ip()) else {
                continue;
            };
            if app_filter.is_some_and(|app| endpoint.app != app) {
                continue;
            }
            if seen.insert(endpoint.key()) {
                log::info!("Found: {}", endpoint);
                discovered.push(endpoint);
            }
        }

        Ok(discovered)
    }

    async fn recv_slice(
        &self,
        buf: &mut [u8],
        remaining: Duration,
    ) -> Option<(usize, SocketAddr)> {
        match tokio::time::timeout(POLL_SLICE.min(remaining), self.socket.recv_from(buf)).await {
            Ok(Ok(received)) => Some(received),
            Ok(Err(e)) => {
                log::debug!("Discovery receive error (ignored): {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

/// Bind the discovery port and wait for one matching app
pub async fn discover(
    port: u16,
    timeout: Duration,
    app_filter: Option<&str>,
    platform_filter: Option<&str>,
) -> E2eResult<AppEndpoint> {
    DiscoveryListener::bind(port)?
        .listen(timeout, app_filter, platform_filter)
        .await
}

/// Parse a broadcast datagram. Anything malformed or incomplete yields `None`.
pub fn parse_broadcast(data: &[u8], sender: IpAddr) -> Option<AppEndpoint> {
    let message: serde_json::Value = serde_json::from_slice(data).ok()?;
    let message = message.as_object()?;

    let app = message.get("app")?.as_str()?;
    if app.is_empty() {
        return None;
    }

    let port = message.get("port")?.as_u64()?;
    let port = u16::try_from(port).ok().filter(|p| *p > 0)?;

    let text_field = |name: &str| {
        message
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    Some(AppEndpoint::new(
        app,
        &sender.to_string(),
        port,
        text_field("platform"),
        text_field("version"),
    ))
}
