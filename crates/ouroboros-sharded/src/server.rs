//! Cluster members and their observed health

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

pub const DEFAULT_PORT: u16 = 27017;

/// Default weight of a new latency sample
pub const DEFAULT_LATENCY_SMOOTHING: f64 = 0.3;

/// Append the default port when `address` has none
///
/// `host` → `host:27017`, `[::1]` → `[::1]:27017`; addresses with a port
/// are returned trimmed but otherwise unchanged.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    let has_port = match address.rfind(':') {
        Some(idx) if address.starts_with('[') => address[..idx].ends_with(']'),
        // A bare IPv6 literal has several colons and no port
        Some(idx) => address[..idx].find(':').is_none(),
        None => false,
    };
    if has_port {
        address.to_string()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, DEFAULT_PORT)
    } else {
        format!("{}:{}", address, DEFAULT_PORT)
    }
}

/// Liveness as last observed by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Never probed
    Unknown,
    Reachable,
    Unreachable,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerStatus::Unknown => "unknown",
            ServerStatus::Reachable => "reachable",
            ServerStatus::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// Consistent copy of a server's mutable state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub address: String,
    pub status: ServerStatus,
    pub average_latency_ms: Option<f64>,
    pub tags: BTreeSet<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ServerState {
    status: ServerStatus,
    average_latency_ms: Option<f64>,
    tags: BTreeSet<String>,
    last_seen: Option<DateTime<Utc>>,
}

/// One router endpoint
///
/// Health fields are updated together under one lock so readers never see
/// a half-applied probe result.
#[derive(Debug)]
pub struct Server {
    address: String,
    smoothing: f64,
    state: RwLock<ServerState>,
    probing: AtomicBool,
}

/// Marks a probe in flight; dropping it releases the server for the next probe
pub struct ProbeGuard<'a> {
    server: &'a Server,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.server.probing.store(false, Ordering::Release);
    }
}

impl Server {
    pub fn new(address: &str) -> Self {
        Self::with_smoothing(address, DEFAULT_LATENCY_SMOOTHING)
    }

    /// `smoothing` is the weight of each new latency sample, clamped to (0, 1]
    pub fn with_smoothing(address: &str, smoothing: f64) -> Self {
        let smoothing = if smoothing > 0.0 && smoothing <= 1.0 {
            smoothing
        } else {
            DEFAULT_LATENCY_SMOOTHING
        };
        Self {
            address: normalize_address(address),
            smoothing,
            state: RwLock::new(ServerState {
                status: ServerStatus::Unknown,
                average_latency_ms: None,
                tags: BTreeSet::new(),
                last_seen: None,
            }),
            probing: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> ServerStatus {
        self.state.read().status
    }

    pub fn is_reachable(&self) -> bool {
        self.status() == ServerStatus::Reachable
    }

    /// Smoothed round-trip latency; `None` until the first successful probe
    pub fn average_latency_ms(&self) -> Option<f64> {
        self.state.read().average_latency_ms
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.state.read().tags.clone()
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_seen
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        let state = self.state.read();
        ServerSnapshot {
            address: self.address.clone(),
            status: state.status,
            average_latency_ms: state.average_latency_ms,
            tags: state.tags.clone(),
            last_seen: state.last_seen,
        }
    }

    /// Claim the server for a probe, or `None` if one is already running
    pub fn try_begin_probe(&self) -> Option<ProbeGuard<'_>> {
        self.probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProbeGuard { server: self })
    }

    pub fn is_probing(&self) -> bool {
        self.probing.load(Ordering::Acquire)
    }

    /// Fold a successful round trip into the average and mark the server reachable
    ///
    /// `tags` replaces the current tag set when given.
    pub fn record_success(&self, latency: Duration, tags: Option<BTreeSet<String>>) {
        let sample = latency.as_secs_f64() * 1000.0;
        let mut state = self.state.write();
        let average = match state.average_latency_ms {
            Some(previous) => previous + self.smoothing * (sample - previous),
            None => sample,
        };
        state.average_latency_ms = Some(average);
        state.last_seen = Some(Utc::now());
        if let Some(tags) = tags {
            state.tags = tags;
        }
        let previous = std::mem::replace(&mut state.status, ServerStatus::Reachable);
        drop(state);

        if previous != ServerStatus::Reachable {
            info!(address = %self.address, latency_ms = average, "Server reachable");
        } else {
            debug!(address = %self.address, latency_ms = average, "Latency updated");
        }
    }

    /// Mark the server unreachable; its latency history is kept
    pub fn record_failure(&self) {
        let previous = std::mem::replace(&mut self.state.write().status, ServerStatus::Unreachable);
        if previous != ServerStatus::Unreachable {
            info!(address = %self.address, "Server unreachable");
        }
    }
}
