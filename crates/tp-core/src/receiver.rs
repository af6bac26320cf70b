//! Telemetry receiver: one datagram in, at most one stored record out.
//!
//! The receive loop is single-threaded, which makes it the only writer of the
//! store. Malformed datagrams are dropped and logged; they never stop the loop.

use crate::signals::ShutdownSignal;
use serde::Serialize;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tp_common::{classify, WirePayload, DEFAULT_RECEIVER_PORT};
use tp_config::ReceiverSection;
use tp_store::{LogStore, OpenMode, StoreError, StoreOptions, SyncPolicy};
use tracing::{debug, info, warn};

/// Receive timeout when none is configured.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// How a run treats the store and the end-of-stream sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Reset the store at start; stop on the sentinel.
    Bounded,
    /// Append to the existing store; ignore the sentinel.
    Open,
}

impl RunMode {
    pub fn from_bounded(bounded: bool) -> Self {
        if bounded {
            RunMode::Bounded
        } else {
            RunMode::Open
        }
    }

    pub fn open_mode(self) -> OpenMode {
        match self {
            RunMode::Bounded => OpenMode::Reset,
            RunMode::Open => OpenMode::Append,
        }
    }
}

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub store_path: PathBuf,
    pub mode: RunMode,
    /// Datagrams longer than this are rejected.
    pub max_datagram_bytes: usize,
    /// Longest a single receive blocks before the loop re-checks for
    /// shutdown. Bounds the delay of a signal that lands just before
    /// `recv_from` is entered.
    pub read_timeout: Duration,
    pub sync: SyncPolicy,
}

impl ReceiverConfig {
    pub fn new(store_path: impl Into<PathBuf>, mode: RunMode) -> Self {
        ReceiverConfig {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_RECEIVER_PORT,
            store_path: store_path.into(),
            mode,
            max_datagram_bytes: 1024,
            read_timeout: DEFAULT_READ_TIMEOUT,
            sync: SyncPolicy::Flush,
        }
    }

    /// Build from the configuration file section.
    pub fn from_section(section: &ReceiverSection, mode: RunMode) -> Result<Self, ReceiverError> {
        let bind = section
            .bind
            .parse::<IpAddr>()
            .map_err(|_| ReceiverError::InvalidBind(section.bind.clone()))?;
        Ok(ReceiverConfig {
            bind,
            port: section.port,
            store_path: section.store_path.clone(),
            mode,
            max_datagram_bytes: section.max_datagram_bytes,
            read_timeout: section
                .read_timeout_ms
                .map_or(DEFAULT_READ_TIMEOUT, Duration::from_millis),
            sync: if section.fsync {
                SyncPolicy::Fsync
            } else {
                SyncPolicy::Flush
            },
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Sentinel received in a bounded run.
    Sentinel,
    /// Termination requested.
    Shutdown,
}

/// Counters for one receiver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiverSummary {
    pub accepted: u64,
    pub rejected: u64,
    pub sentinels: u64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bind address: {0}")]
    InvalidBind(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),
}

impl ReceiverError {
    /// Whether the bind failed because another process holds the port.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, ReceiverError::Bind { source, .. } if source.kind() == ErrorKind::AddrInUse)
    }
}

/// Result of handling one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Accepted,
    Rejected,
    SentinelIgnored,
    Stop,
}

pub struct Receiver {
    socket: UdpSocket,
    store: LogStore,
    config: ReceiverConfig,
    accepted: u64,
    rejected: u64,
    sentinels: u64,
}

impl Receiver {
    /// Bind the socket, then open the store.
    ///
    /// Binding first means an occupied port fails before a bounded run
    /// resets the store.
    pub fn bind(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        let addr = config.socket_addr();
        let socket = UdpSocket::bind(addr).map_err(|e| ReceiverError::Bind { addr, source: e })?;
        socket
            .set_read_timeout(Some(config.read_timeout))
            .map_err(ReceiverError::Socket)?;

        let options = StoreOptions { sync: config.sync };
        let store =
            LogStore::open_with_options(&config.store_path, config.mode.open_mode(), options)?;

        info!(
            addr = %socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| addr.to_string()),
            store = %config.store_path.display(),
            mode = ?config.mode,
            "receiver listening"
        );

        Ok(Receiver {
            socket,
            store,
            config,
            accepted: 0,
            rejected: 0,
            sentinels: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Receive until the sentinel (bounded runs) or a shutdown request.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> Result<ReceiverSummary, ReceiverError> {
        // One spare byte detects oversize datagrams.
        let mut buf = vec![0u8; self.config.max_datagram_bytes + 1];

        let stop_reason = loop {
            if shutdown.is_requested() {
                break StopReason::Shutdown;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    if len > self.config.max_datagram_bytes {
                        self.rejected += 1;
                        warn!(%peer, len, "dropping oversize datagram");
                        continue;
                    }
                    if self.handle(&buf[..len], peer)? == Disposition::Stop {
                        break StopReason::Sentinel;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(ReceiverError::Socket(e)),
            }
        };

        let summary = self.summary(stop_reason);
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            sentinels = summary.sentinels,
            reason = ?summary.stop_reason,
            "receiver stopped"
        );
        Ok(summary)
    }

    fn handle(&mut self, payload: &[u8], peer: SocketAddr) -> Result<Disposition, ReceiverError> {
        match classify(payload) {
            Ok(WirePayload::Sample(sample)) => {
                self.store.append(&sample)?;
                self.accepted += 1;
                debug!(%peer, alt = sample.altitude, rate = sample.rate, "ack");
                Ok(Disposition::Accepted)
            }
            Ok(WirePayload::EndOfStream) => {
                self.sentinels += 1;
                match self.config.mode {
                    RunMode::Bounded => {
                        info!(%peer, rows = self.store.rows_appended(), "end of stream");
                        Ok(Disposition::Stop)
                    }
                    RunMode::Open => {
                        debug!(%peer, "ignoring end-of-stream sentinel in open run");
                        Ok(Disposition::SentinelIgnored)
                    }
                }
            }
            Err(err) => {
                self.rejected += 1;
                warn!(%peer, error = %err, "dropping malformed datagram");
                Ok(Disposition::Rejected)
            }
        }
    }

    fn summary(&self, stop_reason: StopReason) -> ReceiverSummary {
        ReceiverSummary {
            accepted: self.accepted,
            rejected: self.rejected,
            sentinels: self.sentinels,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tp_common::TelemetrySample;

    fn loopback_config(dir: &TempDir, mode: RunMode) -> ReceiverConfig {
        let mut config = ReceiverConfig::new(dir.path().join("dados.csv"), mode);
        config.bind = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.port = 0;
        config
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn run_mode_selects_open_mode() {
        assert_eq!(RunMode::Bounded.open_mode(), OpenMode::Reset);
        assert_eq!(RunMode::Open.open_mode(), OpenMode::Append);
        assert_eq!(RunMode::from_bounded(true), RunMode::Bounded);
    }

    #[test]
    fn from_section_maps_fields() {
        let mut section = ReceiverSection::default();
        section.fsync = true;
        section.read_timeout_ms = Some(250);
        let config = ReceiverConfig::from_section(&section, RunMode::Open).unwrap();
        assert_eq!(config.port, 5555);
        assert_eq!(config.sync, SyncPolicy::Fsync);
        assert_eq!(config.read_timeout, Duration::from_millis(250));

        section.read_timeout_ms = None;
        let config = ReceiverConfig::from_section(&section, RunMode::Open).unwrap();
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);

        section.bind = "not-an-ip".to_string();
        assert!(matches!(
            ReceiverConfig::from_section(&section, RunMode::Open),
            Err(ReceiverError::InvalidBind(_))
        ));
    }

    #[test]
    fn handle_appends_valid_and_drops_invalid() {
        let dir = TempDir::new().unwrap();
        let mut receiver = Receiver::bind(loopback_config(&dir, RunMode::Bounded)).unwrap();

        assert_eq!(
            receiver.handle(b"1.000000,2.000000,3.00,4.00", peer()).unwrap(),
            Disposition::Accepted
        );
        assert_eq!(
            receiver.handle(b"1.0,2.0,3.0", peer()).unwrap(),
            Disposition::Rejected
        );
        assert_eq!(receiver.store().rows_appended(), 1);

        let summary = receiver.summary(StopReason::Shutdown);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn sentinel_depends_on_mode() {
        let dir = TempDir::new().unwrap();
        let mut bounded = Receiver::bind(loopback_config(&dir, RunMode::Bounded)).unwrap();
        assert_eq!(bounded.handle(b"END", peer()).unwrap(), Disposition::Stop);

        let other = TempDir::new().unwrap();
        let mut open = Receiver::bind(loopback_config(&other, RunMode::Open)).unwrap();
        assert_eq!(
            open.handle(b"END", peer()).unwrap(),
            Disposition::SentinelIgnored
        );
        assert_eq!(open.summary(StopReason::Shutdown).sentinels, 1);
    }

    #[test]
    fn bounded_bind_resets_store_open_bind_keeps_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dados.csv");
        {
            let mut store = LogStore::open(&path, OpenMode::Reset).unwrap();
            store.append(&TelemetrySample::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        }

        drop(Receiver::bind(loopback_config(&dir, RunMode::Open)).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        drop(Receiver::bind(loopback_config(&dir, RunMode::Bounded)).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), LogStore::header());
    }

    #[test]
    fn occupied_port_is_reported_before_store_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dados.csv");
        {
            let mut store = LogStore::open(&path, OpenMode::Reset).unwrap();
            store.append(&TelemetrySample::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        }
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut config = loopback_config(&dir, RunMode::Bounded);
        config.port = holder.local_addr().unwrap().port();
        let err = Receiver::bind(config).err().expect("port is taken");

        assert!(err.is_addr_in_use());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn shutdown_before_run_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let mut receiver = Receiver::bind(loopback_config(&dir, RunMode::Open)).unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.request();

        let summary = receiver.run(&shutdown).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Shutdown);
        assert_eq!(summary.accepted, 0);
    }

    #[test]
    fn idle_open_run_notices_shutdown_without_traffic() {
        let dir = TempDir::new().unwrap();
        let config = loopback_config(&dir, RunMode::Open);
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
        let mut receiver = Receiver::bind(config).unwrap();

        // A plain request does not interrupt recv_from; only the timeout does.
        let shutdown = ShutdownSignal::new();
        let remote = shutdown.clone();
        let started = std::time::Instant::now();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            remote.request();
        });

        let summary = receiver.run(&shutdown).unwrap();
        waker.join().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
