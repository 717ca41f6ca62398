//! TCP ingestion of base station telemetry.
//!
//! The device opens a connection, writes one JSON document and is done with
//! it. The document is merged into the shared [`TelemetryStore`] and the
//! connection is closed without any acknowledgement.
//!
//! [`TelemetryStore`]: crate::telemetry::TelemetryStore

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::telemetry::{SharedStore, TelemetryUpdate};

const READ_CHUNK_SIZE: usize = 4096;

/// Errors while reading a telemetry document from a connection.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("connection read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid telemetry document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("telemetry document exceeds {0} bytes")]
    TooLarge(usize),
    #[error("no complete telemetry document within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before any data was sent")]
    Empty,
}

/// Ingestion statistics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Connections handed to a handler.
    pub connections_accepted: u64,
    /// Connections dropped because max_connections was reached.
    pub connections_rejected: u64,
    /// Documents decoded and applied to the store.
    pub updates_applied: u64,
    /// Connections that did not yield a usable document.
    pub decode_failures: u64,
}

/// Per-connection read limits.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_message_size: usize,
    pub read_timeout: Option<Duration>,
}

impl From<&IngestConfig> for ReadLimits {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            read_timeout: config.read_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// TCP server accepting telemetry documents.
pub struct IngestServer {
    store: SharedStore,
    config: IngestConfig,
    stats: Arc<RwLock<IngestStats>>,
}

impl IngestServer {
    /// Create a new ingest server writing into `store`.
    pub fn new(store: SharedStore, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(RwLock::new(IngestStats::default())),
        }
    }

    /// Get ingestion statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.config.listen, "Starting TCP server");

        let listener = TcpListener::bind(self.config.listen.as_str())
            .await
            .with_context(|| format!("Failed to bind TCP socket to {}", self.config.listen))?;

        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until shutdown.
    ///
    /// Accept errors are logged and the loop keeps going.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "TCP ingest listener started");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let limits = ReadLimits::from(&self.config);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Accept connection");

                        match semaphore.clone().try_acquire_owned() {
                            Ok(permit) => {
                                self.stats.write().connections_accepted += 1;
                                let store = self.store.clone();
                                let stats = self.stats.clone();

                                tokio::spawn(async move {
                                    let _permit = permit; // Hold permit until connection closes
                                    handle_connection(stream, addr, store, stats, limits).await;
                                });
                            }
                            Err(_) => {
                                self.stats.write().connections_rejected += 1;
                                warn!(%addr, "Max connections reached, rejecting");
                                drop(stream);
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept error");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("TCP ingest server stopped");
        Ok(())
    }
}

/// Handle a single device connection: one document, then close.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: SharedStore,
    stats: Arc<RwLock<IngestStats>>,
    limits: ReadLimits,
) {
    match read_update(stream, limits).await {
        Ok(update) => {
            let fields = update.field_count();
            store.apply(update);
            stats.write().updates_applied += 1;
            debug!(%addr, fields, record = ?store.read(), "Telemetry applied");
        }
        Err(e) => {
            stats.write().decode_failures += 1;
            warn!(%addr, error = %e, "Failed to decode telemetry");
        }
    }
}

/// Read exactly one telemetry document from `reader`.
///
/// Bytes following the first complete JSON value are ignored.
pub async fn read_update<R>(reader: R, limits: ReadLimits) -> Result<TelemetryUpdate, IngestError>
where
    R: AsyncRead + Unpin,
{
    let read = read_document(reader, limits.max_message_size);

    match limits.read_timeout {
        Some(limit) => timeout(limit, read)
            .await
            .map_err(|_| IngestError::Timeout(limit))?,
        None => read.await,
    }
}

async fn read_document<R>(mut reader: R, max_size: usize) -> Result<TelemetryUpdate, IngestError>
where
    R: AsyncRead + Unpin,
{
    // Never buffer more than one byte past the limit.
    let read_cap = max_size.saturating_add(1);
    let mut buf = Vec::with_capacity(READ_CHUNK_SIZE.min(read_cap));
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let want = read_cap.saturating_sub(buf.len()).min(READ_CHUNK_SIZE);
        let n = reader.read(&mut chunk[..want]).await?;

        if n == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Err(IngestError::Empty);
            }
            return Ok(serde_json::from_slice(&buf)?);
        }

        buf.extend_from_slice(&chunk[..n]);

        if let Some((update, consumed)) = try_decode(&buf)? {
            if consumed > max_size {
                return Err(IngestError::TooLarge(max_size));
            }
            return Ok(update);
        }

        if buf.len() > max_size {
            return Err(IngestError::TooLarge(max_size));
        }
    }
}

/// Decode the first JSON value in `buf`, if it is complete.
///
/// Returns the update and the number of bytes it spans.
fn try_decode(buf: &[u8]) -> Result<Option<(TelemetryUpdate, usize)>, IngestError> {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<TelemetryUpdate>();

    match values.next() {
        Some(Ok(update)) => Ok(Some((update, values.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(IngestError::Decode(e)),
        None => Ok(None),
    }
}
