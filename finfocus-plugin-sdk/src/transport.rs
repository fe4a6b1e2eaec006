//! # RPC Transport
//!
//! Length-prefixed JSON framing over the TCP address a plugin advertised in
//! its handshake. Each frame is a 4-byte big-endian payload length followed
//! by one serialized request or response; frames above
//! [`crate::proto::MAX_FRAME_LEN`] tear the connection down.
//!
//! A single background reader task demultiplexes responses into per-request
//! oneshot channels keyed by correlation id, so any number of calls can be
//! in flight on one connection. [`RpcConnection::close`] is idempotent:
//! it aborts the reader, fails every pending call, and shuts the socket
//! down; every call made after close returns [`PluginError::Closed`].

use crate::error::PluginError;
use crate::proto::{RpcRequest, RpcResponse, MAX_FRAME_LEN};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

type PendingMap = Arc<DashMap<Uuid, oneshot::Sender<RpcResponse>>>;

/// A live RPC channel to one plugin.
pub struct RpcConnection {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    reader_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl RpcConnection {
    /// Dial the plugin's advertised address.
    pub async fn connect(address: &str) -> Result<Self, PluginError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|err| PluginError::transport(format!("connecting to {address}: {err}")))?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(read_loop(read_half, pending.clone(), closed.clone()));

        Ok(Self {
            writer: Mutex::new(write_half),
            pending,
            reader_task,
            closed,
        })
    }

    /// Whether the connection has been closed or torn down by the peer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Issue one call and wait for the matching response.
    ///
    /// `deadline` bounds the full round trip; on expiry the pending slot is
    /// cleaned up and [`PluginError::DeadlineExceeded`] is returned so the
    /// caller can classify it.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, PluginError> {
        if self.is_closed() {
            return Err(PluginError::Closed);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        let payload = serde_json::to_vec(&request)?;
        if let Err(err) = self.write_frame(&payload).await {
            self.pending.remove(&id);
            return Err(err);
        }

        let response = match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.pending.remove(&id);
                return Err(PluginError::DeadlineExceeded { method: method.to_string() });
            }
            // The reader dropped our sender: connection torn down.
            Ok(Err(_)) => return Err(PluginError::Closed),
            Ok(Ok(response)) => response,
        };

        if let Some(error) = response.error {
            return Err(PluginError::Rpc { code: error.code, message: error.message });
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), PluginError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(PluginError::transport(format!(
                "frame of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }
        let mut writer = self.writer.lock().await;
        let len = (payload.len() as u32).to_be_bytes();
        writer
            .write_all(&len)
            .await
            .map_err(|err| PluginError::transport(format!("writing frame length: {err}")))?;
        writer
            .write_all(payload)
            .await
            .map_err(|err| PluginError::transport(format!("writing frame payload: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| PluginError::transport(format!("flushing frame: {err}")))?;
        Ok(())
    }

    /// Tear the connection down. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reader_task.abort();
        // Dropping the senders fails every pending call with `Closed`.
        self.pending.clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, pending: PendingMap, closed: Arc<AtomicBool>) {
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "plugin sent an oversized frame, closing connection");
            break;
        }
        let mut payload = vec![0u8; len];
        if reader.read_exact(&mut payload).await.is_err() {
            break;
        }
        match serde_json::from_slice::<RpcResponse>(&payload) {
            Ok(response) => {
                if let Some((_, tx)) = pending.remove(&response.id) {
                    // The caller may have timed out already; that is fine.
                    let _ = tx.send(response);
                } else {
                    debug!(id = %response.id, "dropping response with no pending call");
                }
            }
            Err(err) => {
                warn!(error = %err, "plugin sent an unparseable frame");
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    pending.clear();
}
