//! Fan-out of telemetry to WebSocket subscribers.
//!
//! Every client owns a bounded queue drained by its own writer task, so a
//! slow or dead client only ever loses its own messages. `broadcast` never
//! awaits.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use futures::{Sink, SinkExt};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::protocol::{encode_message, PoseTelemetry, ServerMessage};

pub type ClientId = u64;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub broadcasts: u64,
    pub dropped: u64,
    pub pruned: u64,
}

#[derive(Default)]
struct Counters {
    broadcasts: AtomicU64,
    dropped: AtomicU64,
    pruned: AtomicU64,
}

struct ClientQueue {
    messages: Mutex<VecDeque<Utf8Bytes>>,
    ready: Notify,
    capacity: usize,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns true when an older message was evicted.
    fn push(&self, msg: Utf8Bytes) -> bool {
        let evicted = {
            let mut q = lock(&self.messages);
            let evicted = if q.len() >= self.capacity {
                q.pop_front();
                true
            } else {
                false
            };
            q.push_back(msg);
            evicted
        };
        self.ready.notify_one();
        evicted
    }

    fn pop(&self) -> Option<Utf8Bytes> {
        lock(&self.messages).pop_front()
    }
}

struct ClientEntry {
    peer: Option<SocketAddr>,
    queue: Arc<ClientQueue>,
    cancel: CancellationToken,
}

struct Shared {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn remove(&self, id: ClientId) -> Option<ClientEntry> {
        let entry = lock(&self.clients).remove(&id);
        if let Some(entry) = &entry {
            entry.cancel.cancel();
        }
        entry
    }
}

/// Client registry plus per-client writer tasks. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    shared: Arc<Shared>,
    queue_capacity: usize,
    send_timeout: Duration,
    shutdown: CancellationToken,
    writers: TaskTracker,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize, send_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
            queue_capacity,
            send_timeout,
            shutdown,
            writers: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &ServerConfig, shutdown: CancellationToken) -> Self {
        Self::new(config.client_queue_capacity, config.send_timeout(), shutdown)
    }

    /// Add a subscriber and spawn its writer. Must be called inside a tokio
    /// runtime.
    pub fn register<S>(&self, sink: S, peer: Option<SocketAddr>) -> ClientId
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ClientQueue::new(self.queue_capacity));
        let cancel = self.shutdown.child_token();

        lock(&self.shared.clients).insert(
            id,
            ClientEntry {
                peer,
                queue: queue.clone(),
                cancel: cancel.clone(),
            },
        );

        self.writers.spawn(write_loop(
            id,
            sink,
            queue,
            cancel,
            self.send_timeout,
            self.shared.clone(),
        ));

        match peer {
            Some(addr) => tracing::info!(client = id, %addr, "client connected"),
            None => tracing::info!(client = id, "client connected"),
        }
        id
    }

    /// Remove a subscriber; its writer closes the sink and exits.
    pub fn unregister(&self, id: ClientId) {
        if let Some(entry) = self.shared.remove(id) {
            match entry.peer {
                Some(addr) => tracing::info!(client = id, %addr, "client disconnected"),
                None => tracing::info!(client = id, "client disconnected"),
            }
        }
    }

    /// Serialize once and enqueue to every registered client. Returns the
    /// number of clients the message was queued for.
    pub fn broadcast(&self, telemetry: &PoseTelemetry) -> Result<usize> {
        let text = encode_message(&ServerMessage::Pose(telemetry.clone()))?;
        Ok(self.broadcast_text(text))
    }

    pub fn broadcast_text(&self, text: impl Into<Utf8Bytes>) -> usize {
        let text = text.into();
        let snapshot: Vec<(ClientId, Arc<ClientQueue>)> = lock(&self.shared.clients)
            .iter()
            .map(|(id, entry)| (*id, entry.queue.clone()))
            .collect();

        for (id, queue) in &snapshot {
            if queue.push(text.clone()) {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(client = id, "queue full, dropped oldest");
            }
        }
        self.shared.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        snapshot.len()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.shared.clients).len()
    }

    pub fn stats(&self) -> HubStats {
        let c = &self.shared.counters;
        HubStats {
            broadcasts: c.broadcasts.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            pruned: c.pruned.load(Ordering::Relaxed),
        }
    }

    /// Drop every client and stop accepting new writers.
    pub fn close_all(&self) {
        let drained: Vec<ClientEntry> = lock(&self.shared.clients).drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        self.writers.close();
        if !drained.is_empty() {
            tracing::info!(clients = drained.len(), "closed all client connections");
        }
    }

    /// Wait for every writer task to finish. Only returns after `close_all`.
    pub async fn wait_closed(&self) {
        self.writers.wait().await;
    }
}

async fn write_loop<S>(
    id: ClientId,
    mut sink: S,
    queue: Arc<ClientQueue>,
    cancel: CancellationToken,
    send_timeout: Duration,
    shared: Arc<Shared>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let failure = 'outer: loop {
        while let Some(text) = queue.pop() {
            if cancel.is_cancelled() {
                break 'outer None;
            }
            match tokio::time::timeout(send_timeout, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => break 'outer Some(format!("send failed: {e}")),
                Err(_) => break 'outer Some(format!("send timed out after {send_timeout:?}")),
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break 'outer None,
            _ = queue.ready.notified() => {}
        }
    };

    if let Some(reason) = failure {
        if shared.remove(id).is_some() {
            shared.counters.pruned.fetch_add(1, Ordering::Relaxed);
            tracing::info!(client = id, %reason, "pruned client");
        }
    } else {
        let _ = tokio::time::timeout(send_timeout, sink.send(Message::Close(None))).await;
    }
    let _ = tokio::time::timeout(send_timeout, sink.close()).await;
    tracing::debug!(client = id, "writer stopped");
}
