//! Per-tenant change notification bus.
//!
//! Signals are fire-and-forget and carry no state: every consumer re-reads
//! the authoritative snapshot on delivery. Primary transport is an
//! in-process broadcast channel keyed by tenant. The fallback for peers
//! outside this process is the ping sentinel each write touches next to
//! its document: a filesystem watcher maps sentinel changes back onto the
//! equivalent bus message. Delivery is at-least-once and unordered.

use std::path::Path;
use std::sync::{Arc, Mutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::tenant::{DocKind, Keyspace};

const CHANNEL_CAPACITY: usize = 64;

/// Advisory change notification. The payload only says *what kind* of
/// document changed; versions are informational and may be zero when the
/// signal came through the filesystem fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    #[serde(rename = "state:update")]
    StateUpdate { version: u64 },
    #[serde(rename = "config:update")]
    ConfigUpdate,
    #[serde(rename = "break:update")]
    BreakUpdate,
    #[serde(rename = "history:update")]
    HistoryUpdate,
    #[serde(rename = "services:update")]
    ServicesUpdate { version: u64 },
    #[serde(rename = "waiting_times:update")]
    WaitingTimesUpdate { version: u64 },
    #[serde(rename = "client_history:update")]
    ClientHistoryUpdate { version: u64 },
}

impl ChannelMessage {
    /// The message equivalent of a ping-sentinel change for a document.
    pub fn for_doc(kind: DocKind) -> Self {
        match kind {
            DocKind::State => ChannelMessage::StateUpdate { version: 0 },
            DocKind::Config => ChannelMessage::ConfigUpdate,
            DocKind::Break => ChannelMessage::BreakUpdate,
            DocKind::History => ChannelMessage::HistoryUpdate,
            DocKind::Services => ChannelMessage::ServicesUpdate { version: 0 },
            DocKind::WaitingTimes => ChannelMessage::WaitingTimesUpdate { version: 0 },
            DocKind::ClientHistory => ChannelMessage::ClientHistoryUpdate { version: 0 },
        }
    }
}

struct BusInner {
    channel_name: String,
    tx: broadcast::Sender<ChannelMessage>,
    // Held so the fallback keeps running for the bus lifetime.
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

/// Handle to one tenant's notification channel. Cheap to clone.
#[derive(Clone)]
pub struct TenantBus {
    inner: Arc<BusInner>,
}

impl TenantBus {
    /// Bus without the filesystem fallback. In-process delivery only.
    pub fn detached(keyspace: &Keyspace) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                channel_name: keyspace.channel_name(),
                tx,
                _watcher: Mutex::new(None),
            }),
        }
    }

    /// Bus with the ping-sentinel watcher over `data_dir`, so writes from
    /// another process sharing the directory surface here as well.
    ///
    /// If the watcher cannot be created the bus still works in-process;
    /// the failure is logged and the fallback is simply absent.
    pub fn with_fallback(keyspace: &Keyspace, data_dir: &Path) -> Self {
        let bus = Self::detached(keyspace);

        let ks = keyspace.clone();
        let tx = bus.inner.tx.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if !event.kind.is_create() && !event.kind.is_modify() {
                return;
            }
            for path in &event.paths {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some(kind) = ks.classify_ping(name) {
                    let _ = tx.send(ChannelMessage::for_doc(kind));
                }
            }
        });

        match watcher {
            Ok(mut w) => match w.watch(data_dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    *bus.inner._watcher.lock().expect("watcher lock") = Some(w);
                }
                Err(e) => warn!(error = %e, "ping watcher unavailable, in-process delivery only"),
            },
            Err(e) => warn!(error = %e, "ping watcher unavailable, in-process delivery only"),
        }

        bus
    }

    pub fn channel_name(&self) -> &str {
        &self.inner.channel_name
    }

    /// Publish a change signal. No receivers is not an error.
    pub fn publish(&self, message: ChannelMessage) {
        debug!(channel = %self.inner.channel_name, ?message, "publish");
        let _ = self.inner.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.inner.tx.subscribe()
    }
}
