//! Queue state persistence.
//!
//! Single read/write gateway to the persisted QueueState for the active
//! tenant-day. Snapshots are whole-state JSON documents under the data
//! directory, last write wins. Reads never trust a cached copy — another
//! process may have written in between — and never fail: a missing,
//! malformed, wrong-day, or wrong-tenant snapshot reads as a fresh
//! default.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::warn;

use crate::bus::{ChannelMessage, TenantBus};
use crate::error::Result;
use crate::model::{QueueState, business_today};
use crate::tenant::{DocKind, Keyspace};

/// Read a persisted JSON document. Corruption is treated as absence.
pub(crate) fn read_doc<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable document, treating as absent");
            None
        }
    }
}

/// Persist a JSON document atomically (temp file + rename).
pub(crate) fn write_doc<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Touch the ping sentinel next to a document. The payload is a timestamp
/// and exists only to trigger cross-process change notification.
pub(crate) fn touch_ping(path: &Path) -> Result<()> {
    fs::write(path, Utc::now().timestamp_millis().to_string())?;
    Ok(())
}

/// Read one of a tenant's side documents (config, services, history, …).
pub(crate) fn read_tenant_doc<T: DeserializeOwned>(
    data_dir: &Path,
    keyspace: &Keyspace,
    kind: DocKind,
) -> Option<T> {
    read_doc(&keyspace.doc_path(data_dir, kind))
}

/// Persist one of a tenant's side documents and touch its sentinel.
pub(crate) fn write_tenant_doc<T: Serialize>(
    data_dir: &Path,
    keyspace: &Keyspace,
    kind: DocKind,
    value: &T,
) -> Result<()> {
    write_doc(&keyspace.doc_path(data_dir, kind), value)?;
    touch_ping(&keyspace.ping_path(data_dir, kind))
}

/// The queue state gateway for one tenant.
#[derive(Clone)]
pub struct QueueStore {
    data_dir: PathBuf,
    keyspace: Keyspace,
    bus: TenantBus,
}

impl QueueStore {
    pub fn new(data_dir: impl Into<PathBuf>, keyspace: Keyspace, bus: TenantBus) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            keyspace,
            bus,
        })
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn bus(&self) -> &TenantBus {
        &self.bus
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Current state for the active tenant-day.
    ///
    /// Always re-reads the persisted snapshot; a snapshot from another day
    /// or another tenant is discarded in favor of a fresh default (which
    /// is not persisted until the next write).
    pub fn read(&self) -> QueueState {
        let tenant = self.keyspace.tenant().as_str();
        match read_tenant_doc::<QueueState>(&self.data_dir, &self.keyspace, DocKind::State) {
            Some(st) if st.date == business_today() && st.tenant_id == tenant => st,
            Some(_) => QueueState::today(tenant),
            None => QueueState::today(tenant),
        }
    }

    /// Persist `state`, bumping its version. Unless `silent`, publishes a
    /// `state:update` signal carrying the new version. The ping sentinel
    /// is touched either way — it is the persistence marker other
    /// processes key off, not a user-visible notification.
    pub fn write(&self, state: &mut QueueState, silent: bool) -> Result<u64> {
        state.version += 1;
        write_doc(
            &self.keyspace.doc_path(&self.data_dir, DocKind::State),
            state,
        )?;
        touch_ping(&self.keyspace.ping_path(&self.data_dir, DocKind::State))?;
        if !silent {
            self.bus.publish(ChannelMessage::StateUpdate {
                version: state.version,
            });
        }
        Ok(state.version)
    }

    /// Make sure a snapshot exists for today, without signalling anyone.
    pub fn ensure_init(&self) -> Result<QueueState> {
        let mut st = self.read();
        self.write(&mut st, true)?;
        Ok(st)
    }

    /// Subscribe to queue state. The first `next()` resolves immediately
    /// with current state; every later one waits for a change signal and
    /// re-reads the authoritative snapshot.
    pub fn subscribe(&self) -> StateSubscriber {
        StateSubscriber {
            store: self.clone(),
            rx: self.bus.subscribe(),
            delivered_initial: false,
        }
    }
}

/// Observer handle returned by [`QueueStore::subscribe`].
pub struct StateSubscriber {
    store: QueueStore,
    rx: broadcast::Receiver<ChannelMessage>,
    delivered_initial: bool,
}

impl StateSubscriber {
    pub async fn next(&mut self) -> QueueState {
        if !self.delivered_initial {
            self.delivered_initial = true;
            return self.store.read();
        }
        loop {
            match self.rx.recv().await {
                Ok(ChannelMessage::StateUpdate { .. }) => return self.store.read(),
                Ok(_) => continue,
                // Missed signals collapse into one re-read.
                Err(broadcast::error::RecvError::Lagged(_)) => return self.store.read(),
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
