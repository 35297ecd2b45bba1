//! Remote sync bridge.
//!
//! Reconciles the local tenant-day queue with the shared backend so every
//! device serving the same business converges. Convergence primitive is
//! the per-row upsert (last writer wins); incoming events merge by id and
//! the derived aggregates are recomputed from the full queue, so
//! duplicate or out-of-order deliveries are harmless. Every remote call
//! is best-effort: failures are logged and the local store stays
//! authoritative.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bus::ChannelMessage;
use crate::business::{BreakState, BusinessConfig};
use crate::error::Result;
use crate::model::{QueueState, Ticket, business_today};
use crate::remote::{RemoteBackend, RemoteEvent, TicketPatch, TicketRow};
use crate::store::QueueStore;
use crate::tenant::TenantId;

/// How long after applying a remote event local change signals are
/// treated as echoes rather than user edits. Time-bounded on purpose: a
/// real edit racing the window is pushed on the next change anyway.
const SUPPRESS_WINDOW: Duration = Duration::from_millis(50);

/// Bridge between one tenant's local store and the shared backend.
#[derive(Clone)]
pub struct SyncBridge {
    store: QueueStore,
    remote: Arc<dyn RemoteBackend>,
    suppress_until: Arc<Mutex<Option<Instant>>>,
}

impl SyncBridge {
    pub fn new(store: QueueStore, remote: Arc<dyn RemoteBackend>) -> Self {
        Self {
            store,
            remote,
            suppress_until: Arc::new(Mutex::new(None)),
        }
    }

    fn tenant(&self) -> TenantId {
        self.store.keyspace().tenant().clone()
    }

    fn arm_suppression(&self) {
        *self.suppress_until.lock().expect("suppress lock") =
            Some(Instant::now() + SUPPRESS_WINDOW);
    }

    /// Whether local change signals are currently considered echoes of a
    /// remote event application.
    pub fn is_suppressed(&self) -> bool {
        self.suppress_until
            .lock()
            .expect("suppress lock")
            .is_some_and(|until| Instant::now() < until)
    }

    /// Session-start reconciliation. Remote rows win when any exist;
    /// otherwise local tickets seed the remote store.
    pub async fn initial_merge(&self) {
        let tenant = self.tenant();
        let today = business_today();

        match self.remote.fetch_tickets(&tenant, today).await {
            Ok(rows) if !rows.is_empty() => {
                let local = self.store.read();
                let mut st = QueueState::for_day(tenant.as_str(), today);
                st.version = local.version;
                st.queue = rows.into_iter().map(TicketRow::into_ticket).collect();
                st.recompute_derived();
                self.arm_suppression();
                if let Err(e) = self.store.write(&mut st, false) {
                    warn!(error = %e, "failed to persist initial merge");
                } else {
                    info!(tickets = st.queue.len(), "initial merge: remote wins");
                }
            }
            Ok(_) => {
                let local = self.store.read();
                if !local.queue.is_empty() {
                    info!(tickets = local.queue.len(), "initial merge: seeding remote");
                    self.push_state(&local).await;
                }
            }
            Err(e) => warn!(error = %e, "initial merge skipped"),
        }
    }

    /// Upsert every current ticket to the remote store.
    pub async fn push_local_to_remote(&self) {
        let st = self.store.read();
        self.push_state(&st).await;
    }

    async fn push_state(&self, st: &QueueState) {
        if st.queue.is_empty() {
            return;
        }
        let tenant = self.tenant();
        let rows: Vec<TicketRow> = st
            .queue
            .iter()
            .map(|t| TicketRow::from_ticket(t, &tenant, st.date))
            .collect();
        if let Err(e) = self.remote.upsert_tickets(&rows).await {
            warn!(error = %e, "push to remote failed, will retry on next change");
        }
    }

    /// Push a served ticket's payment metadata through the narrow patch
    /// path, independent of the full-row upsert.
    pub async fn push_payment(&self, ticket: &Ticket) {
        let patch = TicketPatch::from(ticket);
        if patch.is_empty() {
            return;
        }
        if let Err(e) = self.remote.update_ticket(&ticket.id, &patch).await {
            warn!(error = %e, ticket = %ticket.id, "payment patch failed");
        }
    }

    /// Mirror the operating config upstream, best-effort.
    pub async fn push_config(&self, config: &BusinessConfig) {
        if let Err(e) = self.remote.save_config(&self.tenant(), config).await {
            warn!(error = %e, "config mirror failed");
        }
    }

    /// Mirror the break state upstream, best-effort.
    pub async fn push_break(&self, state: &BreakState) {
        if let Err(e) = self.remote.save_break(&self.tenant(), state).await {
            warn!(error = %e, "break mirror failed");
        }
    }

    /// Merge one feed event into the local queue.
    ///
    /// Re-reads current state immediately before merging — local state may
    /// have moved while the event was in flight. Aggregates are re-derived
    /// from the full queue afterwards, never adjusted incrementally.
    pub fn apply_remote_event(&self, event: RemoteEvent) {
        let tenant = self.tenant();
        let today = business_today();
        if !event.applies_to(&tenant, today) {
            return;
        }

        let mut st = self.store.read();
        match event {
            RemoteEvent::Insert { row } | RemoteEvent::Update { row } => {
                let ticket = row.into_ticket();
                match st.position(&ticket.id) {
                    Some(pos) => st.queue[pos] = ticket,
                    None => st.queue.push(ticket),
                }
            }
            RemoteEvent::Delete { ref id, .. } => {
                st.queue.retain(|t| t.id.as_str() != id);
            }
        }
        st.recompute_derived();

        self.arm_suppression();
        if let Err(e) = self.store.write(&mut st, false) {
            warn!(error = %e, "failed to persist remote event");
        }
    }

    /// Run the bridge: initial merge, then pump the realtime feed and the
    /// local change signals until the bus closes.
    pub async fn run(&self) -> Result<()> {
        self.initial_merge().await;

        let tenant = self.tenant();
        let (mut events, mut feed_open) = match self.remote.events(&tenant).await {
            Ok(rx) => (rx, true),
            Err(e) => {
                warn!(error = %e, "realtime feed unavailable, push-only sync");
                let (_tx, rx) = mpsc::channel(1);
                (rx, false)
            }
        };
        let mut bus_rx = self.store.bus().subscribe();

        self.push_local_to_remote().await;

        loop {
            tokio::select! {
                maybe = events.recv(), if feed_open => match maybe {
                    Some(event) => {
                        debug!(?event, "remote event");
                        self.apply_remote_event(event);
                    }
                    None => {
                        warn!("realtime feed closed, push-only sync");
                        feed_open = false;
                    }
                },
                signal = bus_rx.recv() => match signal {
                    Ok(ChannelMessage::StateUpdate { .. }) => {
                        if !self.is_suppressed() {
                            self.push_local_to_remote().await;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !self.is_suppressed() {
                            self.push_local_to_remote().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}
