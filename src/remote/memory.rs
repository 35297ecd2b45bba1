//! In-memory backend.
//!
//! First-class for tests and offline development. Mirrors the Postgres
//! backend's observable behavior, including the echo of a device's own
//! upserts back through the event feed — loop prevention in the bridge
//! depends on that echo existing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;
use tracing::warn;

use crate::business::{BreakState, BusinessConfig};
use crate::error::Result;
use crate::model::TicketId;
use crate::remote::{Business, RemoteBackend, RemoteEvent, TicketPatch, TicketRow};
use crate::tenant::TenantId;

#[derive(Default)]
struct Inner {
    tickets: BTreeMap<String, TicketRow>,
    businesses: Vec<Business>,
    configs: BTreeMap<String, BusinessConfig>,
    breaks: BTreeMap<String, BreakState>,
    subscribers: Vec<(String, mpsc::Sender<RemoteEvent>)>,
    upserted_rows: u64,
}

impl Inner {
    fn broadcast(&mut self, event: &RemoteEvent) {
        self.subscribers.retain(|(tenant, tx)| {
            if tenant != event.tenant_id() {
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("memory feed subscriber lagging, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Shared in-memory store. Cheap to clone; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_business(self, business: Business) -> Self {
        self.inner.lock().expect("memory lock").businesses.push(business);
        self
    }

    /// Store a row without emitting an event — data that predates the
    /// session, for initial-merge scenarios.
    pub fn seed_row(&self, row: TicketRow) {
        self.inner
            .lock()
            .expect("memory lock")
            .tickets
            .insert(row.id.clone(), row);
    }

    /// Deliver an event to subscribers without touching stored rows.
    /// Lets tests replay duplicates and out-of-order deliveries.
    pub fn push_event(&self, event: RemoteEvent) {
        self.inner.lock().expect("memory lock").broadcast(&event);
    }

    /// Store a row and emit the matching insert/update event — what a
    /// second device's push looks like from this side.
    pub fn remote_write(&self, row: TicketRow) {
        let mut inner = self.inner.lock().expect("memory lock");
        let event = if inner.tickets.contains_key(&row.id) {
            RemoteEvent::Update { row: row.clone() }
        } else {
            RemoteEvent::Insert { row: row.clone() }
        };
        inner.tickets.insert(row.id.clone(), row);
        inner.broadcast(&event);
    }

    /// Remove a row and emit the delete event.
    pub fn remote_delete(&self, id: &str) {
        let mut inner = self.inner.lock().expect("memory lock");
        if let Some(row) = inner.tickets.remove(id) {
            inner.broadcast(&RemoteEvent::Delete {
                id: row.id,
                tenant_id: row.tenant_id,
                business_date: row.business_date,
            });
        }
    }

    /// Current rows for a tenant, creation order. Test observability.
    pub fn rows(&self, tenant: &TenantId) -> Vec<TicketRow> {
        let inner = self.inner.lock().expect("memory lock");
        let mut rows: Vec<TicketRow> = inner
            .tickets
            .values()
            .filter(|r| r.tenant_id == tenant.as_str())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    /// Total rows ever written through upsert. Test observability.
    pub fn upserted_rows(&self) -> u64 {
        self.inner.lock().expect("memory lock").upserted_rows
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn fetch_tickets(&self, tenant: &TenantId, date: NaiveDate) -> Result<Vec<TicketRow>> {
        let inner = self.inner.lock().expect("memory lock");
        let mut rows: Vec<TicketRow> = inner
            .tickets
            .values()
            .filter(|r| r.tenant_id == tenant.as_str() && r.business_date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn upsert_tickets(&self, rows: &[TicketRow]) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory lock");
        for row in rows {
            let event = if inner.tickets.contains_key(&row.id) {
                RemoteEvent::Update { row: row.clone() }
            } else {
                RemoteEvent::Insert { row: row.clone() }
            };
            inner.tickets.insert(row.id.clone(), row.clone());
            inner.upserted_rows += 1;
            inner.broadcast(&event);
        }
        Ok(())
    }

    async fn update_ticket(&self, id: &TicketId, patch: &TicketPatch) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory lock");
        let Some(row) = inner.tickets.get_mut(id.as_str()) else {
            return Ok(());
        };
        if let Some(amount) = patch.paid_amount {
            row.paid_amount = Some(amount);
        }
        if let Some(ref method) = patch.payment_method {
            row.payment_method = Some(method.clone());
        }
        if let Some(seconds) = patch.served_seconds {
            row.served_seconds = Some(seconds);
        }
        if let Some(served_at) = patch.served_at {
            row.served_at = Some(served_at);
        }
        let event = RemoteEvent::Update { row: row.clone() };
        inner.broadcast(&event);
        Ok(())
    }

    async fn events(&self, tenant: &TenantId) -> Result<mpsc::Receiver<RemoteEvent>> {
        let (tx, rx) = mpsc::channel(256);
        self.inner
            .lock()
            .expect("memory lock")
            .subscribers
            .push((tenant.as_str().to_string(), tx));
        Ok(rx)
    }

    async fn business_by_slug(&self, slug: &str) -> Result<Option<Business>> {
        let inner = self.inner.lock().expect("memory lock");
        Ok(inner.businesses.iter().find(|b| b.slug == slug).cloned())
    }

    async fn fetch_config(&self, tenant: &TenantId) -> Result<Option<BusinessConfig>> {
        let inner = self.inner.lock().expect("memory lock");
        Ok(inner.configs.get(tenant.as_str()).cloned())
    }

    async fn save_config(&self, tenant: &TenantId, config: &BusinessConfig) -> Result<()> {
        self.inner
            .lock()
            .expect("memory lock")
            .configs
            .insert(tenant.as_str().to_string(), config.clone());
        Ok(())
    }

    async fn fetch_break(&self, tenant: &TenantId) -> Result<Option<BreakState>> {
        let inner = self.inner.lock().expect("memory lock");
        Ok(inner.breaks.get(tenant.as_str()).cloned())
    }

    async fn save_break(&self, tenant: &TenantId, state: &BreakState) -> Result<()> {
        self.inner
            .lock()
            .expect("memory lock")
            .breaks
            .insert(tenant.as_str().to_string(), state.clone());
        Ok(())
    }

    async fn served_tickets_between(
        &self,
        tenant: &TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TicketRow>> {
        let inner = self.inner.lock().expect("memory lock");
        let mut rows: Vec<TicketRow> = inner
            .tickets
            .values()
            .filter(|r| r.tenant_id == tenant.as_str() && r.status == "served")
            .filter(|r| {
                r.served_at
                    .map(|at| {
                        let day = at.date_naive();
                        day >= start && day <= end
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.served_at);
        Ok(rows)
    }
}
