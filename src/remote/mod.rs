//! Remote boundary: row shapes, the realtime event type, and the backend
//! trait.
//!
//! The canonical in-memory Ticket stays camelCase and local; the remote
//! store speaks snake_case rows. The mapping between the two lives here
//! and nowhere else, so neither shape leaks into core logic.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRemote;
pub use postgres::PgRemote;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::business::{BreakState, BusinessConfig};
use crate::error::Result;
use crate::model::{Ticket, TicketId, TicketStatus};
use crate::tenant::TenantId;

/// A business account: maps a URL-safe slug to tenant identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// One ticket as the shared backend stores it. Upserts are keyed on `id`
/// with full-row overwrite semantics — last writer wins per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketRow {
    pub id: String,
    pub tenant_id: String,
    pub business_date: NaiveDate,
    pub code: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub service_type: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub called_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub served_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub paid_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub served_seconds: Option<i64>,
    pub version: Option<i64>,
}

impl TicketRow {
    pub fn from_ticket(t: &Ticket, tenant: &TenantId, date: NaiveDate) -> Self {
        Self {
            id: t.id.as_str().to_string(),
            tenant_id: tenant.as_str().to_string(),
            business_date: date,
            code: Some(t.code.clone()),
            name: Some(t.name.clone()),
            phone: Some(t.phone.clone()),
            service_type: Some(t.service_type.clone()),
            description: Some(t.description.clone()),
            status: t.status.to_string(),
            created_at: Some(t.created_at),
            called_at: t.called_at,
            started_at: t.started_at,
            served_at: t.served_at,
            canceled_at: t.canceled_at,
            paid_amount: t.paid_amount,
            payment_method: t.payment_method.clone(),
            served_seconds: t.served_seconds,
            version: t.version,
        }
    }

    pub fn into_ticket(self) -> Ticket {
        Ticket {
            id: TicketId(self.id),
            code: self.code.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
            service_type: self.service_type.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            status: self.status.parse().unwrap_or(TicketStatus::Waiting),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            called_at: self.called_at,
            started_at: self.started_at,
            served_at: self.served_at,
            canceled_at: self.canceled_at,
            paid_amount: self.paid_amount,
            payment_method: self.payment_method,
            served_seconds: self.served_seconds,
            version: self.version,
        }
    }
}

/// The narrow update path for payment and service-duration metadata,
/// independent of the full-row upsert. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPatch {
    pub paid_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub served_seconds: Option<i64>,
    pub served_at: Option<DateTime<Utc>>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.paid_amount.is_none()
            && self.payment_method.is_none()
            && self.served_seconds.is_none()
            && self.served_at.is_none()
    }
}

impl From<&Ticket> for TicketPatch {
    fn from(t: &Ticket) -> Self {
        Self {
            paid_amount: t.paid_amount,
            payment_method: t.payment_method.clone(),
            served_seconds: t.served_seconds,
            served_at: t.served_at,
        }
    }
}

/// One change from the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RemoteEvent {
    Insert {
        row: TicketRow,
    },
    Update {
        row: TicketRow,
    },
    Delete {
        id: String,
        tenant_id: String,
        business_date: NaiveDate,
    },
}

impl RemoteEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            RemoteEvent::Insert { row } | RemoteEvent::Update { row } => &row.tenant_id,
            RemoteEvent::Delete { tenant_id, .. } => tenant_id,
        }
    }

    /// Does this event belong to the given tenant-day?
    pub fn applies_to(&self, tenant: &TenantId, date: NaiveDate) -> bool {
        let (tenant_id, business_date) = match self {
            RemoteEvent::Insert { row } | RemoteEvent::Update { row } => {
                (row.tenant_id.as_str(), row.business_date)
            }
            RemoteEvent::Delete {
                tenant_id,
                business_date,
                ..
            } => (tenant_id.as_str(), *business_date),
        };
        tenant_id == tenant.as_str() && business_date == date
    }
}

/// The shared backend store. Every operation is best-effort from the
/// caller's point of view — the local store stays authoritative whether
/// or not these calls succeed.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// All ticket rows for a tenant-day, ordered by creation time.
    async fn fetch_tickets(&self, tenant: &TenantId, date: NaiveDate) -> Result<Vec<TicketRow>>;

    /// Idempotent insert-or-overwrite keyed on ticket id.
    async fn upsert_tickets(&self, rows: &[TicketRow]) -> Result<()>;

    /// Apply a narrow patch to one row.
    async fn update_ticket(&self, id: &TicketId, patch: &TicketPatch) -> Result<()>;

    /// Subscribe to the change feed for a tenant. Day filtering is the
    /// consumer's job — "today" moves while the subscription lives.
    async fn events(&self, tenant: &TenantId) -> Result<mpsc::Receiver<RemoteEvent>>;

    async fn business_by_slug(&self, slug: &str) -> Result<Option<Business>>;

    async fn fetch_config(&self, tenant: &TenantId) -> Result<Option<BusinessConfig>>;
    async fn save_config(&self, tenant: &TenantId, config: &BusinessConfig) -> Result<()>;

    async fn fetch_break(&self, tenant: &TenantId) -> Result<Option<BreakState>>;
    async fn save_break(&self, tenant: &TenantId, state: &BreakState) -> Result<()>;

    /// Served rows in an inclusive date range, for reporting reads.
    async fn served_tickets_between(
        &self,
        tenant: &TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TicketRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_mapping_round_trips_the_canonical_ticket() {
        let tenant = TenantId::new("divas_salon").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();

        let ticket = Ticket {
            id: TicketId::generate(),
            code: "A03".into(),
            name: "Ana".into(),
            phone: "8091234567".into(),
            service_type: "Corte".into(),
            description: String::new(),
            status: TicketStatus::Served,
            created_at: Utc::now(),
            called_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            served_at: Some(Utc::now()),
            canceled_at: None,
            paid_amount: Some(500.0),
            payment_method: Some("Efectivo".into()),
            served_seconds: Some(1200),
            version: Some(2),
        };
        let row = TicketRow::from_ticket(&ticket, &tenant, date);
        assert_eq!(row.tenant_id, "divas_salon");
        assert_eq!(row.business_date, date);
        assert_eq!(row.status, "served");

        let back = row.into_ticket();
        assert_eq!(back.id, ticket.id);
        assert_eq!(back.status, ticket.status);
        assert_eq!(back.paid_amount, ticket.paid_amount);
        assert_eq!(back.served_seconds, ticket.served_seconds);
    }

    #[test]
    fn unknown_status_degrades_to_waiting() {
        let row = TicketRow {
            id: "x".into(),
            tenant_id: "t".into(),
            business_date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
            code: None,
            name: None,
            phone: None,
            service_type: None,
            description: None,
            status: "archived".into(),
            created_at: None,
            called_at: None,
            started_at: None,
            served_at: None,
            canceled_at: None,
            paid_amount: None,
            payment_method: None,
            served_seconds: None,
            version: None,
        };
        assert_eq!(row.into_ticket().status, TicketStatus::Waiting);
    }

    #[test]
    fn events_serialize_with_the_event_tag() {
        let ev = RemoteEvent::Delete {
            id: "abc".into(),
            tenant_id: "t".into(),
            business_date: NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"delete""#));
        let back: RemoteEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
