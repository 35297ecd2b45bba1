//! Core data model.
//!
//! A ticket is one customer's place in the walk-in queue. It has identity
//! (an opaque id used as the merge key everywhere), a short display code,
//! lifecycle state, and the timestamps each transition stamps exactly once.
//! QueueState is the per-tenant, per-day aggregate every operation reads
//! and writes as a whole.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Display-code prefix. Codes look like `A01`, `A02`, … `A100`.
pub const CODE_PREFIX: char = 'A';

/// The calendar date scoping today's queue, in the local day boundary.
pub fn business_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Seconds between two instants, clamped at zero.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Newtype for ticket IDs.
///
/// Generated as `<unix-millis>_<random base36 suffix>`. The id is immutable
/// for the lifetime of the ticket and is the merge key for remote upserts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("{}_{suffix}", Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// In the queue, not yet called.
    Waiting,
    /// Called to a chair; staff actively attending.
    Serving,
    /// Finished. Terminal.
    Served,
    /// Abandoned or dismissed. Terminal.
    Canceled,
}

impl TicketStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, to),
            (Waiting, Serving)
                | (Serving, Served)
                | (Serving, Waiting) // return to queue
                | (Waiting, Canceled)
                | (Serving, Canceled)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Served | TicketStatus::Canceled)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Serving => "serving",
            TicketStatus::Served => "served",
            TicketStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TicketStatus::Waiting),
            "serving" => Ok(TicketStatus::Serving),
            "served" => Ok(TicketStatus::Served),
            "canceled" => Ok(TicketStatus::Canceled),
            _ => Err(crate::error::Error::Other(format!("unknown status: {s}"))),
        }
    }
}

/// One customer's queue entry.
///
/// Serialized camelCase — this is the shape of the local snapshot. The
/// snake_case remote row lives at the remote boundary only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: TicketId,
    /// Short display code, unique and monotonic within a tenant-day.
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    /// Which catalog service the customer asked for.
    #[serde(default, rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_seconds: Option<i64>,
    /// Advisory only; remote rows carry their own version counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl Ticket {
    /// The instant service actually began, for duration math.
    pub fn service_anchor(&self) -> Option<DateTime<Utc>> {
        self.started_at.or(self.called_at)
    }
}

/// Builder for creating new tickets. The engine's intake API.
#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub(crate) name: String,
    pub(crate) phone: String,
    pub(crate) service_type: String,
    pub(crate) description: String,
}

impl NewTicket {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            service_type: service_type.into(),
            ..Self::default()
        }
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into().trim().to_string();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Direction for reordering within the waiting subsequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

impl std::str::FromStr for MoveDirection {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            _ => Err(crate::error::Error::Other(format!(
                "unknown direction: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Codes
// ---------------------------------------------------------------------------

/// Format a sequence number as a display code: 2-digit minimum, growing
/// naturally past 99.
pub fn make_code(n: u32) -> String {
    format!("{CODE_PREFIX}{n:02}")
}

/// Parse the sequence number back out of a display code.
pub fn code_number(code: &str) -> Option<u32> {
    code.strip_prefix(CODE_PREFIX)?.parse().ok()
}

// ---------------------------------------------------------------------------
// Revenue
// ---------------------------------------------------------------------------

/// Running revenue totals for the day, kept inside the queue state so a
/// dashboard can read them without replaying payments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revenue {
    pub total: f64,
    #[serde(default)]
    pub by_method: BTreeMap<String, f64>,
    #[serde(default)]
    pub by_service: BTreeMap<String, f64>,
}

impl Revenue {
    pub fn record(&mut self, amount: f64, method: &str, service: &str) {
        self.total += amount;
        *self.by_method.entry(method.to_string()).or_default() += amount;
        let service = if service.is_empty() { "Otro" } else { service };
        *self.by_service.entry(service.to_string()).or_default() += amount;
    }
}

// ---------------------------------------------------------------------------
// QueueState
// ---------------------------------------------------------------------------

/// The per-tenant, per-day aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// The day this state belongs to. A mismatch invalidates the whole
    /// snapshot on read.
    pub date: NaiveDate,
    /// Ordered queue. Order carries the waiting FIFO; served/canceled
    /// tickets stay in place as history.
    pub queue: Vec<Ticket>,
    /// Highest sequence number issued today. Next code = last_number + 1.
    pub last_number: u32,
    /// Tickets ever marked served today. Monotonic.
    pub served_count: u32,
    /// Bumped on every write; signals "something changed", nothing more.
    pub version: u64,
    pub tenant_id: String,
    #[serde(default)]
    pub revenue: Revenue,
    /// Single-current-ticket snapshots carried this. Accepted on read for
    /// compatibility, never written back.
    #[serde(default, skip_serializing)]
    pub current_index: Option<usize>,
}

impl QueueState {
    /// Fresh default state for a tenant-day.
    pub fn for_day(tenant_id: &str, date: NaiveDate) -> Self {
        Self {
            date,
            queue: Vec::new(),
            last_number: 0,
            served_count: 0,
            version: 0,
            tenant_id: tenant_id.to_string(),
            revenue: Revenue::default(),
            current_index: None,
        }
    }

    pub fn today(tenant_id: &str) -> Self {
        Self::for_day(tenant_id, business_today())
    }

    pub fn find(&self, id: &TicketId) -> Option<&Ticket> {
        self.queue.iter().find(|t| &t.id == id)
    }

    pub fn find_mut(&mut self, id: &TicketId) -> Option<&mut Ticket> {
        self.queue.iter_mut().find(|t| &t.id == id)
    }

    pub fn position(&self, id: &TicketId) -> Option<usize> {
        self.queue.iter().position(|t| &t.id == id)
    }

    pub fn waiting(&self) -> impl Iterator<Item = &Ticket> {
        self.queue
            .iter()
            .filter(|t| t.status == TicketStatus::Waiting)
    }

    pub fn serving(&self) -> impl Iterator<Item = &Ticket> {
        self.queue
            .iter()
            .filter(|t| t.status == TicketStatus::Serving)
    }

    /// Mean service duration over today's served tickets, in seconds.
    pub fn average_service_seconds(&self) -> i64 {
        let durations: Vec<i64> = self
            .queue
            .iter()
            .filter(|t| t.status == TicketStatus::Served)
            .filter_map(|t| Some(elapsed_seconds(t.service_anchor()?, t.served_at?)))
            .collect();
        if durations.is_empty() {
            return 0;
        }
        durations.iter().sum::<i64>() / durations.len() as i64
    }

    /// Re-derive the aggregate fields from the full queue.
    ///
    /// Used after remote event application: events may arrive out of order
    /// or twice, so a full scan is the only recomputation that converges.
    pub fn recompute_derived(&mut self) {
        self.last_number = self
            .queue
            .iter()
            .filter_map(|t| code_number(&t.code))
            .max()
            .unwrap_or(0);
        self.served_count = self
            .queue
            .iter()
            .filter(|t| t.status == TicketStatus::Served)
            .count() as u32;

        let mut revenue = Revenue::default();
        for t in &self.queue {
            if t.status != TicketStatus::Served {
                continue;
            }
            if let Some(amount) = t.paid_amount {
                let method = t.payment_method.as_deref().unwrap_or("N/D");
                revenue.record(amount, method, &t.service_type);
            }
        }
        self.revenue = revenue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_lifecycle() {
        use TicketStatus::*;
        assert!(Waiting.can_transition_to(Serving));
        assert!(Serving.can_transition_to(Served));
        assert!(Serving.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Canceled));
        assert!(Serving.can_transition_to(Canceled));

        // terminal states admit nothing
        for from in [Served, Canceled] {
            for to in [Waiting, Serving, Served, Canceled] {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be invalid");
            }
        }
        // no skipping the call step
        assert!(!Waiting.can_transition_to(Served));
    }

    #[test]
    fn codes_pad_to_two_digits_and_grow() {
        assert_eq!(make_code(1), "A01");
        assert_eq!(make_code(99), "A99");
        assert_eq!(make_code(100), "A100");
        assert_eq!(code_number("A07"), Some(7));
        assert_eq!(code_number("A100"), Some(100));
        assert_eq!(code_number("B07"), None);
        assert_eq!(code_number("garbage"), None);
    }

    #[test]
    fn ticket_ids_are_unique_and_time_prefixed() {
        let a = TicketId::generate();
        let b = TicketId::generate();
        assert_ne!(a, b);
        let millis: i64 = a.as_str().split('_').next().unwrap().parse().unwrap();
        assert!(millis > 0);
    }

    #[test]
    fn legacy_snapshot_with_current_index_still_parses() {
        let raw = r#"{
            "date": "2026-08-06",
            "queue": [],
            "lastNumber": 3,
            "servedCount": 1,
            "version": 9,
            "tenantId": "donjuan_barber",
            "currentIndex": 0
        }"#;
        let st: QueueState = serde_json::from_str(raw).unwrap();
        assert_eq!(st.current_index, Some(0));
        // never written back
        let out = serde_json::to_string(&st).unwrap();
        assert!(!out.contains("currentIndex"));
    }

    #[test]
    fn recompute_derives_from_full_queue() {
        let mut st = QueueState::today("t1");
        for (n, status) in [(1, TicketStatus::Served), (2, TicketStatus::Waiting)] {
            st.queue.push(Ticket {
                id: TicketId::generate(),
                code: make_code(n),
                name: String::new(),
                phone: String::new(),
                service_type: "Corte".into(),
                description: String::new(),
                status,
                created_at: Utc::now(),
                called_at: None,
                started_at: None,
                served_at: None,
                canceled_at: None,
                paid_amount: (status == TicketStatus::Served).then_some(500.0),
                payment_method: Some("Efectivo".into()),
                served_seconds: None,
                version: None,
            });
        }
        st.recompute_derived();
        assert_eq!(st.last_number, 2);
        assert_eq!(st.served_count, 1);
        assert_eq!(st.revenue.total, 500.0);
        assert_eq!(st.revenue.by_method.get("Efectivo"), Some(&500.0));
    }
}
