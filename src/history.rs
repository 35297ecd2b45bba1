//! Served-ticket history and the aggregates derived from it.
//!
//! Three per-tenant documents live here: the append-only history of
//! served tickets (the revenue ledger), per-service waiting-time running
//! averages, and per-client visit history keyed by phone number. The
//! queue state holds only today; these survive the day rollover.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{ChannelMessage, TenantBus};
use crate::error::Result;
use crate::model::{QueueState, TicketId, TicketStatus, business_today};
use crate::store::{read_tenant_doc, write_tenant_doc};
use crate::tenant::{DocKind, Keyspace};

/// Visits kept per client before the oldest are dropped.
const CLIENT_VISIT_CAP: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_at: Option<DateTime<Utc>>,
    pub ticket_id: TicketId,
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub served_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub items: Vec<HistoryEntry>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAverage {
    pub count: u32,
    pub total_seconds: i64,
    pub average: i64,
}

impl RunningAverage {
    fn record(&mut self, seconds: i64) {
        self.count += 1;
        self.total_seconds += seconds;
        self.average = self.total_seconds / self.count as i64;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitingTimes {
    pub services: BTreeMap<String, RunningAverage>,
    pub average: RunningAverage,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVisit {
    pub date: DateTime<Utc>,
    pub service: String,
    pub duration: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub name: String,
    pub visits: Vec<ClientVisit>,
    pub total_spent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientHistory {
    pub clients: BTreeMap<String, ClientRecord>,
    pub version: u64,
}

/// Store for the served-ticket ledger and its sibling aggregates.
#[derive(Clone)]
pub struct HistoryStore {
    data_dir: PathBuf,
    keyspace: Keyspace,
    bus: TenantBus,
}

impl HistoryStore {
    pub fn new(data_dir: impl Into<PathBuf>, keyspace: Keyspace, bus: TenantBus) -> Self {
        Self {
            data_dir: data_dir.into(),
            keyspace,
            bus,
        }
    }

    // -----------------------------------------------------------------------
    // Served-ticket ledger
    // -----------------------------------------------------------------------

    pub fn get(&self) -> History {
        read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::History).unwrap_or_default()
    }

    fn save(&self, mut history: History) -> Result<History> {
        history.version += 1;
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::History, &history)?;
        self.bus.publish(ChannelMessage::HistoryUpdate);
        Ok(history)
    }

    /// Reconcile today's ledger rows from the queue state. New served
    /// tickets are appended; existing rows are refreshed in case payment
    /// landed after the serve. Returns whether anything changed.
    pub fn sync_today_from_state(&self, state: &QueueState) -> Result<bool> {
        let today = business_today();
        let mut history = self.get();
        let mut changed = false;

        for t in &state.queue {
            if t.status != TicketStatus::Served {
                continue;
            }
            let Some(served_at) = t.served_at else {
                continue;
            };
            if served_at.with_timezone(&chrono::Local).date_naive() != today {
                continue;
            }

            let entry = HistoryEntry {
                date: today,
                served_at: Some(served_at),
                ticket_id: t.id.clone(),
                code: t.code.clone(),
                name: t.name.clone(),
                service_type: t.service_type.clone(),
                paid_amount: t.paid_amount.unwrap_or(0.0),
                payment_method: t
                    .payment_method
                    .clone()
                    .unwrap_or_else(|| "N/D".to_string()),
                served_seconds: t.served_seconds.unwrap_or(0),
            };

            match history.items.iter_mut().find(|e| e.ticket_id == t.id) {
                Some(existing) => {
                    if *existing != entry {
                        *existing = entry;
                        changed = true;
                    }
                }
                None => {
                    history.items.push(entry);
                    changed = true;
                }
            }
        }

        if changed {
            self.save(history)?;
        }
        Ok(changed)
    }

    pub fn revenue_for_date(&self, date: NaiveDate) -> f64 {
        self.get()
            .items
            .iter()
            .filter(|e| e.date == date)
            .map(|e| e.paid_amount)
            .sum()
    }

    /// Daily revenue for the last `n` days, oldest first, ending today.
    pub fn revenue_last_days(&self, n: usize) -> Vec<(NaiveDate, f64)> {
        let history = self.get();
        let today = business_today();
        (0..n)
            .rev()
            .map(|back| {
                let date = today - Duration::days(back as i64);
                let total = history
                    .items
                    .iter()
                    .filter(|e| e.date == date)
                    .map(|e| e.paid_amount)
                    .sum();
                (date, total)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Waiting-time running averages
    // -----------------------------------------------------------------------

    pub fn waiting_times(&self) -> WaitingTimes {
        read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::WaitingTimes).unwrap_or_default()
    }

    /// Fold one measured service duration into the per-service and
    /// overall running averages.
    pub fn record_waiting_time(&self, service: &str, seconds: i64) -> Result<WaitingTimes> {
        let mut wt = self.waiting_times();
        wt.services.entry(service.to_string()).or_default().record(seconds);
        wt.average.record(seconds);
        wt.version += 1;
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::WaitingTimes, &wt)?;
        self.bus.publish(ChannelMessage::WaitingTimesUpdate {
            version: wt.version,
        });
        Ok(wt)
    }

    // -----------------------------------------------------------------------
    // Per-client visit history
    // -----------------------------------------------------------------------

    pub fn client_history(&self) -> ClientHistory {
        read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::ClientHistory).unwrap_or_default()
    }

    pub fn client_by_phone(&self, phone: &str) -> Option<ClientRecord> {
        if phone.is_empty() {
            return None;
        }
        self.client_history().clients.get(phone).cloned()
    }

    /// Append a visit to a client's record, newest first, capped.
    pub fn record_client_visit(
        &self,
        phone: &str,
        name: &str,
        service: &str,
        duration: i64,
        amount: f64,
    ) -> Result<Option<ClientRecord>> {
        if phone.is_empty() {
            return Ok(None);
        }
        let mut ch = self.client_history();
        let client = ch.clients.entry(phone.to_string()).or_default();
        if !name.is_empty() && client.name != name {
            client.name = name.to_string();
        }

        let visit = ClientVisit {
            date: Utc::now(),
            service: service.to_string(),
            duration,
            amount,
        };
        client.visits.insert(0, visit.clone());
        client.visits.truncate(CLIENT_VISIT_CAP);
        client.total_spent += amount;
        client.last_visit = Some(visit.date);
        let record = client.clone();

        ch.version += 1;
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::ClientHistory, &ch)?;
        self.bus.publish(ChannelMessage::ClientHistoryUpdate {
            version: ch.version,
        });
        Ok(Some(record))
    }
}
