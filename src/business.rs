//! Per-tenant operating configuration and break status.
//!
//! Both documents are small, versioned, and shared the same way the queue
//! state is: persisted locally per tenant, ping sentinel on write, change
//! signal on the bus. Remote mirroring happens through the sync bridge.

use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::{ChannelMessage, TenantBus};
use crate::error::Result;
use crate::store::{read_tenant_doc, write_tenant_doc};
use crate::tenant::{DocKind, Keyspace};

pub const MIN_BREAK_MINUTES: u32 = 5;
pub const MAX_BREAK_MINUTES: u32 = 180;

const DEFAULT_BREAK_MESSAGE: &str = "Estamos en break, regresamos pronto...";

/// Opening hours as `HH:MM` strings, the shape the dashboard edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hours {
    pub open: String,
    pub close: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessConfig {
    pub hours: Hours,
    /// Daily ticket cap, enforced at the intake edge.
    pub limit_per_day: u32,
    /// Open weekdays, 0 = Sunday.
    pub open_days: Vec<u8>,
    pub version: u64,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            hours: Hours {
                open: "08:00".to_string(),
                close: "20:00".to_string(),
            },
            limit_per_day: 30,
            open_days: vec![1, 2, 3, 4, 5, 6],
            version: 1,
        }
    }
}

impl BusinessConfig {
    pub fn is_open_on(&self, weekday: Weekday) -> bool {
        self.open_days
            .contains(&(weekday.num_days_from_sunday() as u8))
    }

    /// Whether a wall-clock time falls inside opening hours. Malformed
    /// hour strings read as always open rather than locking the door.
    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        let (Some(open), Some(close)) = (
            parse_minutes(&self.hours.open),
            parse_minutes(&self.hours.close),
        ) else {
            return true;
        };
        let minutes = time.hour() as u32 * 60 + time.minute();
        minutes >= open && minutes < close
    }
}

fn parse_minutes(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakState {
    pub is_on: bool,
    pub end_at: Option<DateTime<Utc>>,
    pub duration_min: u32,
    pub message: String,
}

impl Default for BreakState {
    fn default() -> Self {
        Self {
            is_on: false,
            end_at: None,
            duration_min: 30,
            message: DEFAULT_BREAK_MESSAGE.to_string(),
        }
    }
}

impl BreakState {
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        match (self.is_on, self.end_at) {
            (true, Some(end)) => (end - now).num_seconds().max(0),
            _ => 0,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_on && self.remaining_seconds(now) > 0
    }
}

/// Store for the per-tenant operating configuration.
#[derive(Clone)]
pub struct ConfigStore {
    data_dir: PathBuf,
    keyspace: Keyspace,
    bus: TenantBus,
}

impl ConfigStore {
    pub fn new(data_dir: impl Into<PathBuf>, keyspace: Keyspace, bus: TenantBus) -> Self {
        Self {
            data_dir: data_dir.into(),
            keyspace,
            bus,
        }
    }

    pub fn get(&self) -> BusinessConfig {
        read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Config).unwrap_or_default()
    }

    pub fn save(&self, mut config: BusinessConfig) -> Result<BusinessConfig> {
        config.version += 1;
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Config, &config)?;
        self.bus.publish(ChannelMessage::ConfigUpdate);
        Ok(config)
    }
}

/// Store for the per-tenant break status.
#[derive(Clone)]
pub struct BreakStore {
    data_dir: PathBuf,
    keyspace: Keyspace,
    bus: TenantBus,
}

impl BreakStore {
    pub fn new(data_dir: impl Into<PathBuf>, keyspace: Keyspace, bus: TenantBus) -> Self {
        Self {
            data_dir: data_dir.into(),
            keyspace,
            bus,
        }
    }

    /// Current break state. A break whose scheduled end has passed reads
    /// as off, and the correction is written back.
    pub fn get(&self) -> BreakState {
        let st: BreakState =
            read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Break).unwrap_or_default();
        if st.is_on && !st.is_active(Utc::now()) {
            let corrected = BreakState {
                is_on: false,
                end_at: None,
                ..st
            };
            if let Err(e) = self.save(corrected.clone()) {
                warn!(error = %e, "failed to persist expired-break correction");
            }
            return corrected;
        }
        st
    }

    pub fn save(&self, state: BreakState) -> Result<BreakState> {
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Break, &state)?;
        self.bus.publish(ChannelMessage::BreakUpdate);
        Ok(state)
    }

    /// Start a break. The duration is clamped to the allowed range and a
    /// blank message falls back to the default.
    pub fn start(&self, duration_min: u32, message: &str) -> Result<BreakState> {
        let minutes = duration_min.clamp(MIN_BREAK_MINUTES, MAX_BREAK_MINUTES);
        let message = message.trim();
        self.save(BreakState {
            is_on: true,
            end_at: Some(Utc::now() + chrono::Duration::minutes(minutes as i64)),
            duration_min: minutes,
            message: if message.is_empty() {
                DEFAULT_BREAK_MESSAGE.to_string()
            } else {
                message.to_string()
            },
        })
    }

    pub fn end(&self) -> Result<BreakState> {
        let st = self.get();
        self.save(BreakState {
            is_on: false,
            end_at: None,
            ..st
        })
    }
}
