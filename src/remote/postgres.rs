//! Postgres backend.
//!
//! The shared store several devices converge on. Schema setup is plain
//! idempotent DDL applied at connect time; the realtime feed is a row
//! trigger publishing `{event, row}` JSON over `pg_notify`, consumed
//! through a `PgListener`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tokio::sync::mpsc;
use tracing::warn;

use crate::business::{BreakState, BusinessConfig, Hours};
use crate::error::Result;
use crate::model::TicketId;
use crate::remote::{Business, RemoteBackend, RemoteEvent, TicketPatch, TicketRow};
use crate::tenant::TenantId;

/// NOTIFY channel carrying ticket change events for every tenant.
/// Tenant filtering happens subscriber-side.
const TICKETS_CHANNEL: &str = "turnoq_tickets";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS businesses (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    slug        TEXT NOT NULL UNIQUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS tickets (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    business_date   DATE NOT NULL,
    code            TEXT,
    name            TEXT,
    phone           TEXT,
    service_type    TEXT,
    description     TEXT,
    status          TEXT NOT NULL DEFAULT 'waiting',
    created_at      TIMESTAMPTZ,
    called_at       TIMESTAMPTZ,
    started_at      TIMESTAMPTZ,
    served_at       TIMESTAMPTZ,
    canceled_at     TIMESTAMPTZ,
    paid_amount     DOUBLE PRECISION,
    payment_method  TEXT,
    served_seconds  BIGINT,
    version         BIGINT
);

CREATE INDEX IF NOT EXISTS idx_tickets_tenant_day
    ON tickets(tenant_id, business_date, created_at);

CREATE TABLE IF NOT EXISTS business_configs (
    business_id    TEXT PRIMARY KEY,
    hours          JSONB NOT NULL DEFAULT '{"open": "08:00", "close": "20:00"}',
    limit_per_day  INT NOT NULL DEFAULT 30,
    open_days      INT[] NOT NULL DEFAULT '{1,2,3,4,5,6}',
    version        BIGINT NOT NULL DEFAULT 1,
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS business_breaks (
    business_id   TEXT PRIMARY KEY,
    is_on         BOOLEAN NOT NULL DEFAULT false,
    end_at        TIMESTAMPTZ,
    duration_min  INT NOT NULL DEFAULT 30,
    message       TEXT NOT NULL DEFAULT 'Estamos en break, regresamos pronto...',
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE OR REPLACE FUNCTION turnoq_notify_ticket_change() RETURNS trigger AS $$
DECLARE
    payload TEXT;
BEGIN
    IF TG_OP = 'DELETE' THEN
        payload := json_build_object(
            'event', 'delete',
            'id', OLD.id,
            'tenant_id', OLD.tenant_id,
            'business_date', OLD.business_date
        )::text;
    ELSE
        payload := json_build_object('event', lower(TG_OP), 'row', row_to_json(NEW))::text;
    END IF;
    PERFORM pg_notify('turnoq_tickets', payload);
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS turnoq_tickets_notify ON tickets;
CREATE TRIGGER turnoq_tickets_notify
    AFTER INSERT OR UPDATE OR DELETE ON tickets
    FOR EACH ROW EXECUTE FUNCTION turnoq_notify_ticket_change();
"#;

const TICKET_COLUMNS: &str = "id, tenant_id, business_date, code, name, phone, service_type, \
     description, status, created_at, called_at, started_at, served_at, canceled_at, \
     paid_amount, payment_method, served_seconds, version";

/// Postgres-backed remote store. Owns the connection pool.
pub struct PgRemote {
    pool: PgPool,
}

impl PgRemote {
    /// Connect and apply the idempotent schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Register a business so its slug resolves. Idempotent on id.
    pub async fn register_business(&self, business: &Business) -> Result<()> {
        sqlx::query(
            "INSERT INTO businesses (id, name, slug) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, slug = EXCLUDED.slug",
        )
        .bind(&business.id)
        .bind(&business.name)
        .bind(&business.slug)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for PgRemote {
    async fn fetch_tickets(&self, tenant: &TenantId, date: NaiveDate) -> Result<Vec<TicketRow>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE tenant_id = $1 AND business_date = $2
             ORDER BY created_at ASC"
        ))
        .bind(tenant.as_str())
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_tickets(&self, rows: &[TicketRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&format!(
                "INSERT INTO tickets ({TICKET_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                 ON CONFLICT (id) DO UPDATE SET
                     tenant_id = EXCLUDED.tenant_id,
                     business_date = EXCLUDED.business_date,
                     code = EXCLUDED.code,
                     name = EXCLUDED.name,
                     phone = EXCLUDED.phone,
                     service_type = EXCLUDED.service_type,
                     description = EXCLUDED.description,
                     status = EXCLUDED.status,
                     created_at = EXCLUDED.created_at,
                     called_at = EXCLUDED.called_at,
                     started_at = EXCLUDED.started_at,
                     served_at = EXCLUDED.served_at,
                     canceled_at = EXCLUDED.canceled_at,
                     paid_amount = EXCLUDED.paid_amount,
                     payment_method = EXCLUDED.payment_method,
                     served_seconds = EXCLUDED.served_seconds,
                     version = EXCLUDED.version"
            ))
            .bind(&row.id)
            .bind(&row.tenant_id)
            .bind(row.business_date)
            .bind(&row.code)
            .bind(&row.name)
            .bind(&row.phone)
            .bind(&row.service_type)
            .bind(&row.description)
            .bind(&row.status)
            .bind(row.created_at)
            .bind(row.called_at)
            .bind(row.started_at)
            .bind(row.served_at)
            .bind(row.canceled_at)
            .bind(row.paid_amount)
            .bind(&row.payment_method)
            .bind(row.served_seconds)
            .bind(row.version)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_ticket(&self, id: &TicketId, patch: &TicketPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE tickets SET
                 paid_amount = COALESCE($2, paid_amount),
                 payment_method = COALESCE($3, payment_method),
                 served_seconds = COALESCE($4, served_seconds),
                 served_at = COALESCE($5, served_at)
             WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(patch.paid_amount)
        .bind(&patch.payment_method)
        .bind(patch.served_seconds)
        .bind(patch.served_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events(&self, tenant: &TenantId) -> Result<mpsc::Receiver<RemoteEvent>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(TICKETS_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(256);
        let tenant = tenant.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let event: RemoteEvent =
                            match serde_json::from_str(notification.payload()) {
                                Ok(ev) => ev,
                                Err(e) => {
                                    warn!(error = %e, "unparseable ticket feed payload");
                                    continue;
                                }
                            };
                        if event.tenant_id() != tenant.as_str() {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            // Subscriber gone; stop listening.
                            break;
                        }
                    }
                    // PgListener reconnects internally on the next recv.
                    Err(e) => warn!(error = %e, "ticket feed listener error"),
                }
            }
        });
        Ok(rx)
    }

    async fn business_by_slug(&self, slug: &str) -> Result<Option<Business>> {
        let business = sqlx::query_as::<_, Business>(
            "SELECT id, name, slug FROM businesses WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(business)
    }

    async fn fetch_config(&self, tenant: &TenantId) -> Result<Option<BusinessConfig>> {
        let row: Option<(serde_json::Value, i32, Vec<i32>, i64)> = sqlx::query_as(
            "SELECT hours, limit_per_day, open_days, version
             FROM business_configs WHERE business_id = $1",
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(hours, limit_per_day, open_days, version)| BusinessConfig {
            hours: serde_json::from_value::<Hours>(hours)
                .unwrap_or_else(|_| BusinessConfig::default().hours),
            limit_per_day: limit_per_day.max(1) as u32,
            open_days: open_days
                .into_iter()
                .filter(|d| (0..=6).contains(d))
                .map(|d| d as u8)
                .collect(),
            version: version.max(0) as u64,
        }))
    }

    async fn save_config(&self, tenant: &TenantId, config: &BusinessConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO business_configs (business_id, hours, limit_per_day, open_days, version, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (business_id) DO UPDATE SET
                 hours = EXCLUDED.hours,
                 limit_per_day = EXCLUDED.limit_per_day,
                 open_days = EXCLUDED.open_days,
                 version = EXCLUDED.version,
                 updated_at = now()",
        )
        .bind(tenant.as_str())
        .bind(serde_json::to_value(&config.hours)?)
        .bind(config.limit_per_day as i32)
        .bind(
            config
                .open_days
                .iter()
                .map(|&d| d as i32)
                .collect::<Vec<i32>>(),
        )
        .bind(config.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_break(&self, tenant: &TenantId) -> Result<Option<BreakState>> {
        let row: Option<(bool, Option<chrono::DateTime<chrono::Utc>>, i32, String)> =
            sqlx::query_as(
                "SELECT is_on, end_at, duration_min, message
                 FROM business_breaks WHERE business_id = $1",
            )
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(is_on, end_at, duration_min, message)| BreakState {
            is_on,
            end_at,
            duration_min: duration_min.max(0) as u32,
            message,
        }))
    }

    async fn save_break(&self, tenant: &TenantId, state: &BreakState) -> Result<()> {
        sqlx::query(
            "INSERT INTO business_breaks (business_id, is_on, end_at, duration_min, message, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (business_id) DO UPDATE SET
                 is_on = EXCLUDED.is_on,
                 end_at = EXCLUDED.end_at,
                 duration_min = EXCLUDED.duration_min,
                 message = EXCLUDED.message,
                 updated_at = now()",
        )
        .bind(tenant.as_str())
        .bind(state.is_on)
        .bind(state.end_at)
        .bind(state.duration_min as i32)
        .bind(&state.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn served_tickets_between(
        &self,
        tenant: &TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TicketRow>> {
        let start_at = start.and_time(NaiveTime::MIN).and_utc();
        let end_at = end
            .succ_opt()
            .unwrap_or(end)
            .and_time(NaiveTime::MIN)
            .and_utc();

        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE tenant_id = $1 AND status = 'served'
               AND served_at >= $2 AND served_at < $3
             ORDER BY served_at ASC"
        ))
        .bind(tenant.as_str())
        .bind(start_at)
        .bind(end_at)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
