//! Tenant identity and keyspace derivation.
//!
//! Every storage key, channel name, and remote filter is derived from the
//! tenant id alone, so two businesses sharing a machine (or a backend)
//! never see each other's queue. Resolution is the one place allowed to
//! fail loudly: operating on the wrong tenant would corrupt another
//! business's data.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::remote::RemoteBackend;

/// Opaque identifier for one business account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::TenantNotFound("<empty>".to_string()));
        }
        Ok(Self(id))
    }

    /// The literal `default` tenant. Permitted only for single-tenant
    /// deployments that opted in via configuration.
    pub fn single_tenant_default() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which per-tenant document a storage key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    State,
    Config,
    Break,
    History,
    Services,
    WaitingTimes,
    ClientHistory,
}

const DOC_PREFIXES: &[(DocKind, &str)] = &[
    (DocKind::State, "turnoq_state_v1"),
    (DocKind::Config, "turnoq_config_v1"),
    (DocKind::Break, "turnoq_break_v1"),
    (DocKind::History, "turnoq_history_v1"),
    (DocKind::Services, "turnoq_services_v1"),
    (DocKind::WaitingTimes, "turnoq_waiting_times_v1"),
    (DocKind::ClientHistory, "turnoq_client_history_v1"),
];

/// Derives the namespaced keys for one tenant. Stable for the lifetime of
/// a session.
#[derive(Debug, Clone)]
pub struct Keyspace {
    tenant: TenantId,
}

impl Keyspace {
    pub fn new(tenant: TenantId) -> Self {
        Self { tenant }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn key(&self, kind: DocKind) -> String {
        let prefix = DOC_PREFIXES
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| *p)
            .expect("every DocKind has a prefix");
        format!("{prefix}_{}", self.tenant)
    }

    pub fn state_key(&self) -> String {
        self.key(DocKind::State)
    }

    /// Channel name for intra-process notifications.
    pub fn channel_name(&self) -> String {
        format!("turnoq_channel_v1_{}", self.tenant)
    }

    /// Remote query filter value.
    pub fn remote_filter(&self) -> &str {
        self.tenant.as_str()
    }

    /// Path of the persisted JSON document for a key.
    pub fn doc_path(&self, data_dir: &Path, kind: DocKind) -> PathBuf {
        data_dir.join(format!("{}.json", self.key(kind)))
    }

    /// Path of the ping sentinel backing the cross-process fallback.
    pub fn ping_path(&self, data_dir: &Path, kind: DocKind) -> PathBuf {
        data_dir.join(format!("{}.ping", self.key(kind)))
    }

    /// Map a file name in the data directory back to the document it
    /// belongs to, if it is one of this tenant's ping sentinels.
    pub fn classify_ping(&self, file_name: &str) -> Option<DocKind> {
        let stem = file_name.strip_suffix(".ping")?;
        DOC_PREFIXES
            .iter()
            .find(|(kind, _)| stem == self.key(*kind))
            .map(|(kind, _)| *kind)
    }
}

/// Resolve the active tenant for this session.
///
/// Order: explicit id from config, then slug lookup against the remote
/// businesses collection, then the documented single-tenant fallback.
/// Anything else is a hard `TenantNotFound` — the only loud failure in
/// the system.
pub async fn resolve_tenant(
    config: &Config,
    remote: Option<&dyn RemoteBackend>,
) -> Result<TenantId> {
    if let Some(ref id) = config.tenant_id {
        return TenantId::new(id.clone());
    }

    if let Some(ref slug) = config.tenant_slug {
        let Some(remote) = remote else {
            return Err(Error::Config(format!(
                "TURNOQ_TENANT_SLUG '{slug}' requires DATABASE_URL to resolve"
            )));
        };
        return match remote.business_by_slug(slug).await? {
            Some(business) => TenantId::new(business.id),
            None => Err(Error::TenantNotFound(slug.clone())),
        };
    }

    if config.single_tenant {
        return Ok(TenantId::single_tenant_default());
    }

    Err(Error::TenantNotFound(
        "set TURNOQ_TENANT_ID, TURNOQ_TENANT_SLUG, or TURNOQ_SINGLE_TENANT".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_tenant() {
        let ks = Keyspace::new(TenantId::new("divas_salon").unwrap());
        assert_eq!(ks.state_key(), "turnoq_state_v1_divas_salon");
        assert_eq!(ks.channel_name(), "turnoq_channel_v1_divas_salon");
        assert_eq!(ks.remote_filter(), "divas_salon");
        assert_eq!(
            ks.key(DocKind::Services),
            "turnoq_services_v1_divas_salon"
        );
    }

    #[test]
    fn ping_classification_matches_own_tenant_only() {
        let ks = Keyspace::new(TenantId::new("divas_salon").unwrap());
        assert_eq!(
            ks.classify_ping("turnoq_state_v1_divas_salon.ping"),
            Some(DocKind::State)
        );
        assert_eq!(
            ks.classify_ping("turnoq_break_v1_divas_salon.ping"),
            Some(DocKind::Break)
        );
        // another tenant's sentinel is ignored
        assert_eq!(ks.classify_ping("turnoq_state_v1_sheila_nails.ping"), None);
        // non-ping files are ignored
        assert_eq!(ks.classify_ping("turnoq_state_v1_divas_salon.json"), None);
    }

    #[test]
    fn empty_tenant_is_rejected() {
        assert!(TenantId::new("  ").is_err());
    }
}
