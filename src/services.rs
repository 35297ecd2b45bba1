//! Per-tenant service catalog.
//!
//! The catalog feeds the intake form's service dropdown and the duration
//! estimates on the dashboard. First read of an empty catalog seeds the
//! stock list so a new tenant is usable immediately.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::{ChannelMessage, TenantBus};
use crate::error::Result;
use crate::store::{read_tenant_doc, write_tenant_doc};
use crate::tenant::{DocKind, Keyspace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Estimated duration in minutes.
    #[serde(rename = "duration")]
    pub duration_min: u32,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub items: Vec<Service>,
    pub version: u64,
}

fn stock_catalog() -> Vec<Service> {
    let stock: &[(&str, &str, u32, f64)] = &[
        ("service_1", "Manicure clásico", 30, 500.0),
        ("service_2", "Manicure en gel", 45, 800.0),
        ("service_3", "Uñas acrílicas", 60, 1200.0),
        ("service_4", "Cambio de esmalte", 15, 300.0),
        ("service_5", "Decoración personalizada", 30, 400.0),
        ("service_6", "Retiro de acrílicas o gel", 30, 500.0),
        ("service_7", "Pedicure sencillo", 45, 600.0),
        ("service_8", "Pedicure con gel", 60, 900.0),
        ("service_9", "Eliminación de durezas y callos", 30, 400.0),
    ];
    stock
        .iter()
        .map(|&(id, name, duration_min, price)| Service {
            id: id.to_string(),
            name: name.to_string(),
            duration_min,
            price,
            created_at: None,
            updated_at: None,
        })
        .collect()
}

fn service_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("service_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Store for the per-tenant service catalog.
#[derive(Clone)]
pub struct ServicesStore {
    data_dir: PathBuf,
    keyspace: Keyspace,
    bus: TenantBus,
}

impl ServicesStore {
    pub fn new(data_dir: impl Into<PathBuf>, keyspace: Keyspace, bus: TenantBus) -> Self {
        Self {
            data_dir: data_dir.into(),
            keyspace,
            bus,
        }
    }

    /// The catalog, seeded with the stock list when empty.
    pub fn get(&self) -> ServiceCatalog {
        let catalog: ServiceCatalog =
            read_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Services).unwrap_or_default();
        if !catalog.items.is_empty() {
            return catalog;
        }
        let seeded = ServiceCatalog {
            items: stock_catalog(),
            version: catalog.version,
        };
        match self.save(seeded.clone()) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "failed to persist seeded catalog");
                seeded
            }
        }
    }

    fn save(&self, mut catalog: ServiceCatalog) -> Result<ServiceCatalog> {
        catalog.version += 1;
        write_tenant_doc(&self.data_dir, &self.keyspace, DocKind::Services, &catalog)?;
        self.bus.publish(ChannelMessage::ServicesUpdate {
            version: catalog.version,
        });
        Ok(catalog)
    }

    pub fn add(&self, name: &str, duration_min: u32, price: f64) -> Result<Service> {
        let mut catalog = self.get();
        let service = Service {
            id: service_id(),
            name: name.trim().to_string(),
            duration_min,
            price,
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        catalog.items.push(service.clone());
        self.save(catalog)?;
        Ok(service)
    }

    /// Returns false when no service has that id.
    pub fn update(&self, id: &str, name: &str, duration_min: u32, price: f64) -> Result<bool> {
        let mut catalog = self.get();
        let Some(service) = catalog.items.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        service.name = name.trim().to_string();
        service.duration_min = duration_min;
        service.price = price;
        service.updated_at = Some(Utc::now());
        self.save(catalog)?;
        Ok(true)
    }

    /// Returns false when no service has that id.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut catalog = self.get();
        let before = catalog.items.len();
        catalog.items.retain(|s| s.id != id);
        if catalog.items.len() == before {
            return Ok(false);
        }
        self.save(catalog)?;
        Ok(true)
    }

    /// Service name → estimated duration in seconds, for wait projections.
    pub fn duration_map(&self) -> BTreeMap<String, u32> {
        self.get()
            .items
            .into_iter()
            .map(|s| (s.name, s.duration_min * 60))
            .collect()
    }
}
