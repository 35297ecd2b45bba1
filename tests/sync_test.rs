//! Integration tests for the remote sync bridge, over the in-memory
//! backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use turnoq::bus::TenantBus;
use turnoq::engine::QueueEngine;
use turnoq::model::{NewTicket, TicketStatus, business_today};
use turnoq::remote::{MemoryRemote, RemoteEvent, TicketRow};
use turnoq::store::QueueStore;
use turnoq::sync::SyncBridge;
use turnoq::tenant::{Keyspace, TenantId};

const TENANT: &str = "test_salon";

fn setup() -> (QueueEngine, MemoryRemote, SyncBridge, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let keyspace = Keyspace::new(TenantId::new(TENANT).unwrap());
    let bus = TenantBus::detached(&keyspace);
    let store = QueueStore::new(dir.path(), keyspace, bus).expect("store");
    let engine = QueueEngine::new(store.clone());
    let remote = MemoryRemote::new();
    let bridge = SyncBridge::new(store, Arc::new(remote.clone()));
    (engine, remote, bridge, dir)
}

fn remote_row(id: &str, code: &str, status: &str) -> TicketRow {
    TicketRow {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        business_date: business_today(),
        code: Some(code.to_string()),
        name: Some("Remota".to_string()),
        phone: None,
        service_type: Some("Corte".to_string()),
        description: None,
        status: status.to_string(),
        created_at: Some(Utc::now()),
        called_at: None,
        started_at: None,
        served_at: (status == "served").then(Utc::now),
        canceled_at: None,
        paid_amount: None,
        payment_method: None,
        served_seconds: None,
        version: None,
    }
}

// ---------------------------------------------------------------------------
// Initial merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initial_merge_remote_wins_when_rows_exist() {
    let (engine, remote, bridge, _dir) = setup();

    // both sides have data; remote must win
    engine.add_ticket(NewTicket::new("Local", "Corte")).unwrap();
    remote.seed_row(remote_row("r1", "A04", "waiting"));
    remote.seed_row(remote_row("r2", "A05", "served"));

    bridge.initial_merge().await;

    let st = engine.state();
    assert_eq!(st.queue.len(), 2);
    assert!(st.find(&"r1".into()).is_some());
    // derived fields come from the merged queue, not the old local state
    assert_eq!(st.last_number, 5);
    assert_eq!(st.served_count, 1);
}

#[tokio::test]
async fn initial_merge_seeds_remote_from_local_when_empty() {
    let (engine, remote, bridge, _dir) = setup();

    engine.add_ticket(NewTicket::new("Ana", "Corte")).unwrap();
    engine.add_ticket(NewTicket::new("Beto", "Barba")).unwrap();

    bridge.initial_merge().await;

    let tenant = TenantId::new(TENANT).unwrap();
    let rows = remote.rows(&tenant);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].code.as_deref(), Some("A01"));

    // local queue untouched
    assert_eq!(engine.state().queue.len(), 2);
}

// ---------------------------------------------------------------------------
// Event application is convergent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn applying_the_same_insert_twice_converges() {
    let (engine, _remote, bridge, _dir) = setup();

    let event = RemoteEvent::Insert {
        row: remote_row("r1", "A01", "waiting"),
    };
    bridge.apply_remote_event(event.clone());
    let once = engine.state().queue;

    bridge.apply_remote_event(event);
    let twice = engine.state().queue;

    assert_eq!(once.len(), 1);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn delete_for_an_unknown_id_leaves_the_queue_unchanged() {
    let (engine, _remote, bridge, _dir) = setup();

    bridge.apply_remote_event(RemoteEvent::Insert {
        row: remote_row("r1", "A01", "waiting"),
    });
    let before = engine.state().queue;

    bridge.apply_remote_event(RemoteEvent::Delete {
        id: "ghost".to_string(),
        tenant_id: TENANT.to_string(),
        business_date: business_today(),
    });
    assert_eq!(engine.state().queue, before);

    // a real delete removes by id
    bridge.apply_remote_event(RemoteEvent::Delete {
        id: "r1".to_string(),
        tenant_id: TENANT.to_string(),
        business_date: business_today(),
    });
    assert!(engine.state().queue.is_empty());
}

#[tokio::test]
async fn out_of_order_events_still_converge_on_derived_fields() {
    let (engine, _remote, bridge, _dir) = setup();

    // the high code arrives before the low one
    bridge.apply_remote_event(RemoteEvent::Insert {
        row: remote_row("r5", "A05", "served"),
    });
    bridge.apply_remote_event(RemoteEvent::Insert {
        row: remote_row("r2", "A02", "waiting"),
    });

    let st = engine.state();
    assert_eq!(st.last_number, 5);
    assert_eq!(st.served_count, 1);

    // an update downgrades nothing it should not
    bridge.apply_remote_event(RemoteEvent::Update {
        row: remote_row("r2", "A02", "canceled"),
    });
    let st = engine.state();
    assert_eq!(st.last_number, 5);
    assert_eq!(st.find(&"r2".into()).unwrap().status, TicketStatus::Canceled);
}

#[tokio::test]
async fn events_for_another_day_or_tenant_are_ignored() {
    let (engine, _remote, bridge, _dir) = setup();

    let mut stale = remote_row("r1", "A01", "waiting");
    stale.business_date = business_today() - chrono::Duration::days(1);
    bridge.apply_remote_event(RemoteEvent::Insert { row: stale });

    let mut foreign = remote_row("r2", "A02", "waiting");
    foreign.tenant_id = "someone_else".to_string();
    bridge.apply_remote_event(RemoteEvent::Insert { row: foreign });

    assert!(engine.state().queue.is_empty());
}

// ---------------------------------------------------------------------------
// The running bridge: push on change, suppress echoes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_pushes_local_changes_and_applies_remote_ones() {
    let (engine, remote, bridge, _dir) = setup();
    let tenant = TenantId::new(TENANT).unwrap();

    let runner = bridge.clone();
    let task = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // a local change is pushed upstream
    engine.add_ticket(NewTicket::new("Ana", "Corte")).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(remote.rows(&tenant).len(), 1);
    let pushed = remote.upserted_rows();
    assert!(pushed >= 1);

    // another device's write arrives through the feed and lands locally,
    // without being echoed back upstream
    remote.remote_write(remote_row("r9", "A09", "waiting"));
    tokio::time::sleep(Duration::from_millis(250)).await;

    let st = engine.state();
    assert_eq!(st.queue.len(), 2);
    assert!(st.find(&"r9".into()).is_some());
    assert_eq!(st.last_number, 9);
    assert_eq!(
        remote.upserted_rows(),
        pushed,
        "applying a remote event must not re-push it"
    );

    task.abort();
}

// ---------------------------------------------------------------------------
// Tenant resolution
// ---------------------------------------------------------------------------

fn bare_config() -> turnoq::config::Config {
    turnoq::config::Config {
        database_url: None,
        data_dir: "turnoq-data".into(),
        tenant_id: None,
        tenant_slug: None,
        single_tenant: false,
        log_level: "info".to_string(),
    }
}

#[tokio::test]
async fn unresolvable_tenant_fails_loudly() {
    use turnoq::error::Error;
    use turnoq::tenant::resolve_tenant;

    let result = resolve_tenant(&bare_config(), None).await;
    assert!(matches!(result, Err(Error::TenantNotFound(_))));

    // a slug that matches no business is just as loud
    let remote = MemoryRemote::new();
    let mut config = bare_config();
    config.tenant_slug = Some("no-such-salon".to_string());
    let result = resolve_tenant(&config, Some(&remote)).await;
    assert!(matches!(result, Err(Error::TenantNotFound(_))));
}

#[tokio::test]
async fn slug_resolves_through_the_businesses_collection() {
    use turnoq::remote::Business;
    use turnoq::tenant::resolve_tenant;

    let remote = MemoryRemote::new().with_business(Business {
        id: "divas_salon".to_string(),
        name: "Salón de Belleza Divas".to_string(),
        slug: "divas".to_string(),
    });

    let mut config = bare_config();
    config.tenant_slug = Some("divas".to_string());
    let tenant = resolve_tenant(&config, Some(&remote)).await.unwrap();
    assert_eq!(tenant.as_str(), "divas_salon");
}

#[tokio::test]
async fn single_tenant_deployments_may_use_the_default_namespace() {
    use turnoq::tenant::resolve_tenant;

    let mut config = bare_config();
    config.single_tenant = true;
    let tenant = resolve_tenant(&config, None).await.unwrap();
    assert_eq!(tenant.as_str(), "default");
}

// ---------------------------------------------------------------------------
// Payment patch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_payment_patches_the_remote_row() {
    let (engine, remote, bridge, _dir) = setup();
    let tenant = TenantId::new(TENANT).unwrap();

    let added = engine.add_ticket(NewTicket::new("Ana", "Corte")).unwrap();
    engine.attend_ticket(&added.ticket.id).unwrap();
    bridge.push_local_to_remote().await;

    let paid = engine
        .record_payment(&added.ticket.id, 650.0, "Tarjeta")
        .unwrap()
        .unwrap();
    bridge.push_payment(&paid).await;

    let rows = remote.rows(&tenant);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].paid_amount, Some(650.0));
    assert_eq!(rows[0].payment_method.as_deref(), Some("Tarjeta"));
    assert!(rows[0].served_seconds.is_some());
    assert!(rows[0].served_at.is_some());
}
