//! turnoq CLI — operator interface to the queue engine.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use turnoq::business::{BreakStore, ConfigStore};
use turnoq::bus::TenantBus;
use turnoq::config::Config;
use turnoq::engine::QueueEngine;
use turnoq::history::HistoryStore;
use turnoq::model::{MoveDirection, NewTicket, TicketId};
use turnoq::remote::{PgRemote, RemoteBackend};
use turnoq::services::ServicesStore;
use turnoq::store::QueueStore;
use turnoq::sync::SyncBridge;
use turnoq::telemetry::init_telemetry;
use turnoq::tenant::{Keyspace, resolve_tenant};

#[derive(Parser)]
#[command(name = "turnoq", about = "Walk-in queue engine for service businesses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync daemon for the active tenant
    Serve,
    /// Show today's queue
    Status,
    /// Take a ticket
    Add {
        /// Customer name
        name: String,
        /// Catalog service requested
        service: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Call a waiting ticket to a chair
    Attend { id: String },
    /// Finish a serving ticket
    Served { id: String },
    /// Put a serving ticket back in the waiting pool
    Return { id: String },
    /// Cancel a ticket
    Cancel { id: String },
    /// Reorder a waiting ticket (up/down)
    Move { id: String, direction: String },
    /// Record a payment and finish the ticket
    Pay {
        id: String,
        amount: f64,
        #[arg(long, default_value = "Efectivo")]
        method: String,
    },
    /// Call the first waiting ticket
    Next,
    /// Day close: replace today's state with a fresh default
    Reset,
    /// Break control
    Break {
        #[command(subcommand)]
        action: BreakAction,
    },
    /// Operating configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Service catalog
    Services {
        #[command(subcommand)]
        action: ServicesAction,
    },
    /// Register a business slug in the remote store
    Register {
        id: String,
        name: String,
        slug: String,
    },
}

#[derive(Subcommand)]
enum BreakAction {
    /// Start a break
    On {
        #[arg(long, default_value_t = 30)]
        minutes: u32,
        #[arg(long, default_value = "")]
        message: String,
    },
    /// End the break
    Off,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set {
        #[arg(long)]
        open: Option<String>,
        #[arg(long)]
        close: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
enum ServicesAction {
    List,
    Add {
        name: String,
        #[arg(long, default_value_t = 30)]
        minutes: u32,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
    },
    Remove { id: String },
}

struct App {
    engine: QueueEngine,
    history: HistoryStore,
    breaks: BreakStore,
    configs: ConfigStore,
    services: ServicesStore,
    bridge: Option<SyncBridge>,
}

async fn build_app(config: &Config) -> anyhow::Result<App> {
    let remote: Option<Arc<PgRemote>> = match &config.database_url {
        Some(url) => match PgRemote::connect(url.expose_secret()).await {
            Ok(r) => Some(Arc::new(r)),
            Err(e) => {
                warn!(error = %e, "remote unreachable, running local-only");
                None
            }
        },
        None => None,
    };

    let tenant = resolve_tenant(
        config,
        remote.as_deref().map(|r| r as &dyn RemoteBackend),
    )
    .await?;

    std::fs::create_dir_all(&config.data_dir)?;
    let keyspace = Keyspace::new(tenant);
    let bus = TenantBus::with_fallback(&keyspace, &config.data_dir);
    let store = QueueStore::new(&config.data_dir, keyspace.clone(), bus.clone())?;
    let engine = QueueEngine::new(store.clone());
    engine.init_state()?;

    let bridge = remote
        .map(|r| SyncBridge::new(store, r as Arc<dyn RemoteBackend>));

    Ok(App {
        engine,
        history: HistoryStore::new(&config.data_dir, keyspace.clone(), bus.clone()),
        breaks: BreakStore::new(&config.data_dir, keyspace.clone(), bus.clone()),
        configs: ConfigStore::new(&config.data_dir, keyspace.clone(), bus.clone()),
        services: ServicesStore::new(&config.data_dir, keyspace, bus),
        bridge,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_telemetry(&config.log_level)?;

    // Registration precedes tenant resolution — it is how a tenant comes
    // to exist in the first place.
    if let Command::Register {
        ref id,
        ref name,
        ref slug,
    } = cli.command
    {
        let Some(ref url) = config.database_url else {
            anyhow::bail!("registering a business requires DATABASE_URL");
        };
        let remote = PgRemote::connect(url.expose_secret()).await?;
        remote
            .register_business(&turnoq::remote::Business {
                id: id.clone(),
                name: name.clone(),
                slug: slug.clone(),
            })
            .await?;
        println!("Registered.");
        return Ok(());
    }

    let app = build_app(&config).await?;

    match cli.command {
        Command::Serve => cmd_serve(app).await,
        Command::Status => cmd_status(&app),
        Command::Add {
            name,
            service,
            phone,
            description,
        } => cmd_add(&app, name, service, phone, description).await,
        Command::Attend { id } => {
            let done = app.engine.attend_ticket(&TicketId::from(id.as_str()))?;
            report(&app, done.map(|t| format!("Attending: {} {}", t.code, t.name))).await
        }
        Command::Served { id } => {
            let done = app.engine.mark_as_served(&TicketId::from(id.as_str()))?;
            report(&app, done.map(|t| format!("Served: {} {}", t.code, t.name))).await
        }
        Command::Return { id } => {
            let done = app.engine.return_to_queue(&TicketId::from(id.as_str()))?;
            report(&app, done.map(|t| format!("Returned to queue: {}", t.code))).await
        }
        Command::Cancel { id } => {
            let done = app.engine.cancel_ticket(&TicketId::from(id.as_str()))?;
            report(&app, done.map(|t| format!("Canceled: {}", t.code))).await
        }
        Command::Move { id, direction } => {
            let direction: MoveDirection = direction.parse()?;
            let moved = app
                .engine
                .move_turn(&TicketId::from(id.as_str()), direction)?;
            report(&app, moved.then(|| "Moved.".to_string())).await
        }
        Command::Pay { id, amount, method } => cmd_pay(&app, id, amount, method).await,
        Command::Next => {
            let done = app.engine.next_ticket()?;
            report(&app, done.map(|t| format!("Attending: {} {}", t.code, t.name))).await
        }
        Command::Reset => {
            app.engine.reset_all()?;
            report(&app, Some("Queue reset for today.".to_string())).await
        }
        Command::Break { action } => cmd_break(&app, action).await,
        Command::Config { action } => cmd_config(&app, action).await,
        Command::Services { action } => cmd_services(&app, action),
        Command::Register { .. } => unreachable!("handled before tenant resolution"),
    }
}

/// Print the outcome and push the mutated state upstream when a remote
/// is configured. One-shot commands have no bridge loop running, so the
/// push happens here.
async fn report(app: &App, outcome: Option<String>) -> anyhow::Result<()> {
    match outcome {
        Some(line) => {
            println!("{line}");
            if let Some(ref bridge) = app.bridge {
                bridge.push_local_to_remote().await;
            }
        }
        None => println!("No change (unknown ticket or transition not allowed)."),
    }
    Ok(())
}

async fn cmd_serve(app: App) -> anyhow::Result<()> {
    // Ledger reconciliation mirrors what the dashboard does on every
    // state signal.
    let mut subscriber = app.engine.store().subscribe();
    let history = app.history.clone();
    tokio::spawn(async move {
        loop {
            let state = subscriber.next().await;
            if let Err(e) = history.sync_today_from_state(&state) {
                warn!(error = %e, "history reconciliation failed");
            }
        }
    });

    match app.bridge {
        Some(bridge) => {
            info!("sync daemon running");
            tokio::select! {
                res = bridge.run() => res?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
        None => {
            info!("no remote configured, serving local-only");
            tokio::signal::ctrl_c().await?;
        }
    }
    Ok(())
}

fn cmd_status(app: &App) -> anyhow::Result<()> {
    let st = app.engine.state();

    println!("{} — {}", st.tenant_id, st.date);
    println!(
        "waiting {}  serving {}  served {}  revenue RD$ {:.2}",
        st.waiting().count(),
        st.serving().count(),
        st.served_count,
        st.revenue.total,
    );

    if st.queue.is_empty() {
        println!("\nQueue is empty.");
        return Ok(());
    }

    println!(
        "\n{:<6}  {:<10}  {:<20}  {:<20}  ID",
        "CODE", "STATUS", "NAME", "SERVICE"
    );
    println!("{}", "-".repeat(90));
    for t in &st.queue {
        println!(
            "{:<6}  {:<10}  {:<20}  {:<20}  {}",
            t.code,
            t.status.to_string(),
            t.name,
            t.service_type,
            t.id,
        );
    }

    let avg = st.average_service_seconds();
    if avg > 0 {
        println!("\naverage service: {}:{:02}", avg / 60, avg % 60);
    }
    Ok(())
}

async fn cmd_add(
    app: &App,
    name: String,
    service: String,
    phone: String,
    description: String,
) -> anyhow::Result<()> {
    // Intake-edge validation: names keep letters and spaces, phones keep
    // digits. The engine itself accepts free-form attributes.
    let name: String = name
        .chars()
        .filter(|c| c.is_alphabetic() || *c == ' ')
        .collect();
    let phone: String = phone.chars().filter(char::is_ascii_digit).collect();

    let limit = app.configs.get().limit_per_day as usize;
    if app.engine.state().queue.len() >= limit {
        anyhow::bail!("daily ticket limit reached ({limit})");
    }

    let outcome = app.engine.add_ticket(
        NewTicket::new(name, service)
            .phone(phone)
            .description(description),
    )?;
    println!(
        "Ticket {} for {} — {} ahead",
        outcome.ticket.code, outcome.ticket.name, outcome.ahead
    );
    if let Some(ref bridge) = app.bridge {
        bridge.push_local_to_remote().await;
    }
    Ok(())
}

async fn cmd_pay(app: &App, id: String, amount: f64, method: String) -> anyhow::Result<()> {
    let id = TicketId::from(id.as_str());
    let Some(ticket) = app.engine.record_payment(&id, amount, &method)? else {
        println!("No change (unknown ticket or not in service).");
        return Ok(());
    };

    let seconds = ticket.served_seconds.unwrap_or(0);
    println!(
        "Served {} — RD$ {amount:.2} ({method}), {}:{:02}",
        ticket.code,
        seconds / 60,
        seconds % 60
    );

    app.history.sync_today_from_state(&app.engine.state())?;
    app.history
        .record_waiting_time(&ticket.service_type, seconds)?;
    if !ticket.phone.is_empty() {
        app.history.record_client_visit(
            &ticket.phone,
            &ticket.name,
            &ticket.service_type,
            seconds,
            amount,
        )?;
    }

    if let Some(ref bridge) = app.bridge {
        bridge.push_local_to_remote().await;
        bridge.push_payment(&ticket).await;
    }
    Ok(())
}

async fn cmd_break(app: &App, action: BreakAction) -> anyhow::Result<()> {
    let state = match action {
        BreakAction::On { minutes, message } => {
            let st = app.breaks.start(minutes, &message)?;
            println!("Break until {}", st.end_at.expect("break just started"));
            st
        }
        BreakAction::Off => {
            let st = app.breaks.end()?;
            println!("Break ended.");
            st
        }
    };
    if let Some(ref bridge) = app.bridge {
        bridge.push_break(&state).await;
    }
    Ok(())
}

async fn cmd_config(app: &App, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let cfg = app.configs.get();
            println!("hours:  {} - {}", cfg.hours.open, cfg.hours.close);
            println!("limit:  {} tickets/day", cfg.limit_per_day);
            println!("days:   {:?} (0 = Sunday)", cfg.open_days);
        }
        ConfigAction::Set { open, close, limit } => {
            let mut cfg = app.configs.get();
            if let Some(open) = open {
                cfg.hours.open = open;
            }
            if let Some(close) = close {
                cfg.hours.close = close;
            }
            if let Some(limit) = limit {
                cfg.limit_per_day = limit.max(1);
            }
            let saved = app.configs.save(cfg)?;
            println!("Saved (v{}).", saved.version);
            if let Some(ref bridge) = app.bridge {
                bridge.push_config(&saved).await;
            }
        }
    }
    Ok(())
}

fn cmd_services(app: &App, action: ServicesAction) -> anyhow::Result<()> {
    match action {
        ServicesAction::List => {
            let catalog = app.services.get();
            println!("{:<34}  {:>4}  {:>10}  ID", "SERVICE", "MIN", "PRICE");
            println!("{}", "-".repeat(80));
            for s in &catalog.items {
                println!(
                    "{:<34}  {:>4}  {:>10.2}  {}",
                    s.name, s.duration_min, s.price, s.id
                );
            }
        }
        ServicesAction::Add {
            name,
            minutes,
            price,
        } => {
            let service = app.services.add(&name, minutes, price)?;
            println!("Added: {} ({})", service.name, service.id);
        }
        ServicesAction::Remove { id } => {
            if app.services.delete(&id)? {
                println!("Removed.");
            } else {
                println!("No service with that id.");
            }
        }
    }
    Ok(())
}
