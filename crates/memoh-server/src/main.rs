use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use memoh_channels::Intake;
use memoh_chat::{ChatResolver, DirSkillLoader, HttpMemoryIngestor, MemoryIngestor, NoopMemory};
use memoh_conversations::ConversationStore;
use memoh_core::types::UserRole;
use memoh_core::MemohConfig;
use memoh_history::HistoryStore;
use memoh_identity::{BindService, IdentityService};
use memoh_scheduler::ScheduleExecutor;
use memoh_users::Directory;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod auth;
mod error;
mod http;

#[derive(Parser)]
#[command(name = "memoh-server", about = "Multi-channel conversational bot backend")]
struct Args {
    /// Path to memoh.toml. Defaults to MEMOH_CONFIG, then ~/.memoh/memoh.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoh_server=info,memoh_chat=info,memoh_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var("MEMOH_CONFIG").ok());
    let config = MemohConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        MemohConfig::default()
    });

    let db = open_database(&config)?;

    let directory = Arc::new(Directory::new(db.clone()));
    bootstrap_admin(&directory);
    let identities = Arc::new(IdentityService::new(db.clone()));
    let bind = Arc::new(BindService::new(db.clone()));
    let conversations = Arc::new(ConversationStore::new(db.clone()));
    let history = Arc::new(HistoryStore::new(db.clone()));

    let mut gateway = memoh_agent::GatewayClient::new(
        &config.gateway.base_url,
        Duration::from_secs(config.gateway.chat_timeout_secs),
    )?;
    if let Some(token) = &config.gateway.auth_token {
        gateway = gateway.with_auth_token(token.clone());
    }
    let gateway = Arc::new(gateway);
    let skills = Arc::new(DirSkillLoader::new(skills_dir()));
    let memory: Arc<dyn MemoryIngestor> = match &config.memory.base_url {
        Some(base_url) => Arc::new(HttpMemoryIngestor::new(base_url)),
        None => Arc::new(NoopMemory),
    };
    let resolver = Arc::new(ChatResolver::new(
        directory.clone(),
        history.clone(),
        gateway,
        skills,
        memory,
    ));

    let signer = auth::TokenSigner::new(&config.auth.secret);
    let scheduler = Arc::new(ScheduleExecutor::new(
        db.clone(),
        directory.clone(),
        resolver.clone(),
        Arc::new(signer),
    ));
    scheduler.load()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(scheduler.clone().run(shutdown_rx));

    let intake = Arc::new(Intake::new(
        directory.clone(),
        identities.clone(),
        conversations.clone(),
        resolver.clone(),
    ));

    let bind_addr = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(
        config,
        directory,
        identities,
        bind,
        conversations,
        history,
        resolver,
        scheduler,
        intake,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind_addr}:{port}").parse()?;
    info!("memoh backend listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

fn open_database(config: &MemohConfig) -> anyhow::Result<Arc<Mutex<Connection>>> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&config.database.path)?;
    // Cascading deletes (bot → conversations → messages/routes/…) rely on
    // foreign keys being enforced.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    memoh_users::db::init_db(&conn)?;
    memoh_identity::db::init_db(&conn)?;
    memoh_history::db::init_db(&conn)?;
    memoh_conversations::db::init_db(&conn)?;
    memoh_scheduler::db::init_db(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// First boot on an empty database creates the admin account. The default
/// password must be rotated before exposing the server.
fn bootstrap_admin(directory: &Directory) {
    match directory.find_by_username("admin") {
        Ok(Some(_)) => {}
        Ok(None) => match directory.create_user("admin", "admin", UserRole::Admin) {
            Ok(user) => warn!(
                user_id = %user.id,
                "bootstrap admin created with default password 'admin' — change it"
            ),
            Err(e) => warn!("bootstrap admin creation failed: {e}"),
        },
        Err(e) => warn!("bootstrap admin lookup failed: {e}"),
    }
}

fn skills_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.memoh/skills")
}
