use std::sync::Arc;

use anyhow::Context;
use mail_intake::admin::{AdminState, admin_routes};
use mail_intake::config::AppConfig;
use mail_intake::dedup::DedupLedger;
use mail_intake::mailbox::{ImapMailbox, Mailbox};
use mail_intake::onboarding::{Onboarding, PollerSupervisor};
use mail_intake::poller::MailboxPoller;
use mail_intake::records::{GraphQlRecordStore, RecordCreator, RecordStore};
use mail_intake::store::LibSqlBackend;
use mail_intake::tenants::TenantRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 mail-intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Admin API: http://0.0.0.0:{}/api/tenants", config.admin_port);
    eprintln!("   Store API: {}", config.store_api.api_url);
    eprintln!("   Poll interval: {}s", config.poller.interval.as_secs());

    // ── Persistence ──────────────────────────────────────────────────────
    let backend = match &config.db_path {
        Some(path) => {
            let backend = LibSqlBackend::new_local(path)
                .await
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            eprintln!("   Database: {}", path.display());
            Some(Arc::new(backend))
        }
        None => {
            eprintln!("   Database: none (state is lost on restart)");
            None
        }
    };

    let registry = Arc::new(match &backend {
        Some(db) => TenantRegistry::with_repository(db.clone()),
        None => TenantRegistry::new(),
    });
    let mut ledger = DedupLedger::with_limits(config.dedup.retention, config.dedup.capacity);
    if let Some(db) = &backend {
        ledger = ledger.with_repository(db.clone());
    }
    let ledger = Arc::new(ledger);

    let tenants = registry.load().await.context("Failed to load tenants")?;
    let claims = ledger.load().await.context("Failed to load claims")?;
    if backend.is_some() {
        eprintln!("   Restored: {tenants} tenants, {claims} claims");
    }

    // ── Record store ─────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        GraphQlRecordStore::new(config.store_api.clone())
            .context("Failed to build record store client")?,
    );
    let creator = Arc::new(RecordCreator::with_region(
        Arc::clone(&store),
        config.region_code.clone(),
    ));

    // ── Mailbox + pollers ────────────────────────────────────────────────
    let supervisor = match config.imap.clone() {
        Some(imap) => {
            eprintln!("   Mailbox: {}@{} ({})", imap.username, imap.host, imap.folder);
            let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(imap));
            let poller = Arc::new(MailboxPoller::new(
                Arc::clone(&registry),
                Arc::clone(&ledger),
                mailbox,
                creator,
                config.poller.clone(),
            ));
            Some(Arc::new(PollerSupervisor::new(poller)))
        }
        None => {
            eprintln!("   Mailbox: disabled (set INTAKE_IMAP_HOST to enable polling)");
            None
        }
    };

    let onboarding = Arc::new(Onboarding::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        supervisor.clone(),
    ));
    let resumed = onboarding.resume_all().await;
    if resumed > 0 {
        eprintln!("   Pollers resumed: {resumed}");
    }
    eprintln!();

    // ── Admin server ─────────────────────────────────────────────────────
    let app = admin_routes(AdminState {
        registry: Arc::clone(&registry),
        onboarding,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.admin_port))
        .await
        .with_context(|| format!("Failed to bind admin port {}", config.admin_port))?;
    tracing::info!(port = config.admin_port, "Admin server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Admin server failed")?;

    if let Some(supervisor) = supervisor {
        supervisor.shutdown_all().await;
    }
    Ok(())
}
