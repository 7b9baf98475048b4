use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use campaign_mailer::api::{self, AppState};
use campaign_mailer::campaign::CampaignService;
use campaign_mailer::config::{AppConfig, TransportKind};
use campaign_mailer::generator::ContentGenerator;
use campaign_mailer::llm::create_provider;
use campaign_mailer::mail::{GmailTransport, InMemoryMailbox, MailTransport};
use campaign_mailer::replies::{ReplyReconciler, ReplyResponder};
use campaign_mailer::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // Held for the life of the process so buffered file logs get flushed.
    let _log_guard = init_tracing(&config);

    eprintln!("📬 Campaign Mailer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Sender: {}", config.scan.owner_address);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/campaigns", config.port);

    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    let llm = create_provider(&config.llm).context("creating LLM provider")?;
    let generator = Arc::new(ContentGenerator::new(llm, config.generator.clone()));

    let transport: Arc<dyn MailTransport> = match config.transport {
        TransportKind::Gmail => Arc::new(GmailTransport::new(&config.gmail)),
        TransportKind::Memory => {
            tracing::warn!("Using in-memory mailbox; no mail will leave this process");
            Arc::new(InMemoryMailbox::new())
        }
    };
    tracing::info!(transport = transport.name(), "Mail transport ready");

    let sender = config.scan.owner_address.clone();
    let state = AppState {
        service: Arc::new(CampaignService::new(
            Arc::clone(&db),
            Arc::clone(&transport),
            Arc::clone(&generator),
            sender.clone(),
        )),
        reconciler: Arc::new(ReplyReconciler::new(
            Arc::clone(&db),
            Arc::clone(&transport),
            config.scan.clone(),
        )),
        responder: Arc::new(ReplyResponder::new(db, transport, generator, sender)),
    };

    let app = api::routes(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Campaign API server started");
    axum::serve(listener, app).await.context("serving API")?;

    Ok(())
}

/// Console logging, plus a daily-rotated file when a log directory is set.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "campaign-mailer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
