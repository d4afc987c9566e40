use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biljett::api::AppState;
use biljett::config::Config;
use biljett::db;
use biljett::jobs::email_retry;
use biljett::services::blob_store::BlobStore;
use biljett::services::mailer::Mailer;
use biljett::services::membership::MemberDirectory;

/// Every ten minutes; SMTP hiccups are transient, so a short cadence
/// keeps ticket emails from sitting undelivered all evening.
const EMAIL_RETRY_SCHEDULE: &str = "0 */10 * * * *";
const EMAIL_RETRY_BATCH_SIZE: i64 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biljett=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ticketing server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let blob = BlobStore::new(&config.blob_api_url, config.blob_access_token.clone());
    let mailer = Mailer::from_config(&config)
        .map_err(|e| anyhow::anyhow!("mailer configuration: {e}"))?;

    // Load the member directory once up front; batch runs refresh it.
    let directory = Arc::new(MemberDirectory::new());
    let members = directory.refresh(&pool).await?;
    tracing::info!(members, "Member directory loaded");

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        directory,
        blob,
        mailer: mailer.clone(),
    };

    // Schedule the ticket email redelivery job
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler: {e}"))?;
    let job_pool = pool.clone();
    let job = Job::new_async(EMAIL_RETRY_SCHEDULE, move |_uuid, _lock| {
        let pool = job_pool.clone();
        let mailer = mailer.clone();
        Box::pin(async move {
            if let Err(e) =
                email_retry::resend_pending_ticket_emails(&pool, &mailer, EMAIL_RETRY_BATCH_SIZE)
                    .await
            {
                tracing::error!(error = %e, "email redelivery job failed");
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("scheduler: {e}"))?;
    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("scheduler: {e}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler: {e}"))?;
    tracing::info!("Email redelivery job scheduled");

    // Build router
    let app = Router::new()
        .merge(biljett::api::health::router())
        .merge(biljett::api::registrations::router())
        .merge(biljett::api::issuance::router())
        .merge(biljett::api::members::router())
        .merge(biljett::api::checkin::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
