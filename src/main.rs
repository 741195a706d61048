use anyhow::Context;
use mpesa_booking_backend::api::{self, AppState};
use mpesa_booking_backend::booking::BookingOrchestrator;
use mpesa_booking_backend::config::Config;
use mpesa_booking_backend::notifications::{ReceiptDispatcher, SmtpMailer};
use mpesa_booking_backend::payments::providers::MpesaProvider;
use mpesa_booking_backend::payments::{AttemptRegistry, ConfirmationListener, PaymentGateway};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_logging();

    let config = Config::from_env()?;

    info!("Starting M-Pesa booking backend");
    info!("Environment: {}", config.server.environment);
    info!("M-Pesa base URL: {}", config.mpesa.base_url);
    info!("Mail service: {}", config.mail.service);

    let provider = Arc::new(
        MpesaProvider::new(config.mpesa.clone()).context("Failed to create M-Pesa provider")?,
    );
    // A bad key pair should show up in the logs before the first booking does.
    if let Err(e) = provider.authenticate().await {
        warn!("M-Pesa credential check failed at startup: {}", e);
    }
    let gateway: Arc<dyn PaymentGateway> = provider;

    let mailer = SmtpMailer::new(&config.mail).context("Failed to create SMTP mailer")?;
    let dispatcher = ReceiptDispatcher::new(Arc::new(mailer));

    let registry = AttemptRegistry::new();
    registry.spawn_sweeper(
        SWEEP_INTERVAL,
        config.booking.confirmation_timeout,
        config.booking.attempt_retention,
    );

    let listener = ConfirmationListener::new(registry, gateway.clone(), dispatcher.clone());
    let orchestrator = BookingOrchestrator::new(gateway.clone(), listener.clone(), config.booking.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        orchestrator,
        listener,
        gateway,
        dispatcher,
    };
    let app = api::router(state);

    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);
    axum::serve(tcp, app).await?;

    Ok(())
}
