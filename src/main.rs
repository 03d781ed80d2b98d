// City Quest Backend - Rust

use std::fs::OpenOptions;
use std::io::LineWriter;
use std::sync::Arc;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use city_quest_backend::config::Config;
use city_quest_backend::services::{DataService, MemoryService, SupabaseService};
use city_quest_backend::{build_router, AppState};

/// Custom time formatter: [HH:mm:ss] [city-quest]
#[derive(Clone)]
struct QuestTimer;

impl FormatTime for QuestTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "[{}] [city-quest]", now.format("%H:%M:%S"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Wrap in LineWriter to flush after each line
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(LineWriter::new(log_file));

    // Format: [HH:mm:ss] [city-quest] message
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "city_quest_backend=info,tower_http=info".into()),
        )
        // Stdout layer
        .with(
            fmt::layer()
                .with_timer(QuestTimer)
                .with_target(false)
                .with_level(false)
                .with_ansi(true),
        )
        // File layer (same format, no ANSI colors)
        .with(
            fmt::layer()
                .with_timer(QuestTimer)
                .with_target(false)
                .with_level(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    let data: Arc<dyn DataService> = match (&config.supabase_url, &config.supabase_anon_key) {
        (Some(url), Some(key)) => {
            tracing::info!("Using data service at {}", url);
            Arc::new(SupabaseService::new(url, key))
        }
        _ => {
            tracing::warn!("No remote data service configured - serving demo data from memory");
            Arc::new(MemoryService::with_demo_data())
        }
    };

    let state = AppState::new(data, config.clone());

    // Restore a session the data service may already hold
    if let Err(e) = state.auth.fetch_user_profile().await {
        tracing::warn!("No session restored: {}", e);
    }

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting City Quest Backend on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
