use anyhow::{Context, Result};
use attendance_core::report::AnalyticsPolicy;
use attendance_core::AttendanceClock;
use attendanced::api::{self, AppState, MatchThresholds};
use attendanced::chatbot::{ChatModel, GeminiClient};
use attendanced::config::Config;
use attendanced::engine::{self, FaceAnalyzer};
use attendanced::store::Store;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ATTENDANCE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ATTENDANCE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "attendanced=info,tower_http=info".into());

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendanced starting");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        match_threshold = config.match_threshold,
        utc_offset_minutes = config.utc_offset_minutes,
        "configuration loaded"
    );

    let clock = AttendanceClock::new(config.utc_offset_minutes)
        .context("ATTENDANCE_UTC_OFFSET_MINUTES")?;

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;

    // Load models before accepting requests (fail fast)
    let analyzer = engine::spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to start face engine")?;
    tracing::info!("face engine ready");

    let chat: Option<Arc<dyn ChatModel>> = match GeminiClient::from_config(&config.gemini) {
        Some(client) => {
            tracing::info!(model = %config.gemini.model, "chatbot enabled");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; /chatbot will answer 503");
            None
        }
    };

    let state = AppState {
        store,
        analyzer: Arc::new(analyzer) as Arc<dyn FaceAnalyzer>,
        chat,
        clock,
        thresholds: MatchThresholds {
            recognize: config.match_threshold,
            duplicate: config.duplicate_threshold,
        },
        policy: AnalyticsPolicy {
            working_days: config.working_days,
            defaulter_threshold_pct: config.defaulter_threshold_pct,
        },
        enrollment: Default::default(),
    };

    let router = api::create_router(state, config.cors_origins.as_deref(), config.max_body_bytes);
    api::run_server(&config.bind_addr, router)
        .await
        .with_context(|| format!("server on {} failed", config.bind_addr))?;

    tracing::info!("attendanced stopped");
    Ok(())
}
