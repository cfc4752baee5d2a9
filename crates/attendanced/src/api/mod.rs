//! # HTTP API
//!
//! ## Endpoints
//!
//! - `GET /`, `GET /health` - Liveness
//! - `POST /register` - Enroll a user from a photo
//! - `POST /mark_attendance` - Recognise a photo and record attendance
//! - `POST /detect_face` - Face rectangles in a photo
//! - `GET /users`, `PUT|DELETE /users/{id}` - User management
//! - `GET|POST /attendance`, `PUT|DELETE /attendance/{id}` - Record management
//! - `GET /attendance/{report,analytics,calendar}/monthly` - Monthly aggregates
//! - `POST /chatbot` - Questions about the attendance log

mod error;
mod handlers;
mod types;

pub use error::ApiError;
pub use types::{
    AddRecordResponse, ChatResponse, DetectResponse, FaceBox, HealthResponse, MarkResponse,
    MarkStatus, MessageResponse, RegisterResponse, UserJson,
};

use attendance_core::report::AnalyticsPolicy;
use attendance_core::AttendanceClock;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chatbot::ChatModel;
use crate::engine::FaceAnalyzer;
use crate::store::Store;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Cosine similarity thresholds for face comparisons.
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    /// Needed to recognise a live photo.
    pub recognize: f32,
    /// At which a new enrollment counts as an existing face.
    pub duplicate: f32,
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub analyzer: Arc<dyn FaceAnalyzer>,
    /// `None` disables `/chatbot`.
    pub chat: Option<Arc<dyn ChatModel>>,
    pub clock: AttendanceClock,
    pub thresholds: MatchThresholds,
    pub policy: AnalyticsPolicy,
    /// Held across the duplicate-face check and the write that follows it.
    pub enrollment: Arc<Mutex<()>>,
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Permissive when `origins` is `None`, otherwise only the listed origins.
fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = origins else {
        tracing::info!("CORS: allowing all origins");
        return CorsLayer::permissive();
    };

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => {
                tracing::info!("CORS: allowing origin: {}", origin);
                Some(hv)
            }
            Err(e) => {
                tracing::warn!("CORS: invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Router with every endpoint plus body limit, CORS and request tracing.
pub fn create_router(
    state: AppState,
    cors_origins: Option<&[String]>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/health", get(handlers::health_handler))
        .route("/register", post(handlers::register_handler))
        .route("/mark_attendance", post(handlers::mark_attendance_handler))
        .route("/detect_face", post(handlers::detect_face_handler))
        .route("/users", get(handlers::list_users_handler))
        .route(
            "/users/{id}",
            put(handlers::update_user_handler).delete(handlers::delete_user_handler),
        )
        .route(
            "/attendance",
            get(handlers::list_records_handler).post(handlers::add_record_handler),
        )
        .route(
            "/attendance/{id}",
            put(handlers::update_record_handler).delete(handlers::delete_record_handler),
        )
        .route(
            "/attendance/report/monthly",
            get(handlers::monthly_report_handler),
        )
        .route(
            "/attendance/analytics/monthly",
            get(handlers::monthly_analytics_handler),
        )
        .route(
            "/attendance/calendar/monthly",
            get(handlers::monthly_calendar_handler),
        )
        .route("/chatbot", post(handlers::chatbot_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(build_cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `router` on `addr` until Ctrl-C.
pub async fn run_server(addr: &str, router: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("attendance HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
}
