//! # API Endpoint Handlers

use super::{
    error::{ApiError, ApiJson, ApiPath, ApiQuery},
    types::{
        AddRecordRequest, AddRecordResponse, ChatRequest, ChatResponse, DetectResponse, FaceBox,
        FacialDataRequest, HealthResponse, MarkResponse, MarkStatus, MessageResponse, MonthQuery,
        RegisterRequest, RegisterResponse, UpdateRecordRequest, UpdateUserRequest, UserJson,
    },
    AppState,
};
use crate::chatbot::build_prompt;
use crate::store::{MarkOutcome, NewUser, RecordUpdate, UserPatch, UserUpdate};
use attendance_core::report::{self, Month, TREND_MONTHS};
use attendance_core::{CosineMatcher, Embedding, Matcher, Photo};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::NaiveDateTime;

const INVALID_TIMESTAMP: &str = "Invalid timestamp format. Use ISO format (YYYY-MM-DDTHH:MM:SS).";
const FACE_ALREADY_REGISTERED: &str = "This face is already registered.";

/// `None` for absent or blank values.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn decode_photo(data: &str) -> Result<Photo, ApiError> {
    Photo::decode_base64(data).map_err(|e| {
        tracing::debug!(error = %e, "rejecting undecodable photo");
        ApiError::bad_request("Could not decode image")
    })
}

fn parse_timestamp(state: &AppState, text: &str) -> Result<NaiveDateTime, ApiError> {
    state
        .clock
        .parse_timestamp(text)
        .map_err(|_| ApiError::bad_request(INVALID_TIMESTAMP))
}

/// Fail when `embedding` matches an enrolled face other than `except`.
async fn ensure_unregistered(
    state: &AppState,
    embedding: &Embedding,
    except: Option<i64>,
) -> Result<(), ApiError> {
    let gallery: Vec<_> = state
        .store
        .gallery()
        .await?
        .into_iter()
        .filter(|face| Some(face.user_id) != except)
        .collect();
    let result = CosineMatcher.compare(embedding, &gallery, state.thresholds.duplicate);
    if result.matched {
        tracing::info!(
            similarity = result.similarity,
            existing_user = ?result.user_id,
            "face already enrolled"
        );
        return Err(ApiError::bad_request(FACE_ALREADY_REGISTERED));
    }
    Ok(())
}

// =============================================================================
// SERVICE
// =============================================================================

pub async fn root_handler() -> &'static str {
    "Smart Attendance System Backend"
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// REGISTRATION & RECOGNITION
// =============================================================================

/// Enroll a new user from their details and a photo.
pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(name), Some(email), Some(mobile_number), Some(gender), Some(facial_data)) = (
        non_empty(request.name),
        non_empty(request.email),
        non_empty(request.mobile_number),
        non_empty(request.gender),
        non_empty(request.facial_data),
    ) else {
        return Err(ApiError::bad_request(
            "Name, email, mobile number, gender, and facial data are required",
        ));
    };

    let photo = decode_photo(&facial_data)?;
    let embedding = state
        .analyzer
        .embed(photo)
        .await
        .map_err(|e| ApiError::from_engine("Error processing facial data", e))?;
    let _enrolling = state.enrollment.lock().await;
    ensure_unregistered(&state, &embedding, None).await?;

    let user_id = state
        .store
        .insert_user(NewUser {
            name,
            email,
            mobile_number,
            gender,
            embedding: Some(embedding),
        })
        .await?;

    tracing::info!(user_id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id,
        }),
    ))
}

/// Recognise the face in a photo and record attendance once per day.
pub async fn mark_attendance_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FacialDataRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let facial_data = non_empty(request.facial_data)
        .ok_or_else(|| ApiError::bad_request("Facial data is required"))?;

    let photo = decode_photo(&facial_data)?;
    let probe = state
        .analyzer
        .embed(photo)
        .await
        .map_err(|e| ApiError::from_engine("Error processing facial data", e))?;

    if state.store.count_users().await? == 0 {
        return Err(ApiError::not_found("No users registered in the system."));
    }
    let gallery = state.store.gallery().await?;
    if gallery.is_empty() {
        return Err(ApiError::not_found("No registered users with facial data."));
    }

    let result = CosineMatcher.compare(&probe, &gallery, state.thresholds.recognize);
    let Some(user_id) = result.user_id.filter(|_| result.matched) else {
        tracing::info!(similarity = result.similarity, "face not recognised");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(MarkResponse {
                status: MarkStatus::NotRecognized,
                user: None,
            }),
        ));
    };

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Recognized user not found in database"))?;

    let now = state.clock.now();
    let (day_start, day_end) = state.clock.day_bounds(now.date());
    let status = match state
        .store
        .mark_once_per_day(user_id, now, day_start, day_end)
        .await?
    {
        MarkOutcome::Marked(record) => {
            tracing::info!(
                user_id,
                record_id = record.id,
                similarity = result.similarity,
                "attendance marked"
            );
            MarkStatus::Marked
        }
        MarkOutcome::AlreadyMarked(record) => {
            tracing::debug!(user_id, record_id = record.id, "attendance already marked today");
            MarkStatus::AlreadyMarked
        }
    };

    Ok((
        StatusCode::OK,
        Json(MarkResponse {
            status,
            user: Some(user.profile),
        }),
    ))
}

/// Bounding boxes of every face in a photo.
pub async fn detect_face_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FacialDataRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let facial_data = non_empty(request.facial_data)
        .ok_or_else(|| ApiError::bad_request("Facial data is required"))?;

    let photo = decode_photo(&facial_data)?;
    let faces = state
        .analyzer
        .detect(photo)
        .await
        .map_err(|e| ApiError::Internal(format!("Error processing facial data: {e}")))?;

    Ok(Json(DetectResponse {
        faces: faces.iter().map(FaceBox::from).collect(),
    }))
}

// =============================================================================
// USERS
// =============================================================================

pub async fn list_users_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let users: Vec<UserJson> = state
        .store
        .list_users()
        .await?
        .into_iter()
        .map(|u| UserJson {
            id: u.profile.id,
            name: u.profile.name,
            email: u.profile.email,
            mobile_number: u.profile.mobile_number,
            gender: u.profile.gender,
            facial_embedding: u.facial_embedding,
        })
        .collect();
    Ok(Json(users))
}

/// Partial update; a new photo re-enrolls the user's face.
pub async fn update_user_handler(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_user(user_id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let embedding = match non_empty(request.facial_data) {
        Some(facial_data) => {
            let photo = decode_photo(&facial_data)?;
            let embedding = state
                .analyzer
                .embed(photo)
                .await
                .map_err(|e| ApiError::from_engine("Error processing new facial data", e))?;
            Some(embedding)
        }
        None => None,
    };

    let _enrolling = state.enrollment.lock().await;
    if let Some(embedding) = &embedding {
        ensure_unregistered(&state, embedding, Some(user_id)).await?;
    }

    let patch = UserPatch {
        name: non_empty(request.name),
        email: non_empty(request.email),
        mobile_number: non_empty(request.mobile_number),
        gender: non_empty(request.gender),
        embedding,
    };
    match state.store.update_user(user_id, patch).await? {
        UserUpdate::Updated => {
            tracing::info!(user_id, "user updated");
            Ok(Json(MessageResponse::new("User updated successfully")))
        }
        UserUpdate::NotFound => Err(ApiError::not_found("User not found")),
    }
}

pub async fn delete_user_handler(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_user(user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(Json(MessageResponse::new(
        "User and associated attendance records deleted successfully",
    )))
}

// =============================================================================
// ATTENDANCE RECORDS
// =============================================================================

pub async fn list_records_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_attendance().await?))
}

/// Manually add a record; the timestamp defaults to now.
pub async fn add_record_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AddRecordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = request
        .user_id
        .ok_or_else(|| ApiError::bad_request("User ID is required"))?;
    if state.store.get_user(user_id).await?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let timestamp = match non_empty(request.timestamp) {
        Some(text) => parse_timestamp(&state, &text)?,
        None => state.clock.now(),
    };

    let record_id = state
        .store
        .insert_attendance(user_id, timestamp)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id, record_id, "attendance record added");
    Ok((
        StatusCode::CREATED,
        Json(AddRecordResponse {
            message: "Attendance record added successfully".to_string(),
            record_id,
        }),
    ))
}

pub async fn update_record_handler(
    State(state): State<AppState>,
    ApiPath(record_id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateRecordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_attendance(record_id).await?.is_none() {
        return Err(ApiError::not_found("Attendance record not found"));
    }
    if let Some(user_id) = request.user_id {
        if state.store.get_user(user_id).await?.is_none() {
            return Err(ApiError::not_found("New User ID not found"));
        }
    }
    let timestamp = non_empty(request.timestamp)
        .map(|text| parse_timestamp(&state, &text))
        .transpose()?;

    match state
        .store
        .update_attendance(record_id, request.user_id, timestamp)
        .await?
    {
        RecordUpdate::Updated => Ok(Json(MessageResponse::new(
            "Attendance record updated successfully",
        ))),
        RecordUpdate::RecordNotFound => Err(ApiError::not_found("Attendance record not found")),
        RecordUpdate::UserNotFound => Err(ApiError::not_found("New User ID not found")),
    }
}

pub async fn delete_record_handler(
    State(state): State<AppState>,
    ApiPath(record_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.store.delete_attendance(record_id).await? {
        return Err(ApiError::not_found("Attendance record not found"));
    }
    Ok(Json(MessageResponse::new(
        "Attendance record deleted successfully",
    )))
}

// =============================================================================
// MONTHLY REPORTS
// =============================================================================

fn requested_month(query: &MonthQuery) -> Result<Month, ApiError> {
    let (Some(month), Some(year)) = (query.month(), query.year()) else {
        return Err(ApiError::bad_request("Month and year are required"));
    };
    Month::new(year, month).map_err(|_| ApiError::bad_request("Invalid month or year"))
}

/// Per-user attendance for one month, optionally for a single user.
pub async fn monthly_report_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MonthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let month = requested_month(&query)?;
    let only = query.user_id();

    let users = state.store.profiles(only).await?;
    let records = state
        .store
        .records_between(only, month.start(), month.end())
        .await?;

    Ok(Json(report::monthly_report(&month, &users, &records)))
}

pub async fn monthly_analytics_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MonthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let month = requested_month(&query)?;
    let window_start = month
        .trailing(TREND_MONTHS)
        .last()
        .map_or_else(|| month.start(), Month::start);

    let users = state.store.profiles(None).await?;
    let records = state
        .store
        .records_between(None, window_start, month.end())
        .await?;

    Ok(Json(report::monthly_analytics(
        &month,
        &users,
        &records,
        &state.policy,
    )))
}

pub async fn monthly_calendar_handler(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MonthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(month), Some(year), Some(user_id)) = (query.month(), query.year(), query.user_id())
    else {
        return Err(ApiError::bad_request(
            "Month, year, and user_id are required",
        ));
    };
    let month =
        Month::new(year, month).map_err(|_| ApiError::bad_request("Invalid month or year"))?;

    let records = state
        .store
        .records_between(Some(user_id), month.start(), month.end())
        .await?;

    Ok(Json(report::monthly_calendar(&month, &records)))
}

// =============================================================================
// CHATBOT
// =============================================================================

/// Answer a question about the attendance log.
pub async fn chatbot_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query =
        non_empty(request.query).ok_or_else(|| ApiError::bad_request("Query is required"))?;
    let chat = state.chat.as_ref().ok_or_else(|| {
        ApiError::Unavailable("Chatbot is not configured; set GEMINI_API_KEY".to_string())
    })?;

    let log = state.store.attendance_log().await?;
    let prompt = build_prompt(&log, &query);
    tracing::debug!(records = log.len(), "forwarding chatbot query");

    let response = chat.generate(&prompt).await?;
    Ok(Json(ChatResponse { response }))
}
