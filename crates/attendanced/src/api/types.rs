//! # API Request/Response Types
//!
//! Request fields are optional so that missing values produce the
//! endpoint's own validation message rather than a generic decode error.

use attendance_core::{BoundingBox, UserProfile};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// GENERIC REPLIES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// FACE ENDPOINTS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub gender: Option<String>,
    pub facial_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: i64,
}

/// Body of `/mark_attendance` and `/detect_face`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FacialDataRequest {
    pub facial_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkStatus {
    Marked,
    AlreadyMarked,
    NotRecognized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkResponse {
    pub status: MarkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Face rectangle in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl From<&BoundingBox> for FaceBox {
    fn from(b: &BoundingBox) -> Self {
        Self {
            x: b.x.round() as i64,
            y: b.y.round() as i64,
            width: b.width.round() as i64,
            height: b.height.round() as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub faces: Vec<FaceBox>,
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJson {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub gender: String,
    pub facial_embedding: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub gender: Option<String>,
    pub facial_data: Option<String>,
}

// =============================================================================
// ATTENDANCE RECORDS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddRecordRequest {
    pub user_id: Option<i64>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordResponse {
    pub message: String,
    pub record_id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRecordRequest {
    pub user_id: Option<i64>,
    pub timestamp: Option<String>,
}

// =============================================================================
// REPORTS
// =============================================================================

/// Query string of the monthly endpoints. Values that are not integers,
/// or are zero, count as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthQuery {
    pub month: Option<String>,
    pub year: Option<String>,
    pub user_id: Option<String>,
}

impl MonthQuery {
    pub fn month(&self) -> Option<u32> {
        parse_int(self.month.as_deref())
    }

    pub fn year(&self) -> Option<i32> {
        parse_int(self.year.as_deref())
    }

    pub fn user_id(&self) -> Option<i64> {
        parse_int(self.user_id.as_deref())
    }
}

fn parse_int<T: std::str::FromStr + Default + PartialEq>(value: Option<&str>) -> Option<T> {
    value
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v != T::default())
}

// =============================================================================
// CHATBOT
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}
