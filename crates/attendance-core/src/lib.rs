//! attendance-core: face matching and attendance aggregation.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. Everything else in
//! this crate is pure: photo decoding, matching, the attendance clock and
//! the monthly report/analytics math.

pub mod alignment;
pub mod clock;
pub mod detector;
pub mod photo;
pub mod recognizer;
pub mod report;
pub mod types;

pub use clock::AttendanceClock;
pub use detector::FaceDetector;
pub use photo::Photo;
pub use recognizer::FaceRecognizer;
pub use types::{
    AttendanceRecord, BoundingBox, CosineMatcher, Embedding, EnrolledFace, MatchResult, Matcher,
    UserProfile,
};

use std::path::PathBuf;

/// Default directory for the SCRFD/ArcFace model files.
///
/// `$XDG_DATA_HOME/attendance/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Default per-user data directory for the attendance service.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendance")
}
