use attendance_core::clock::DEFAULT_UTC_OFFSET_MINUTES;
use attendance_core::report::{DEFAULT_DEFAULTER_THRESHOLD_PCT, DEFAULT_WORKING_DAYS};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP API.
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity needed to recognise a live photo.
    pub match_threshold: f32,
    /// Cosine similarity at which a new registration counts as already enrolled.
    pub duplicate_threshold: f32,
    /// Attendance time zone as minutes east of UTC.
    pub utc_offset_minutes: i32,
    /// Working days per month assumed by analytics.
    pub working_days: u32,
    /// Attendance percentage below which a user is a defaulter.
    pub defaulter_threshold_pct: f64,
    /// Request body limit; photos arrive base64-encoded in JSON.
    pub max_body_bytes: usize,
    /// Allowed CORS origins; `None` means any origin.
    pub cors_origins: Option<Vec<String>>,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Chatbot is disabled when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Config {
    /// Load configuration from `ATTENDANCE_*` / `GEMINI_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let get = &get as &dyn Fn(&str) -> Option<String>;
        let data_dir = get("XDG_DATA_HOME")
            .map(|d| PathBuf::from(d).join("attendance"))
            .unwrap_or_else(attendance_core::default_data_dir);

        Self {
            bind_addr: get("ATTENDANCE_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            model_dir: get("ATTENDANCE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            db_path: get("ATTENDANCE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("site.db")),
            match_threshold: parsed(get, "ATTENDANCE_MATCH_THRESHOLD").unwrap_or(0.40),
            duplicate_threshold: parsed(get, "ATTENDANCE_DUPLICATE_THRESHOLD").unwrap_or(0.40),
            utc_offset_minutes: parsed(get, "ATTENDANCE_UTC_OFFSET_MINUTES")
                .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES),
            working_days: parsed(get, "ATTENDANCE_WORKING_DAYS")
                .filter(|d: &u32| *d > 0)
                .unwrap_or(DEFAULT_WORKING_DAYS),
            defaulter_threshold_pct: parsed(get, "ATTENDANCE_DEFAULTER_THRESHOLD")
                .unwrap_or(DEFAULT_DEFAULTER_THRESHOLD_PCT),
            max_body_bytes: parsed(get, "ATTENDANCE_MAX_BODY_BYTES").unwrap_or(10 * 1024 * 1024),
            cors_origins: get("ATTENDANCE_CORS_ORIGINS")
                .filter(|v| v.trim() != "*")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                }),
            gemini: GeminiConfig {
                api_key: get("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()),
                model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: get("GEMINI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            },
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn parsed<T: FromStr>(get: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("XDG_DATA_HOME", "/data")]);
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.db_path, PathBuf::from("/data/attendance/site.db"));
        assert_eq!(
            config.scrfd_model_path(),
            PathBuf::from("/data/attendance/models/det_10g.onnx")
        );
        assert_eq!(config.match_threshold, 0.40);
        assert_eq!(config.utc_offset_minutes, 330);
        assert_eq!(config.working_days, 22);
        assert!(config.cors_origins.is_none());
        assert!(config.gemini.api_key.is_none());
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("ATTENDANCE_DB_PATH", "/tmp/a.db"),
            ("ATTENDANCE_MATCH_THRESHOLD", "0.55"),
            ("ATTENDANCE_UTC_OFFSET_MINUTES", "-300"),
            ("ATTENDANCE_CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("GEMINI_API_KEY", "secret"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(config.match_threshold, 0.55);
        assert_eq!(config.utc_offset_minutes, -300);
        assert_eq!(
            config.cors_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
        assert_eq!(config.gemini.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = config_from(&[
            ("ATTENDANCE_MATCH_THRESHOLD", "high"),
            ("ATTENDANCE_WORKING_DAYS", "0"),
            ("ATTENDANCE_CORS_ORIGINS", "*"),
            ("GEMINI_API_KEY", "  "),
        ]);
        assert_eq!(config.match_threshold, 0.40);
        assert_eq!(config.working_days, 22);
        assert!(config.cors_origins.is_none());
        assert!(config.gemini.api_key.is_none());
    }
}
