//! Thin client for the attendanced HTTP API.

use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot reach attendanced at {url}: {source}")]
    ConnectionFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unreadable response: {0}")]
    Parse(String),
    #[error("cannot read photo {path}: {source}")]
    Photo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct AttendanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl AttendanceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a request and decode its JSON body. Non-2xx statuses become errors
    /// carrying the server's `error` message.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let resp = req.send().await.map_err(|source| ClientError::ConnectionFailed {
            url: self.base_url.clone(),
            source,
        })?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }

    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::POST, path).json(&body))
            .await
    }

    async fn put(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::PUT, path).json(&body))
            .await
    }

    async fn delete(&self, path: &str) -> Result<Value, ClientError> {
        self.send(self.request(reqwest::Method::DELETE, path)).await
    }

    /// GET /health
    pub async fn health(&self) -> Result<Value, ClientError> {
        self.get("/health").await
    }

    /// POST /register
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        mobile_number: &str,
        gender: &str,
        photo: &Path,
    ) -> Result<Value, ClientError> {
        let body = json!({
            "name": name,
            "email": email,
            "mobile_number": mobile_number,
            "gender": gender,
            "facial_data": photo_data_url(photo)?,
        });
        self.post("/register", body).await
    }

    /// POST /mark_attendance
    pub async fn mark(&self, photo: &Path) -> Result<Value, ClientError> {
        self.post("/mark_attendance", json!({ "facial_data": photo_data_url(photo)? }))
            .await
    }

    /// POST /detect_face
    pub async fn detect(&self, photo: &Path) -> Result<Value, ClientError> {
        self.post("/detect_face", json!({ "facial_data": photo_data_url(photo)? }))
            .await
    }

    /// GET /users
    pub async fn users(&self) -> Result<Value, ClientError> {
        self.get("/users").await
    }

    /// PUT /users/{id}
    pub async fn edit_user(&self, id: i64, changes: &UserChanges) -> Result<Value, ClientError> {
        self.put(&format!("/users/{id}"), changes.to_body()?).await
    }

    /// DELETE /users/{id}
    pub async fn remove_user(&self, id: i64) -> Result<Value, ClientError> {
        self.delete(&format!("/users/{id}")).await
    }

    /// GET /attendance
    pub async fn records(&self) -> Result<Value, ClientError> {
        self.get("/attendance").await
    }

    /// POST /attendance
    pub async fn add_record(
        &self,
        user_id: i64,
        timestamp: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut body = json!({ "user_id": user_id });
        if let Some(ts) = timestamp {
            body["timestamp"] = json!(ts);
        }
        self.post("/attendance", body).await
    }

    /// PUT /attendance/{id}
    pub async fn edit_record(
        &self,
        id: i64,
        user_id: Option<i64>,
        timestamp: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.put(&format!("/attendance/{id}"), record_changes(user_id, timestamp))
            .await
    }

    /// DELETE /attendance/{id}
    pub async fn remove_record(&self, id: i64) -> Result<Value, ClientError> {
        self.delete(&format!("/attendance/{id}")).await
    }

    /// GET /attendance/{kind}/monthly
    pub async fn monthly(
        &self,
        kind: &str,
        month: u32,
        year: i32,
        user_id: Option<i64>,
    ) -> Result<Value, ClientError> {
        let mut req = self
            .request(reqwest::Method::GET, &format!("/attendance/{kind}/monthly"))
            .query(&[("month", month.to_string()), ("year", year.to_string())]);
        if let Some(id) = user_id {
            req = req.query(&[("user_id", id.to_string())]);
        }
        self.send(req).await
    }

    /// POST /chatbot
    pub async fn ask(&self, query: &str) -> Result<Value, ClientError> {
        self.post("/chatbot", json!({ "query": query })).await
    }
}

/// User fields to change; unset fields are left out of the request.
#[derive(Debug, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub gender: Option<String>,
    /// New face photo to re-enroll.
    pub photo: Option<PathBuf>,
}

impl UserChanges {
    fn to_body(&self) -> Result<Value, ClientError> {
        let mut body = json!({});
        for (key, value) in [
            ("name", &self.name),
            ("email", &self.email),
            ("mobile_number", &self.mobile_number),
            ("gender", &self.gender),
        ] {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }
        if let Some(photo) = &self.photo {
            body["facial_data"] = json!(photo_data_url(photo)?);
        }
        Ok(body)
    }
}

fn record_changes(user_id: Option<i64>, timestamp: Option<&str>) -> Value {
    let mut body = json!({});
    if let Some(id) = user_id {
        body["user_id"] = json!(id);
    }
    if let Some(ts) = timestamp {
        body["timestamp"] = json!(ts);
    }
    body
}

/// Read an image file as a `data:` URL.
pub fn photo_data_url(path: &Path) -> Result<String, ClientError> {
    let bytes = std::fs::read(path).map_err(|source| ClientError::Photo {
        path: path.display().to_string(),
        source,
    })?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", mime_for(path)))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn error_message(body: &Value) -> String {
    match body.get("error").and_then(Value::as_str) {
        Some(msg) => msg.to_string(),
        None => match body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
