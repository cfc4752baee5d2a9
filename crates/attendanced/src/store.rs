//! SQLite persistence for users and attendance records.
//!
//! One `tokio-rusqlite` connection; every operation runs as a single
//! closure on its thread, so multi-statement operations are atomic with
//! respect to each other.

use attendance_core::{AttendanceRecord, Embedding, EnrolledFace, UserProfile};
use chrono::NaiveDateTime;
use rusqlite::{params, ErrorCode, OptionalExtension, Row, Transaction};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS "user" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(100) NOT NULL,
    email VARCHAR(120) NOT NULL UNIQUE,
    mobile_number VARCHAR(20) NOT NULL,
    gender VARCHAR(10) NOT NULL,
    facial_embedding TEXT
);
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES "user"(id),
    timestamp DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attendance_user_time ON attendance (user_id, timestamp);
"#;

/// Columns older databases may lack; added on open.
const LEGACY_COLUMNS: [(&str, &str); 3] = [
    ("email", "VARCHAR(120)"),
    ("mobile_number", "VARCHAR(20)"),
    ("gender", "VARCHAR(10)"),
];

const SELECT_USER: &str = r#"SELECT id, name, COALESCE(email, ''), COALESCE(mobile_number, ''),
    COALESCE(gender, ''), facial_embedding FROM "user""#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
}

/// A user row as stored, with the embedding kept in its text form.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub profile: UserProfile,
    pub facial_embedding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub gender: String,
    pub embedding: Option<Embedding>,
}

/// Fields to change; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    pub gender: Option<String>,
    pub embedding: Option<Embedding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserUpdate {
    Updated,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked(AttendanceRecord),
    /// The user already has this record inside the day window.
    AlreadyMarked(AttendanceRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    Updated,
    RecordNotFound,
    UserNotFound,
}

/// Result of a write that may trip the unique email constraint.
enum Checked<T> {
    Done(T),
    EmailTaken,
}

#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring the schema up to date.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "database opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;

            let existing: Vec<String> = c
                .prepare(r#"PRAGMA table_info("user")"#)?
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<_, _>>()?;
            for (column, decl) in LEGACY_COLUMNS {
                if !existing.iter().any(|name| name == column) {
                    c.execute(&format!(r#"ALTER TABLE "user" ADD COLUMN {column} {decl}"#), [])?;
                    tracing::info!(column, "added missing user column");
                }
            }
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // --- users ---

    pub async fn insert_user(&self, user: NewUser) -> Result<i64, StoreError> {
        let email = user.email.clone();
        let outcome = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                if email_taken(&tx, &user.email, None)? {
                    return Ok(Checked::EmailTaken);
                }
                let inserted = tx.execute(
                    r#"INSERT INTO "user" (name, email, mobile_number, gender, facial_embedding)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        user.name,
                        user.email,
                        user.mobile_number,
                        user.gender,
                        user.embedding.as_ref().map(Embedding::to_csv),
                    ],
                );
                match inserted {
                    Ok(_) => {
                        let id = tx.last_insert_rowid();
                        tx.commit()?;
                        Ok(Checked::Done(id))
                    }
                    Err(e) if is_constraint_violation(&e) => Ok(Checked::EmailTaken),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match outcome {
            Checked::Done(id) => {
                tracing::info!(user_id = id, "user inserted");
                Ok(id)
            }
            Checked::EmailTaken => Err(StoreError::DuplicateEmail(email)),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<StoredUser>, StoreError> {
        Ok(self
            .conn
            .call(|c| {
                let users = c
                    .prepare(&format!("{SELECT_USER} ORDER BY id"))?
                    .query_map([], stored_user_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<StoredUser>, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let user = c
                    .query_row(
                        &format!("{SELECT_USER} WHERE id = ?1"),
                        [id],
                        stored_user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?)
    }

    /// Profiles for reporting, optionally narrowed to one user.
    pub async fn profiles(&self, only: Option<i64>) -> Result<Vec<UserProfile>, StoreError> {
        let users = match only {
            Some(id) => self.get_user(id).await?.into_iter().collect(),
            None => self.list_users().await?,
        };
        Ok(users.into_iter().map(|u| u.profile).collect())
    }

    pub async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .call(|c| Ok(c.query_row(r#"SELECT COUNT(*) FROM "user""#, [], |r| r.get(0))?))
            .await?)
    }

    pub async fn update_user(&self, id: i64, patch: UserPatch) -> Result<UserUpdate, StoreError> {
        let email = patch.email.clone();
        let outcome = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                if !user_exists(&tx, id)? {
                    return Ok(Checked::Done(UserUpdate::NotFound));
                }
                if let Some(email) = &patch.email {
                    if email_taken(&tx, email, Some(id))? {
                        return Ok(Checked::EmailTaken);
                    }
                }

                let columns = [
                    ("name", patch.name),
                    ("email", patch.email),
                    ("mobile_number", patch.mobile_number),
                    ("gender", patch.gender),
                    ("facial_embedding", patch.embedding.as_ref().map(Embedding::to_csv)),
                ];
                for (column, value) in columns {
                    if let Some(value) = value {
                        tx.execute(
                            &format!(r#"UPDATE "user" SET {column} = ?1 WHERE id = ?2"#),
                            params![value, id],
                        )?;
                    }
                }
                tx.commit()?;
                Ok(Checked::Done(UserUpdate::Updated))
            })
            .await?;

        match outcome {
            Checked::Done(update) => Ok(update),
            Checked::EmailTaken => Err(StoreError::DuplicateEmail(email.unwrap_or_default())),
        }
    }

    /// Delete a user together with their attendance. Returns `false` if absent.
    pub async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let records = tx.execute("DELETE FROM attendance WHERE user_id = ?1", [id])?;
                let users = tx.execute(r#"DELETE FROM "user" WHERE id = ?1"#, [id])?;
                tx.commit()?;
                if users > 0 {
                    tracing::info!(user_id = id, records, "user deleted");
                }
                Ok(users > 0)
            })
            .await?)
    }

    /// All enrolled embeddings. Rows whose text does not parse are skipped.
    pub async fn gallery(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        Ok(self
            .conn
            .call(|c| {
                let rows = c
                    .prepare(
                        r#"SELECT id, facial_embedding FROM "user"
                           WHERE facial_embedding IS NOT NULL AND facial_embedding != ''
                           ORDER BY id"#,
                    )?
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows
                    .into_iter()
                    .filter_map(|(user_id, text)| match Embedding::from_csv(&text) {
                        Ok(embedding) => Some(EnrolledFace { user_id, embedding }),
                        Err(e) => {
                            tracing::warn!(user_id, error = %e, "skipping unparsable embedding");
                            None
                        }
                    })
                    .collect())
            })
            .await?)
    }

    // --- attendance ---

    /// Record `now` for the user unless a record already exists in `[day_start, day_end)`.
    pub async fn mark_once_per_day(
        &self,
        user_id: i64,
        now: NaiveDateTime,
        day_start: NaiveDateTime,
        day_end: NaiveDateTime,
    ) -> Result<MarkOutcome, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let existing = tx
                    .query_row(
                        "SELECT id, user_id, timestamp FROM attendance
                         WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                         ORDER BY timestamp LIMIT 1",
                        params![user_id, day_start, day_end],
                        record_from_row,
                    )
                    .optional()?;

                let outcome = match existing {
                    Some(record) => MarkOutcome::AlreadyMarked(record),
                    None => {
                        tx.execute(
                            "INSERT INTO attendance (user_id, timestamp) VALUES (?1, ?2)",
                            params![user_id, now],
                        )?;
                        MarkOutcome::Marked(AttendanceRecord {
                            id: tx.last_insert_rowid(),
                            user_id,
                            timestamp: now,
                        })
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?)
    }

    /// Insert a record. `None` when the user does not exist.
    pub async fn insert_attendance(
        &self,
        user_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                if !user_exists(&tx, user_id)? {
                    return Ok(None);
                }
                tx.execute(
                    "INSERT INTO attendance (user_id, timestamp) VALUES (?1, ?2)",
                    params![user_id, timestamp],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(Some(id))
            })
            .await?)
    }

    pub async fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .conn
            .call(|c| {
                let records = c
                    .prepare("SELECT id, user_id, timestamp FROM attendance ORDER BY id")?
                    .query_map([], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?)
    }

    pub async fn get_attendance(&self, id: i64) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT id, user_id, timestamp FROM attendance WHERE id = ?1",
                    [id],
                    record_from_row,
                )
                .optional()?)
            })
            .await?)
    }

    pub async fn update_attendance(
        &self,
        id: i64,
        user_id: Option<i64>,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<RecordUpdate, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let exists = tx
                    .query_row("SELECT 1 FROM attendance WHERE id = ?1", [id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(RecordUpdate::RecordNotFound);
                }
                if let Some(user_id) = user_id {
                    if !user_exists(&tx, user_id)? {
                        return Ok(RecordUpdate::UserNotFound);
                    }
                    tx.execute(
                        "UPDATE attendance SET user_id = ?1 WHERE id = ?2",
                        params![user_id, id],
                    )?;
                }
                if let Some(timestamp) = timestamp {
                    tx.execute(
                        "UPDATE attendance SET timestamp = ?1 WHERE id = ?2",
                        params![timestamp, id],
                    )?;
                }
                tx.commit()?;
                Ok(RecordUpdate::Updated)
            })
            .await?)
    }

    pub async fn delete_attendance(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM attendance WHERE id = ?1", [id])? > 0))
            .await?)
    }

    /// Records in `[start, end)`, oldest first, optionally for one user.
    pub async fn records_between(
        &self,
        user_id: Option<i64>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .conn
            .call(move |c| {
                let records = c
                    .prepare(
                        "SELECT id, user_id, timestamp FROM attendance
                         WHERE (?1 IS NULL OR user_id = ?1) AND timestamp >= ?2 AND timestamp < ?3
                         ORDER BY timestamp, id",
                    )?
                    .query_map(params![user_id, start, end], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?)
    }

    /// Every record joined with its user, oldest first.
    pub async fn attendance_log(&self) -> Result<Vec<(UserProfile, AttendanceRecord)>, StoreError> {
        Ok(self
            .conn
            .call(|c| {
                let rows = c
                    .prepare(
                        r#"SELECT u.id, u.name, COALESCE(u.email, ''), COALESCE(u.mobile_number, ''),
                                  COALESCE(u.gender, ''), a.id, a.timestamp
                           FROM attendance a JOIN "user" u ON u.id = a.user_id
                           ORDER BY a.timestamp, a.id"#,
                    )?
                    .query_map([], |row| {
                        let profile = profile_from_row(row)?;
                        let record = AttendanceRecord {
                            id: row.get(5)?,
                            user_id: profile.id,
                            timestamp: row.get(6)?,
                        };
                        Ok((profile, record))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?)
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        mobile_number: row.get(3)?,
        gender: row.get(4)?,
    })
}

fn stored_user_from_row(row: &Row<'_>) -> rusqlite::Result<StoredUser> {
    Ok(StoredUser {
        profile: profile_from_row(row)?,
        facial_embedding: row.get(5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

fn user_exists(tx: &Transaction<'_>, id: i64) -> rusqlite::Result<bool> {
    Ok(tx
        .query_row(r#"SELECT 1 FROM "user" WHERE id = ?1"#, [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn email_taken(tx: &Transaction<'_>, email: &str, except: Option<i64>) -> rusqlite::Result<bool> {
    Ok(tx
        .query_row(
            r#"SELECT 1 FROM "user" WHERE email = ?1 AND (?2 IS NULL OR id != ?2)"#,
            params![email, except],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}
