use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;

use client::{AttendanceClient, UserChanges};

#[derive(Parser)]
#[command(name = "attendance", about = "Smart attendance CLI")]
struct Cli {
    /// Base URL of attendanced
    #[arg(long, env = "ATTENDANCE_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Register a new user from a photo
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        mobile: String,
        #[arg(long)]
        gender: String,
        /// Photo of the user's face
        photo: PathBuf,
    },
    /// Mark attendance for the face in a photo
    Mark { photo: PathBuf },
    /// List face rectangles found in a photo
    Detect { photo: PathBuf },
    /// List registered users
    Users,
    /// Change a user's details or re-enroll their face
    EditUser {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        mobile: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        /// New photo of the user's face
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// Remove a user and their attendance records
    RemoveUser { id: i64 },
    /// List attendance records
    Records,
    /// Add an attendance record by hand
    AddRecord {
        user_id: i64,
        /// ISO timestamp (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Move an attendance record to another user or time
    EditRecord {
        id: i64,
        /// New owner of the record
        #[arg(long)]
        user: Option<i64>,
        /// New ISO timestamp
        #[arg(long)]
        at: Option<String>,
    },
    /// Remove an attendance record
    RemoveRecord { id: i64 },
    /// Monthly attendance report
    Report {
        month: u32,
        year: i32,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Six-month trend, full attendance and defaulters for a month
    Analytics { month: u32, year: i32 },
    /// Days present for one user in a month
    Calendar { user_id: i64, month: u32, year: i32 },
    /// Ask the chatbot about attendance
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = AttendanceClient::new(&cli.server);
    tracing::debug!(server = %cli.server, "using attendanced");

    let reply = match cli.command {
        Commands::Status => client.health().await?,
        Commands::Register {
            name,
            email,
            mobile,
            gender,
            photo,
        } => {
            client
                .register(&name, &email, &mobile, &gender, &photo)
                .await?
        }
        Commands::Mark { photo } => client.mark(&photo).await?,
        Commands::Detect { photo } => client.detect(&photo).await?,
        Commands::Users => client.users().await?,
        Commands::EditUser {
            id,
            name,
            email,
            mobile,
            gender,
            photo,
        } => {
            let changes = UserChanges {
                name,
                email,
                mobile_number: mobile,
                gender,
                photo,
            };
            client.edit_user(id, &changes).await?
        }
        Commands::RemoveUser { id } => client.remove_user(id).await?,
        Commands::Records => client.records().await?,
        Commands::AddRecord { user_id, at } => client.add_record(user_id, at.as_deref()).await?,
        Commands::EditRecord { id, user, at } => {
            client.edit_record(id, user, at.as_deref()).await?
        }
        Commands::RemoveRecord { id } => client.remove_record(id).await?,
        Commands::Report { month, year, user } => {
            client.monthly("report", month, year, user).await?
        }
        Commands::Analytics { month, year } => {
            client.monthly("analytics", month, year, None).await?
        }
        Commands::Calendar {
            user_id,
            month,
            year,
        } => client.monthly("calendar", month, year, Some(user_id)).await?,
        Commands::Ask { query } => client.ask(&query.join(" ")).await?,
    };

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edit_user() {
        let cli = Cli::try_parse_from([
            "attendance", "edit-user", "4", "--email", "a@example.com", "--photo", "me.png",
        ])
        .unwrap();
        match cli.command {
            Commands::EditUser {
                id,
                name,
                email,
                photo,
                ..
            } => {
                assert_eq!(id, 4);
                assert_eq!(name, None);
                assert_eq!(email.as_deref(), Some("a@example.com"));
                assert_eq!(photo, Some(PathBuf::from("me.png")));
            }
            _ => panic!("expected edit-user"),
        }
    }

    #[test]
    fn test_parse_edit_record() {
        let cli = Cli::try_parse_from([
            "attendance", "edit-record", "9", "--user", "2", "--at", "2024-03-05T10:30:00",
        ])
        .unwrap();
        match cli.command {
            Commands::EditRecord { id, user, at } => {
                assert_eq!(id, 9);
                assert_eq!(user, Some(2));
                assert_eq!(at.as_deref(), Some("2024-03-05T10:30:00"));
            }
            _ => panic!("expected edit-record"),
        }
    }
}
