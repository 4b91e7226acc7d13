//! Command-line entry point for contact identity resolution.
//!
//! # Responsibility
//! - Run identify requests and cluster lookups against a local database.
//! - Print response bodies as JSON; exit non-zero on error statuses.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use contact_api::{
    configure_db_path, contact_cluster, identify, init_logging, resolve_db_path, IdentifyEnvelope,
    IdentifyRequest, DB_PATH_ENV,
};
use contact_core::db::open_db;
use contact_core::ContactId;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "contact_cli",
    version,
    about = "Resolve contact identities across emails and phone numbers"
)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = DB_PATH_ENV)]
    db: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long, global = true, default_value = contact_core::default_log_level())]
    log_level: String,

    /// Absolute directory for rolling log files (stderr when omitted)
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one (email, phone number) observation
    Identify {
        #[arg(long)]
        email: Option<String>,
        #[arg(long = "phone", alias = "phone-number")]
        phone_number: Option<String>,
    },
    /// Print the merged identity of the cluster containing a contact
    Show { contact_id: ContactId },
    /// Health check
    Ping,
    /// Print the core version
    Version,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let logging_error = init_logging(&cli.log_level, cli.log_dir.as_deref());
    if !logging_error.is_empty() {
        bail!("logging init failed: {logging_error}");
    }

    if let Some(db) = &cli.db {
        configure_db_path(db)
            .map_err(|active| anyhow!("database already configured at {}", active.display()))?;
    }

    match cli.command {
        Command::Identify {
            email,
            phone_number,
        } => {
            let envelope = identify(&IdentifyRequest::new(email, phone_number));
            report(&envelope)
        }
        Command::Show { contact_id } => {
            let db_path = resolve_db_path();
            let conn = open_db(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?;
            report(&contact_cluster(&conn, contact_id))
        }
        Command::Ping => {
            println!("{}", contact_api::ping());
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            println!("{}", contact_api::core_version());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(envelope: &IdentifyEnvelope) -> Result<ExitCode> {
    let body: serde_json::Value = serde_json::from_str(&envelope.body_json())?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if envelope.is_ok() {
        return Ok(ExitCode::SUCCESS);
    }
    eprintln!("{}", envelope.message);
    Ok(ExitCode::from(match envelope.status.http_status() {
        400 => 2,
        _ => 1,
    }))
}
