//! Docvault: file-backed JSON documents with database-like safety.
//!
//! Small deployments (a marketing site's back office, an intranet) keep their
//! state in a handful of JSON files: members, admin accounts, approvals,
//! notices. Docvault gives those files the guarantees a low-traffic app needs
//! without running a database.
//!
//! # Guarantees
//!
//! - **Atomic writes**: temp file + rename; readers never see a torn document
//! - **Mutual exclusion**: per-document sentinel lock (`<doc>.json.lock`),
//!   valid across threads and processes, with a bounded wait
//! - **Backups**: every overwrite snapshots the previous bytes; the newest
//!   `max_backups` snapshots are kept
//! - **Self-healing**: tracked kinds (admin users, members) are validated and
//!   reset to a known-good default when missing or corrupt
//!
//! # Non-guarantees
//!
//! No multi-document transactions, no queries beyond a linear scan, no
//! replication. Locks are per document, not per record, and waiters are not
//! queued fairly.
//!
//! # Example
//!
//! ```no_run
//! use docvault::core::docstore::DocumentStore;
//! use docvault::core::integrity::validate_and_recover;
//! use docvault::plugins::admin_users::AdminUsersDb;
//! use std::path::Path;
//!
//! let store = DocumentStore::open(Path::new("data"))?;
//! let notices: Vec<String> = store.read("intranet/notices", Vec::new());
//! store.write("intranet/notices", &notices)?;
//! let admins: AdminUsersDb = validate_and_recover(&store, "admin-users")?;
//! # Ok::<(), docvault::core::error::DocvaultError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: persistence primitives (atomic writer, locks, store, backups, integrity)
//! - [`plugins`]: tracked document kinds and their default datasets
//! - `cli`: operator binary argument definitions (not part of the lib API)

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{BackupsCommand, Cli, Command, LockCommand};
use crate::core::docstore::DocumentStore;
use crate::core::lock::Sentinel;
use crate::core::{backup, config, error, events, integrity, time};
use crate::plugins::{admin_users, members};

use clap::Parser;
use colored::Colorize;
use std::fs;

pub fn run() -> Result<(), error::DocvaultError> {
    let cli = Cli::parse();
    let data_dir = config::resolve_data_dir(cli.data_dir);
    let store = DocumentStore::open(&data_dir)?;

    match cli.command {
        Command::Read { key } => {
            let value = store
                .try_read::<serde_json::Value>(&key)?
                .ok_or_else(|| error::DocvaultError::NotFound(key.clone()))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Write(args) => {
            let raw = match (args.json, args.file) {
                (Some(json), _) => json,
                (None, Some(path)) => fs::read_to_string(&path)?,
                (None, None) => {
                    return Err(error::DocvaultError::ValidationError(
                        "provide --json or --file".to_string(),
                    ));
                }
            };
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            store.write(&args.key, &value)?;
            println!("{} wrote {}", "✓".bright_green(), args.key.bright_cyan());
        }
        Command::Keys => {
            for key in store.list_keys()? {
                println!("{}", key);
            }
        }
        Command::Check(args) => {
            let report = integrity::check(&store, &args.key, args.kind)?;
            if report.verdict.is_valid() {
                println!("{} {} is a valid {}", "✓".bright_green(), args.key, args.kind);
            } else {
                println!(
                    "{} {} is not a valid {} ({})",
                    "✗".bright_red(),
                    args.key,
                    args.kind,
                    report.verdict.reason()
                );
            }
            if args.kind == integrity::SchemaKind::AdminUsers
                && let (_, Some(db)) =
                    integrity::inspect::<admin_users::AdminUsersDb>(&store, &args.key)?
            {
                warn_default_credentials(&db);
            }
        }
        Command::Recover(args) => {
            let before = integrity::check(&store, &args.key, args.kind)?;
            let value = integrity::recover_value(&store, &args.key, args.kind)?;
            if before.verdict.is_valid() {
                println!("{} {} already valid, nothing written", "✓".bright_green(), args.key);
            } else {
                println!(
                    "{} {} reset to default {} dataset ({})",
                    "⚠".bright_yellow(),
                    args.key,
                    args.kind,
                    before.verdict.reason()
                );
            }
            if args.kind == integrity::SchemaKind::AdminUsers {
                let db: admin_users::AdminUsersDb = serde_json::from_value(value)?;
                warn_default_credentials(&db);
            }
        }
        Command::Schema { kind } => {
            let schema = match kind {
                integrity::SchemaKind::AdminUsers => admin_users::schema(),
                integrity::SchemaKind::Members => members::schema(),
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Command::Backups(group) => match group.command {
            BackupsCommand::List { key } => {
                let path = store.path_for(&key)?;
                let snapshots = backup::list(&path)?;
                if snapshots.is_empty() {
                    println!("no backups for {}", key);
                }
                for s in snapshots {
                    println!("{}  {:>8} bytes  {}", s.timestamp_ms, s.size_bytes, s.path.display());
                }
            }
            BackupsCommand::Restore { key, timestamp } => {
                let snapshot = backup::restore(&store, &key, timestamp)?;
                println!(
                    "{} restored {} from {}",
                    "✓".bright_green(),
                    key.bright_cyan(),
                    snapshot.path.display()
                );
            }
            BackupsCommand::Sweep => {
                let record = backup::sweep(&store)?;
                println!(
                    "{} snapshotted {} document(s) (run #{})",
                    "✓".bright_green(),
                    record.documents.len(),
                    record.runs
                );
            }
        },
        Command::Lock(group) => match group.command {
            LockCommand::Status { key } => {
                let path = store.path_for(&key)?;
                let now = time::now_epoch_ms();
                match store.locks().inspect(&path)? {
                    None => println!("{} unlocked", key),
                    Some(sentinel) => {
                        let age = sentinel.age_ms(now);
                        match &sentinel {
                            Sentinel::Owned(info) => println!(
                                "{} locked by {} (pid {}), heartbeat {}ms ago",
                                key, info.owner, info.pid, age
                            ),
                            Sentinel::Anonymous { .. } => {
                                println!("{} locked (no owner record), {}ms old", key, age)
                            }
                        }
                        if let Some(stale_after) = store.config().stale_after()
                            && sentinel.is_stale(now, stale_after)
                        {
                            println!("  {} lock is stale and will be broken by the next writer", "▸".bright_yellow());
                        }
                    }
                }
            }
            LockCommand::Break { key } => {
                let path = store.path_for(&key)?;
                if store.locks().force_unlock(&path)? {
                    println!("{} removed lock on {}", "✓".bright_green(), key);
                } else {
                    println!("{} was not locked", key);
                }
            }
        },
        Command::Events { last } => {
            for event in events::read_last(store.data_dir(), last)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

fn warn_default_credentials(db: &admin_users::AdminUsersDb) {
    if admin_users::uses_default_credentials(db) {
        eprintln!(
            "{} an active admin account still uses the default password; rotate it now",
            "⚠".bright_yellow()
        );
    }
}
