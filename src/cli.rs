//! CLI struct definitions for the `docvault` operator binary.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::integrity::SchemaKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "docvault",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect, repair and back up file-backed JSON documents."
)]
pub(crate) struct Cli {
    /// Data directory holding the documents (defaults to $DOCVAULT_DATA_DIR or ./data).
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Print a document as pretty JSON.
    Read {
        key: String,
    },
    /// Replace a document (locked, backed up, atomic).
    Write(WriteCli),
    /// List document keys.
    Keys,
    /// Diagnose a document against its schema without modifying it.
    Check(KindCli),
    /// Validate a document and reset it to the default dataset if invalid.
    Recover(KindCli),
    /// Print the structural contract of a schema kind.
    Schema {
        #[clap(long)]
        kind: SchemaKind,
    },
    /// Backup snapshots.
    Backups(BackupsCli),
    /// Sentinel lock inspection and operator overrides.
    Lock(LockCli),
    /// Show recent audit events.
    Events {
        #[clap(long, default_value_t = 20)]
        last: usize,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct WriteCli {
    pub key: String,
    /// Inline JSON value.
    #[clap(long, conflicts_with = "file")]
    pub json: Option<String>,
    /// Read the JSON value from a file.
    #[clap(long)]
    pub file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct KindCli {
    pub key: String,
    /// Schema kind: 'admin-users' or 'members'.
    #[clap(long)]
    pub kind: SchemaKind,
}

#[derive(clap::Args, Debug)]
pub(crate) struct BackupsCli {
    #[clap(subcommand)]
    pub command: BackupsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BackupsCommand {
    /// List snapshots of a document, oldest first.
    List { key: String },
    /// Restore a snapshot by its millisecond timestamp.
    Restore { key: String, timestamp: u64 },
    /// Snapshot every document now and record the run.
    Sweep,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LockCli {
    #[clap(subcommand)]
    pub command: LockCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LockCommand {
    /// Show who holds a document lock and for how long.
    Status { key: String },
    /// Delete a sentinel regardless of owner (crashed-writer recovery).
    Break { key: String },
}
