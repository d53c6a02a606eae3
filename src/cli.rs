use std::{io::Write, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    domain::RecordId,
    scan::{progress::ProgressSnapshot, ProgressSink},
};

#[derive(Debug, Parser)]
#[command(name = "url-sentry")]
#[command(about = "Submit URLs for spam scoring and follow the results live", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan a single URL
    Scan { url: String },
    /// Scan every URL in the first column of a CSV file
    Bulk {
        file: PathBuf,
        /// Write the results as CSV to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect or clear the local scan history
    #[command(subcommand)]
    History(HistoryCommand),
    /// Inspect the remote domain records
    #[command(subcommand)]
    Records(RecordsCommand),
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// Print the saved scans, newest first
    List,
    /// Forget every saved scan
    Clear,
    /// Export the history as CSV
    Export {
        /// Defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RecordsCommand {
    /// Print the newest records
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete every record in the table
    Clear,
    /// Follow inserts, updates and deletes until interrupted
    Watch {
        /// Only follow these record ids
        #[arg(long = "id")]
        ids: Vec<RecordId>,
    },
}

/// Prints percent lines to stderr as scoring advances.
#[derive(Default)]
pub struct ConsoleProgress {
    last_percent: Option<u32>,
}

impl ProgressSink for ConsoleProgress {
    fn submitted(&mut self, total: usize) {
        eprintln!("Submitted {total} URL(s); waiting for scores...");
    }

    fn progressed(&mut self, snapshot: &ProgressSnapshot) {
        let percent = snapshot.percent.round() as u32;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "  {percent:>3}%  ({}/{} complete)",
            snapshot.completed, snapshot.total
        );
    }

    fn finished(&mut self) {
        eprintln!("Scoring finished; loading results");
    }
}
