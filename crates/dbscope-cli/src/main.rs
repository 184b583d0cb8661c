//! dbscope - command-line front end for the catalog and search engine.
//!
//! Reads a package manifest produced by a discovery tool, loads it into a
//! session and prints the result of one command as pretty JSON on stdout.
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbscope_core::{
    read_manifest, CancellationToken, EngineConfig, ExportGrouping, SearchMode, SearchRequest,
    Session,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "dbscope")]
#[command(about = "Browse and search SQLite databases recovered from a device image")]
struct Args {
    /// JSON package list (array of packages with their database files)
    #[arg(short, long)]
    manifest: PathBuf,

    /// JSON engine configuration; defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print catalog statistics
    Stats,

    /// Search every catalogued database
    Search {
        term: String,

        #[arg(long)]
        case_sensitive: bool,

        /// Treat the term as a regular expression
        #[arg(long, conflicts_with = "bytes")]
        regex: bool,

        /// Treat the term as a hex byte pattern matched against blobs
        #[arg(long)]
        bytes: bool,
    },

    /// Print a page of one table
    Page {
        package: String,
        dir: String,
        database: String,
        table: String,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Export classified attachments
    Export {
        destination: PathBuf,

        /// One folder per package instead of one per file type
        #[arg(long)]
        by_package: bool,
    },
}

fn search_request(term: &str, case_sensitive: bool, regex: bool, bytes: bool) -> SearchRequest {
    let mode = if regex {
        SearchMode::Regex
    } else if bytes {
        SearchMode::BytePattern
    } else {
        SearchMode::Plain
    };
    SearchRequest {
        term: term.to_string(),
        case_sensitive,
        mode,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Ok(EngineConfig::from_json(&json)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;

    let config = load_config(args.config.as_ref())?;
    let packages = read_manifest(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;

    let mut session = Session::new(config);
    let summary = session.load(&packages, &cancel)?;
    info!(
        "Loaded {} databases from {}",
        summary.databases,
        args.manifest.display()
    );

    match args.command {
        Command::Stats => print_json(&session.statistics()),
        Command::Search {
            term,
            case_sensitive,
            regex,
            bytes,
        } => {
            let request = search_request(&term, case_sensitive, regex, bytes);
            print_json(&session.search(&request, &cancel)?)
        }
        Command::Page {
            package,
            dir,
            database,
            table,
            limit,
            offset,
        } => print_json(&session.table_page(&package, &dir, &database, &table, limit, offset)),
        Command::Export {
            destination,
            by_package,
        } => {
            let grouping = if by_package {
                ExportGrouping::ByPackage
            } else {
                ExportGrouping::ByType
            };
            print_json(&session.export_attachments(&destination, grouping, &cancel)?)
        }
    }
}
