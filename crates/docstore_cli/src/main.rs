//! Docstore CLI
//!
//! Command-line tools for docstore JSON snapshots.
//!
//! # Commands
//!
//! - `inspect` - Display stores, versions, states and node counts
//! - `copy` - Copy a store with all its versions, optionally verifying
//! - `verify` - Compare one version of two stores

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::copy::CopyArgs;
use commands::CliError;
use tracing_subscriber::EnvFilter;

/// Docstore command-line snapshot tools.
#[derive(Parser)]
#[command(name = "docstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display stores, versions, states and node counts
    Inspect {
        /// Snapshot file
        snapshot: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Copy a store with all its versions
    Copy {
        /// Snapshot file
        snapshot: PathBuf,

        /// Source store
        #[arg(short, long)]
        store: String,

        /// Target store (replaced if it exists)
        #[arg(short, long)]
        to: String,

        /// Write the result here instead of back to the snapshot
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Versions to copy (comma separated, default all)
        #[arg(long, value_delimiter = ',')]
        versions: Vec<String>,

        /// Translations to copy (comma separated, default all)
        #[arg(long, value_delimiter = ',', conflicts_with = "no_translations")]
        translations: Option<Vec<String>>,

        /// Copy no translations
        #[arg(long)]
        no_translations: bool,

        /// Translation that becomes the original language
        #[arg(long)]
        trans_as_orig: Option<String>,

        /// Translation that receives the original language
        #[arg(long)]
        orig_as_trans: Option<String>,

        /// Store property of an existing target to leave untouched
        #[arg(long = "skip-property")]
        skip_properties: Vec<String>,

        /// Verify every copied version
        #[arg(long)]
        verify: bool,

        /// Attempts per version
        #[arg(long, default_value = "3")]
        attempts: u32,
    },

    /// Compare one version of two stores
    Verify {
        /// Snapshot file
        snapshot: PathBuf,

        /// Source store
        #[arg(short, long)]
        store: String,

        /// Store to check
        #[arg(short, long)]
        to: String,

        /// Version to compare
        #[arg(long)]
        version: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { snapshot, format } => {
            commands::inspect::run(&snapshot, &format)?;
        }
        Commands::Copy {
            snapshot,
            store,
            to,
            output,
            versions,
            translations,
            no_translations,
            trans_as_orig,
            orig_as_trans,
            skip_properties,
            verify,
            attempts,
        } => {
            let args = CopyArgs {
                store,
                to,
                versions,
                translations: if no_translations { Some(Vec::new()) } else { translations },
                trans_as_orig,
                orig_as_trans,
                skip_properties,
                verify,
                attempts,
            };
            let report = commands::copy::run(&snapshot, output.as_deref(), &args)?;
            commands::copy::print_report(&args, &report);
            if report.verify_errors() > 0 {
                return Err(CliError::CopyVerifyFailed {
                    store: args.to,
                    errors: report.verify_errors(),
                }
                .into());
            }
        }
        Commands::Verify {
            snapshot,
            store,
            to,
            version,
        } => {
            let result = commands::verify::run(&snapshot, &store, &to, &version)?;
            commands::verify::print_result(&result);
            if !result.is_ok() {
                return Err(CliError::VerifyFailed {
                    store: to,
                    version: result.version,
                    errors: result.stats.verify_errors,
                }
                .into());
            }
        }
        Commands::Version => {
            println!("Docstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Docstore Core v{}", docstore_core::VERSION);
            println!("Docstore Sync v{}", docstore_sync::VERSION);
        }
    }

    Ok(())
}
