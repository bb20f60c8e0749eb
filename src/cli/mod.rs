//! Command-line interface for cursord
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and CLI overrides
//! - Subcommand dispatch (demo run, configuration display)

mod demo;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, LogLevel};
use crate::error::Result;

pub use demo::{DemoOptions, DemoSummary, PageSummary, run_demo};

/// cursord - server-side cursors with size-bounded batches
#[derive(Parser, Debug)]
#[command(
    name = "cursord",
    version,
    about = "Server-side cursor engine for find/getMore",
    long_about = "Keeps query results open between requests and returns them in batches
bounded by count and reply size, with optional document-sequence replies."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for cursord
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a find/getMore session against an in-memory collection
    Demo {
        /// Number of documents in the collection
        #[arg(long, default_value_t = 1000)]
        docs: usize,

        /// Approximate size of each document in bytes
        #[arg(long, value_name = "BYTES", default_value_t = 256)]
        doc_size: usize,

        /// Batch size for find and getMore (server default when omitted)
        #[arg(long, value_name = "K")]
        batch_size: Option<u32>,

        /// Request document-sequence replies for getMore
        #[arg(long)]
        doc_sequences: bool,
    },

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Effective configuration
    config: Config,
}

impl CliInterface {
    /// Parse the process arguments and load configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_logging_args(&mut config, &args);
        Ok(Self { args, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.args.config_file.as_deref()
    }

    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else {
            config.logging.level
        };
    }

    /// Run the selected subcommand
    pub async fn run(&self) -> Result<()> {
        match &self.args.command {
            Commands::Demo {
                docs,
                doc_size,
                batch_size,
                doc_sequences,
            } => {
                let options = DemoOptions {
                    docs: *docs,
                    doc_size: *doc_size,
                    batch_size: *batch_size,
                    doc_sequences: *doc_sequences,
                };
                let summary = run_demo(&self.config, &options).await?;
                let json = serde_json::to_string_pretty(&summary)
                    .map_err(|e| crate::error::CursordError::Generic(e.to_string()))?;
                println!("{}", json);
                Ok(())
            }
            Commands::Config { show, validate } => self.handle_config_command(*show, *validate),
        }
    }

    /// Handle config subcommand
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }

        if show || !validate {
            self.show_config()?;
        }

        Ok(())
    }

    fn validate_config_file(&self) {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("Configuration file does not exist; defaults apply");
            return;
        }

        match Config::from_file(&path) {
            Ok(_) => println!("Configuration is valid"),
            Err(e) => println!("Configuration is invalid: {}", e),
        }
    }

    fn show_config(&self) -> Result<()> {
        println!("# Configuration file: {}", self.get_config_path().display());
        println!("{}", self.config.to_toml_string()?);
        Ok(())
    }

    fn get_config_path(&self) -> PathBuf {
        self.config_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(Config::default_path)
    }
}
