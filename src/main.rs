//! cursord - server-side cursor engine
//!
//! Runs the cursor command layer from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Drain 1000 documents of 4 KiB in batches of 100
//! cursord demo --docs 1000 --doc-size 4096 --batch-size 100
//!
//! # Show the effective configuration
//! cursord -c cursord.toml config --show
//! ```

use cursord::cli::CliInterface;
use cursord::error::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parse arguments, load configuration, initialize logging, run the subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);
    cli.run().await
}

/// Initialize logging system from the effective configuration
///
/// CLI verbosity flags are already folded into `config.logging.level`;
/// `RUST_LOG` directives take precedence when set.
fn initialize_logging(cli: &CliInterface) {
    let logging = &cli.config().logging;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(logging.level.to_tracing_level()).into())
        .from_env_lossy();

    // Logs go to stderr so demo output on stdout stays valid JSON
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
