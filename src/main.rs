//! Request Jar CLI

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use requestjar::config::{Config, LogFormat, LoggingConfig};
use requestjar::network::Server;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Request Jar v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: requestjar <command> [config.toml]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve          Run the HTTP server");
    eprintln!("  check-config   Validate and print the effective configuration");
    eprintln!();
    eprintln!("Environment: PORT, ALLOWED_ORIGINS, LOG_FORMAT, RUST_LOG");
    process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        usage();
    }

    let config_path = args.get(2).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    match args[1].as_str() {
        "serve" => {
            init_tracing(&config.logging);
            Server::new(config).run().await?;
        }
        "check-config" => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
        }
        command => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'requestjar' for usage information.");
            process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}
