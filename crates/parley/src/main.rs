// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - a multi-tenant bridge between a conversation platform, a bot
//! engine and a messaging channel.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod clients;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::{ConfigError, ParleyConfig};

/// Parley - bot sessions for conversation platform inboxes.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of the standard search path.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook gateway, worker pool and trigger scheduler.
    Serve,
    /// Validate the configuration and print a summary.
    CheckConfig,
}

fn load(path: Option<&PathBuf>) -> Result<ParleyConfig, Vec<ConfigError>> {
    match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("parley: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig) => {
            println!("parley: configuration is valid");
            println!("  server      {}:{}", config.server.bind_address, config.server.port);
            println!("  database    {}", config.storage.database_path);
            println!("  workers     {}", config.queue.concurrency);
            println!("  buffer      {} ms, max {}", config.buffer.window_ms, config.buffer.max_messages);
            println!("  scheduler   {}", if config.scheduler.enabled { "enabled" } else { "disabled" });
            println!("  auto-close  {}", if config.auto_close.enabled { "enabled" } else { "disabled" });
        }
        None => {
            println!("parley: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_serve_with_config_path() {
        let cli = Cli::try_parse_from(["parley", "serve", "--config", "/tmp/parley.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/parley.toml")));
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[queue]\nconcurrency = 3\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.queue.concurrency, 3);
    }
}
