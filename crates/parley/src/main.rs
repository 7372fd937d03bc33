// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - a connection-resilient chat-session gateway.
//!
//! This is the binary entry point. It keeps one QR-authenticated
//! chat-protocol session alive, normalizes inbound events to a stable
//! webhook contract, and exposes a uniform send/receive HTTP surface.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use clap::{Parser, Subcommand};
use parley_core::error::ParleyError;
use parley_session::RECONNECT_EXHAUSTED_EXIT_CODE;

/// Parley - a connection-resilient chat-session gateway.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway and session supervisor.
    Serve,
    /// Validate configuration and print the effective settings.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match parley_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Check) => {
            println!("configuration ok");
            println!("  session.driver           = {}", config.session.driver);
            println!("  session.storage_path     = {}", config.session.storage_path);
            println!("  reconnect.max_attempts   = {}", config.reconnect.max_attempts);
            println!("  memory.budget_mb         = {}", config.memory.budget_mb);
            println!("  media.cache_bound        = {}", config.media.cache_bound);
            println!(
                "  webhook.url              = {}",
                config.webhook.url.as_deref().unwrap_or("(disabled)")
            );
            println!(
                "  gateway                  = {}:{}",
                config.gateway.host, config.gateway.port
            );
        }
        Some(Commands::Serve) | None => match serve::run_serve(config).await {
            Ok(()) => {}
            Err(ParleyError::ReconnectExhausted { attempts }) => {
                eprintln!(
                    "parley: reconnection exhausted after {attempts} attempts, exiting for restart"
                );
                std::process::exit(RECONNECT_EXHAUSTED_EXIT_CODE);
            }
            Err(e) => {
                eprintln!("parley: {e}");
                std::process::exit(1);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = parley_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.session.driver, "sim");
    }
}
