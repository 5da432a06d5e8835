//! Configuration for the radiance server.
//!
//! Settings come from CLI arguments or environment variables; CLI
//! arguments take precedence.

use std::path::PathBuf;

use clap::Parser;

/// Real-time presence and messaging server.
///
/// Accepts persistent WebSocket connections keyed by user id, brokers
/// friend requests and two-party conversations, and fans delivery events
/// out to live connections.  State persists in SQLite.
#[derive(Parser, Debug)]
#[command(name = "radiance", version, about)]
pub struct Cli {
    /// Server bind address [env: RADIANCE_BIND] [default: 127.0.0.1:4000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database [env: RADIANCE_HOME] [default: ~/.radiance]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,
}

pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("RADIANCE_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".radiance"))
                    .unwrap_or_else(|_| PathBuf::from(".radiance"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("RADIANCE_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:4000".to_string());

        Self {
            bind_addr,
            data_dir,
        }
    }
}
