mod client;
mod core;
mod mpd;
mod socket;
mod status;
mod watcher;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scroller_proto::config::Config;
use scroller_proto::platform;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mpd-scroller", version)]
#[command(about = "Serve the current MPD title as a scrolling text window")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the server
    Server {
        /// MPD address as HOST:PORT, or `default` for MPD_HOST/MPD_PORT
        #[arg(short = 's', long, value_name = "HOST:PORT", default_value = "default")]
        player: Setting<PlayerAddr>,

        /// MPD response timeout in seconds, or `default`
        #[arg(short, long, value_name = "SECS", default_value = "default")]
        timeout: Setting<u64>,

        /// Stay attached to the terminal
        #[arg(short = 'n', long)]
        foreground: bool,
    },
    /// Print the next frame
    Client {
        /// Visible characters, or `default`
        #[arg(short = 'c', long, value_name = "N", default_value = "default")]
        width: Setting<usize>,
    },
    /// Stop the running server
    Quit,
}

/// A CLI value that may be the literal `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Setting<T> {
    Default,
    Value(T),
}

impl<T> Setting<T> {
    fn or(self, fallback: T) -> T {
        match self {
            Setting::Default => fallback,
            Setting::Value(v) => v,
        }
    }
}

impl<T: FromStr> FromStr for Setting<T>
where
    T::Err: std::fmt::Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("default") {
            return Ok(Setting::Default);
        }
        s.parse::<T>().map(Setting::Value).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlayerAddr {
    host: String,
    port: Option<u16>,
}

impl FromStr for PlayerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty player address".to_string());
        }
        // a socket path carries no port
        if s.starts_with('/') {
            return Ok(PlayerAddr {
                host: s.to_string(),
                port: None,
            });
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| format!("invalid port {:?}", port))?;
                Ok(PlayerAddr {
                    host: host.to_string(),
                    port: Some(port),
                })
            }
            Some(_) => Err(format!("missing host in {:?}", s)),
            None => Ok(PlayerAddr {
                host: s.to_string(),
                port: None,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load config")?;

    match cli.mode {
        Mode::Server {
            player,
            timeout,
            foreground,
        } => {
            let mut options = core::ServerOptions::from_config(&config)?;
            if let Setting::Value(addr) = player {
                options.host = addr.host;
                options.port = addr.port.unwrap_or(options.port);
            }
            let timeout_secs = timeout.or(options.player_timeout.as_secs());
            options.player_timeout = Duration::from_secs(timeout_secs.max(1));

            if !foreground {
                let mut args: Vec<String> = std::env::args().skip(1).collect();
                args.push("--foreground".to_string());
                let pid = core::spawn_detached(&args)?;
                println!("server started in background (pid {})", pid);
                return Ok(());
            }

            init_file_logging(&options.runtime_dir, cli.debug)?;
            info!("config loaded from {:?}", Config::config_path());
            info!(
                "mpd at {}:{}, runtime dir {}",
                options.host,
                options.port,
                options.runtime_dir.display()
            );
            core::DaemonCore::new(options).run().await
        }
        Mode::Client { width } => {
            init_stderr_logging(cli.debug);
            let visible = width.or(config.scroll.default_width);
            let socket_path = platform::socket_path(&config.daemon.runtime_dir());
            let text = client::fetch_window(
                &socket_path,
                visible,
                config.scroll.max_width,
                config.daemon.client_timeout(),
            )
            .await?;
            print!("{}", text);
            Ok(())
        }
        Mode::Quit => {
            init_stderr_logging(cli.debug);
            let pid_file = platform::pid_file_path(&config.daemon.runtime_dir());
            let pid = core::request_shutdown(&pid_file)?;
            println!("asked server (pid {}) to shut down", pid);
            Ok(())
        }
    }
}

fn default_filter(debug: bool, quiet: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(quiet)
        }
    })
}

fn init_file_logging(runtime_dir: &std::path::Path, debug: bool) -> anyhow::Result<()> {
    platform::ensure_runtime_dir(runtime_dir)?;
    let log_path = platform::log_file_path(runtime_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(default_filter(debug, "info"))
        .init();
    info!("log file: {:?}", log_path);
    Ok(())
}

fn init_stderr_logging(debug: bool) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(default_filter(debug, "warn"))
        .init();
}
