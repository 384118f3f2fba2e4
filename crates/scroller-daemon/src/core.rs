//! Server lifecycle: startup ordering, signal handling and teardown.
//!
//! ```text
//!   DaemonCore::run
//!     ├── pid file
//!     ├── watcher task  ──► TitleStore ◄── socket task
//!     ├── signal task   (SIGUSR1 / SIGTERM / SIGINT → ShuttingDown)
//!     └── wait for a terminal status, abort tasks, remove socket + pid file
//! ```

use crate::mpd::{MpdClient, MpdError};
use crate::socket;
use crate::status::{Status, StatusFlag};
use crate::watcher::Watcher;
use anyhow::Context;
use scroller_proto::config::Config;
use scroller_proto::platform;
use scroller_proto::store::TitleStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub player_timeout: Duration,
    pub runtime_dir: PathBuf,
    pub delimiter: String,
    pub max_width: usize,
    pub client_timeout: Duration,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (host, port) = config.player.endpoint()?;
        Ok(Self {
            host,
            port,
            player_timeout: config.player.timeout(),
            runtime_dir: config.daemon.runtime_dir(),
            delimiter: config.scroll.delimiter.clone(),
            max_width: config.scroll.max_width,
            client_timeout: config.daemon.client_timeout(),
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        platform::socket_path(&self.runtime_dir)
    }

    pub fn pid_file(&self) -> PathBuf {
        platform::pid_file_path(&self.runtime_dir)
    }
}

pub struct DaemonCore {
    options: ServerOptions,
    store: Arc<TitleStore>,
    status: Arc<StatusFlag>,
}

impl DaemonCore {
    pub fn new(options: ServerOptions) -> Self {
        let store = Arc::new(TitleStore::new(&options.delimiter, options.max_width));
        Self {
            options,
            store,
            status: Arc::new(StatusFlag::new()),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> Arc<StatusFlag> {
        self.status.clone()
    }

    #[cfg(test)]
    pub fn store(&self) -> Arc<TitleStore> {
        self.store.clone()
    }

    /// Run until a shutdown signal (`Ok`) or a fatal error in either task
    /// (`Err`). Socket and PID file are removed in both cases.
    pub async fn run(self) -> anyhow::Result<()> {
        platform::ensure_runtime_dir(&self.options.runtime_dir).with_context(|| {
            format!(
                "Failed to prepare runtime dir {}",
                self.options.runtime_dir.display()
            )
        })?;

        let pid_file = self.options.pid_file();
        write_pid_file(&pid_file)?;
        info!("server started, pid {}", std::process::id());

        let outcome = self.supervise().await;

        self.teardown(&pid_file).await;
        outcome
    }

    async fn supervise(&self) -> anyhow::Result<()> {
        self.status.start();

        let signals = install_signal_handlers(self.status.clone())?;

        // Watcher first so the title is being fetched while the socket binds.
        let watcher = self.spawn_watcher();

        let listener = match socket::bind(&self.options.socket_path()) {
            Ok(l) => l,
            Err(e) => {
                self.status.fault(Status::ServerFault);
                watcher.abort();
                signals.abort();
                return Err(e.into());
            }
        };
        let server = self.spawn_server(listener);

        let final_status = self.status.stopped().await;

        // Neither loop can be interrupted mid-wait any other way.
        watcher.abort();
        server.abort();
        signals.abort();
        let _ = watcher.await;
        let _ = server.await;

        match final_status {
            Status::ShuttingDown => {
                warn!("server shutdown");
                Ok(())
            }
            Status::WatcherFault => anyhow::bail!("player watcher failed"),
            Status::ServerFault => anyhow::bail!("socket server failed"),
            other => anyhow::bail!("unexpected final status {:?}", other),
        }
    }

    fn spawn_watcher(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let status = self.status.clone();
        let host = self.options.host.clone();
        let port = self.options.port;
        let timeout = self.options.player_timeout;

        tokio::spawn(async move {
            info!("watcher: connecting to mpd at {}:{}", host, port);
            let connect = async {
                let client = MpdClient::connect(&host, port, timeout).await?;
                info!("watcher: connected, mpd protocol {}", client.version());
                Ok::<_, MpdError>(client)
            };
            match Watcher::run(connect, store, status.clone()).await {
                Ok(()) => info!("watcher: finished"),
                Err(e) => {
                    error!("watcher: {}", e);
                    status.fault(Status::WatcherFault);
                }
            }
        })
    }

    fn spawn_server(&self, listener: tokio::net::UnixListener) -> JoinHandle<()> {
        let store = self.store.clone();
        let status = self.status.clone();
        let client_timeout = self.options.client_timeout;

        tokio::spawn(async move {
            match socket::serve(listener, store, status.clone(), client_timeout).await {
                Ok(()) => info!("socket server: finished"),
                Err(e) => {
                    error!("socket server: {}", e);
                    status.fault(Status::ServerFault);
                }
            }
        })
    }

    async fn teardown(&self, pid_file: &Path) {
        info!("cleaning up");
        let socket_path = self.options.socket_path();
        if let Err(e) = tokio::fs::remove_file(&socket_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {}", socket_path.display(), e);
            }
        }
        if let Err(e) = tokio::fs::remove_file(pid_file).await {
            warn!("failed to remove {}: {}", pid_file.display(), e);
        }
    }
}

/// Signal listener task. It only flips the status flag.
#[cfg(unix)]
fn install_signal_handlers(status: Arc<StatusFlag>) -> anyhow::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = usr1.recv() => "SIGUSR1",
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        };
        warn!("received {}, shutting down", name);
        status.request_shutdown();
    }))
}

#[cfg(not(unix))]
fn install_signal_handlers(status: Arc<StatusFlag>) -> anyhow::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("received Ctrl-C, shutting down");
        status.request_shutdown();
    }))
}

// ── pid file ──────────────────────────────────────────────────────────────────

pub fn read_pid(pid_file: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Write our PID, refusing when the file names another live process.
fn write_pid_file(pid_file: &Path) -> anyhow::Result<()> {
    if let Some(pid) = read_pid(pid_file) {
        if pid != std::process::id() && process_alive(pid) {
            anyhow::bail!(
                "server already running (pid {}, pid file {})",
                pid,
                pid_file.display()
            );
        }
        warn!("replacing stale pid file {} (pid {})", pid_file.display(), pid);
    }
    std::fs::write(pid_file, std::process::id().to_string())
        .with_context(|| format!("Failed to write pid file {}", pid_file.display()))
}

// ── detaching ─────────────────────────────────────────────────────────────────

/// Re-run this executable in the background with `args`, in a new session
/// with stdio on `/dev/null`. Returns the child's PID.
#[cfg(unix)]
pub fn spawn_detached(args: &[String]) -> anyhow::Result<u32> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));

    let mut command = Command::new(exe);
    command
        .args(args)
        .current_dir(home)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command.spawn().context("Failed to start background server")?;
    Ok(child.id())
}

#[cfg(not(unix))]
pub fn spawn_detached(_args: &[String]) -> anyhow::Result<u32> {
    anyhow::bail!("running in the background is only supported on unix; use --foreground")
}

/// Ask the running server to shut down (`SIGUSR1`). Returns its PID.
#[cfg(unix)]
pub fn request_shutdown(pid_file: &Path) -> anyhow::Result<u32> {
    let pid = read_pid(pid_file)
        .with_context(|| format!("No valid pid file at {}", pid_file.display()))?;
    let raw = libc::pid_t::try_from(pid).context("Invalid pid in pid file")?;
    if unsafe { libc::kill(raw, libc::SIGUSR1) } == -1 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to signal server process {}", pid));
    }
    Ok(pid)
}

#[cfg(not(unix))]
pub fn request_shutdown(_pid_file: &Path) -> anyhow::Result<u32> {
    anyhow::bail!("shutdown requests are only supported on unix")
}
