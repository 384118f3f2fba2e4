use std::path::{Path, PathBuf};

pub const PROGRAM_NAME: &str = "mpd-scroller";

pub const MPD_HOST_ENV: &str = "MPD_HOST";
pub const MPD_PORT_ENV: &str = "MPD_PORT";
pub const MPD_DEFAULT_HOST: &str = "localhost";
pub const MPD_DEFAULT_PORT: u16 = 6600;

const SOCKET_FILE_NAME: &str = "mpd-scroller.sock";
const PID_FILE_NAME: &str = "mpd-scroller.pid";
const LOG_FILE_NAME: &str = "mpd-scroller.log";

/// Per-user directory holding the socket, the PID file and the server log.
///
/// `$XDG_RUNTIME_DIR/mpd-scroller` when the session provides a runtime dir,
/// otherwise `/tmp/mpd-scroller-<user>`.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(PROGRAM_NAME),
        _ => temp_dir().join(format!("{}-{}", PROGRAM_NAME, user_name())),
    }
}

pub fn socket_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(SOCKET_FILE_NAME)
}

pub fn pid_file_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(PID_FILE_NAME)
}

pub fn log_file_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(LOG_FILE_NAME)
}

/// Create the runtime directory (mode 0750) if it does not exist yet.
pub fn ensure_runtime_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            anyhow::bail!("{} exists and is not a directory", dir.display());
        }
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750))?;
    }
    Ok(())
}

pub fn config_dir() -> PathBuf {
    // Always ~/.config/mpd-scroller, also on macOS
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(PROGRAM_NAME)
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn user_name() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `MPD_HOST` when set and non-empty.
pub fn mpd_env_host() -> Option<String> {
    std::env::var(MPD_HOST_ENV).ok().filter(|h| !h.is_empty())
}

/// `MPD_PORT` when set.
///
/// A set but unparsable `MPD_PORT` is an error rather than a silent default.
pub fn mpd_env_port() -> anyhow::Result<Option<u16>> {
    match std::env::var(MPD_PORT_ENV) {
        Ok(raw) => parse_port(&raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_port(raw: &str) -> anyhow::Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid {} value: {:?}", MPD_PORT_ENV, raw))
}
