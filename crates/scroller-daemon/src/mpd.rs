//! Minimal MPD text-protocol client.
//!
//! Only what the watcher needs:
//!
//! ```text
//!   connect ──► "OK MPD 0.23.5"            greeting
//!   [password <pw>]                        when MPD_HOST is "pw@host"
//!   command_list_ok_begin
//!     status                               → state: play|pause|stop
//!     currentsong                          → file: music/song.mp3
//!   command_list_end
//!   idle player  ──► blocks ──► "changed: player" / "OK"
//! ```
//!
//! `host` may also be an absolute path to MPD's Unix socket.

use crate::watcher::{NowPlaying, PlayState, Player};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::net::TcpStream;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum MpdError {
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected greeting {0:?}")]
    Greeting(String),
    #[error("server replied: {0}")]
    Ack(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by server")]
    Closed,
    #[error("malformed response line {0:?}")]
    Malformed(String),
}

/// One `key: value` pair of a response.
pub type Pair = (String, String);

pub struct MpdClient {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    timeout: Duration,
    version: String,
}

impl std::fmt::Debug for MpdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdClient")
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MpdClient {
    // ── connect ───────────────────────────────────────────────────────────────

    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, MpdError> {
        let (password, host) = split_password(host);

        let (reader, writer): (BoxedReader, BoxedWriter) = if host.starts_with('/') {
            open_unix(host, timeout).await?
        } else {
            let addr = format!("{}:{}", host, port);
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| MpdError::ConnectTimeout {
                    addr: addr.clone(),
                    timeout,
                })??;
            let (r, w) = stream.into_split();
            (Box::new(r), Box::new(w))
        };

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            timeout,
            version: String::new(),
        };

        let greeting = client.read_line_timed().await?;
        client.version = greeting
            .strip_prefix("OK MPD ")
            .ok_or_else(|| MpdError::Greeting(greeting.clone()))?
            .to_string();
        debug!("mpd: connected, protocol {}", client.version);

        if let Some(password) = password {
            client.command(&format!("password {}", quote(password))).await?;
        }
        Ok(client)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    // ── requests ──────────────────────────────────────────────────────────────

    /// Run one command and collect its `key: value` pairs.
    pub async fn command(&mut self, command: &str) -> Result<Vec<Pair>, MpdError> {
        self.send(command).await?;
        tokio::time::timeout(self.timeout, self.read_response())
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))?
    }

    /// `status` and `currentsong` in one round trip.
    pub async fn now_playing(&mut self) -> Result<NowPlaying, MpdError> {
        self.send("command_list_ok_begin\nstatus\ncurrentsong\ncommand_list_end")
            .await?;
        let pairs = tokio::time::timeout(self.timeout, self.read_response())
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))??;
        Ok(parse_now_playing(&pairs))
    }

    /// Block until the player subsystem changes. No timeout: MPD only answers
    /// once something happens.
    pub async fn idle_player(&mut self) -> Result<(), MpdError> {
        self.send("idle player").await?;
        let pairs = self.read_response().await?;
        for (key, value) in &pairs {
            debug!("mpd: idle {}={}", key, value);
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<(), MpdError> {
        debug!("mpd: send {:?}", command);
        let mut raw = command.to_string();
        raw.push('\n');
        self.writer.write_all(raw.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    // ── response parsing ──────────────────────────────────────────────────────

    async fn read_line_timed(&mut self) -> Result<String, MpdError> {
        tokio::time::timeout(self.timeout, self.read_line())
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))?
    }

    async fn read_line(&mut self) -> Result<String, MpdError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(MpdError::Closed);
        }
        // File names are not guaranteed to be UTF-8.
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read until `OK`. `list_OK` separators are skipped; `ACK` ends the
    /// response with an error.
    async fn read_response(&mut self) -> Result<Vec<Pair>, MpdError> {
        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(pairs);
            }
            if line == "list_OK" {
                continue;
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Err(MpdError::Ack(ack.to_string()));
            }
            match line.split_once(": ") {
                Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
                None => return Err(MpdError::Malformed(line)),
            }
        }
    }
}

impl Player for MpdClient {
    async fn current(&mut self) -> Result<NowPlaying, MpdError> {
        self.now_playing().await
    }

    async fn wait_for_playback_event(&mut self) -> Result<(), MpdError> {
        self.idle_player().await
    }
}

#[cfg(unix)]
async fn open_unix(path: &str, timeout: Duration) -> Result<(BoxedReader, BoxedWriter), MpdError> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
        .await
        .map_err(|_| MpdError::ConnectTimeout {
            addr: path.to_string(),
            timeout,
        })??;
    let (r, w) = stream.into_split();
    Ok((Box::new(r), Box::new(w)))
}

#[cfg(not(unix))]
async fn open_unix(path: &str, _timeout: Duration) -> Result<(BoxedReader, BoxedWriter), MpdError> {
    Err(MpdError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("unix sockets are not available: {}", path),
    )))
}

/// `MPD_HOST` may carry a password as `password@host`.
fn split_password(host: &str) -> (Option<&str>, &str) {
    match host.split_once('@') {
        Some((password, rest)) if !password.is_empty() && !rest.is_empty() => {
            (Some(password), rest)
        }
        _ => (None, host),
    }
}

fn quote(arg: &str) -> String {
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

fn parse_now_playing(pairs: &[Pair]) -> NowPlaying {
    let mut state = PlayState::Unknown;
    let mut file = None;
    for (key, value) in pairs {
        match key.as_str() {
            "state" => {
                state = match value.as_str() {
                    "play" => PlayState::Playing,
                    "pause" => PlayState::Paused,
                    "stop" => PlayState::Stopped,
                    _ => PlayState::Unknown,
                }
            }
            "file" => file = Some(value.clone()),
            _ => {}
        }
    }
    NowPlaying { state, file }
}
