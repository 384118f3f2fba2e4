use crate::status::StatusFlag;
use scroller_proto::protocol::{read_width, write_window};
use scroller_proto::store::TitleStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
    #[error("failed to receive request: {0}")]
    Receive(#[source] std::io::Error),
    #[error("failed to send window: {0}")]
    Send(#[source] std::io::Error),
}

/// Bind the Unix socket at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> Result<UnixListener, ServeError> {
    let bind_err = |source| ServeError::Bind {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale socket {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(bind_err)?;
    }

    info!("socket server listening at {}", path.display());
    Ok(listener)
}

/// Serve one connection at a time until the status leaves `Running` or a
/// transport error occurs.
pub async fn serve(
    listener: UnixListener,
    store: Arc<TitleStore>,
    status: Arc<StatusFlag>,
    client_timeout: Duration,
) -> Result<(), ServeError> {
    while status.is_running() {
        let (mut stream, _) = listener.accept().await.map_err(ServeError::Accept)?;
        handle_client(&mut stream, &store, client_timeout).await?;
    }
    debug!("socket server: loop finished");
    Ok(())
}

async fn handle_client(
    stream: &mut UnixStream,
    store: &TitleStore,
    client_timeout: Duration,
) -> Result<(), ServeError> {
    let width = match tokio::time::timeout(client_timeout, read_width(stream)).await {
        Ok(Ok(width)) => width,
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            warn!("client closed before sending a width");
            return Ok(());
        }
        Ok(Err(e)) => return Err(ServeError::Receive(e)),
        Err(_) => {
            warn!("client sent no width within {:?}", client_timeout);
            return Ok(());
        }
    };

    let window = match store.render_next(width as usize).await {
        Ok(window) => window,
        Err(e) => {
            warn!("rejecting request: {}", e);
            return Ok(());
        }
    };

    match write_window(stream, &window).await {
        Ok(()) => {}
        Err(e) if is_peer_gone(&e) => {
            warn!("client left before the reply: {}", e);
            return Ok(());
        }
        Err(e) => return Err(ServeError::Send(e)),
    }
    let _ = stream.shutdown().await;
    Ok(())
}

/// A peer that hung up is a dropped client, not a broken server.
fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroller_proto::protocol::{encode_width, request_window};
    use scroller_proto::window::DEFAULT_DELIMITER;
    use tokio::io::AsyncReadExt;

    struct Harness {
        _dir: tempfile::TempDir,
        path: PathBuf,
        store: Arc<TitleStore>,
        status: Arc<StatusFlag>,
        task: tokio::task::JoinHandle<Result<(), ServeError>>,
    }

    async fn start(title: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let store = Arc::new(TitleStore::new(DEFAULT_DELIMITER, 32));
        store.replace(title).await.unwrap();
        let status = Arc::new(StatusFlag::new());
        status.start();

        let listener = bind(&path).unwrap();
        let task = tokio::spawn(serve(
            listener,
            store.clone(),
            status.clone(),
            Duration::from_millis(200),
        ));
        Harness {
            _dir: dir,
            path,
            store,
            status,
            task,
        }
    }

    async fn ask(path: &Path, width: u32) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        request_window(&mut stream, width).await.unwrap().text()
    }

    #[tokio::test]
    async fn test_successive_requests_scroll() {
        let h = start("song.mp3").await;
        let mut frames = Vec::new();
        for _ in 0..13 {
            frames.push(ask(&h.path, 5).await);
        }
        assert_eq!(
            frames,
            vec![
                "song", "ong.", "ng.m", "g.mp", ".mp3", "mp3 ", "p3 |", "3 | ", " | s", "| so",
                " son", "song", "song",
            ]
        );
        assert!(!h.task.is_finished());
    }

    #[tokio::test]
    async fn test_reply_is_exactly_width_slots() {
        let h = start("STOP").await;
        let mut stream = UnixStream::connect(&h.path).await.unwrap();
        stream.write_all(&encode_width(10)).await.unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data.len(), 40);
        assert_eq!(&data[..4], &[0, 0, 0, b'S']);
        assert!(data[16..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_width_change_restarts_scroll() {
        let h = start("abcdefghij").await;
        assert_eq!(ask(&h.path, 4).await, "abc");
        assert_eq!(ask(&h.path, 4).await, "bcd");
        assert_eq!(ask(&h.path, 6).await, "abcde");
        assert_eq!(ask(&h.path, 6).await, "bcdef");
    }

    #[tokio::test]
    async fn test_oversized_width_is_dropped_without_reply() {
        let h = start("abcdefghij").await;
        assert_eq!(ask(&h.path, 4).await, "abc");
        let before = h.store.snapshot().await;

        let mut stream = UnixStream::connect(&h.path).await.unwrap();
        stream.write_all(&encode_width(1000)).await.unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert!(data.is_empty());

        assert_eq!(h.store.snapshot().await, before);
        assert_eq!(ask(&h.path, 4).await, "bcd");
        assert!(!h.task.is_finished());
    }

    #[tokio::test]
    async fn test_silent_and_short_clients_are_skipped() {
        let h = start("abcdefghij").await;

        // connects and says nothing until the timeout
        let silent = UnixStream::connect(&h.path).await.unwrap();
        // sends half a width then hangs up
        let mut short = UnixStream::connect(&h.path).await.unwrap();
        short.write_all(&[0, 0]).await.unwrap();
        drop(short);

        assert_eq!(ask(&h.path, 4).await, "abc");
        drop(silent);
        assert!(!h.task.is_finished());
        assert!(h.status.is_running());
    }

    #[tokio::test]
    async fn test_loop_ends_after_shutdown() {
        let h = start("abcdefghij").await;
        // one full exchange so the loop is parked in accept
        assert_eq!(ask(&h.path, 4).await, "abc");
        h.status.request_shutdown();
        // one more connection wakes the accept
        let _ = UnixStream::connect(&h.path).await;
        let result = tokio::time::timeout(Duration::from_secs(2), h.task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_hanging_up_after_width_is_skipped() {
        let h = start("abcdefghij").await;
        for _ in 0..5 {
            let mut gone = UnixStream::connect(&h.path).await.unwrap();
            gone.write_all(&encode_width(32)).await.unwrap();
            drop(gone);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = UnixStream::connect(&h.path).await.unwrap();
        assert_eq!(request_window(&mut stream, 4).await.unwrap().text(), "abc");
        assert!(!h.task.is_finished());
        assert!(h.status.is_running());
    }

    #[test]
    fn test_peer_gone_errors() {
        assert!(is_peer_gone(&std::io::Error::from(ErrorKind::BrokenPipe)));
        assert!(is_peer_gone(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_peer_gone(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let _listener = bind(&path).unwrap();
        });
        assert!(path.exists());
    }
}
