use anyhow::Context;
use scroller_proto::protocol::{request_window, ProtocolError};
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;

/// Ask the server for the next frame of `visible` characters.
///
/// One extra slot is requested for the terminator the server always sends.
pub async fn fetch_window(
    socket_path: &Path,
    visible: usize,
    max_width: usize,
    timeout: Duration,
) -> anyhow::Result<String> {
    let width = slots_for(visible, max_width)?;

    let mut stream = tokio::time::timeout(timeout, UnixStream::connect(socket_path))
        .await
        .context("Timed out connecting to server")?
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;

    let window = match tokio::time::timeout(timeout, request_window(&mut stream, width)).await {
        Ok(Ok(window)) => window,
        // nothing at all means the server dropped the request
        Ok(Err(ProtocolError::WidthMismatch { got: 0, .. })) => {
            anyhow::bail!("server rejected width {}", width)
        }
        Ok(Err(e)) => return Err(e).context("Bad reply from server"),
        Err(_) => anyhow::bail!("server did not reply within {:?}", timeout),
    };
    Ok(window.text())
}

fn slots_for(visible: usize, max_width: usize) -> anyhow::Result<u32> {
    if visible == 0 || visible >= max_width {
        anyhow::bail!(
            "width must be between 1 and {} characters",
            max_width.saturating_sub(1)
        );
    }
    u32::try_from(visible + 1).context("width does not fit the wire format")
}
