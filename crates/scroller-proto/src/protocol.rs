//! Wire format of the local socket.
//!
//! One exchange per connection:
//!
//! ```text
//!   client → server   u32 BE    requested width W (slots, terminator included)
//!   server → client   W × u32 BE  Unicode scalar values, NUL padded
//! ```
//!
//! The server closes the connection after the reply. A rejected request gets
//! no reply at all.

use crate::window::Window;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const WIDTH_FIELD_LEN: usize = 4;
pub const CHAR_FIELD_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("reply is {0} bytes, not a whole number of characters")]
    Truncated(usize),
    #[error("reply has {got} characters, expected {expected}")]
    WidthMismatch { expected: usize, got: usize },
    #[error("invalid character code {0:#x} in reply")]
    InvalidChar(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn encode_width(width: u32) -> [u8; WIDTH_FIELD_LEN] {
    width.to_be_bytes()
}

pub fn decode_width(bytes: [u8; WIDTH_FIELD_LEN]) -> u32 {
    u32::from_be_bytes(bytes)
}

pub fn encode_window(window: &Window) -> Vec<u8> {
    let mut out = Vec::with_capacity(window.width() * CHAR_FIELD_LEN);
    for &c in window.chars() {
        out.extend_from_slice(&u32::from(c).to_be_bytes());
    }
    out
}

pub fn decode_window(data: &[u8]) -> Result<Window, ProtocolError> {
    if data.len() % CHAR_FIELD_LEN != 0 {
        return Err(ProtocolError::Truncated(data.len()));
    }
    let chars = data
        .chunks_exact(CHAR_FIELD_LEN)
        .map(|b| {
            let code = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
            char::from_u32(code).ok_or(ProtocolError::InvalidChar(code))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Window::from_chars(chars))
}

/// Server side: read the width field.
pub async fn read_width<R>(reader: &mut R) -> std::io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; WIDTH_FIELD_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(decode_width(buf))
}

/// Server side: write a rendered window.
pub async fn write_window<W>(writer: &mut W, window: &Window) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_window(window)).await?;
    writer.flush().await
}

/// Client side: send `width` and read back exactly `width` characters.
pub async fn request_window<S>(stream: &mut S, width: u32) -> Result<Window, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&encode_width(width)).await?;
    stream.flush().await?;

    let mut data = Vec::new();
    stream.read_to_end(&mut data).await?;
    let window = decode_window(&data)?;
    if window.width() != width as usize {
        return Err(ProtocolError::WidthMismatch {
            expected: width as usize,
            got: window.width(),
        });
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_is_big_endian() {
        assert_eq!(encode_width(25), [0, 0, 0, 25]);
        assert_eq!(decode_width([0, 0, 1, 0]), 256);
    }

    #[test]
    fn test_window_bytes_layout() {
        let window = Window::from_chars(vec!['a', 'é', '\0']);
        let bytes = encode_window(&window);
        assert_eq!(bytes, vec![0, 0, 0, 0x61, 0, 0, 0, 0xe9, 0, 0, 0, 0]);
        let decoded = decode_window(&bytes).unwrap();
        assert_eq!(decoded.text(), "aé");
        assert_eq!(decoded.width(), 3);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            decode_window(&[0, 0, 0]),
            Err(ProtocolError::Truncated(3))
        ));
        assert!(matches!(
            decode_window(&[0, 0, 0xd8, 0]),
            Err(ProtocolError::InvalidChar(0xd800))
        ));
    }

    #[tokio::test]
    async fn test_request_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let serve = tokio::spawn(async move {
            let width = read_width(&mut server).await.unwrap();
            assert_eq!(width, 4);
            let window = Window::from_chars(vec!['x', 'y', 'z', '\0']);
            write_window(&mut server, &window).await.unwrap();
        });
        let window = request_window(&mut client, 4).await.unwrap();
        serve.await.unwrap();
        assert_eq!(window.text(), "xyz");
    }

    #[tokio::test]
    async fn test_request_detects_short_reply() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = read_width(&mut server).await;
            let window = Window::from_chars(vec!['x', '\0']);
            let _ = write_window(&mut server, &window).await;
        });
        let err = request_window(&mut client, 4).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::WidthMismatch { expected: 4, got: 2 }
        ));
    }
}
