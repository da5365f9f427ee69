//! Basic/Extended mode negotiation.
//!
//! The server never consumes bytes it does not recognize: a basic client may
//! start typing before the sniff window closes, and whatever it sent must
//! still be in the socket when the shell reads its standard input.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use super::{Mode, ACK, MAGIC};
use crate::error::NetshellError;
use crate::Result;

/// Interval between peeks while a partial magic prefix is pending.
const PEEK_RETRY: Duration = Duration::from_millis(10);

/// A stream that can look at pending input without advancing.
pub trait PeekStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Copy pending bytes into `buf` without removing them from the stream.
    ///
    /// Waits until at least one byte is available; returns 0 at end of stream.
    fn peek<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    /// Discard exactly `n` bytes that were previously peeked.
    fn consume(&mut self, n: usize) -> impl Future<Output = io::Result<()>> + Send + '_ {
        async move {
            let mut discard = vec![0u8; n];
            self.read_exact(&mut discard).await.map(|_| ())
        }
    }
}

impl PeekStream for TcpStream {
    fn peek<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        TcpStream::peek(self, buf)
    }
}

/// Server side: decide the mode of a freshly accepted connection.
///
/// Waits at most `window` for the client to send [`MAGIC`]. On an exact match
/// the magic is consumed and [`ACK`] is written back. Anything else leaves the
/// stream untouched and yields [`Mode::Basic`].
pub async fn sniff_server<S: PeekStream>(stream: &mut S, window: Duration) -> Result<Mode> {
    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; MAGIC.len()];

    loop {
        let n = match timeout_at(deadline, stream.peek(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                trace!("no handshake within {:?}", window);
                return Ok(Mode::Basic);
            }
        };

        if n == 0 {
            debug!("peer closed during handshake window");
            return Ok(Mode::Basic);
        }
        if buf[..n] != MAGIC[..n] {
            return Ok(Mode::Basic);
        }
        if n == MAGIC.len() {
            stream.consume(n).await?;
            stream.write_all(ACK).await?;
            stream.flush().await?;
            return Ok(Mode::Extended);
        }

        // Partial prefix: more bytes may still be on the way.
        let next = Instant::now() + PEEK_RETRY;
        if next >= deadline {
            return Ok(Mode::Basic);
        }
        tokio::time::sleep_until(next).await;
    }
}

/// Outcome of the client-side handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Mode the connection is now in.
    pub mode: Mode,
    /// Bytes received during the handshake that were not the acknowledgment,
    /// typically a basic server's first shell output.
    pub leftover: Vec<u8>,
}

/// Client side: request the extended protocol.
///
/// Sends [`MAGIC`] and performs a single read. `limit` bounds that read; with
/// `None` it blocks until the server answers or closes.
pub async fn negotiate_client<S>(stream: &mut S, limit: Option<Duration>) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(MAGIC).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; 4096];
    let n = match limit {
        Some(limit) => match tokio::time::timeout(limit, stream.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(Negotiated {
                    mode: Mode::Basic,
                    leftover: Vec::new(),
                })
            }
        },
        None => stream.read(&mut buf).await?,
    };
    buf.truncate(n);

    if buf.starts_with(ACK) {
        debug!("extended protocol activated");
        Ok(Negotiated {
            mode: Mode::Extended,
            leftover: buf.split_off(ACK.len()),
        })
    } else {
        debug!("server answered without ack, using basic mode");
        Ok(Negotiated {
            mode: Mode::Basic,
            leftover: buf,
        })
    }
}

/// Read a single `\n`-terminated line, returning it without the terminator.
///
/// Fails with [`NetshellError::ConnectionClosed`] if the stream ends first.
pub(crate) async fn read_reply_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 || line.last() != Some(&b'\n') {
        return Err(NetshellError::ConnectionClosed);
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line)
}
