//! Client-side connection runtime.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::error::NetshellError;
use crate::protocol::negotiate::read_reply_line;
use crate::protocol::{negotiate_client, ExtendedCommand, Mode, Reply};
use crate::Result;

/// An open connection to a netshell server and its negotiated mode.
///
/// Every connection carries its own mode, so one process can hold several
/// connections in different modes.
pub struct Connection<S = TcpStream> {
    stream: BufReader<S>,
    mode: Mode,
    negotiated: bool,
}

impl Connection<TcpStream> {
    /// Resolve `host` and connect to the first address that accepts.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|_| NetshellError::UnknownHost(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(NetshellError::UnknownHost(host.to_string()));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("connected to {}", addr);
                    return Ok(Self::new(stream));
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .map(NetshellError::Io)
            .unwrap_or_else(|| NetshellError::UnknownHost(host.to_string())))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream. The connection starts in basic mode.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            mode: Mode::Basic,
            negotiated: false,
        }
    }

    /// Current protocol mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Request the extended protocol. Returns any bytes received during the
    /// handshake that were not the acknowledgment.
    ///
    /// Negotiation happens at most once per connection.
    pub async fn negotiate(&mut self, limit: Option<Duration>) -> Result<Vec<u8>> {
        if self.negotiated {
            return Err(NetshellError::Protocol("connection already negotiated".into()));
        }
        self.negotiated = true;
        let outcome = negotiate_client(&mut self.stream, limit).await?;
        self.mode = outcome.mode;
        Ok(outcome.leftover)
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        let inner = self.stream.get_mut();
        inner.write_all(line).await?;
        inner.write_all(b"\n").await?;
        inner.flush().await?;
        Ok(())
    }

    /// Send bytes as they are.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let inner = self.stream.get_mut();
        inner.write_all(bytes).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Read whatever is available. Returns 0 once the server has closed.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }

    /// Close the sending half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }

    fn require_extended(&self) -> Result<()> {
        if self.mode.is_extended() {
            Ok(())
        } else {
            Err(NetshellError::ExtendedRequired)
        }
    }

    async fn reply(&mut self) -> Result<(Option<Reply>, String)> {
        let line = read_reply_line(&mut self.stream).await?;
        Ok((Reply::parse(&line), String::from_utf8_lossy(&line).into_owned()))
    }

    /// Upload `local` to `remote`. Returns the number of bytes sent.
    pub async fn send_file(&mut self, local: &Path, remote: &Path) -> Result<u64> {
        self.require_extended()?;
        let contents = tokio::fs::read(local).await?;
        let command = ExtendedCommand::SendFile {
            path: remote.to_path_buf(),
            size: contents.len() as u64,
        };
        self.send_raw(&command.to_line()).await?;

        let (reply, text) = self.reply().await?;
        if reply != Some(Reply::Ready) {
            return Err(NetshellError::TransferRejected {
                command: ExtendedCommand::SEND_FILE,
                reply: text,
            });
        }

        self.send_raw(&contents).await?;

        match self.reply().await? {
            (Some(Reply::Ok), _) => {
                info!("sent {} to {}", local.display(), remote.display());
                Ok(contents.len() as u64)
            }
            (_, text) => Err(NetshellError::TransferRejected {
                command: ExtendedCommand::SEND_FILE,
                reply: text,
            }),
        }
    }

    /// Download `remote` into `local`. Returns the number of bytes received.
    ///
    /// `local` is only written once the full payload has arrived.
    pub async fn get_file(&mut self, remote: &Path, local: &Path) -> Result<u64> {
        self.require_extended()?;
        let command = ExtendedCommand::GetFile {
            path: remote.to_path_buf(),
        };
        self.send_raw(&command.to_line()).await?;

        let size = match self.reply().await? {
            (Some(Reply::Size(size)), _) => size,
            (Some(Reply::NotFound), _) => {
                return Err(NetshellError::RemoteNotFound(remote.display().to_string()))
            }
            (_, text) => {
                return Err(NetshellError::TransferRejected {
                    command: ExtendedCommand::GET_FILE,
                    reply: text,
                })
            }
        };

        let len = usize::try_from(size)
            .map_err(|_| NetshellError::Protocol(format!("file too large: {} bytes", size)))?;
        let mut contents = Vec::new();
        contents.try_reserve_exact(len).map_err(|_| {
            NetshellError::Protocol(format!("cannot buffer {} bytes", size))
        })?;
        contents.resize(len, 0);

        self.stream.read_exact(&mut contents).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                NetshellError::ConnectionClosed
            } else {
                NetshellError::Io(e)
            }
        })?;

        tokio::fs::write(local, &contents).await?;
        info!("received {} into {}", remote.display(), local.display());
        Ok(size)
    }

    /// Send `script` as shell input and copy the output to `out` until the
    /// server has been quiet for `idle` or closes the connection.
    pub async fn eval<W>(&mut self, script: &[u8], idle: Duration, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if script.ends_with(b"\n") {
            self.send_raw(script).await?;
        } else {
            self.send_line(script).await?;
        }

        let mut buf = vec![0u8; 4096];
        let mut total = 0u64;
        loop {
            let n = match tokio::time::timeout(idle, self.stream.read(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!("no output for {:?}, finishing", idle);
                    break;
                }
            };
            if n == 0 {
                debug!("server closed the connection");
                break;
            }
            out.write_all(&buf[..n]).await?;
            out.flush().await?;
            total += n as u64;
        }
        Ok(total)
    }
}
