//! Extended command processor.
//!
//! Serves `SEND_FILE` and `GET_FILE` requests one at a time over a connection
//! that completed the extended handshake. A request is always answered before
//! the next line is read.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{CommandError, ExtendedCommand, Reply};
use crate::Result;

/// Longest command line accepted. A longer line is skipped up to its newline
/// and answered with a single `UNKNOWN_COMMAND`.
const MAX_COMMAND_LINE: u64 = 4096;

/// Suffix of the sibling file an upload is staged in before it is renamed
/// over the destination.
const STAGING_SUFFIX: &str = ".netshell-part";

/// One extended-mode connection.
pub struct ExtendedSession<S> {
    stream: BufReader<S>,
    max_transfer_size: u64,
}

impl<S> ExtendedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session over a stream whose handshake is already done.
    pub fn new(stream: S, max_transfer_size: u64) -> Self {
        Self {
            stream: BufReader::new(stream),
            max_transfer_size,
        }
    }

    /// Process commands until the peer closes the connection.
    pub async fn run(mut self) -> Result<()> {
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = (&mut self.stream)
                .take(MAX_COMMAND_LINE)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                debug!("peer closed extended session");
                return Ok(());
            }

            if n as u64 == MAX_COMMAND_LINE && line.last() != Some(&b'\n') {
                let skipped = self.skip_rest_of_line().await?;
                warn!(
                    "command line too long ({} bytes), ignoring it",
                    n + skipped
                );
                self.reply(Reply::UnknownCommand).await?;
                continue;
            }

            let command = ExtendedCommand::parse(&line);
            if let Ok(cmd) = &command {
                debug!("{} {}", cmd.verb(), cmd.path().display());
            }
            match command {
                Ok(ExtendedCommand::SendFile { path, size }) => {
                    self.receive_file(&path, size).await?;
                }
                Ok(ExtendedCommand::GetFile { path }) => {
                    self.serve_file(&path).await?;
                }
                Err(err) => {
                    if err == CommandError::Unknown {
                        debug!(
                            "unknown command: {:?}",
                            String::from_utf8_lossy(&line).trim_end()
                        );
                    } else {
                        warn!("malformed command: {:?}", err);
                    }
                    self.reply(err.reply()).await?;
                }
            }
        }
    }

    /// Drop buffered input up to and including the next newline (or EOF).
    /// Returns the number of bytes dropped.
    async fn skip_rest_of_line(&mut self) -> Result<usize> {
        let mut skipped = 0;
        loop {
            let (used, done) = {
                let buf = self.stream.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(skipped);
                }
                match buf.iter().position(|b| *b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (buf.len(), false),
                }
            };
            self.stream.consume(used);
            skipped += used;
            if done {
                return Ok(skipped);
            }
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<()> {
        let inner = self.stream.get_mut();
        inner.write_all(&reply.to_line()).await?;
        inner.flush().await?;
        Ok(())
    }

    /// `SEND_FILE`: stage the upload next to `path` and rename it into place
    /// only after every declared byte has arrived and been written.
    async fn receive_file(&mut self, path: &Path, size: u64) -> Result<()> {
        if size > self.max_transfer_size {
            warn!(
                "upload of {} bytes to {} exceeds limit of {}",
                size,
                path.display(),
                self.max_transfer_size
            );
            return self.reply(Reply::Error).await;
        }

        let Some(staging) = staging_path(path) else {
            warn!("upload target {} has no file name", path.display());
            return self.reply(Reply::Deny).await;
        };

        if fs::symlink_metadata(path).await.is_ok() {
            if let Err(e) = OpenOptions::new().write(true).open(path).await {
                warn!("cannot write {}: {}", path.display(), e);
                return self.reply(Reply::Deny).await;
            }
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!("cannot open {} for writing: {}", staging.display(), e);
                return self.reply(Reply::Deny).await;
            }
        };

        let mut buffer = Vec::new();
        let allocated = usize::try_from(size)
            .ok()
            .filter(|len| buffer.try_reserve_exact(*len).is_ok());
        let Some(len) = allocated else {
            warn!("cannot allocate {} bytes for upload", size);
            drop(file);
            discard(&staging).await;
            return self.reply(Reply::Error).await;
        };
        buffer.resize(len, 0);

        self.reply(Reply::Ready).await?;

        if let Err(e) = self.stream.read_exact(&mut buffer).await {
            drop(file);
            discard(&staging).await;
            if e.kind() == ErrorKind::UnexpectedEof {
                warn!("upload to {} ended before {} bytes", path.display(), size);
                // The peer is gone; the reply is best effort.
                let _ = self.reply(Reply::Error).await;
                return Ok(());
            }
            return Err(e.into());
        }

        let stored = async {
            file.write_all(&buffer).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, path).await
        }
        .await;

        match stored {
            Ok(()) => {
                info!("received {} ({} bytes)", path.display(), size);
                self.reply(Reply::Ok).await
            }
            Err(e) => {
                warn!("failed to store {}: {}", path.display(), e);
                discard(&staging).await;
                self.reply(Reply::Error).await
            }
        }
    }

    /// `GET_FILE`: answer `SIZE <n>` followed by exactly `n` bytes.
    async fn serve_file(&mut self, path: &Path) -> Result<()> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("requested file {} not found", path.display());
                return self.reply(Reply::NotFound).await;
            }
            Err(e) => {
                warn!("cannot stat {}: {}", path.display(), e);
                return self.reply(Reply::Error).await;
            }
        };

        if metadata.is_dir() || metadata.len() > self.max_transfer_size {
            warn!("refusing to serve {}", path.display());
            return self.reply(Reply::Error).await;
        }

        let contents = match fs::read(path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                return self.reply(Reply::Error).await;
            }
        };

        self.reply(Reply::Size(contents.len() as u64)).await?;
        let inner = self.stream.get_mut();
        inner.write_all(&contents).await?;
        inner.flush().await?;
        info!("sent {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }
}

/// `dir/name` -> `dir/.name.netshell-part`
fn staging_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(STAGING_SUFFIX);
    Some(path.with_file_name(staged))
}

async fn discard(staging: &Path) {
    if let Err(e) = fs::remove_file(staging).await {
        debug!("could not remove {}: {}", staging.display(), e);
    }
}
