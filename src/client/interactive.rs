//! Line-oriented interactive session with local command handling.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::terminal::{RawModeGuard, DETACH_KEY};
use super::Connection;
use crate::protocol::trim_line_end;
use crate::Result;

/// How often the loop wakes up to check the stop flag.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

const PROMPT: &[u8] = b"> ";

/// Why an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user typed `exit`.
    UserExit,
    /// The server closed the connection.
    PeerClosed,
    /// Local input reached end of file.
    InputClosed,
    /// The stop flag was raised.
    Stopped,
}

/// Whether the passthrough sub-mode should switch the controlling terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    /// Put standard input into raw mode for the duration of the passthrough.
    Stdin,
    /// Leave terminal settings alone (input is not a terminal).
    Unchanged,
}

/// Multiplexes local line input and server output over one connection.
pub struct Multiplexer<'a, S, I, O> {
    conn: &'a mut Connection<S>,
    input: I,
    output: O,
    terminal: TerminalMode,
    stop: Arc<AtomicBool>,
    tick: Duration,
}

impl<'a, S, I, O> Multiplexer<'a, S, I, O>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    pub fn new(conn: &'a mut Connection<S>, input: I, output: O) -> Self {
        Self {
            conn,
            input,
            output,
            terminal: TerminalMode::Unchanged,
            stop: Arc::new(AtomicBool::new(false)),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_terminal(mut self, terminal: TerminalMode) -> Self {
        self.terminal = terminal;
        self
    }

    /// Share a flag that ends the session once it becomes `true`.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until the user exits, either side closes, or the stop flag is set.
    pub async fn run(&mut self) -> Result<ExitReason> {
        self.print(b"Type 'help' for commands, 'exit' to quit\n").await?;
        if self.conn.mode().is_extended() {
            self.print(PROMPT).await?;
        }

        let mut line = Vec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("interrupted, leaving session");
                return Ok(ExitReason::Stopped);
            }

            tokio::select! {
                read = self.input.read_until(b'\n', &mut line) => {
                    if read? == 0 && line.is_empty() {
                        debug!("local input closed");
                        return Ok(ExitReason::InputClosed);
                    }
                    let current = std::mem::take(&mut line);
                    if let Some(reason) = self.handle_line(&current).await? {
                        return Ok(reason);
                    }
                }
                read = self.conn.read_chunk(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        self.print(b"\nConnection closed by peer\n").await?;
                        return Ok(ExitReason::PeerClosed);
                    }
                    self.print(&buf[..n]).await?;
                }
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
    }

    async fn print(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes).await?;
        self.output.flush().await?;
        Ok(())
    }

    async fn handle_line(&mut self, raw: &[u8]) -> Result<Option<ExitReason>> {
        let line = trim_line_end(raw);
        let trimmed = trim_start(line);
        let mut words = trimmed
            .split(|b| b.is_ascii_whitespace())
            .filter(|w| !w.is_empty());
        let Some(verb) = words.next() else {
            self.print(PROMPT).await?;
            return Ok(None);
        };
        let args: Vec<&[u8]> = words.take(3).collect();

        match verb {
            b"help" => {
                let mut help = String::from("Commands:\n");
                if self.conn.mode().is_extended() {
                    help.push_str("  send_file <local_path> <remote_path> - Send a file to server\n");
                    help.push_str("  get_file <remote_path> <local_path> - Download a file from server\n");
                }
                help.push_str("  ncurses <command> - Run command with full-screen support (Ctrl-] to detach)\n");
                help.push_str("  exit - Exit the client\n");
                help.push_str("Anything else is sent to the remote shell.\n");
                self.print(help.as_bytes()).await?;
            }
            b"exit" => {
                self.print(b"Disconnecting...\n").await?;
                if let Err(e) = self.conn.shutdown().await {
                    debug!("shutdown after exit failed: {}", e);
                }
                return Ok(Some(ExitReason::UserExit));
            }
            b"ncurses" => {
                let command = trim_start(&trimmed[verb.len()..]);
                if command.is_empty() {
                    self.print(b"Usage: ncurses <command>\n").await?;
                } else {
                    self.passthrough(command).await?;
                }
            }
            b"send_file" | b"get_file" if !self.conn.mode().is_extended() => {
                self.print(b"File transfer requires the extended protocol; reconnect without --basic\n")
                    .await?;
            }
            b"send_file" => {
                if args.len() != 2 {
                    self.print(b"Usage: send_file <local_path> <remote_path>\n").await?;
                } else {
                    let message = match self.conn.send_file(as_path(args[0]), as_path(args[1])).await {
                        Ok(n) => format!("File sent successfully ({} bytes)\n", n),
                        Err(e) => {
                            warn!("send_file failed: {}", e);
                            format!("Failed to send file: {}\n", e)
                        }
                    };
                    self.print(message.as_bytes()).await?;
                }
            }
            b"get_file" => {
                if args.len() != 2 {
                    self.print(b"Usage: get_file <remote_path> <local_path>\n").await?;
                } else {
                    let message = match self.conn.get_file(as_path(args[0]), as_path(args[1])).await {
                        Ok(n) => format!("File received successfully ({} bytes)\n", n),
                        Err(e) => {
                            warn!("get_file failed: {}", e);
                            format!("Failed to get file: {}\n", e)
                        }
                    };
                    self.print(message.as_bytes()).await?;
                }
            }
            _ => {
                self.conn.send_line(line).await?;
                // The remote shell prints its own prompt
                if !self.conn.mode().is_extended() {
                    return Ok(None);
                }
            }
        }

        self.print(PROMPT).await?;
        Ok(None)
    }

    /// Forward keystrokes one byte at a time until either side closes or the
    /// detach key is pressed.
    async fn passthrough(&mut self, command: &[u8]) -> Result<()> {
        self.conn.send_line(command).await?;

        let guard = match self.terminal {
            TerminalMode::Stdin => match RawModeGuard::stdin() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!("cannot switch terminal to raw mode: {}", e);
                    None
                }
            },
            TerminalMode::Unchanged => None,
        };

        let mut key = [0u8; 1];
        let mut buf = vec![0u8; 4096];
        let outcome: Result<()> = loop {
            tokio::select! {
                read = self.input.read(&mut key) => match read {
                    Ok(0) => break Ok(()),
                    Ok(_) if key[0] == DETACH_KEY => {
                        debug!("detached from passthrough");
                        break Ok(());
                    }
                    Ok(_) => {
                        if let Err(e) = self.conn.send_raw(&key).await {
                            break Err(e);
                        }
                    }
                    Err(e) => break Err(e.into()),
                },
                read = self.conn.read_chunk(&mut buf) => match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if let Err(e) = self.output.write_all(&buf[..n]).await {
                            break Err(e.into());
                        }
                        if let Err(e) = self.output.flush().await {
                            break Err(e.into());
                        }
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        drop(guard);
        if let Err(e) = &outcome {
            debug!("passthrough ended: {}", e);
        }
        self.print(b"\r\n").await?;
        // A broken connection is reported by the outer loop on its next read
        Ok(())
    }
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn as_path(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ACK, MAGIC};
    use crate::server::ExtendedSession;
    use tokio::io::{duplex, BufReader, DuplexStream};

    /// Run a basic-mode session fed with `input`. Local input stays open
    /// afterwards, so the session ends through `exit` or the peer closing.
    async fn run_basic(
        input: &[u8],
        server: impl FnOnce(DuplexStream) -> tokio::task::JoinHandle<()>,
    ) -> (ExitReason, String) {
        let (client, remote) = duplex(64 * 1024);
        let peer = server(remote);
        let (mut keyboard, local) = duplex(4096);
        keyboard.write_all(input).await.unwrap();

        let mut conn = Connection::new(client);
        let mut output = Vec::new();
        let reason = Multiplexer::new(&mut conn, BufReader::new(local), &mut output)
            .with_tick(Duration::from_millis(50))
            .run()
            .await
            .unwrap();
        peer.abort();
        drop(keyboard);
        (reason, String::from_utf8_lossy(&output).into_owned())
    }

    #[tokio::test]
    async fn test_lines_are_forwarded_and_output_printed() {
        let (reason, output) = run_basic(b"echo hi\n", |mut remote| {
            tokio::spawn(async move {
                let mut line = vec![0u8; 8];
                remote.read_exact(&mut line).await.unwrap();
                assert_eq!(line, b"echo hi\n");
                remote.write_all(b"hi\n").await.unwrap();
            })
        })
        .await;
        assert_eq!(reason, ExitReason::PeerClosed);
        assert!(output.contains("hi\n"));
        assert!(output.ends_with("Connection closed by peer\n"));
    }

    #[tokio::test]
    async fn test_exit_disconnects() {
        let (reason, output) = run_basic(b"exit\n", |remote| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(remote);
            })
        })
        .await;
        assert_eq!(reason, ExitReason::UserExit);
        assert!(output.contains("Disconnecting...\n"));
    }

    #[tokio::test]
    async fn test_help_hides_file_verbs_in_basic_mode() {
        let (_, output) = run_basic(b"help\n\nexit\n", |remote| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(remote);
            })
        })
        .await;
        assert!(output.contains("ncurses <command>"));
        assert!(!output.contains("send_file"));
    }

    #[tokio::test]
    async fn test_file_verbs_need_extended_mode() {
        let (reason, output) = run_basic(b"send_file a b\nexit\n", |remote| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(remote);
            })
        })
        .await;
        assert_eq!(reason, ExitReason::UserExit);
        assert!(output.contains("requires the extended protocol"));
    }

    #[tokio::test]
    async fn test_end_of_input() {
        let (client, _remote) = duplex(1024);
        let mut conn = Connection::new(client);
        let reason = Multiplexer::new(&mut conn, BufReader::new(&b""[..]), Vec::new())
            .run()
            .await
            .unwrap();
        assert_eq!(reason, ExitReason::InputClosed);
    }

    #[tokio::test]
    async fn test_stop_flag_ends_session() {
        let (client, _remote) = duplex(1024);
        let mut conn = Connection::new(client);
        let stop = Arc::new(AtomicBool::new(true));
        let (_keep_open, input) = duplex(16);
        let reason = Multiplexer::new(&mut conn, BufReader::new(input), Vec::new())
            .with_stop_flag(stop)
            .run()
            .await
            .unwrap();
        assert_eq!(reason, ExitReason::Stopped);
    }

    #[tokio::test]
    async fn test_passthrough_detaches_on_ctrl_bracket() {
        let (reason, output) = run_basic(b"ncurses top\nq\x1dexit\n", |mut remote| {
            tokio::spawn(async move {
                let mut line = vec![0u8; 4];
                remote.read_exact(&mut line).await.unwrap();
                assert_eq!(line, b"top\n");
                remote.write_all(b"SCREEN").await.unwrap();
                let mut key = [0u8; 1];
                remote.read_exact(&mut key).await.unwrap();
                assert_eq!(&key, b"q");
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
        })
        .await;
        assert_eq!(reason, ExitReason::UserExit);
        assert!(output.contains("Disconnecting..."));
    }

    #[tokio::test]
    async fn test_transfer_commands_in_extended_mode() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.txt");
        let remote = dir.path().join("remote.txt");
        let back = dir.path().join("back.txt");
        std::fs::write(&local, b"hello").unwrap();

        let (client, mut server) = duplex(64 * 1024);
        let peer = tokio::spawn(async move {
            let mut magic = vec![0u8; MAGIC.len()];
            server.read_exact(&mut magic).await.unwrap();
            server.write_all(ACK).await.unwrap();
            ExtendedSession::new(server, 1024).run().await.unwrap();
        });

        let mut conn = Connection::new(client);
        conn.negotiate(None).await.unwrap();

        let script = format!(
            "send_file {} {}\nget_file {} {}\nget_file only-one\nexit\n",
            local.display(),
            remote.display(),
            remote.display(),
            back.display()
        );
        let mut output = Vec::new();
        let reason = Multiplexer::new(&mut conn, BufReader::new(script.as_bytes()), &mut output)
            .run()
            .await
            .unwrap();
        drop(conn);
        peer.await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(reason, ExitReason::UserExit);
        assert!(output.contains("File sent successfully (5 bytes)"));
        assert!(output.contains("File received successfully (5 bytes)"));
        assert!(output.contains("Usage: get_file"));
        assert_eq!(std::fs::read(&back).unwrap(), b"hello");
    }
}
