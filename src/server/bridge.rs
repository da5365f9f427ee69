//! Process bridge: attaches a basic connection to a shell process.

use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, error};

use super::ShellCommand;
use crate::error::NetshellError;
use crate::Result;

/// Spawn `shell` with its stdin, stdout and stderr all set to `stream`, then
/// wait for it to exit.
///
/// The socket is switched back to blocking mode first: the child shares the
/// open file description and a plain shell cannot cope with `EAGAIN`. Every
/// copy held by this process is closed right after the spawn, so the
/// connection ends as soon as the shell exits.
pub async fn attach_shell(stream: TcpStream, shell: &ShellCommand) -> Result<ExitStatus> {
    let socket = stream.into_std()?;
    socket.set_nonblocking(false)?;

    let fd = OwnedFd::from(socket);
    let stdin = fd.try_clone()?;
    let stdout = fd.try_clone()?;

    let mut command = Command::new(&shell.program);
    command
        .args(&shell.args)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(fd));
    if let Some(dir) = &shell.working_dir {
        command.current_dir(dir);
    }

    let spawned = command.spawn();
    // Releases this process's descriptors for the socket.
    drop(command);

    let mut child = spawned.map_err(|source| {
        error!("failed to spawn {}: {}", shell.program, source);
        NetshellError::Spawn {
            program: shell.program.clone(),
            source,
        }
    })?;

    debug!("shell {} started with pid {:?}", shell.program, child.id());
    let status = child.wait().await?;
    debug!("shell exited: {}", status);
    Ok(status)
}
