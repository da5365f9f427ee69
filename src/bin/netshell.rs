//! netshell client entry point.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use netshell::cli::{
    parse_client_args, print_client_help, print_version, ClientAction, ClientArgs, EvalSource,
};
use netshell::client::{ClientOptions, Controller, ProfileOverrides, TargetRequest, Transfer};
use netshell::{logging, SessionStore};
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = match parse_client_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'netshell --help' for more information.");
            std::process::exit(2);
        }
    };

    let logging_ready = match args.log_level {
        Some(ref level) => logging::init_with_filter(level),
        None => logging::try_init_with_default(logging::CLIENT_DEFAULT_FILTER),
    };
    if logging_ready.is_err() {
        eprintln!("warning: logging already initialized");
    }

    match run(args).await {
        // The blocking stdin reader may still be parked in read(2); exit
        // without waiting for it.
        Ok(()) => {
            let _ = std::io::stdout().flush();
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: ClientArgs) -> netshell::Result<()> {
    let action = args.action();
    match action {
        ClientAction::Help => {
            print_client_help();
            return Ok(());
        }
        ClientAction::Version => {
            print_version("netshell");
            return Ok(());
        }
        _ => {}
    }

    let options = ClientOptions {
        negotiate: !args.basic,
        idle_timeout: args.idle_timeout.unwrap_or(netshell::client::DEFAULT_IDLE_TIMEOUT),
        handshake_timeout: args.handshake_timeout,
    };
    let controller = Controller::new(SessionStore::open_default()?, options);

    match action {
        ClientAction::Help | ClientAction::Version => Ok(()),
        ClientAction::ListSessions => {
            let listing = controller
                .blocking(|controller| controller.list_sessions())
                .await?;
            print!("{}", listing);
            Ok(())
        }
        ClientAction::SaveSession(name) => {
            let overrides = ProfileOverrides {
                address: args.address.clone(),
                port: args.port,
                username: args.username.clone(),
                description: args.description.clone(),
            };
            let host = args.host.clone();
            let session = name.clone();
            let profile = controller
                .blocking(move |controller| {
                    controller.save_session(&session, host.as_deref(), &overrides)
                })
                .await?;
            println!(
                "Session '{}' saved ({}:{})",
                name, profile.hostname, profile.port
            );
            Ok(())
        }
        ClientAction::SetDefault(name) => {
            let session = name.clone();
            controller
                .blocking(move |controller| controller.store().set_default(&session))
                .await?;
            println!("Default session set to '{}'", name);
            Ok(())
        }
        ClientAction::UnsetDefault => {
            controller
                .blocking(|controller| controller.store().unset_default())
                .await?;
            println!("Default session cleared");
            Ok(())
        }
        ClientAction::Transfer(transfer) => {
            let target = controller.resolve_async(&request(&args)).await?;
            let bytes = controller.transfer(&target, &transfer).await?;
            match transfer {
                Transfer::Upload { local, remote } => println!(
                    "Sent {} to {} ({} bytes)",
                    local.display(),
                    remote.display(),
                    bytes
                ),
                Transfer::Download { remote, local } => println!(
                    "Received {} into {} ({} bytes)",
                    remote.display(),
                    local.display(),
                    bytes
                ),
            }
            Ok(())
        }
        ClientAction::Eval(source) => {
            let script = match source {
                EvalSource::Command(command) => command.into_bytes(),
                EvalSource::File(path) => tokio::fs::read(&path).await?,
            };
            let target = controller.resolve_async(&request(&args)).await?;
            let bytes = controller.eval(&target, &script).await?;
            debug!("eval printed {} bytes", bytes);
            Ok(())
        }
        ClientAction::Interactive => {
            let target = controller.resolve_async(&request(&args)).await?;
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    flag.store(true, Ordering::SeqCst);
                }
            });
            controller.interactive(&target, stop).await?;
            Ok(())
        }
    }
}

fn request(args: &ClientArgs) -> TargetRequest {
    TargetRequest {
        positional: args.host.clone(),
        port: args.port,
        session: args.session.clone(),
    }
}
