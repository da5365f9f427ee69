//! netshell server entry point.

use netshell::cli::{parse_server_args, print_server_help, print_version};
use netshell::config::Config;
use netshell::{logging, server, Server};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = match parse_server_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'netshelld --help' for more information.");
            std::process::exit(2);
        }
    };

    if args.help {
        print_server_help();
        return;
    }
    if args.version {
        print_version("netshelld");
        return;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if logging::init_with_filter(config.log_filter()).is_err() {
        eprintln!("warning: logging already initialized");
    }

    info!("netshelld v{}", env!("CARGO_PKG_VERSION"));

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "shell: {} {}",
        server_config.shell.program,
        server_config.shell.args.join(" ")
    );

    let server = match Server::bind(server_config).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = server::shutdown_on_signal(shutdown_tx).await {
            error!("cannot install signal handlers: {}", e);
        }
    });

    if let Err(e) = server.serve(shutdown_rx).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}
