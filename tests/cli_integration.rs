//! CLI integration tests.
//!
//! These tests verify argument parsing for both binaries, configuration
//! loading, and the session commands the client exposes.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use netshell::cli::{
    parse_client_args_from, parse_server_args_from, ClientAction, EvalSource, ServerArgs,
};
use netshell::client::{ClientOptions, Controller, ProfileOverrides, TargetRequest};
use netshell::config::Config;
use netshell::SessionStore;

fn args(binary: &str, args: &[&str]) -> Vec<OsString> {
    std::iter::once(binary)
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_server_cli_defaults() {
    let result = parse_server_args_from(args("netshelld", &[])).unwrap();

    assert!(result.host.is_none());
    assert!(result.port.is_none());
    assert!(result.config.is_none());
    assert!(result.log_level.is_none());
}

#[test]
fn test_server_cli_full_options() {
    let result = parse_server_args_from(args(
        "netshelld",
        &["-H", "127.0.0.1", "-c", "/etc/netshell.json", "-l", "debug", "9999"],
    ))
    .unwrap();

    assert_eq!(result.host.as_deref(), Some("127.0.0.1"));
    assert_eq!(result.port, Some(9999));
    assert_eq!(result.config, Some(PathBuf::from("/etc/netshell.json")));
    assert_eq!(result.log_level, Some("debug".to_string()));
}

#[test]
fn test_server_cli_invalid_port() {
    let result = parse_server_args_from(args("netshelld", &["-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_client_cli_modes() {
    let interactive = parse_client_args_from(args("netshell", &["amiga.local"])).unwrap();
    assert_eq!(interactive.action(), ClientAction::Interactive);
    assert!(!interactive.basic);

    let eval = parse_client_args_from(args("netshell", &["-e", "ls", "amiga.local", "2324"])).unwrap();
    assert_eq!(eval.action(), ClientAction::Eval(EvalSource::Command("ls".into())));
    assert_eq!(eval.port, Some(2324));

    let basic = parse_client_args_from(args("netshell", &["--basic", "-s", "work"])).unwrap();
    assert!(basic.basic);
    assert_eq!(basic.session.as_deref(), Some("work"));
    assert!(basic.host.is_none());
}

#[test]
fn test_client_cli_idle_timeout() {
    let result =
        parse_client_args_from(args("netshell", &["h", "-e", "x", "--idle-timeout", "1500"])).unwrap();
    assert_eq!(result.idle_timeout, Some(Duration::from_millis(1500)));
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let json = r#"{
        "server": {
            "host": "192.168.1.100",
            "port": 9000,
            "backlog": 64,
            "sniff_timeout_ms": 750,
            "max_transfer_size": 1048576
        },
        "shell": {
            "program": "/bin/bash",
            "args": ["-i"]
        },
        "logging": {
            "level": "debug"
        }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.server.host, "192.168.1.100");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.backlog, 64);
    assert_eq!(config.server.max_transfer_size, 1048576);
    assert_eq!(config.shell.program, "/bin/bash");
    assert_eq!(config.logging.level, "debug");

    let server = config.to_server_config().unwrap();
    assert_eq!(server.sniff_timeout, Duration::from_millis(750));
    assert_eq!(server.bind_address(), "192.168.1.100:9000");
}

#[test]
fn test_config_priority_cli_over_file() {
    let json = r#"{
        "server": {
            "host": "10.0.0.1",
            "port": 5000
        }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let args = ServerArgs {
        port: Some(8080),
        config: Some(file.path().to_path_buf()),
        ..ServerArgs::default()
    };

    let config = Config::load(&args).unwrap();

    // CLI port wins, file host survives
    assert_eq!(config.server.host, "10.0.0.1");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn test_config_missing_file() {
    let args = ServerArgs {
        config: Some(PathBuf::from("/nonexistent/netshell.json")),
        ..ServerArgs::default()
    };
    assert!(Config::load(&args).is_err());
}

#[test]
fn test_config_ipv6_bind_address() {
    let json = r#"{"server": {"host": "::1", "port": 2324}}"#;
    let config: Config = serde_json::from_str(json).unwrap();
    let server = config.to_server_config().unwrap();
    assert_eq!(server.bind_address(), "[::1]:2324");
}

#[test]
fn test_config_partial_deserialization() {
    let json = r#"{"shell": {"working_dir": "/tmp"}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.server.port, 2324);
    assert_eq!(config.shell.program, "/bin/sh"); // Default
    assert_eq!(config.shell.working_dir, Some(PathBuf::from("/tmp")));
}

// ============================================================================
// Session Command Tests
// ============================================================================

#[test]
fn test_saved_session_workflow() {
    let dir = TempDir::new().unwrap();
    let controller = Controller::new(SessionStore::new(dir.path()), ClientOptions::default());

    let parsed = parse_client_args_from(args(
        "netshell",
        &["-S", "amiga", "192.168.1.136", "-u", "bob", "-d", "A1200 in the lab"],
    ))
    .unwrap();
    let ClientAction::SaveSession(name) = parsed.action() else {
        panic!("expected a save action");
    };
    controller
        .save_session(
            &name,
            parsed.host.as_deref(),
            &ProfileOverrides {
                address: parsed.address.clone(),
                port: parsed.port,
                username: parsed.username.clone(),
                description: parsed.description.clone(),
            },
        )
        .unwrap();
    controller.store().set_default("amiga").unwrap();

    let listing = controller.list_sessions().unwrap();
    assert!(listing.contains("amiga [default] - bob@192.168.1.136:2324 (A1200 in the lab)"));

    // No host at all falls back to the default session
    let target = controller.resolve(&TargetRequest::default()).unwrap();
    assert_eq!(target.host, "192.168.1.136");
    assert_eq!(target.session.as_deref(), Some("amiga"));

    let raw = std::fs::read_to_string(dir.path().join("sessions/amiga")).unwrap();
    assert!(raw.contains("hostname=192.168.1.136\n"));
    assert!(raw.contains("is_default=true\n"));
}
