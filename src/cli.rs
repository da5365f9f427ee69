//! Command-line interfaces for `netshelld` and `netshell`.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::Transfer;

/// Server command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct ServerArgs {
    /// Host address to bind to.
    pub host: Option<String>,
    /// Port to listen on (`-p` or the first positional argument).
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse server arguments from the process command line.
pub fn parse_server_args() -> Result<ServerArgs, ArgsError> {
    parse_server_args_from(std::env::args_os())
}

/// Parse server arguments from an iterator (for testing).
pub fn parse_server_args_from<I>(args: I) -> Result<ServerArgs, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = ServerArgs::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                result.host = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(parse_port(value)?);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) if result.port.is_none() => {
                let value: String = val.parse()?;
                result.port = Some(parse_port(value)?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Where eval input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalSource {
    /// A command given on the command line.
    Command(String),
    /// A script file sent as is.
    File(PathBuf),
}

/// What the client was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Help,
    Version,
    ListSessions,
    SaveSession(String),
    SetDefault(String),
    UnsetDefault,
    Transfer(Transfer),
    Eval(EvalSource),
    Interactive,
}

/// Client command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct ClientArgs {
    /// Host name, or the name of a saved session.
    pub host: Option<String>,
    /// Server port (second positional argument or `-p`).
    pub port: Option<u16>,
    /// Connect using a saved session.
    pub session: Option<String>,
    /// Command to run instead of an interactive session.
    pub eval: Option<String>,
    /// Script file to run instead of an interactive session.
    pub script: Option<PathBuf>,
    /// Skip the extended protocol handshake.
    pub basic: bool,
    /// Quiet period that ends eval output.
    pub idle_timeout: Option<Duration>,
    /// Limit on waiting for the handshake reply.
    pub handshake_timeout: Option<Duration>,
    pub list: bool,
    pub save: Option<String>,
    pub set_default: Option<String>,
    pub unset_default: bool,
    /// Host override when saving a session.
    pub address: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
    pub transfer: Option<Transfer>,
    pub log_level: Option<String>,
    pub version: bool,
    pub help: bool,
}

impl ClientArgs {
    /// The single action these arguments select.
    pub fn action(&self) -> ClientAction {
        if self.help {
            ClientAction::Help
        } else if self.version {
            ClientAction::Version
        } else if self.list {
            ClientAction::ListSessions
        } else if let Some(name) = &self.save {
            ClientAction::SaveSession(name.clone())
        } else if let Some(name) = &self.set_default {
            ClientAction::SetDefault(name.clone())
        } else if self.unset_default {
            ClientAction::UnsetDefault
        } else if let Some(transfer) = &self.transfer {
            ClientAction::Transfer(transfer.clone())
        } else if let Some(command) = &self.eval {
            ClientAction::Eval(EvalSource::Command(command.clone()))
        } else if let Some(path) = &self.script {
            ClientAction::Eval(EvalSource::File(path.clone()))
        } else {
            ClientAction::Interactive
        }
    }
}

/// Parse client arguments from the process command line.
pub fn parse_client_args() -> Result<ClientArgs, ArgsError> {
    parse_client_args_from(std::env::args_os())
}

/// Parse client arguments from an iterator (for testing).
pub fn parse_client_args_from<I>(args: I) -> Result<ClientArgs, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = ClientArgs::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => result.help = true,
            Short('V') | Long("version") => result.version = true,
            Short('e') | Long("eval") => {
                result.eval = Some(parser.value()?.parse()?);
            }
            Short('f') | Long("file") => {
                result.script = Some(parser.value()?.parse()?);
            }
            Short('s') | Long("session") => {
                result.session = Some(parser.value()?.parse()?);
            }
            Long("basic") => result.basic = true,
            Long("idle-timeout") => {
                result.idle_timeout = Some(parse_millis("idle-timeout", parser.value()?.parse()?)?);
            }
            Long("handshake-timeout") => {
                result.handshake_timeout =
                    Some(parse_millis("handshake-timeout", parser.value()?.parse()?)?);
            }
            Short('l') | Long("list") => result.list = true,
            Short('S') | Long("save") => {
                result.save = Some(parser.value()?.parse()?);
            }
            Long("set-default") => {
                result.set_default = Some(parser.value()?.parse()?);
            }
            Long("unset-default") => result.unset_default = true,
            Short('a') | Long("address") => {
                result.address = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(parse_port(value)?);
            }
            Short('u') | Long("username") => {
                result.username = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("description") => {
                result.description = Some(parser.value()?.parse()?);
            }
            Long("send-file") => {
                let (local, remote) = two_values(&mut parser, "send-file")?;
                result.transfer = Some(Transfer::Upload { local, remote });
            }
            Long("get-file") => {
                let (remote, local) = two_values(&mut parser, "get-file")?;
                result.transfer = Some(Transfer::Download { remote, local });
            }
            Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) if result.host.is_none() => {
                result.host = Some(val.parse()?);
            }
            Value(val) if result.port.is_none() => {
                let value: String = val.parse()?;
                result.port = Some(parse_port(value)?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

fn parse_port(value: String) -> Result<u16, ArgsError> {
    match value.parse() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ArgsError::InvalidValue("port", value)),
    }
}

fn parse_millis(name: &'static str, value: String) -> Result<Duration, ArgsError> {
    value
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| ArgsError::InvalidValue(name, value))
}

fn two_values(
    parser: &mut lexopt::Parser,
    name: &'static str,
) -> Result<(PathBuf, PathBuf), ArgsError> {
    let mut values = parser.values()?;
    match (values.next(), values.next()) {
        (Some(first), Some(second)) => Ok((PathBuf::from(first), PathBuf::from(second))),
        _ => Err(ArgsError::MissingValues(name, 2)),
    }
}

/// Print server help message.
pub fn print_server_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"netshelld {version}
Remote shell server over raw TCP

USAGE:
    netshelld [OPTIONS] [PORT]

OPTIONS:
    -H, --host <ADDR>       Host address to bind [default: 0.0.0.0]
    -p, --port <PORT>       Port to listen on [default: 2324]
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    NETSHELL_HOST           Host address (overrides config)
    NETSHELL_PORT           Port number (overrides config)
    NETSHELL_SHELL          Shell program (overrides config)
    NETSHELL_LOG_LEVEL      Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXAMPLES:
    # Listen on all interfaces, port 2324
    netshelld

    # Listen on a custom port
    netshelld 9999

    # Start with config file
    netshelld -c /etc/netshell/config.json
"#
    );
}

/// Print client help message.
pub fn print_client_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"netshell {version}
Remote shell client over raw TCP

USAGE:
    netshell [OPTIONS] <HOST|SESSION> [PORT]
    netshell [OPTIONS] -s <SESSION>
    netshell [OPTIONS]                      (uses the default session)

CONNECTION:
    -e, --eval <CMD>                Run a command, print its output, exit
    -f, --file <SCRIPT>             Run a script file, print its output, exit
    -s, --session <NAME>            Connect using a saved session
        --basic                     Skip the extended protocol handshake
        --idle-timeout <MS>         Eval ends after this much silence [default: 1000]
        --handshake-timeout <MS>    Give up waiting for the handshake reply
        --log-level <LVL>           Log level (error, warn, info, debug, trace)

SESSIONS:
    -l, --list                      List saved sessions
    -S, --save <NAME>               Save a session from HOST [PORT] and overrides
        --set-default <NAME>        Make a session the default
        --unset-default             Clear the default session
    -a, --address <HOST>            Host to store when saving
    -p, --port <PORT>               Port to use or store
    -u, --username <USER>           User name to store
    -d, --description <TEXT>        Description to store

FILE TRANSFER:
        --send-file <LOCAL> <REMOTE>
        --get-file <REMOTE> <LOCAL>

    -h, --help                      Print help
    -V, --version                   Print version

INTERACTIVE COMMANDS:
    help, exit, send_file, get_file, ncurses <cmd> (Ctrl-] detaches)

ENVIRONMENT VARIABLES:
    NETSHELL_CONFIG_DIR     Session store location [default: ~/.config/netshell]
    RUST_LOG                Log filter
"#
    );
}

/// Print version of the named binary.
pub fn print_version(binary: &str) {
    println!("{} {}", binary, env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Option needs more values than were given.
    MissingValues(&'static str, usize),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::MissingValues(name, count) => {
                write!(f, "--{} takes {} values", name, count)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
