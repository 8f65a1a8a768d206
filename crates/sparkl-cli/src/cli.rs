//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sparkl_duplex::DEFAULT_PATH_PREFIX;

use crate::commands::listen::LISTEN_PATH_PREFIX;

/// SPARKL command line utility.
#[derive(Parser, Debug, Clone)]
#[command(name = "sparkl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Alias of the connection to use, for multiple connections in one session.
    #[arg(short, long, global = true, env = "SPARKL_ALIAS", default_value = "default")]
    pub alias: String,

    /// Local session id, defaults to the pid of the invoking shell.
    #[arg(short, long, global = true, env = "SPARKL_SESSION")]
    pub session: Option<String>,

    /// Directory holding per-session state, defaults to `<tmp>/sse_cli`.
    #[arg(long, global = true, env = "SPARKL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open a connection to a node, or list connections.
    Connect(ConnectArgs),

    /// Close the connection, or all connections.
    Close {
        /// Close every connection in this session.
        #[arg(long)]
        all: bool,
    },

    /// Show or change the current folder.
    Cd {
        /// Folder to move into, relative to the current folder.
        folder: Option<String>,
    },

    /// Show the local session id and working directory.
    Session,

    /// Run a REST service over a duplex websocket, bridged to stdin/stdout.
    ///
    /// Inbound consume and request messages on the given paths are written
    /// to stdout as JSON lines. Each stdin line is a JSON term: a `reply`
    /// answers the request with the same `id`, a `notify` is sent as is, a
    /// `solicit` is sent and its response written to stdout when it arrives.
    Service(ServiceArgs),

    /// Print the events of a configuration object as JSON lines.
    Listen(ListenArgs),
}

/// Arguments for the connect command.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// URL of a SPARKL node, e.g. `http://localhost:8000`.
    pub url: Option<String>,

    /// Session cookie value presented on websocket connect.
    #[arg(long)]
    pub cookie: Option<String>,
}

/// Arguments for the service command.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Path or id of the REST service.
    pub service: String,

    /// Operation answered with a reply: a request, or a consume with reply.
    #[arg(short, long = "request", value_name = "PATH")]
    pub requests: Vec<String>,

    /// One-way consume operation.
    #[arg(short, long = "consume", value_name = "PATH")]
    pub consumes: Vec<String>,

    /// Websocket path prefix on the node.
    #[arg(long, default_value = DEFAULT_PATH_PREFIX)]
    pub prefix: String,

    /// Seconds allowed for the websocket to connect.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Log and drop frames that break the protocol instead of closing.
    #[arg(long)]
    pub skip_errors: bool,
}

/// Arguments for the listen command.
#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Path or id of the object to listen to, relative to the current folder.
    #[arg(default_value = ".")]
    pub subject: String,

    /// Websocket path prefix on the node.
    #[arg(long, default_value = LISTEN_PATH_PREFIX)]
    pub prefix: String,

    /// Seconds allowed for the websocket to connect.
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_url() {
        let cli = Cli::parse_from(["sparkl", "connect", "http://localhost:8000"]);
        match cli.command {
            Commands::Connect(args) => {
                assert_eq!(args.url.as_deref(), Some("http://localhost:8000"));
                assert!(args.cookie.is_none());
            }
            _ => panic!("expected connect command"),
        }
        assert_eq!(cli.alias, "default");
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["sparkl", "cd", "Scratch", "-a", "other", "-f", "json", "-s", "42"]);
        assert_eq!(cli.alias, "other");
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.session.as_deref(), Some("42"));
        assert!(matches!(cli.command, Commands::Cd { folder: Some(ref f) } if f == "Scratch"));
    }

    #[test]
    fn parses_service_paths() {
        let cli = Cli::parse_from([
            "sparkl",
            "service",
            "Scratch/TestRest/REST",
            "-r",
            "Mix/FirstDivisor",
            "--request",
            "Mix/Test",
            "-c",
            "Mix/Consume",
        ]);
        match cli.command {
            Commands::Service(args) => {
                assert_eq!(args.service, "Scratch/TestRest/REST");
                assert_eq!(args.requests, ["Mix/FirstDivisor", "Mix/Test"]);
                assert_eq!(args.consumes, ["Mix/Consume"]);
                assert_eq!(args.prefix, DEFAULT_PATH_PREFIX);
                assert_eq!(args.connect_timeout, 10);
                assert!(!args.skip_errors);
            }
            _ => panic!("expected service command"),
        }
    }

    #[test]
    fn close_all_flag() {
        let cli = Cli::parse_from(["sparkl", "close", "--all"]);
        assert!(matches!(cli.command, Commands::Close { all: true }));
    }

    #[test]
    fn service_requires_path() {
        assert!(Cli::try_parse_from(["sparkl", "service"]).is_err());
    }

    #[test]
    fn listen_defaults_to_current_folder() {
        let cli = Cli::parse_from(["sparkl", "listen"]);
        match cli.command {
            Commands::Listen(args) => {
                assert_eq!(args.subject, ".");
                assert_eq!(args.prefix, LISTEN_PATH_PREFIX);
                assert_eq!(args.connect_timeout, 10);
            }
            _ => panic!("expected listen command"),
        }
    }
}
