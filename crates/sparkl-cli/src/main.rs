//! SPARKL CLI binary entrypoint.
//!
//! This is the main entry point for the `sparkl` command-line tool.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::BufReader;
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sparkl_cli::cli::{Cli, Commands};
use sparkl_cli::commands::{
    CdCommand, CloseCommand, ConnectCommand, ListenCommand, ServiceCommand, SessionCommand,
};
use sparkl_cli::output::OutputFormat;
use sparkl_cli::state::{StateStore, default_session, garbage_collect};
use sparkl_duplex::WebSocketConnector;

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatch a command. State is read and written here, outside the async
/// runtime, which only the websocket commands start.
fn run(cli: Cli) -> Result<(), sparkl_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let root = cli.state_dir.clone().unwrap_or_else(StateStore::default_root);

    match garbage_collect(&root) {
        Ok(0) => {}
        Ok(removed) => debug!(removed, "removed stale sessions"),
        Err(e) => debug!(error = %e, "session garbage collection failed"),
    }

    let session = cli.session.clone().unwrap_or_else(default_session);
    let store = StateStore::new(&root, &session);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Connect(args) => {
            let cmd = ConnectCommand::new(&store, &cli.alias);
            cmd.execute(&mut stdout, &format, &args)?;
        }
        Commands::Close { all } => {
            let cmd = CloseCommand::new(&store, &cli.alias);
            cmd.execute(&mut stdout, &format, all)?;
        }
        Commands::Cd { folder } => {
            let cmd = CdCommand::new(&store, &cli.alias);
            cmd.execute(&mut stdout, &format, folder.as_deref())?;
        }
        Commands::Session => {
            let cmd = SessionCommand::new(&store, &session);
            cmd.execute(&mut stdout, &format)?;
        }
        Commands::Service(args) => {
            let cmd = ServiceCommand::new(store.connection(&cli.alias)?, &cli.alias);
            runtime()?.block_on(async {
                let input = BufReader::new(tokio::io::stdin());
                cmd.execute(&WebSocketConnector, input, &mut stdout, &args).await
            })?;
        }
        Commands::Listen(args) => {
            let cmd = ListenCommand::new(store.connection(&cli.alias)?, &cli.alias);
            runtime()?.block_on(cmd.execute(&WebSocketConnector, &mut stdout, &args))?;
        }
    }

    Ok(())
}

fn runtime() -> Result<Runtime, sparkl_cli::CliError> {
    Runtime::new().map_err(|e| sparkl_cli::CliError::Config(format!("failed to create async runtime: {e}")))
}
