//! vault-pki CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vault_pki_cli::cli::{Cli, Commands};
use vault_pki_cli::commands::{IssueCommand, SetupCommand, WaitCommand};
use vault_pki_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.issuer_config()?;
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Issue(args) => {
            let cmd = IssueCommand::new(config);
            cmd.execute(&mut stdout, &format, &args, &cancel).await?;
        }
        Commands::Wait(args) => {
            let cmd = WaitCommand::new(config);
            cmd.execute(&mut stdout, &format, &args, &cancel).await?;
        }
        Commands::Setup(args) => {
            let cmd = SetupCommand::new(config);
            cmd.execute(&mut stdout, &format, &args, &cancel).await?;
        }
    }

    Ok(())
}
