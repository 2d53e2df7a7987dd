use std::{io, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use atm_channel::{
    bank::{Bank, BankServer, report_outcome},
    config::{BankConfig, DEFAULT_AUTH_FILE, DEFAULT_PORT},
    keys::KeyMaterial,
    ledger::in_memory_ledger::InMemoryLedger,
    logging,
    terminal::EXIT_FAILURE,
    validation::{parse_port, validate_file_name},
};
use clap::{Parser, error::ErrorKind};

/// Holds account balances and serves terminals.
#[derive(Debug, Parser)]
#[command(name = "bank", version)]
struct Cli {
    /// Port to listen on
    #[arg(short = 'p', default_value = DEFAULT_PORT)]
    port: String,
    /// Shared secret file to create
    #[arg(short = 's', default_value = DEFAULT_AUTH_FILE)]
    auth_file: String,
}

fn config(cli: &Cli) -> Option<BankConfig> {
    let port = parse_port(&cli.port).ok()?;
    validate_file_name(&cli.auth_file).ok()?;
    Some(BankConfig::new(port, PathBuf::from(&cli.auth_file)))
}

fn run(config: BankConfig, keys: KeyMaterial) -> Result<()> {
    let ledger = Arc::new(InMemoryLedger::default());
    let bank = Bank::new(keys, ledger, config.timeout).with_observer(|outcome| {
        if let Err(err) = report_outcome(&mut io::stdout().lock(), outcome) {
            tracing::error!("Failed to write to stdout: {err}");
        }
    });
    let server = BankServer::bind(config.listen_addr(), bank)
        .with_context(|| format!("Failed to start bank on port {}", config.port))?;
    tracing::info!(addr = %server.local_addr()?, "Bank listening");
    server.serve().context("Bank stopped accepting connections")
}

fn main() -> ExitCode {
    logging::init("warn");

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => return ExitCode::from(EXIT_FAILURE),
    };
    let Some(config) = config(&cli) else {
        return ExitCode::from(EXIT_FAILURE);
    };

    let keys = match KeyMaterial::bootstrap(&config.auth_file) {
        Ok(keys) => keys,
        Err(err) => {
            // an existing auth file is never reused
            tracing::error!("{err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    println!("created");

    match run(config, keys) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
