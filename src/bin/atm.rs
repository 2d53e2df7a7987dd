use std::process::ExitCode;

use atm_channel::{
    config::{DEFAULT_AUTH_FILE, DEFAULT_IP_ADDRESS, DEFAULT_PORT},
    logging,
    terminal::{EXIT_FAILURE, Terminal, TerminalError},
    validation::RawInvocation,
};
use clap::{Parser, error::ErrorKind};

/// Talks to the bank on behalf of one account holder.
#[derive(Debug, Parser)]
#[command(name = "atm", version)]
struct Cli {
    /// Account name
    #[arg(short = 'a')]
    account: Option<String>,
    /// Create the account with this initial balance
    #[arg(short = 'n')]
    new: Option<String>,
    /// Deposit this amount
    #[arg(short = 'd')]
    deposit: Option<String>,
    /// Withdraw this amount
    #[arg(short = 'w')]
    withdraw: Option<String>,
    /// Query the balance
    #[arg(short = 'g')]
    get: bool,
    /// Bank port
    #[arg(short = 'p', default_value = DEFAULT_PORT)]
    port: String,
    /// Bank IPv4 address
    #[arg(short = 'i', default_value = DEFAULT_IP_ADDRESS)]
    ip_address: String,
    /// Shared secret file
    #[arg(short = 's', default_value = DEFAULT_AUTH_FILE)]
    auth_file: String,
    /// Card file, `<account>.card` by default
    #[arg(short = 'c')]
    card_file: Option<String>,
}

impl From<Cli> for RawInvocation {
    fn from(cli: Cli) -> Self {
        RawInvocation {
            account: cli.account,
            new: cli.new,
            deposit: cli.deposit,
            withdraw: cli.withdraw,
            get: cli.get,
            ip_address: cli.ip_address,
            port: cli.port,
            auth_file: cli.auth_file,
            card_file: cli.card_file,
        }
    }
}

fn main() -> ExitCode {
    logging::init("warn");

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            tracing::debug!("{err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let outcome = RawInvocation::from(cli)
        .validate()
        .map_err(TerminalError::from)
        .and_then(|invocation| Terminal::run_invocation(&invocation));
    match outcome {
        Ok(response) => {
            if let Some(summary) = response.summary() {
                println!("{summary}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::warn!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
