use std::{net::SocketAddr, time::Duration};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    card::{self, CardError},
    channel::{ChannelError, transport},
    config::EXCHANGE_TIMEOUT,
    keys::{KeyError, KeyMaterial},
    message::{Operation, Request, Response},
    validation::{Invocation, ValidationError},
};

/// Exit status for any failure other than transport.
pub const EXIT_FAILURE: u8 = 255;
/// Exit status for connection, timeout, integrity and replay failures.
pub const EXIT_PROTOCOL_ERROR: u8 = 63;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Bank refused the request")]
    Refused,
    #[error("Bank reply does not answer the request")]
    UnexpectedResponse,
}

impl TerminalError {
    pub fn exit_code(&self) -> u8 {
        match self {
            TerminalError::Channel(_) | TerminalError::UnexpectedResponse => EXIT_PROTOCOL_ERROR,
            TerminalError::Validation(_)
            | TerminalError::Keys(_)
            | TerminalError::Card(_)
            | TerminalError::Refused => EXIT_FAILURE,
        }
    }
}

/// Runs one validated invocation against the bank.
pub struct Terminal {
    keys: KeyMaterial,
    timeout: Duration,
}

impl Terminal {
    pub fn new(keys: KeyMaterial) -> Self {
        Self {
            keys,
            timeout: EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads the shared secret named by the invocation, then runs it.
    pub fn run_invocation(invocation: &Invocation) -> Result<Response, TerminalError> {
        let keys = KeyMaterial::load(&invocation.auth_file)?;
        Terminal::new(keys).run(invocation)
    }

    pub fn run(&self, invocation: &Invocation) -> Result<Response, TerminalError> {
        let card_path = invocation
            .card_file
            .clone()
            .unwrap_or_else(|| card::default_card_path(&invocation.account));

        let pin = match invocation.operation {
            Operation::Create { .. } => {
                // refuse before the bank opens an account we could not hand a card for
                if card_path.exists() {
                    return Err(CardError::AlreadyExists { path: card_path }.into());
                }
                None
            }
            _ => card::get_pin(
                invocation.card_file.as_deref(),
                &invocation.account,
                &self.keys,
            )?,
        };

        let request = Request {
            account: invocation.account.clone(),
            operation: invocation.operation,
            pin,
        };
        let response = self.exchange(SocketAddr::V4(invocation.bank), &request)?;

        if let Response::Created { pin, .. } = &response {
            card::create_card(&card_path, pin, &self.keys)?;
            info!(card = %card_path.display(), "Issued card");
        }
        Ok(response)
    }

    fn exchange(&self, bank: SocketAddr, request: &Request) -> Result<Response, TerminalError> {
        let message = request.to_json().map_err(ChannelError::from)?;
        let reply = transport::exchange(bank, &message, &self.keys, self.timeout)?;
        let response = Response::from_json(&reply).map_err(ChannelError::from)?;
        debug!(operation = request.operation.name(), "Bank replied");
        match response {
            Response::Failure => Err(TerminalError::Refused),
            response if response.answers(request) => Ok(response),
            _ => Err(TerminalError::UnexpectedResponse),
        }
    }
}
