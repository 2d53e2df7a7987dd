use thiserror::Error;

use crate::{
    account::AccountError,
    command::AccountCommandError,
    message::{Request, Response},
};

pub mod in_memory_ledger;

/// Business-rule failures. Over the wire they all collapse into [`Response::Failure`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    CommandErr(#[from] AccountCommandError),
    #[error(transparent)]
    AccountErr(#[from] AccountError),
}

/// Shared by every connection worker, hence `&self` and `Sync`.
pub trait AccountLedger: Send + Sync {
    /// Runs exactly one operation atomically and reports its success response.
    fn execute(&self, request: &Request) -> Result<Response, LedgerError>;
}
