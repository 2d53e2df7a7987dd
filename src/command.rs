use std::collections::hash_map::{Entry, VacantEntry};

use thiserror::Error;

use crate::{
    account::Account,
    message::{AccountName, Amount, Operation},
    validation::MIN_INITIAL_BALANCE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone)]
pub struct TransactionCommand {
    pub action: TransactionAction,
    pub amount: Amount,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountCommandError {
    #[error("Account already exists")]
    AccountExists,
    #[error("No such account")]
    NoSuchAccount,
    #[error("Initial balance {amount} is below the minimum")]
    AmountTooLow { amount: Amount },
    #[error("Amount must be greater than zero for {action:?}")]
    InvalidAmount { action: TransactionAction },
}

/// A request resolved against the ledger entry it targets.
pub enum AccountCommand<'a> {
    Open {
        entry: VacantEntry<'a, AccountName, Account>,
        initial_balance: Amount,
    },
    Inspect {
        account: &'a mut Account,
    },
    Transact {
        account: &'a mut Account,
        command: TransactionCommand,
    },
}

impl<'a> AccountCommand<'a> {
    pub fn parse_command(
        entry: Entry<'a, AccountName, Account>,
        operation: Operation,
    ) -> Result<Self, AccountCommandError> {
        match operation {
            Operation::Create { initial_balance } => {
                Self::parse_open_command(entry, initial_balance)
            }
            Operation::Query => Ok(Self::Inspect {
                account: Self::existing(entry)?,
            }),
            Operation::Deposit { amount } => {
                Self::parse_transact_command(entry, amount, TransactionAction::Deposit)
            }
            Operation::Withdraw { amount } => {
                Self::parse_transact_command(entry, amount, TransactionAction::Withdraw)
            }
        }
    }

    fn parse_open_command(
        entry: Entry<'a, AccountName, Account>,
        initial_balance: Amount,
    ) -> Result<Self, AccountCommandError> {
        let Entry::Vacant(entry) = entry else {
            return Err(AccountCommandError::AccountExists);
        };
        if initial_balance < MIN_INITIAL_BALANCE {
            return Err(AccountCommandError::AmountTooLow {
                amount: initial_balance,
            });
        }
        Ok(Self::Open {
            entry,
            initial_balance,
        })
    }

    fn parse_transact_command(
        entry: Entry<'a, AccountName, Account>,
        amount: Amount,
        action: TransactionAction,
    ) -> Result<Self, AccountCommandError> {
        let account = Self::existing(entry)?;
        if amount == Amount::ZERO {
            return Err(AccountCommandError::InvalidAmount { action });
        }
        Ok(Self::Transact {
            account,
            command: TransactionCommand { action, amount },
        })
    }

    fn existing(
        entry: Entry<'a, AccountName, Account>,
    ) -> Result<&'a mut Account, AccountCommandError> {
        match entry {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(_) => Err(AccountCommandError::NoSuchAccount),
        }
    }
}
