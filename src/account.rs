use thiserror::Error;

use crate::{
    command::{TransactionAction, TransactionCommand},
    message::{Amount, Pin},
};

#[derive(Debug, PartialEq, Eq)]
pub enum AccountEventKind {
    Deposited,
    Withdrawn,
}

#[derive(Debug)]
pub struct AccountEvent {
    amount: Amount,
    kind: AccountEventKind,
}

impl AccountEvent {
    pub fn amount(&self) -> Amount {
        self.amount
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("PIN does not match the account")]
    AuthenticationFailed,
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("Balance would overflow")]
    BalanceOverflow,
}

#[derive(Debug)]
pub struct Account {
    balance: Amount,
    pin: Pin,
}

impl Account {
    pub fn open(initial_balance: Amount, pin: Pin) -> Self {
        Self {
            balance: initial_balance,
            pin,
        }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Every operation on an existing account must present its PIN.
    pub fn authenticate(&self, pin: Option<&Pin>) -> Result<(), AccountError> {
        match pin {
            Some(pin) if self.pin.matches(pin) => Ok(()),
            _ => Err(AccountError::AuthenticationFailed),
        }
    }

    /// Events are trusted: all checks happen in [`Account::handle_transaction`].
    pub fn apply(&mut self, event: &AccountEvent) {
        match event.kind {
            AccountEventKind::Deposited => {
                self.balance = Amount::from_cents(self.balance.cents() + event.amount.cents());
            }
            AccountEventKind::Withdrawn => {
                self.balance = Amount::from_cents(self.balance.cents() - event.amount.cents());
            }
        }
    }

    pub fn handle_transaction(
        &self,
        command: &TransactionCommand,
    ) -> Result<AccountEvent, AccountError> {
        match command.action {
            TransactionAction::Deposit => {
                if self.balance.checked_add(command.amount).is_none() {
                    return Err(AccountError::BalanceOverflow);
                }
                Ok(AccountEvent {
                    amount: command.amount,
                    kind: AccountEventKind::Deposited,
                })
            }
            TransactionAction::Withdraw => {
                if self.balance >= command.amount {
                    Ok(AccountEvent {
                        amount: command.amount,
                        kind: AccountEventKind::Withdrawn,
                    })
                } else {
                    Err(AccountError::InsufficientFunds)
                }
            }
        }
    }
}
