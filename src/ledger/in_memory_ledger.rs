use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

use crate::{
    account::Account,
    command::{AccountCommand, TransactionAction},
    message::{AccountName, Amount, Operation, Pin, Request, Response},
};

use super::{AccountLedger, LedgerError};

/// All accounts behind one lock; held only while balances are checked and changed.
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: Mutex<HashMap<AccountName, Account>>,
}

impl InMemoryLedger {
    pub fn balance(&self, account: &AccountName) -> Option<Amount> {
        self.accounts.lock().get(account).map(Account::balance)
    }

    pub fn len(&self) -> usize {
        self.accounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountLedger for InMemoryLedger {
    fn execute(&self, request: &Request) -> Result<Response, LedgerError> {
        // drawn before locking so no randomness is gathered under the lock
        let new_pin = matches!(request.operation, Operation::Create { .. }).then(Pin::generate);
        let account_name = request.account.clone();

        let mut accounts = self.accounts.lock();
        let entry = accounts.entry(account_name.clone());
        let response = match AccountCommand::parse_command(entry, request.operation)? {
            AccountCommand::Open {
                entry,
                initial_balance,
            } => {
                let pin = new_pin.unwrap_or_else(Pin::generate);
                entry.insert(Account::open(initial_balance, pin.clone()));
                Response::Created {
                    account: account_name,
                    initial_balance,
                    pin,
                }
            }
            AccountCommand::Inspect { account } => {
                account.authenticate(request.pin.as_ref())?;
                Response::Balance {
                    account: account_name,
                    balance: account.balance(),
                }
            }
            AccountCommand::Transact { account, command } => {
                account.authenticate(request.pin.as_ref())?;
                let evt = account.handle_transaction(&command)?;
                account.apply(&evt);
                let balance = account.balance();
                match command.action {
                    TransactionAction::Deposit => Response::Deposited {
                        account: account_name,
                        deposit: evt.amount(),
                        balance,
                    },
                    TransactionAction::Withdraw => Response::Withdrawn {
                        account: account_name,
                        withdraw: evt.amount(),
                        balance,
                    },
                }
            }
        };
        drop(accounts);

        info!(account = %request.account, operation = request.operation.name(), "Executed");
        Ok(response)
    }
}
