use std::fmt;

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::validation::{ValidationError, validate_account_name};

/// Length of a bank-issued PIN, in characters.
pub const PIN_LEN: usize = 32;

/// Money in minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // u64 cents always fit in Decimal's 96-bit mantissa
        let value = Decimal::from_i128_with_scale(i128::from(self.0), 2);
        write!(f, "{value}")
    }
}

/// Account name already checked against the account name rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl AccountName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_account_name(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for AccountName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<AccountName> for String {
    fn from(value: AccountName) -> Self {
        value.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret shared between a card and the bank. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    /// Draws a fresh PIN for a new account.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PIN_LEN / 2];
        rand::rngs::OsRng.fill(&mut bytes);
        let pin = Self(hex::encode(bytes));
        bytes.zeroize();
        pin
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(|s| Self(s.to_owned()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &Pin) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create { initial_balance: Amount },
    Query,
    Deposit { amount: Amount },
    Withdraw { amount: Amount },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Query => "query",
            Operation::Deposit { .. } => "deposit",
            Operation::Withdraw { .. } => "withdraw",
        }
    }
}

/// One validated request from a terminal. `pin` is `None` only when creating an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub account: AccountName,
    pub operation: Operation,
    pub pin: Option<Pin>,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Request must carry exactly one operation, found {found}")]
    OperationCount { found: usize },
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON shape of a request inside a frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireRequest {
    pub account: AccountName,
    pub new: Option<Amount>,
    pub get: Option<bool>,
    pub deposit: Option<Amount>,
    pub withdraw: Option<Amount>,
    pub pin: Option<Pin>,
}

impl From<&Request> for WireRequest {
    fn from(request: &Request) -> Self {
        let mut wire = WireRequest {
            account: request.account.clone(),
            new: None,
            get: None,
            deposit: None,
            withdraw: None,
            pin: request.pin.clone(),
        };
        match request.operation {
            Operation::Create { initial_balance } => wire.new = Some(initial_balance),
            Operation::Query => wire.get = Some(true),
            Operation::Deposit { amount } => wire.deposit = Some(amount),
            Operation::Withdraw { amount } => wire.withdraw = Some(amount),
        }
        wire
    }
}

impl TryFrom<WireRequest> for Request {
    type Error = MessageError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let mut operations = Vec::with_capacity(1);
        if let Some(initial_balance) = wire.new {
            operations.push(Operation::Create { initial_balance });
        }
        if wire.get == Some(true) {
            operations.push(Operation::Query);
        }
        if let Some(amount) = wire.deposit {
            operations.push(Operation::Deposit { amount });
        }
        if let Some(amount) = wire.withdraw {
            operations.push(Operation::Withdraw { amount });
        }
        let [operation] = operations.as_slice() else {
            return Err(MessageError::OperationCount {
                found: operations.len(),
            });
        };
        Ok(Request {
            account: wire.account,
            operation: *operation,
            pin: wire.pin,
        })
    }
}

impl Request {
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(&WireRequest::from(self))?)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, MessageError> {
        let wire: WireRequest = serde_json::from_slice(payload)?;
        Request::try_from(wire)
    }
}

/// Bank reply. Failures carry no detail over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Response {
    Created {
        account: AccountName,
        initial_balance: Amount,
        pin: Pin,
    },
    Balance {
        account: AccountName,
        balance: Amount,
    },
    Deposited {
        account: AccountName,
        deposit: Amount,
        balance: Amount,
    },
    Withdrawn {
        account: AccountName,
        withdraw: Amount,
        balance: Amount,
    },
    Failure,
}

impl Response {
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn account(&self) -> Option<&AccountName> {
        match self {
            Response::Created { account, .. }
            | Response::Balance { account, .. }
            | Response::Deposited { account, .. }
            | Response::Withdrawn { account, .. } => Some(account),
            Response::Failure => None,
        }
    }

    /// Whether this reply is the kind of success `operation` should produce.
    pub fn answers(&self, request: &Request) -> bool {
        let kind_matches = matches!(
            (self, request.operation),
            (Response::Created { .. }, Operation::Create { .. })
                | (Response::Balance { .. }, Operation::Query)
                | (Response::Deposited { .. }, Operation::Deposit { .. })
                | (Response::Withdrawn { .. }, Operation::Withdraw { .. })
        );
        kind_matches && self.account() == Some(&request.account)
    }

    /// Single-line JSON transaction summary, amounts with two decimals, PIN omitted.
    pub fn summary(&self) -> Option<String> {
        let (account, key, amount) = match self {
            Response::Created {
                account,
                initial_balance,
                ..
            } => (account, "initial_balance", initial_balance),
            Response::Balance { account, balance } => (account, "balance", balance),
            Response::Deposited {
                account, deposit, ..
            } => (account, "deposit", deposit),
            Response::Withdrawn {
                account, withdraw, ..
            } => (account, "withdraw", withdraw),
            Response::Failure => return None,
        };
        let account = serde_json::Value::String(account.to_string());
        Some(format!("{{\"account\":{account},\"{key}\":{amount}}}"))
    }
}
