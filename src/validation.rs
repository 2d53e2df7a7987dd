use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

use crate::message::{AccountName, Amount, Operation};

/// Upper bound on every externally supplied string.
pub const MAX_ARGUMENT_LEN: usize = 4096;

/// Smallest balance an account can be opened with ($10.00).
pub const MIN_INITIAL_BALANCE: Amount = Amount::from_cents(1000);

/// Largest amount accepted from the outside (4294967295.99).
pub const MAX_AMOUNT: Amount = Amount::from_cents(429_496_729_599);

static ACCOUNT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[_\-.0-9a-z]{1,250}$").expect("static regex"));
static FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[_\-.0-9a-z]{1,255}$").expect("static regex"));
static AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0|[1-9][0-9]*)\.[0-9]{2}$").expect("static regex"));
static IP_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,3})\.([0-9]{1,3})\.([0-9]{1,3})\.([0-9]{1,3})$").expect("static regex")
});
static PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]{3,4}$").expect("static regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Argument for {field} is longer than 4096 bytes")]
    TooLong { field: &'static str },
    #[error("Account name is required")]
    MissingAccount,
    #[error("Invalid account name")]
    InvalidAccountName,
    #[error("Invalid amount `{0}`")]
    InvalidAmount(String),
    #[error("Initial balance must be at least 10.00")]
    InitialBalanceTooLow,
    #[error("{action} amount must be greater than zero")]
    ZeroAmount { action: &'static str },
    #[error("Invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("Invalid IP address `{0}`")]
    InvalidIpAddress(String),
    #[error("Invalid port `{0}`")]
    InvalidPort(String),
    #[error("Exactly one of new, get, deposit or withdraw is required, got {found}")]
    OperationCount { found: usize },
}

fn check_length(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_ARGUMENT_LEN {
        Err(ValidationError::TooLong { field })
    } else {
        Ok(())
    }
}

pub fn validate_account_name(name: &str) -> Result<(), ValidationError> {
    if ACCOUNT_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAccountName)
    }
}

/// `.` and `..` are valid account names but never valid file names.
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    if name != "." && name != ".." && FILE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFileName(name.to_owned()))
    }
}

/// Parses `whole.cc` into minor units. Goes through [`Decimal`] so no float rounding happens.
pub fn parse_amount(value: &str) -> Result<Amount, ValidationError> {
    let invalid = || ValidationError::InvalidAmount(value.to_owned());
    if !AMOUNT.is_match(value) {
        return Err(invalid());
    }
    // long digit strings overflow Decimal, which is out of range anyway
    let decimal = Decimal::from_str(value).map_err(|_| invalid())?;
    let cents = decimal
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_u64())
        .ok_or_else(invalid)?;
    let amount = Amount::from_cents(cents);
    if amount > MAX_AMOUNT {
        return Err(invalid());
    }
    Ok(amount)
}

pub fn parse_ip_address(value: &str) -> Result<Ipv4Addr, ValidationError> {
    let invalid = || ValidationError::InvalidIpAddress(value.to_owned());
    let captures = IP_ADDRESS.captures(value).ok_or_else(invalid)?;
    let mut octets = [0u8; 4];
    for (octet, group) in octets.iter_mut().zip(captures.iter().skip(1)) {
        let group = group.ok_or_else(invalid)?;
        *octet = group.as_str().parse().map_err(|_| invalid())?;
    }
    Ok(Ipv4Addr::from(octets))
}

pub fn parse_port(value: &str) -> Result<u16, ValidationError> {
    let invalid = || ValidationError::InvalidPort(value.to_owned());
    if !PORT.is_match(value) {
        return Err(invalid());
    }
    let port: u16 = value.parse().map_err(|_| invalid())?;
    if port < 1024 {
        return Err(invalid());
    }
    Ok(port)
}

/// Terminal arguments exactly as the user typed them.
#[derive(Debug, Clone)]
pub struct RawInvocation {
    pub account: Option<String>,
    pub new: Option<String>,
    pub deposit: Option<String>,
    pub withdraw: Option<String>,
    pub get: bool,
    pub ip_address: String,
    pub port: String,
    pub auth_file: String,
    pub card_file: Option<String>,
}

/// Everything a terminal needs to run one exchange.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub account: AccountName,
    pub operation: Operation,
    pub bank: SocketAddrV4,
    pub auth_file: PathBuf,
    pub card_file: Option<PathBuf>,
}

impl RawInvocation {
    pub fn validate(&self) -> Result<Invocation, ValidationError> {
        let optional = [
            ("account", &self.account),
            ("new", &self.new),
            ("deposit", &self.deposit),
            ("withdraw", &self.withdraw),
            ("card", &self.card_file),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                check_length(field, value)?;
            }
        }
        check_length("ip", &self.ip_address)?;
        check_length("port", &self.port)?;
        check_length("auth", &self.auth_file)?;

        let account = self
            .account
            .as_deref()
            .ok_or(ValidationError::MissingAccount)
            .and_then(AccountName::try_from)?;

        let found = [
            self.new.is_some(),
            self.deposit.is_some(),
            self.withdraw.is_some(),
            self.get,
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        if found != 1 {
            return Err(ValidationError::OperationCount { found });
        }

        let ip = parse_ip_address(&self.ip_address)?;
        let port = parse_port(&self.port)?;
        validate_file_name(&self.auth_file)?;
        if let Some(card) = &self.card_file {
            validate_file_name(card)?;
        }

        let operation = if let Some(new) = &self.new {
            let initial_balance = parse_amount(new)?;
            if initial_balance < MIN_INITIAL_BALANCE {
                return Err(ValidationError::InitialBalanceTooLow);
            }
            Operation::Create { initial_balance }
        } else if let Some(deposit) = &self.deposit {
            Operation::Deposit {
                amount: parse_positive(deposit, "Deposit")?,
            }
        } else if let Some(withdraw) = &self.withdraw {
            Operation::Withdraw {
                amount: parse_positive(withdraw, "Withdrawal")?,
            }
        } else {
            Operation::Query
        };

        Ok(Invocation {
            account,
            operation,
            bank: SocketAddrV4::new(ip, port),
            auth_file: PathBuf::from(&self.auth_file),
            card_file: self.card_file.as_ref().map(PathBuf::from),
        })
    }
}

fn parse_positive(value: &str, action: &'static str) -> Result<Amount, ValidationError> {
    let amount = parse_amount(value)?;
    if amount == Amount::ZERO {
        return Err(ValidationError::ZeroAmount { action });
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn raw() -> RawInvocation {
        RawInvocation {
            account: Some("alice".to_owned()),
            new: None,
            deposit: None,
            withdraw: None,
            get: true,
            ip_address: "127.0.0.1".to_owned(),
            port: "3000".to_owned(),
            auth_file: "bank.auth".to_owned(),
            card_file: None,
        }
    }

    #[rstest]
    #[case("a", true)]
    #[case(".", true)]
    #[case("..", true)]
    #[case("my_account-1.x", true)]
    #[case(&"a".repeat(250), true)]
    #[case(&"a".repeat(251), false)]
    #[case("", false)]
    #[case("Alice", false)]
    #[case("al ice", false)]
    #[case("alice\n", false)]
    fn account_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_account_name(name).is_ok(), valid);
    }

    #[rstest]
    #[case("alice.card", true)]
    #[case(&"f".repeat(255), true)]
    #[case(&"f".repeat(256), false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("...", true)]
    #[case("dir/alice.card", false)]
    fn file_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_file_name(name).is_ok(), valid);
    }

    #[rstest]
    #[case("0.00", Some(0))]
    #[case("0.05", Some(5))]
    #[case("10.00", Some(1000))]
    #[case("9.99", Some(999))]
    #[case("4294967295.99", Some(429_496_729_599))]
    #[case("4294967296.00", None)]
    #[case("99999999999999999999999999999999.00", None)]
    #[case("79228162514264337593543950335.00", None)]
    #[case("01.00", None)]
    #[case("1.0", None)]
    #[case("1", None)]
    #[case("-1.00", None)]
    #[case("1.000", None)]
    #[case(" 1.00", None)]
    fn amounts(#[case] value: &str, #[case] cents: Option<u64>) {
        assert_eq!(parse_amount(value).ok(), cents.map(Amount::from_cents));
    }

    #[rstest]
    #[case("127.0.0.1", Some(Ipv4Addr::LOCALHOST))]
    #[case("255.255.255.255", Some(Ipv4Addr::BROADCAST))]
    #[case("010.0.0.1", Some(Ipv4Addr::new(10, 0, 0, 1)))]
    #[case("256.0.0.1", None)]
    #[case("1.2.3", None)]
    #[case("1.2.3.4.5", None)]
    #[case("localhost", None)]
    fn ip_addresses(#[case] value: &str, #[case] expected: Option<Ipv4Addr>) {
        assert_eq!(parse_ip_address(value).ok(), expected);
    }

    #[rstest]
    #[case("1024", Some(1024))]
    #[case("3000", Some(3000))]
    #[case("65535", Some(65535))]
    #[case("65536", None)]
    #[case("1023", None)]
    #[case("0300", None)]
    #[case("80", None)]
    #[case("123456", None)]
    fn ports(#[case] value: &str, #[case] expected: Option<u16>) {
        assert_eq!(parse_port(value).ok(), expected);
    }

    #[test]
    fn query_invocation() {
        let invocation = raw().validate().unwrap();
        assert_eq!(invocation.account.as_str(), "alice");
        assert_eq!(invocation.operation, Operation::Query);
        assert_eq!(invocation.bank, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(invocation.card_file, None);
    }

    #[test]
    fn create_requires_ten_dollars() {
        let mut invocation = RawInvocation {
            get: false,
            new: Some("9.99".to_owned()),
            ..raw()
        };
        assert_eq!(
            invocation.validate().unwrap_err(),
            ValidationError::InitialBalanceTooLow
        );

        invocation.new = Some("10.00".to_owned());
        assert_eq!(
            invocation.validate().unwrap().operation,
            Operation::Create {
                initial_balance: Amount::from_cents(1000)
            }
        );
    }

    #[test]
    fn deposit_and_withdraw_must_be_positive() {
        let deposit = RawInvocation {
            get: false,
            deposit: Some("0.00".to_owned()),
            ..raw()
        };
        assert_eq!(
            deposit.validate().unwrap_err(),
            ValidationError::ZeroAmount { action: "Deposit" }
        );

        let withdraw = RawInvocation {
            get: false,
            withdraw: Some("0.01".to_owned()),
            ..raw()
        };
        assert_eq!(
            withdraw.validate().unwrap().operation,
            Operation::Withdraw {
                amount: Amount::from_cents(1)
            }
        );
    }

    #[test]
    fn exactly_one_operation() {
        let none = RawInvocation { get: false, ..raw() };
        assert_eq!(
            none.validate().unwrap_err(),
            ValidationError::OperationCount { found: 0 }
        );

        let two = RawInvocation {
            deposit: Some("1.00".to_owned()),
            ..raw()
        };
        assert_eq!(
            two.validate().unwrap_err(),
            ValidationError::OperationCount { found: 2 }
        );

        let three = RawInvocation {
            get: false,
            new: Some("10.00".to_owned()),
            deposit: Some("1.00".to_owned()),
            withdraw: Some("1.00".to_owned()),
            ..raw()
        };
        assert_eq!(
            three.validate().unwrap_err(),
            ValidationError::OperationCount { found: 3 }
        );
    }

    #[test]
    fn rejects_oversized_arguments() {
        let long = RawInvocation {
            card_file: Some("c".repeat(MAX_ARGUMENT_LEN + 1)),
            ..raw()
        };
        assert_eq!(
            long.validate().unwrap_err(),
            ValidationError::TooLong { field: "card" }
        );
    }

    #[test]
    fn missing_account_and_bad_card() {
        let missing = RawInvocation {
            account: None,
            ..raw()
        };
        assert_eq!(
            missing.validate().unwrap_err(),
            ValidationError::MissingAccount
        );

        let dot_card = RawInvocation {
            card_file: Some("..".to_owned()),
            ..raw()
        };
        assert!(matches!(
            dot_card.validate().unwrap_err(),
            ValidationError::InvalidFileName(_)
        ));
    }
}
