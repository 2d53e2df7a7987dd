/// Checks on externally supplied arguments before anything reaches crypto or the ledger.
pub mod validation;

/// Shared secret loading and bootstrap, plus the AES-CFB and HMAC-MD5 primitives keyed by it.
pub mod keys;

/// PIN sealing into, and recovery from, card files.
pub mod card;

/// Authenticated, encrypted, fixed-size frames and the one-shot TCP exchange carrying them.
pub mod channel;

/// Requests, responses and their JSON wire shapes.
pub mod message;

/// Per-account balance logic. State changes only by applying events,
/// which are created by handling commands.
pub mod account;

/// Resolves a request against the ledger entry it targets, producing an [`account`] command.
pub mod command;

/// Account ledger interface, plus the lock-guarded "in memory" implementation.
pub mod ledger;

/// Bank process role: accept loop, per-connection workers and replay protection.
pub mod bank;

/// Terminal process role: one exchange per invocation.
pub mod terminal;

pub mod config;

pub mod logging;
