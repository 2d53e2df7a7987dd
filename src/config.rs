use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_PORT: &str = "3000";
pub const DEFAULT_IP_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_AUTH_FILE: &str = "bank.auth";
pub const CARD_SUFFIX: &str = ".card";

/// How long either side waits for the peer's frame.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings of the bank process.
#[derive(Debug, Clone)]
pub struct BankConfig {
    pub port: u16,
    pub auth_file: PathBuf,
    pub timeout: Duration,
}

impl BankConfig {
    pub fn new(port: u16, auth_file: PathBuf) -> Self {
        Self {
            port,
            auth_file,
            timeout: EXCHANGE_TIMEOUT,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port))
    }
}
