use std::{
    collections::{HashSet, VecDeque},
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    channel::{ChannelError, frame::Nonce, transport::Connection},
    keys::KeyMaterial,
    ledger::AccountLedger,
    message::{Request, Response},
};

#[derive(Debug, Error)]
pub enum BankError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Nonces remembered by a bank before the oldest are forgotten.
pub const REPLAY_CAPACITY: usize = 1 << 16;

/// The most recent request nonces that were accepted, oldest evicted first.
pub struct ReplayCache {
    seen: Mutex<SeenNonces>,
}

struct SeenNonces {
    capacity: usize,
    set: HashSet<Nonce>,
    order: VecDeque<Nonce>,
}

impl ReplayCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(SeenNonces {
                capacity: capacity.max(1),
                set: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns `false` when `nonce` is still remembered from an earlier request.
    pub fn admit(&self, nonce: Nonce) -> bool {
        let mut seen = self.seen.lock();
        if !seen.set.insert(nonce) {
            return false;
        }
        seen.order.push_back(nonce);
        if seen.order.len() > seen.capacity
            && let Some(oldest) = seen.order.pop_front()
        {
            seen.set.remove(&oldest);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::with_capacity(REPLAY_CAPACITY)
    }
}

/// Called once per exchange with its outcome, from the worker that served it.
pub type ExchangeObserver = dyn Fn(&Result<Response, ChannelError>) + Send + Sync;

/// Writes the line the bank prints for one exchange: the summary of a served
/// request, nothing for a refusal, `protocol_error` when the exchange broke down.
pub fn report_outcome<W: io::Write>(
    out: &mut W,
    outcome: &Result<Response, ChannelError>,
) -> io::Result<()> {
    match outcome {
        Ok(response) => match response.summary() {
            Some(summary) => writeln!(out, "{summary}"),
            None => Ok(()),
        },
        Err(_) => writeln!(out, "protocol_error"),
    }
}

/// Everything a worker needs, shared between all of them.
pub struct Bank<L> {
    keys: KeyMaterial,
    ledger: Arc<L>,
    replay: ReplayCache,
    timeout: Duration,
    observer: Box<ExchangeObserver>,
}

impl<L> Bank<L>
where
    L: AccountLedger,
{
    pub fn new(keys: KeyMaterial, ledger: Arc<L>, timeout: Duration) -> Self {
        Self {
            keys,
            ledger,
            replay: ReplayCache::default(),
            timeout,
            observer: Box::new(|_| {}),
        }
    }

    pub fn with_observer(
        mut self,
        observer: impl Fn(&Result<Response, ChannelError>) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Serves one exchange. Transport failures end the connection without a reply.
    pub fn handle_connection(&self, stream: TcpStream) -> Result<Response, ChannelError> {
        let (outcome, connection) = match Connection::new(stream, self.timeout) {
            Ok(mut connection) => (self.exchange(&mut connection), Some(connection)),
            Err(err) => (Err(err), None),
        };
        // observed before the peer can see the connection close
        (self.observer)(&outcome);
        drop(connection);
        outcome
    }

    fn exchange(&self, connection: &mut Connection) -> Result<Response, ChannelError> {
        let incoming = connection.receive(&self.keys)?;
        if !self.replay.admit(incoming.nonce) {
            return Err(ChannelError::Replay);
        }
        let request = Request::from_json(&incoming.message)?;

        // the ledger lock is taken and released inside execute, away from any crypto
        let response = match self.ledger.execute(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(account = %request.account, operation = request.operation.name(), "{err}");
                Response::Failure
            }
        };
        connection.reply(&response.to_json()?, &incoming.nonce, &self.keys)?;
        Ok(response)
    }
}

/// Accepts connections forever, one worker thread per connection.
pub struct BankServer<L> {
    listener: TcpListener,
    bank: Arc<Bank<L>>,
}

impl<L> BankServer<L>
where
    L: AccountLedger + 'static,
{
    pub fn bind(addr: SocketAddr, bank: Bank<L>) -> Result<Self, BankError> {
        let listener = TcpListener::bind(addr).map_err(|source| BankError::Bind { addr, source })?;
        Ok(Self {
            listener,
            bank: Arc::new(bank),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn serve(self) -> Result<(), BankError> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if is_transient(&err) => {
                    warn!("Dropped incoming connection: {err}");
                    continue;
                }
                Err(err) => return Err(BankError::Accept(err)),
            };
            debug!(%peer, "Accepted connection");
            let bank = Arc::clone(&self.bank);
            let spawned = thread::Builder::new()
                .name(format!("exchange-{peer}"))
                .spawn(move || {
                    if let Err(err) = bank.handle_connection(stream) {
                        warn!(%peer, "Exchange failed: {err}");
                    }
                });
            if let Err(err) = spawned {
                error!(%peer, "Failed to spawn worker: {err}");
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
    };

    use crate::{
        channel::frame::{self, FRAME_LEN},
        keys::tests::test_keys,
        ledger::in_memory_ledger::InMemoryLedger,
        message::{AccountName, Amount, Operation},
    };

    use super::*;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn bank() -> Bank<InMemoryLedger> {
        Bank::new(
            test_keys(),
            Arc::new(InMemoryLedger::default()),
            Duration::from_secs(5),
        )
    }

    fn create_frame() -> [u8; FRAME_LEN] {
        let request = Request {
            account: AccountName::try_from("alice").unwrap(),
            operation: Operation::Create {
                initial_balance: Amount::from_cents(1000),
            },
            pin: None,
        };
        frame::encode(&request.to_json().unwrap(), &test_keys())
            .unwrap()
            .0
    }

    #[test]
    fn reported_lines() {
        let mut out = Vec::new();
        let created = Response::Created {
            account: AccountName::try_from("alice").unwrap(),
            initial_balance: Amount::from_cents(1000),
            pin: crate::message::Pin::generate(),
        };
        report_outcome(&mut out, &Ok(created)).unwrap();
        report_outcome(&mut out, &Ok(Response::Failure)).unwrap();
        report_outcome(&mut out, &Err(ChannelError::IntegrityViolation)).unwrap();
        report_outcome(
            &mut out,
            &Ok(Response::Withdrawn {
                account: AccountName::try_from("alice").unwrap(),
                withdraw: Amount::from_cents(250),
                balance: Amount::from_cents(750),
            }),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            concat!(
                "{\"account\":\"alice\",\"initial_balance\":10.00}\n",
                "protocol_error\n",
                "{\"account\":\"alice\",\"withdraw\":2.50}\n",
            )
        );
    }

    #[test]
    fn replay_cache_admits_once() {
        let cache = ReplayCache::default();
        let nonce = Nonce::generate();
        assert!(cache.admit(nonce));
        assert!(!cache.admit(nonce));
        assert!(cache.admit(Nonce::generate()));
    }

    #[test]
    fn replay_cache_forgets_oldest_beyond_capacity() {
        let cache = ReplayCache::with_capacity(2);
        let [first, second, third] = [Nonce::generate(), Nonce::generate(), Nonce::generate()];
        assert!(cache.admit(first));
        assert!(cache.admit(second));
        assert!(cache.admit(third));
        assert_eq!(cache.len(), 2);

        assert!(!cache.admit(second));
        assert!(!cache.admit(third));
        // evicted, so admitted again
        assert!(cache.admit(first));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn serves_one_exchange() {
        let bank = bank();
        let (mut client, server) = connected_pair();
        let request = create_frame();
        client.write_all(&request).unwrap();

        let response = bank.handle_connection(server).unwrap();
        assert!(matches!(response, Response::Created { .. }));

        let mut reply = [0u8; FRAME_LEN];
        client.read_exact(&mut reply).unwrap();
        let decoded = frame::decode(&reply, &test_keys(), None).unwrap();
        assert_eq!(Response::from_json(&decoded.message).unwrap(), response);
        assert_eq!(
            bank.ledger().balance(&AccountName::try_from("alice").unwrap()),
            Some(Amount::from_cents(1000))
        );
    }

    #[test]
    fn corrupted_frame_gets_no_reply() {
        let bank = bank();
        let (mut client, server) = connected_pair();
        let mut request = create_frame();
        request[700] ^= 0x01;
        client.write_all(&request).unwrap();

        let err = bank.handle_connection(server).unwrap_err();
        assert!(matches!(err, ChannelError::IntegrityViolation));
        assert!(bank.ledger().is_empty());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn replayed_frame_is_not_executed_twice() {
        let bank = bank();
        let request = create_frame();

        let (mut client, server) = connected_pair();
        client.write_all(&request).unwrap();
        assert!(bank.handle_connection(server).is_ok());

        let (mut client, server) = connected_pair();
        client.write_all(&request).unwrap();
        let err = bank.handle_connection(server).unwrap_err();
        assert!(matches!(err, ChannelError::Replay));
        assert_eq!(bank.ledger().len(), 1);
    }

    #[test]
    fn business_failure_is_an_opaque_reply() {
        let bank = bank();
        for expected_created in [true, false] {
            let (mut client, server) = connected_pair();
            client.write_all(&create_frame()).unwrap();
            let response = bank.handle_connection(server).unwrap();
            assert_eq!(matches!(response, Response::Created { .. }), expected_created);
        }
    }

    #[test]
    fn observer_sees_every_outcome() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let bank = bank().with_observer(move |outcome| sink.lock().push(outcome.is_ok()));

        let (mut client, server) = connected_pair();
        client.write_all(&create_frame()).unwrap();
        bank.handle_connection(server).unwrap();

        let (mut client, server) = connected_pair();
        client.write_all(&[0u8; 10]).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        assert!(matches!(
            bank.handle_connection(server).unwrap_err(),
            ChannelError::Truncated { len: 10 }
        ));

        assert_eq!(*seen.lock(), vec![true, false]);
    }
}
