use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::keys::KeyMaterial;

use super::{
    ChannelError,
    frame::{self, Decoded, FRAME_LEN, Frame, Nonce},
};

/// A reader whose next blocking read can be bounded.
pub trait TimedRead: Read {
    fn limit_next_read(&mut self, timeout: Duration) -> io::Result<()>;
}

impl TimedRead for TcpStream {
    fn limit_next_read(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }
}

/// Reads one whole frame, which must arrive within `timeout` in total.
/// A peer that closes early yields [`ChannelError::Truncated`].
pub fn read_frame<R: TimedRead>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Frame, ChannelError> {
    let deadline = Instant::now() + timeout;
    let mut frame = [0u8; FRAME_LEN];
    let mut filled = 0;
    while filled < FRAME_LEN {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::Timeout);
        }
        reader.limit_next_read(remaining)?;
        match reader.read(&mut frame[filled..]) {
            Ok(0) => return Err(ChannelError::Truncated { len: filled }),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ChannelError::Timeout);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(frame)
}

fn prepare(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)
}

/// Terminal side: connect, send `message`, and return the authenticated reply bound to it.
pub fn exchange(
    addr: SocketAddr,
    message: &[u8],
    keys: &KeyMaterial,
    timeout: Duration,
) -> Result<Vec<u8>, ChannelError> {
    let (request, nonce) = frame::encode(message, keys)?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|source| ChannelError::Connect { addr, source })?;
    prepare(&stream, timeout)?;
    stream.write_all(&request)?;
    stream.flush()?;
    debug!(%addr, %nonce, "Sent request frame");

    let reply = read_frame(&mut stream, timeout)?;
    let Decoded { message, .. } = frame::decode(&reply, keys, Some(&nonce))?;
    Ok(message)
}

/// Bank side of one exchange on an accepted connection.
pub struct Connection {
    stream: TcpStream,
    timeout: Duration,
}

impl Connection {
    pub fn new(stream: TcpStream, timeout: Duration) -> Result<Self, ChannelError> {
        prepare(&stream, timeout)?;
        Ok(Self { stream, timeout })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Reads and opens the request frame. Its nonce must be echoed by [`Connection::reply`].
    pub fn receive(&mut self, keys: &KeyMaterial) -> Result<Decoded, ChannelError> {
        let request = read_frame(&mut self.stream, self.timeout)?;
        frame::decode(&request, keys, None)
    }

    pub fn reply(
        &mut self,
        message: &[u8],
        nonce: &Nonce,
        keys: &KeyMaterial,
    ) -> Result<(), ChannelError> {
        let reply = frame::encode_with_nonce(message, nonce, keys)?;
        self.stream.write_all(&reply)?;
        self.stream.flush()?;
        debug!(%nonce, "Sent reply frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, net::TcpListener, thread};

    use crate::keys::tests::test_keys;

    use super::*;

    /// Hands out at most `chunk` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl TimedRead for Trickle<'_> {
        fn limit_next_read(&mut self, _: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    impl TimedRead for Cursor<Vec<u8>> {
        fn limit_next_read(&mut self, _: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn read_frame_fills_whole_frame() {
        let data = [7u8; FRAME_LEN];
        let frame = read_frame(
            &mut Trickle {
                data: &data,
                chunk: 100,
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(frame, data);
    }

    #[test]
    fn read_frame_reports_short_input() {
        let timeout = Duration::from_secs(1);
        let err = read_frame(&mut Cursor::new(vec![1u8; 10]), timeout).unwrap_err();
        assert!(matches!(err, ChannelError::Truncated { len: 10 }));

        let err = read_frame(&mut Cursor::new(Vec::new()), timeout).unwrap_err();
        assert!(matches!(err, ChannelError::Truncated { len: 0 }));
    }

    #[test]
    fn exchange_over_loopback() {
        let keys = test_keys();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_keys = keys.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut connection = Connection::new(stream, Duration::from_secs(5)).unwrap();
            let request = connection.receive(&server_keys).unwrap();
            assert_eq!(request.message, b"ping");
            connection
                .reply(b"pong", &request.nonce, &server_keys)
                .unwrap();
        });

        let reply = exchange(addr, b"ping", &keys, Duration::from_secs(5)).unwrap();
        assert_eq!(reply, b"pong");
        server.join().unwrap();
    }

    #[test]
    fn reply_with_foreign_nonce_is_rejected() {
        let keys = test_keys();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_keys = keys.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut connection = Connection::new(stream, Duration::from_secs(5)).unwrap();
            connection.receive(&server_keys).unwrap();
            connection
                .reply(b"pong", &Nonce::generate(), &server_keys)
                .unwrap();
        });

        let err = exchange(addr, b"ping", &keys, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ChannelError::NonceMismatch));
        server.join().unwrap();
    }

    #[test]
    fn silent_bank_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let err = exchange(addr, b"ping", &test_keys(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        server.join().unwrap();
    }

    /// Writes `frame` in 64-byte pieces, pausing between them, until done or the peer is gone.
    fn dribble(stream: &mut TcpStream, frame: &[u8]) {
        for piece in frame.chunks(64) {
            if stream.write_all(piece).is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(200));
        }
    }

    #[test]
    fn dribbled_reply_times_out_as_a_whole() {
        let keys = test_keys();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_keys = keys.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut connection = Connection::new(stream, Duration::from_secs(5)).unwrap();
            let request = connection.receive(&server_keys).unwrap();
            let reply = frame::encode_with_nonce(b"pong", &request.nonce, &server_keys).unwrap();
            dribble(&mut connection.stream, &reply);
        });

        let started = Instant::now();
        let err = exchange(addr, b"ping", &keys, Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        server.join().unwrap();
    }

    #[test]
    fn dribbled_request_does_not_hold_the_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (request, _) = frame::encode(b"ping", &test_keys()).unwrap();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            dribble(&mut stream, &request);
        });

        let (stream, _) = listener.accept().unwrap();
        let mut connection = Connection::new(stream, Duration::from_millis(300)).unwrap();
        let started = Instant::now();
        let err = connection.receive(&test_keys()).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(connection);
        client.join().unwrap();
    }

    #[test]
    fn unreachable_bank_fails_to_connect() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = exchange(addr, b"ping", &test_keys(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChannelError::Connect { .. }));
    }
}
