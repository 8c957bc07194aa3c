//! A single framed connection to one memcached server.

use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::error::{Error, Result};

/// Lines longer than this are almost certainly a desynchronised stream, not
/// a legitimate reply; bail out rather than growing the scratch buffer
/// without bound.
const MAX_LINE_LEN: usize = 16 * 1024;

enum ConnectionState {
    Open,
    Closed,
}

/// One live, framed connection. Created by [`crate::pool::SocketPool`] on
/// demand, leased to exactly one caller at a time.
pub struct PooledConnection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    scratch: BytesMut,
    created_at: Instant,
    state: ConnectionState,
    io_timeout: Duration,
}

/// Classification of a single reply line returned by `read_response`.
pub enum Response {
    Line(String),
    ServerRejected(String),
}

impl PooledConnection {
    pub fn connect(addr: SocketAddr, io_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(PooledConnection {
            stream,
            reader,
            scratch: BytesMut::with_capacity(256),
            created_at: Instant::now(),
            state: ConnectionState::Open,
            io_timeout,
        })
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Writes `bytes` and flushes synchronously.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads until CRLF, returning the line without the terminator.
    /// Tolerates a bare CR followed by a non-LF byte by emitting the CR and
    /// continuing.
    pub fn read_line(&mut self) -> Result<String> {
        self.scratch.clear();
        let mut byte = [0u8; 1];
        loop {
            if self.scratch.len() >= MAX_LINE_LEN {
                return Err(Error::ProtocolError("reply line too long".into()));
            }
            self.reader.read_exact(&mut byte)?;
            match byte[0] {
                b'\r' => {
                    self.reader.read_exact(&mut byte)?;
                    if byte[0] == b'\n' {
                        break;
                    }
                    self.scratch.extend_from_slice(b"\r");
                    self.scratch.extend_from_slice(&byte);
                }
                b'\n' => break,
                b => self.scratch.extend_from_slice(&[b]),
            }
        }
        String::from_utf8(self.scratch.to_vec())
            .map_err(|_| Error::ProtocolError("reply line was not valid utf-8".into()))
    }

    /// Reads exactly `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Discards bytes up to and including the next CRLF.
    pub fn skip_line(&mut self) -> Result<()> {
        self.read_line().map(|_| ())
    }

    /// Reads one reply line and classifies it.
    pub fn read_response(&mut self) -> Result<Response> {
        let line = self.read_line()?;
        if line.is_empty() {
            return Err(Error::ProtocolError("empty reply line".into()));
        }
        if line.starts_with("ERROR") || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
            return Ok(Response::ServerRejected(line));
        }
        Ok(Response::Line(line))
    }

    /// True only if the socket still looks connected and readable: a
    /// zero-byte, non-blocking peek that returns `WouldBlock` means alive; an
    /// immediate `Ok(0)` means the peer closed the connection.
    pub fn is_alive(&self) -> bool {
        if matches!(self.state, ConnectionState::Closed) {
            return false;
        }
        // SO_RCVTIMEO lives on the underlying socket, not the fd handle, so
        // the zero-timeout probe below must be undone afterwards even
        // though it's issued through a cloned handle.
        let mut probe = [0u8; 1];
        let clone = match self.stream.try_clone() {
            Ok(c) => c,
            Err(_) => return false,
        };
        if clone.set_read_timeout(Some(Duration::from_millis(0))).is_err() {
            return false;
        }
        let alive = match clone.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => true,
            Err(_) => false,
        };
        let _ = clone.set_read_timeout(Some(self.io_timeout));
        alive
    }

    /// Returns true if the server has sent bytes beyond what the caller
    /// consumed (a protocol desync). Checks both the already-buffered
    /// reader contents and, if that's empty, peeks the socket itself with a
    /// zero-timeout read so bytes still sitting in the kernel buffer are
    /// also caught. Used by the pool's drain-on-return guard.
    pub fn has_pending_bytes(&mut self) -> bool {
        if !self.reader.buffer().is_empty() {
            return true;
        }
        let mut probe = [0u8; 1];
        if self.stream.set_read_timeout(Some(Duration::from_millis(0))).is_err() {
            return false;
        }
        let pending = matches!(self.stream.peek(&mut probe), Ok(n) if n > 0);
        let _ = self.stream.set_read_timeout(Some(self.io_timeout));
        pending
    }

    /// Discards any bytes left over from a protocol desync: first whatever
    /// is already buffered by the reader, then anything still sitting on
    /// the socket itself.
    pub fn drain_buffered(&mut self) -> usize {
        let mut drained = self.reader.buffer().len();
        self.reader.consume(drained);

        if self.stream.set_read_timeout(Some(Duration::from_millis(0))).is_ok() {
            let mut buf = [0u8; 4096];
            while let Ok(n) = self.stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                drained += n;
            }
        }
        let _ = self.stream.set_read_timeout(Some(self.io_timeout));
        drained
    }

    /// Gracefully shuts down both directions, swallowing errors, and marks
    /// the connection as destroyed.
    pub fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = ConnectionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread;

    fn local_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn read_line_strips_crlf() {
        let (listener, addr) = local_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"STORED\r\n").unwrap();
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        let line = conn.read_line().unwrap();
        assert_eq!(line, "STORED");
        server.join().unwrap();
    }

    #[test]
    fn read_line_tolerates_bare_cr() {
        let (listener, addr) = local_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"fo\ro\r\n").unwrap();
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        let line = conn.read_line().unwrap();
        assert_eq!(line, "fo\ro");
        server.join().unwrap();
    }

    #[test]
    fn read_response_classifies_server_rejection() {
        let (listener, addr) = local_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"CLIENT_ERROR bad data chunk\r\n").unwrap();
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        match conn.read_response().unwrap() {
            Response::ServerRejected(line) => assert!(line.starts_with("CLIENT_ERROR")),
            Response::Line(_) => panic!("expected ServerRejected"),
        }
        server.join().unwrap();
    }

    #[test]
    fn read_exact_reads_value_block() {
        let (listener, addr) = local_listener();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"hello").unwrap();
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        let bytes = conn.read_exact(5).unwrap();
        assert_eq!(&bytes, b"hello");
        server.join().unwrap();
    }

    #[test]
    fn has_pending_bytes_detects_unsolicited_data() {
        let (listener, addr) = local_listener();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"surprise\r\n").unwrap();
            thread::sleep(Duration::from_millis(50));
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(conn.has_pending_bytes());
        assert_eq!(conn.drain_buffered(), 10);
        assert!(!conn.has_pending_bytes());
    }

    #[test]
    fn close_marks_connection_dead() {
        let (listener, addr) = local_listener();
        thread::spawn(move || {
            let _ = listener.accept();
        });
        let mut conn = PooledConnection::connect(addr, Duration::from_secs(1)).unwrap();
        assert!(!conn.is_closed());
        conn.close();
        assert!(conn.is_closed());
    }
}
