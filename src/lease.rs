//! RAII connection lease: a caller borrows a connection, and the lease
//! returns it to its pool on drop regardless of how the borrow ends (normal
//! return, early `?`, or panic unwind).

use std::ops::{Deref, DerefMut};

use crate::connection::PooledConnection;
use crate::pool::SocketPool;

/// A connection on loan from a [`SocketPool`]. Marking it dirty forces the
/// pool to close it instead of reusing it once the lease is dropped.
pub struct ConnectionLease<'a> {
    pool: &'a SocketPool,
    conn: Option<PooledConnection>,
    dirty: bool,
}

impl<'a> ConnectionLease<'a> {
    pub fn new(pool: &'a SocketPool, conn: PooledConnection) -> Self {
        ConnectionLease {
            pool,
            conn: Some(conn),
            dirty: false,
        }
    }

    /// Marks the leased connection as unfit for reuse; on drop it will be
    /// closed rather than returned to the idle list. Call this as soon as a
    /// transport-level error is observed, since the stream may be
    /// desynchronised from that point on.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for ConnectionLease<'_> {
    type Target = PooledConnection;

    fn deref(&self) -> &PooledConnection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl DerefMut for ConnectionLease<'_> {
    fn deref_mut(&mut self) -> &mut PooledConnection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;

    fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 64];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    let _ = stream.write_all(&buf[..n]);
                }
            }
        });
        addr
    }

    #[test]
    fn dropped_lease_returns_connection_to_pool() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, PoolConfig::default());
        {
            let conn = pool.acquire().unwrap();
            let _lease = ConnectionLease::new(&pool, conn);
        }
        assert_eq!(pool.stats().new_sockets, 1);
        let _reused = pool.acquire().unwrap();
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn dirty_lease_is_not_reused() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, PoolConfig::default());
        {
            let conn = pool.acquire().unwrap();
            let mut lease = ConnectionLease::new(&pool, conn);
            lease.mark_dirty();
        }
        assert_eq!(pool.stats().died_on_return, 1);
        let _fresh = pool.acquire().unwrap();
        assert_eq!(pool.stats().new_sockets, 2);
    }

    #[test]
    fn lease_derefs_to_connection_methods() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, PoolConfig::default());
        let conn = pool.acquire().unwrap();
        let mut lease = ConnectionLease::new(&pool, conn);
        lease.write(b"ping\r\n").unwrap();
        let line = lease.read_line().unwrap();
        assert_eq!(line, "ping");
    }
}
