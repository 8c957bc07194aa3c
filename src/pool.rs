//! Per-server connection pool with dead-server backoff (spec §4.3).
//!
//! Unlike a general-purpose HTTP pool, each memcached server gets exactly one
//! pool for the client's whole lifetime, so this module has no host-keyed
//! map: the key is already implicit in which [`SocketPool`] you're holding.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::alias::PMutex;
use crate::connection::PooledConnection;
use crate::{trace_log, trace_warn};

/// Tunables for every [`SocketPool`] in a client (spec §6).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sockets kept idle below this count are never proactively closed.
    pub min_pool_size: usize,
    /// Idle sockets are never allowed to exceed this count; the oldest is
    /// dropped on return once the pool is full.
    pub max_pool_size: usize,
    /// Read/write timeout applied to every socket operation.
    pub send_receive_timeout: Duration,
    /// An idle socket older than this is closed instead of reused, to bound
    /// exposure to connections the server or a middlebox may have silently
    /// reset.
    pub socket_recycle_age: Duration,
    /// After a connect failure, the server is treated as dead for this long
    /// before another connect attempt is made.
    pub dead_server_retry_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_pool_size: 5,
            max_pool_size: 10,
            send_receive_timeout: Duration::from_millis(2000),
            socket_recycle_age: Duration::from_secs(30 * 60),
            dead_server_retry_interval: Duration::from_secs(10),
        }
    }
}

/// Whether a server is currently presumed reachable (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead { retry_at: Instant },
}

/// Lifetime counters for one server's pool. Never reset; read via
/// [`SocketPool::stats`] for diagnostics and [`crate::status`] reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub new_sockets: u64,
    pub failed_new_sockets: u64,
    pub reused: u64,
    pub died_in_pool: u64,
    pub died_on_return: u64,
    pub dirty_on_return: u64,
}

struct PoolState {
    idle: VecDeque<PooledConnection>,
    acquired: usize,
    liveness: Liveness,
    stats: PoolStats,
}

/// Owns every idle connection to one server plus its liveness state.
///
/// Idle connections are kept LIFO: the most recently returned socket is
/// handed out first, so under light load the pool naturally converges on a
/// small working set instead of round-robining through all of them.
pub struct SocketPool {
    addr: SocketAddr,
    config: PoolConfig,
    state: PMutex<PoolState>,
}

impl SocketPool {
    pub fn new(addr: SocketAddr, config: PoolConfig) -> SocketPool {
        SocketPool {
            addr,
            config,
            state: PMutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_pool_size),
                acquired: 0,
                liveness: Liveness::Alive,
                stats: PoolStats::default(),
            }),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reports whether the server is presumed alive right now, without
    /// attempting a connection. A dead server whose retry deadline has
    /// already passed is reported alive, since the next [`Self::acquire`]
    /// will try it again.
    pub fn is_alive(&self) -> bool {
        let state = self.state.lock();
        match state.liveness {
            Liveness::Alive => true,
            Liveness::Dead { retry_at } => Instant::now() >= retry_at,
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Raw liveness state, including the retry deadline while dead.
    pub fn liveness(&self) -> Liveness {
        self.state.lock().liveness
    }

    /// Current idle and acquired counts, for [`crate::status`] reporting.
    pub fn sizes(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.idle.len(), state.acquired)
    }

    /// Hands out a connection: reuse a live idle one, falling through to a
    /// fresh connect. Returns `None` without blocking if the server is
    /// within its dead-server backoff window.
    pub fn acquire(&self) -> Option<PooledConnection> {
        loop {
            let mut state = self.state.lock();
            if let Liveness::Dead { retry_at } = state.liveness {
                if Instant::now() < retry_at {
                    trace_log!("server {} still in backoff until {:?}", self.addr, retry_at);
                    return None;
                }
            }

            if let Some(conn) = state.idle.pop_back() {
                if conn.is_closed() || !conn.is_alive() {
                    state.stats.died_in_pool += 1;
                    continue;
                }
                state.stats.reused += 1;
                state.acquired += 1;
                return Some(conn);
            }

            drop(state);
            let conn = self.connect_new()?;
            self.state.lock().acquired += 1;
            return Some(conn);
        }
    }

    fn connect_new(&self) -> Option<PooledConnection> {
        match PooledConnection::connect(self.addr, self.config.send_receive_timeout) {
            Ok(conn) => {
                let mut state = self.state.lock();
                state.liveness = Liveness::Alive;
                state.stats.new_sockets += 1;
                Some(conn)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.stats.failed_new_sockets += 1;
                state.liveness = Liveness::Dead {
                    retry_at: Instant::now() + self.config.dead_server_retry_interval,
                };
                trace_warn!("connect to {} failed: {err}", self.addr);
                None
            }
        }
    }

    /// Returns a connection used by the caller, following the return-path
    /// state machine verbatim: explicit close, protocol desync, then the
    /// idle-pool size bound, in that order.
    pub fn release(&self, mut conn: PooledConnection, known_dirty: bool) {
        let mut state = self.state.lock();
        state.acquired = state.acquired.saturating_sub(1);

        if known_dirty || conn.is_closed() {
            state.stats.died_on_return += 1;
            conn.close();
            return;
        }
        if conn.has_pending_bytes() {
            conn.drain_buffered();
            state.stats.dirty_on_return += 1;
            conn.close();
            return;
        }
        if !conn.is_alive() {
            state.stats.died_on_return += 1;
            return;
        }

        let idle_count = state.idle.len();
        let over_max = idle_count >= self.config.max_pool_size;
        let over_recycle_age =
            idle_count >= self.config.min_pool_size && conn.created_at().elapsed() > self.config.socket_recycle_age;
        if over_max || over_recycle_age {
            conn.close();
            return;
        }
        state.idle.push_back(conn);
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn config() -> PoolConfig {
        PoolConfig {
            min_pool_size: 1,
            max_pool_size: 2,
            send_receive_timeout: Duration::from_millis(500),
            socket_recycle_age: Duration::from_secs(3600),
            dead_server_retry_interval: Duration::from_millis(50),
        }
    }

    fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                thread::spawn(move || {
                    let mut buf = [0u8; 256];
                    while let Ok(n) = stream.read(&mut buf) {
                        if n == 0 {
                            break;
                        }
                        let _ = stream.write_all(&buf[..n]);
                    }
                });
            }
        });
        addr
    }

    #[test]
    fn acquire_connects_then_reuses_on_release() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, config());

        let conn = pool.acquire().expect("connect should succeed");
        assert_eq!(pool.stats().new_sockets, 1);
        pool.release(conn, false);

        let conn2 = pool.acquire().expect("reuse should succeed");
        assert_eq!(pool.stats().reused, 1);
        pool.release(conn2, false);
    }

    #[test]
    fn dead_server_backs_off_then_retries() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap(); // nothing listens on port 1
        let pool = SocketPool::new(addr, config());

        assert!(pool.acquire().is_none());
        assert!(!pool.is_alive());
        assert_eq!(pool.stats().failed_new_sockets, 1);

        thread::sleep(Duration::from_millis(80));
        assert!(pool.is_alive());
    }

    #[test]
    fn known_dirty_connection_is_discarded_not_reused() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, config());

        let conn = pool.acquire().unwrap();
        pool.release(conn, true);

        assert_eq!(pool.stats().died_on_return, 1);
        // pool had nothing idle, so this is a fresh connect again
        let _conn2 = pool.acquire().unwrap();
        assert_eq!(pool.stats().new_sockets, 2);
    }

    #[test]
    fn leftover_bytes_on_return_counts_as_dirty() {
        let addr: SocketAddr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            thread::spawn(move || {
                if let Ok((mut stream, _)) = listener.accept() {
                    // Send unsolicited bytes the caller never reads, simulating
                    // a protocol desync.
                    let _ = stream.write_all(b"unexpected\r\n");
                    thread::sleep(Duration::from_millis(50));
                }
            });
            addr
        };
        let pool = SocketPool::new(addr, config());
        let conn = pool.acquire().unwrap();
        thread::sleep(Duration::from_millis(20)); // let the bytes arrive
        pool.release(conn, false);

        assert_eq!(pool.stats().dirty_on_return, 1);
    }

    #[test]
    fn full_pool_drops_returned_connection() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, config()); // max_pool_size = 2

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        pool.release(a, false);
        pool.release(b, false);
        pool.release(c, false); // pool already has 2 idle; this one is dropped

        assert_eq!(pool.stats().new_sockets, 3);
    }

    #[test]
    fn acquired_count_returns_to_zero_after_release() {
        let addr = echo_server();
        let pool = SocketPool::new(addr, config());

        let conn = pool.acquire().unwrap();
        assert_eq!(pool.sizes().1, 1);
        pool.release(conn, false);
        assert_eq!(pool.sizes().1, 0);
    }
}
