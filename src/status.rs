//! Per-server status snapshot.

use std::time::Instant;

use crate::pool::{Liveness, PoolStats};
use crate::ring::HashRing;

/// A point-in-time snapshot of one server's pool.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub host: String,
    pub port: u16,
    pub idle_count: usize,
    pub acquired_count: usize,
    pub stats: PoolStats,
    pub alive: bool,
    /// Present only while the server is in its dead-server backoff window.
    pub retry_at: Option<Instant>,
}

/// Builds a [`ServerStatus`] for every server in the ring. This is a
/// read-only probe: it inspects each pool's own liveness state rather than
/// acquiring a connection, so calling it can never prematurely pull a dead
/// server out of backoff.
pub fn snapshot(ring: &HashRing) -> Vec<ServerStatus> {
    ring.servers()
        .iter()
        .map(|server| {
            let (idle_count, acquired_count) = server.pool.sizes();
            let (alive, retry_at) = match server.pool.liveness() {
                Liveness::Alive => (true, None),
                Liveness::Dead { retry_at } => (Instant::now() >= retry_at, Some(retry_at)),
            };
            ServerStatus {
                host: server.host.clone(),
                port: server.port,
                idle_count,
                acquired_count,
                stats: server.pool.stats(),
                alive,
                retry_at,
            }
        })
        .collect()
}

impl ServerStatus {
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn snapshot_reports_one_entry_per_server() {
        let hosts = vec!["127.0.0.1:11211".to_string(), "127.0.0.1:11212".to_string()];
        let ring = HashRing::new(&hosts, PoolConfig::default()).unwrap();
        let statuses = snapshot(&ring);
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().any(|s| s.port == 11211));
        assert!(statuses.iter().any(|s| s.port == 11212));
    }

    #[test]
    fn fresh_server_starts_alive_with_no_acquired_connections() {
        let hosts = vec!["127.0.0.1:11211".to_string()];
        let ring = HashRing::new(&hosts, PoolConfig::default()).unwrap();
        let statuses = snapshot(&ring);
        assert!(statuses[0].alive);
        assert_eq!(statuses[0].acquired_count, 0);
        assert_eq!(statuses[0].idle_count, 0);
    }
}
