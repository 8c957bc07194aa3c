//! Consistent-hash ring mapping a key hash to the server that owns it.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::{modified_fnv1_32, KeyHash};
use crate::pool::{PoolConfig, SocketPool};

/// Number of ring points derived from each host. Fixed by the spec.
pub const POINTS_PER_SERVER: usize = 30;

/// Default memcached port used when a host string omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// One server in the cluster: its address and its own connection pool.
///
/// Identity is the `(host, port)` pair. Built once at client construction
/// and immutable for the client's lifetime.
pub struct ServerEntry {
    pub host: String,
    pub port: u16,
    pub addr: SocketAddr,
    pub pool: SocketPool,
}

impl ServerEntry {
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct RingPoint {
    hash: KeyHash,
    server_index: usize,
}

/// The consistent-hash continuum.
///
/// Immutable after construction and safe to share across threads: lookup
/// only reads `Vec`s, and the servers it points to manage their own interior
/// mutability via [`SocketPool`].
pub struct HashRing {
    servers: Vec<Arc<ServerEntry>>,
    points: Vec<RingPoint>,
}

/// Splits a `host` or `host:port` string. Recognises a trailing `:NNNN` as a
/// port only when the remainder parses as `u16`, so bare IPv6 literals
/// without brackets (which contain many colons) fall back to being treated
/// as a full host with no port.
fn split_host_port(spec: &str) -> (&str, Option<u16>) {
    if let Some(stripped) = spec.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            let host = &stripped[..end];
            let rest = &stripped[end + 1..];
            let port = rest.strip_prefix(':').and_then(|p| p.parse::<u16>().ok());
            return (host, port);
        }
    }
    if let Some(idx) = spec.rfind(':') {
        let (host, port_str) = (&spec[..idx], &spec[idx + 1..]);
        if let Ok(port) = port_str.parse::<u16>() {
            if !host.contains(':') {
                return (host, Some(port));
            }
        }
    }
    (spec, None)
}

impl HashRing {
    /// Builds the ring from a list of `host` / `host:port` strings. DNS
    /// resolution happens here; a resolution failure aborts construction.
    pub fn new(hosts: &[String], pool_config: PoolConfig) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::Configuration("at least one host is required".into()));
        }

        let mut servers = Vec::with_capacity(hosts.len());
        for spec in hosts {
            let (host, port) = split_host_port(spec);
            let port = port.unwrap_or(DEFAULT_PORT);
            let addr = resolve(host, port)?;
            servers.push(Arc::new(ServerEntry {
                host: host.to_string(),
                port,
                addr,
                pool: SocketPool::new(addr, pool_config.clone()),
            }));
        }

        let mut points = Vec::with_capacity(servers.len() * POINTS_PER_SERVER);
        let mut seen = std::collections::HashSet::new();
        for (server_index, spec) in hosts.iter().enumerate() {
            let mut previous = modified_fnv1_32(spec.as_bytes());
            for point_index in 0..POINTS_PER_SERVER {
                let hash = if point_index == 0 {
                    previous
                } else {
                    let seed = previous.to_string();
                    let next = modified_fnv1_32(seed.as_bytes());
                    previous = next;
                    next
                };
                if seen.insert(hash) {
                    points.push(RingPoint {
                        hash: KeyHash(hash),
                        server_index,
                    });
                }
            }
        }
        points.sort_by_key(|p| p.hash);

        Ok(HashRing { servers, points })
    }

    /// Returns the server owning `hash`: the smallest ring point whose hash
    /// is `>= hash`, wrapping to the first point if none is found.
    ///
    /// With exactly one server, the lookup is skipped entirely — both an
    /// optimisation and a correctness guarantee for sole-host deployments.
    pub fn locate(&self, hash: KeyHash) -> &Arc<ServerEntry> {
        if self.servers.len() == 1 {
            return &self.servers[0];
        }
        let idx = match self.points.binary_search_by(|p| p.hash.cmp(&hash)) {
            Ok(i) => i,
            Err(i) if i == self.points.len() => 0,
            Err(i) => i,
        };
        &self.servers[self.points[idx].server_index]
    }

    pub fn servers(&self) -> &[Arc<ServerEntry>] {
        &self.servers
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Configuration(format!("failed to resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| Error::Configuration(format!("no addresses found for {host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(hosts: &[&str]) -> HashRing {
        let hosts: Vec<String> = hosts.iter().map(|s| s.to_string()).collect();
        HashRing::new(&hosts, PoolConfig::default()).unwrap()
    }

    #[test]
    fn single_host_shortcut_ignores_hash() {
        let r = ring(&["127.0.0.1:11211"]);
        let a = r.locate(KeyHash(0));
        let b = r.locate(KeyHash(u32::MAX));
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn ring_has_thirty_points_per_host_minus_collisions() {
        let hosts = vec!["127.0.0.1:11211".to_string(), "127.0.0.1:11212".to_string()];
        let r = HashRing::new(&hosts, PoolConfig::default()).unwrap();
        assert!(r.points.len() <= POINTS_PER_SERVER * 2);
        assert!(r.points.len() > POINTS_PER_SERVER); // collisions are astronomically unlikely
    }

    #[test]
    fn ring_is_ascending() {
        let hosts = vec![
            "127.0.0.1:11211".to_string(),
            "127.0.0.1:11212".to_string(),
            "127.0.0.1:11213".to_string(),
        ];
        let r = HashRing::new(&hosts, PoolConfig::default()).unwrap();
        for w in r.points.windows(2) {
            assert!(w[0].hash < w[1].hash);
        }
    }

    #[test]
    fn removing_one_of_many_hosts_reassigns_roughly_one_over_n() {
        let before_hosts: Vec<String> = (0..10).map(|i| format!("127.0.0.1:{}", 12000 + i)).collect();
        let after_hosts: Vec<String> = before_hosts[..9].to_vec();

        let before = HashRing::new(&before_hosts, PoolConfig::default()).unwrap();
        let after = HashRing::new(&after_hosts, PoolConfig::default()).unwrap();

        let total = 10_000;
        let mut moved = 0;
        for i in 0..total {
            let key = format!("key-{i}");
            let hash = KeyHash::of(key.as_bytes());
            let before_owner = before.locate(hash).display_name();
            let after_owner = after.locate(hash).display_name();
            if before_owner != after_owner {
                moved += 1;
            }
        }
        let fraction = moved as f64 / total as f64;
        // ~1/10 expected; tolerate generously (±2x for N<=10).
        assert!(fraction > 0.02 && fraction < 0.3, "fraction={fraction}");
    }

    #[test]
    fn split_host_port_parses_variants() {
        assert_eq!(split_host_port("localhost"), ("localhost", None));
        assert_eq!(split_host_port("localhost:11211"), ("localhost", Some(11211)));
        assert_eq!(split_host_port("[::1]:11211"), ("::1", Some(11211)));
        assert_eq!(split_host_port("::1"), ("::1", None));
    }
}
