//! Top-level client: construction, command surface, and status.

use std::time::Duration;

use crate::codec::ValueCodec;
use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::engine::{Expiry, ProtocolEngine};
use crate::error::Result;
use crate::ring::HashRing;
use crate::status::ServerStatus;

/// A memcached cluster client. Immutable after construction; every command
/// is synchronous and safe to call from multiple threads concurrently.
pub struct Client {
    engine: ProtocolEngine,
}

impl Client {
    /// Starts building a client from a list of `host` / `host:port` strings.
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: ClientConfig::builder(),
        }
    }

    /// Builds a client directly from an already-validated [`ClientConfig`].
    /// DNS resolution of every host happens here, synchronously; failure
    /// aborts construction.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let pool_config = config.pool_config();
        let ring = HashRing::new(&config.hosts, pool_config)?;
        let engine = ProtocolEngine::new(ring, config.key_prefix);
        Ok(Client { engine })
    }

    pub fn set<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.engine.set(key, value, codec, expiry)
    }

    pub fn add<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.engine.add(key, value, codec, expiry)
    }

    pub fn replace<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.engine.replace(key, value, codec, expiry)
    }

    pub fn set_counter(&self, key: &[u8], value: u64) -> Result<bool> {
        self.engine.set_counter(key, value)
    }

    pub fn get<T, C: ValueCodec<T>>(&self, key: &[u8], codec: &C) -> Result<Option<T>> {
        self.engine.get(key, codec)
    }

    /// Infallible: keys that individually fail validation are simply left
    /// `None` in the result rather than aborting the whole batch (spec §4.4
    /// describes a per-key negative, not a whole-operation error).
    pub fn multi_get<T, C: ValueCodec<T>>(&self, keys: &[&[u8]], codec: &C) -> Vec<Option<T>> {
        self.engine.multi_get(keys, codec)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.engine.delete(key)
    }

    pub fn delete_with_time(&self, key: &[u8], time: Option<u32>) -> Result<bool> {
        self.engine.delete_with_time(key, time)
    }

    pub fn incr(&self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.engine.incr(key, delta)
    }

    pub fn decr(&self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.engine.decr(key, delta)
    }

    pub fn flush_all(&self) -> bool {
        self.engine.flush_all()
    }

    pub fn stats(&self) -> std::collections::HashMap<String, std::collections::HashMap<String, String>> {
        self.engine.stats()
    }

    /// Per-server pool/liveness snapshot. Each probe respects the server's
    /// own dead-server backoff — a dead pool stays dead until its retry
    /// deadline, it is not forced alive by being asked about.
    pub fn status(&self) -> Vec<ServerStatus> {
        crate::status::snapshot(self.engine.ring())
    }

    /// Number of operations currently executing against any server, across
    /// every `Client` in the process.
    pub fn in_flight_count() -> u64 {
        crate::engine::in_flight_count()
    }
}

/// Builder for [`Client`], mirroring [`ClientConfigBuilder`]'s fluent surface.
pub struct ClientBuilder {
    config: ClientConfigBuilder,
}

impl ClientBuilder {
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.hosts(hosts);
        self
    }

    pub fn send_receive_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.send_receive_timeout(timeout);
        self
    }

    pub fn min_pool_size(mut self, size: usize) -> Self {
        self.config = self.config.min_pool_size(size);
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config = self.config.max_pool_size(size);
        self
    }

    pub fn socket_recycle_age(mut self, age: Duration) -> Self {
        self.config = self.config.socket_recycle_age(age);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.config = self.config.key_prefix(prefix);
        self
    }

    pub fn dead_server_retry_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.dead_server_retry_interval(interval);
        self
    }

    pub fn build(self) -> Result<Client> {
        Client::with_config(self.config.build()?)
    }
}
