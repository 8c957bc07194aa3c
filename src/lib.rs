//! A synchronous client library for the memcached text protocol.
//!
//! Three collaborating pieces make up the core: a consistent-hash ring
//! ([`ring`]) that maps a key to the server that owns it, a per-server
//! connection pool ([`pool`]) that amortises TCP connect cost and isolates
//! dead servers, and a protocol engine ([`engine`]) that frames commands and
//! replies over the wire. [`client::Client`] wires the three together behind
//! a single command surface.

// Type aliases (must be declared before other modules that use them)
pub mod alias;

pub mod diagnostics;

pub mod error;
pub mod hash;
pub mod connection;
pub mod pool;
pub mod lease;
pub mod ring;
pub mod codec;
pub mod engine;
pub mod config;
pub mod client;
pub mod status;

pub use client::{Client, ClientBuilder};
pub use codec::{IdentityCodec, ValueCodec};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use engine::Expiry;
pub use error::{Error, Result};
pub use pool::{Liveness, PoolConfig, PoolStats};
pub use status::ServerStatus;

// Re-export commonly used type aliases
pub use alias::{PMutex, PMutexGuard};
