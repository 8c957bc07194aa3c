//! Command encoding, reply parsing, and pool-driving logic (spec §4.4).
//!
//! `ProtocolEngine` is the only component that knows the wire format; every
//! other module is either pure data ([`crate::hash`], [`crate::ring`]) or a
//! transport primitive ([`crate::connection`], [`crate::pool`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::codec::ValueCodec;
use crate::error::{Error, Result};
use crate::hash::KeyHash;
use crate::lease::ConnectionLease;
use crate::ring::HashRing;
use crate::{trace_error, trace_warn};

/// Crate-wide count of operations currently executing against any server.
/// Read through [`in_flight_count`]; bumped by [`InFlightGuard`].
static IN_FLIGHT: AtomicU64 = AtomicU64::new(0);

/// Current number of in-flight operations, across every [`ProtocolEngine`]
/// in the process.
pub fn in_flight_count() -> u64 {
    IN_FLIGHT.load(Ordering::SeqCst)
}

struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    }
}

/// When a stored value should expire (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub enum Expiry {
    Never,
    After(Duration),
    At(SystemTime),
}

impl Expiry {
    fn as_wire_seconds(&self) -> u32 {
        match self {
            Expiry::Never => 0,
            Expiry::After(d) => d.as_secs().min(u32::MAX as u64) as u32,
            Expiry::At(t) => t
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageVerb {
    Set,
    Add,
    Replace,
}

impl StorageVerb {
    fn wire_name(self) -> &'static str {
        match self {
            StorageVerb::Set => "set",
            StorageVerb::Add => "add",
            StorageVerb::Replace => "replace",
        }
    }
}

/// Validates a key per spec §4.4: non-empty, ≤250 bytes, no space or ASCII
/// control whitespace (HT, LF, VT, FF, CR — bytes 0x09 through 0x0D).
fn validate_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > 250 {
        return false;
    }
    !key.iter().any(|&b| b == b' ' || (0x09..=0x0D).contains(&b))
}

/// Drives the hash ring and per-server pools to execute memcached text
/// protocol commands. Holds no per-call state; safe to share across
/// threads via `&ProtocolEngine`.
pub struct ProtocolEngine {
    ring: HashRing,
    key_prefix: Vec<u8>,
}

impl ProtocolEngine {
    pub fn new(ring: HashRing, key_prefix: Vec<u8>) -> Self {
        ProtocolEngine { ring, key_prefix }
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    fn wire_key(&self, key: &[u8]) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.key_prefix.len() + key.len());
        wire.extend_from_slice(&self.key_prefix);
        wire.extend_from_slice(key);
        wire
    }

    /// Hash is always computed over the raw, un-prefixed key, so prefixing
    /// never causes resharding (spec §4.4).
    fn hash_of(&self, key: &[u8]) -> KeyHash {
        KeyHash::of(key)
    }

    fn storage_command<T, C: ValueCodec<T>>(
        &self,
        verb: StorageVerb,
        key: &[u8],
        value: &T,
        codec: &C,
        expiry: Expiry,
    ) -> Result<bool> {
        if !validate_key(key) {
            return Err(Error::InvalidKey);
        }
        let (payload, flags) = match codec.encode(value) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };

        let _guard = InFlightGuard::enter();
        let server = self.ring.locate(self.hash_of(key));
        let Some(conn) = server.pool.acquire() else {
            return Ok(false);
        };
        let mut lease = ConnectionLease::new(&server.pool, conn);

        let wire_key = self.wire_key(key);
        let mut header = Vec::with_capacity(wire_key.len() + 32);
        header.extend_from_slice(verb.wire_name().as_bytes());
        header.push(b' ');
        header.extend_from_slice(&wire_key);
        header.extend_from_slice(
            format!(" {} {} {}\r\n", flags, expiry.as_wire_seconds(), payload.len()).as_bytes(),
        );

        if lease.write(&header).is_err() {
            trace_error!("{}: write header failed", verb.wire_name());
            lease.mark_dirty();
            return Ok(false);
        }
        if lease.write(&payload).is_err() || lease.write(b"\r\n").is_err() {
            trace_error!("{}: write payload failed", verb.wire_name());
            lease.mark_dirty();
            return Ok(false);
        }

        match lease.read_response() {
            Ok(crate::connection::Response::Line(line)) => Ok(line.starts_with("STORED")),
            Ok(crate::connection::Response::ServerRejected(reason)) => {
                trace_warn!("{} rejected: {reason}", verb.wire_name());
                Ok(false)
            }
            Err(e) => {
                trace_error!("{}: read response failed: {e}", verb.wire_name());
                lease.mark_dirty();
                Ok(false)
            }
        }
    }

    pub fn set<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.storage_command(StorageVerb::Set, key, value, codec, expiry)
    }

    pub fn add<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.storage_command(StorageVerb::Add, key, value, codec, expiry)
    }

    pub fn replace<T, C: ValueCodec<T>>(&self, key: &[u8], value: &T, codec: &C, expiry: Expiry) -> Result<bool> {
        self.storage_command(StorageVerb::Replace, key, value, codec, expiry)
    }

    /// Stores the decimal string form of `value` so a subsequent
    /// `incr`/`decr` on the same key succeeds (spec §4.4).
    pub fn set_counter(&self, key: &[u8], value: u64) -> Result<bool> {
        use crate::codec::IdentityCodec;
        self.set(key, &value.to_string(), &IdentityCodec, Expiry::Never)
    }

    /// Reads a single value block: `VALUE <key> <flags> <bytes>\r\n<payload>\r\n`
    /// followed by `END\r\n`. Returns `None` on miss, transport failure, or
    /// deserialization failure (the block is still consumed on the last
    /// case so the connection stays usable).
    pub fn get<T, C: ValueCodec<T>>(&self, key: &[u8], codec: &C) -> Result<Option<T>> {
        if !validate_key(key) {
            return Err(Error::InvalidKey);
        }
        let _guard = InFlightGuard::enter();
        let server = self.ring.locate(self.hash_of(key));
        let Some(conn) = server.pool.acquire() else {
            return Ok(None);
        };
        let mut lease = ConnectionLease::new(&server.pool, conn);

        let wire_key = self.wire_key(key);
        let mut command = Vec::with_capacity(wire_key.len() + 6);
        command.extend_from_slice(b"get ");
        command.extend_from_slice(&wire_key);
        command.extend_from_slice(b"\r\n");
        if lease.write(&command).is_err() {
            trace_error!("get: write command failed");
            lease.mark_dirty();
            return Ok(None);
        }

        let result = read_one_value_block(&mut lease, &wire_key, codec);
        if result.is_none() && lease_looks_dirty(&mut lease) {
            trace_error!("get: response left unread bytes on the connection");
            lease.mark_dirty();
        }
        Ok(result)
    }

    /// Batches keys by owning server and issues one `get` per server. The
    /// returned vector has exactly `keys.len()` slots, each `None` unless
    /// the owning server returned a value for that key (spec §4.4).
    pub fn multi_get<T, C: ValueCodec<T>>(&self, keys: &[&[u8]], codec: &C) -> Vec<Option<T>> {
        let mut results: Vec<Option<T>> = (0..keys.len()).map(|_| None).collect();
        if keys.is_empty() {
            return results;
        }

        let _guard = InFlightGuard::enter();

        // Group requested positions by owning server, preserving the wire
        // key used so replies (which echo the prefixed key) can be matched
        // back to the caller's un-prefixed positions.
        let mut by_server: HashMap<std::net::SocketAddr, Vec<(usize, Vec<u8>)>> = HashMap::new();
        for (idx, key) in keys.iter().enumerate() {
            if !validate_key(key) {
                continue;
            }
            let server = self.ring.locate(self.hash_of(key));
            by_server
                .entry(server.addr)
                .or_default()
                .push((idx, self.wire_key(key)));
        }

        for (addr, positions) in by_server {
            let server = self
                .ring
                .servers()
                .iter()
                .find(|s| s.addr == addr)
                .expect("server present in ring");
            let Some(conn) = server.pool.acquire() else {
                continue; // every slot for this server stays None
            };
            let mut lease = ConnectionLease::new(&server.pool, conn);

            let mut command = Vec::from(&b"get"[..]);
            for (_, wire_key) in &positions {
                command.push(b' ');
                command.extend_from_slice(wire_key);
            }
            command.extend_from_slice(b"\r\n");
            if lease.write(&command).is_err() {
                trace_error!("multi_get: write command failed for server {addr}");
                lease.mark_dirty();
                continue;
            }

            // wire key -> original index, so the reply's echoed key (which
            // includes the prefix) maps back without guessing.
            let lookup: HashMap<Vec<u8>, usize> = positions.into_iter().map(|(idx, k)| (k, idx)).collect();
            match read_value_blocks_until_end(&mut lease, codec) {
                Ok(blocks) => {
                    for (returned_key, value) in blocks {
                        if let Some(&idx) = lookup.get(&returned_key) {
                            results[idx] = value;
                        }
                    }
                }
                Err(e) => {
                    trace_error!("multi_get: read failed for server {addr}: {e}");
                    lease.mark_dirty();
                }
            }
        }

        results
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.delete_with_time(key, None)
    }

    pub fn delete_with_time(&self, key: &[u8], time: Option<u32>) -> Result<bool> {
        if !validate_key(key) {
            return Err(Error::InvalidKey);
        }
        let _guard = InFlightGuard::enter();
        let server = self.ring.locate(self.hash_of(key));
        let Some(conn) = server.pool.acquire() else {
            return Ok(false);
        };
        let mut lease = ConnectionLease::new(&server.pool, conn);

        let wire_key = self.wire_key(key);
        let mut command = Vec::with_capacity(wire_key.len() + 16);
        command.extend_from_slice(b"delete ");
        command.extend_from_slice(&wire_key);
        if let Some(t) = time {
            command.extend_from_slice(format!(" {t}").as_bytes());
        }
        command.extend_from_slice(b"\r\n");
        if lease.write(&command).is_err() {
            trace_error!("delete: write command failed");
            lease.mark_dirty();
            return Ok(false);
        }

        match lease.read_response() {
            Ok(crate::connection::Response::Line(line)) => Ok(line.starts_with("DELETED")),
            Ok(crate::connection::Response::ServerRejected(reason)) => {
                trace_warn!("delete rejected: {reason}");
                Ok(false)
            }
            Err(e) => {
                trace_error!("delete: read response failed: {e}");
                lease.mark_dirty();
                Ok(false)
            }
        }
    }

    pub fn incr(&self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.counter_command("incr", key, delta)
    }

    pub fn decr(&self, key: &[u8], delta: u64) -> Result<Option<u64>> {
        self.counter_command("decr", key, delta)
    }

    fn counter_command(&self, verb: &str, key: &[u8], delta: u64) -> Result<Option<u64>> {
        if !validate_key(key) {
            return Err(Error::InvalidKey);
        }
        let _guard = InFlightGuard::enter();
        let server = self.ring.locate(self.hash_of(key));
        let Some(conn) = server.pool.acquire() else {
            return Ok(None);
        };
        let mut lease = ConnectionLease::new(&server.pool, conn);

        let wire_key = self.wire_key(key);
        let mut command = Vec::with_capacity(wire_key.len() + verb.len() + 24);
        command.extend_from_slice(verb.as_bytes());
        command.push(b' ');
        command.extend_from_slice(&wire_key);
        command.extend_from_slice(format!(" {delta}\r\n").as_bytes());
        if lease.write(&command).is_err() {
            trace_error!("{verb}: write command failed");
            lease.mark_dirty();
            return Ok(None);
        }

        match lease.read_response() {
            Ok(crate::connection::Response::Line(line)) => {
                let trimmed = line.trim_matches(|c: char| c == '\0' || c == '\r' || c == '\n');
                if trimmed == "NOT_FOUND" {
                    return Ok(None);
                }
                Ok(trimmed.parse::<u64>().ok())
            }
            Ok(crate::connection::Response::ServerRejected(reason)) => {
                trace_warn!("{verb} rejected: {reason}");
                Ok(None)
            }
            Err(e) => {
                trace_error!("{verb}: read response failed: {e}");
                lease.mark_dirty();
                Ok(None)
            }
        }
    }

    /// Visits every server; returns true only if every single one replies
    /// `OK` to `flush_all` (spec §4.4).
    pub fn flush_all(&self) -> bool {
        let _guard = InFlightGuard::enter();
        let mut all_ok = true;
        for server in self.ring.servers() {
            let ok = (|| {
                let conn = server.pool.acquire()?;
                let mut lease = ConnectionLease::new(&server.pool, conn);
                if lease.write(b"flush_all\r\n").is_err() {
                    trace_error!("flush_all: write command failed for {}", server.display_name());
                    lease.mark_dirty();
                    return Some(false);
                }
                match lease.read_response() {
                    Ok(crate::connection::Response::Line(line)) => Some(line.starts_with("OK")),
                    Ok(crate::connection::Response::ServerRejected(reason)) => {
                        trace_warn!("flush_all rejected by {}: {reason}", server.display_name());
                        Some(false)
                    }
                    Err(e) => {
                        trace_error!("flush_all: read response failed for {}: {e}", server.display_name());
                        lease.mark_dirty();
                        Some(false)
                    }
                }
            })()
            .unwrap_or(false);
            all_ok &= ok;
        }
        all_ok
    }

    /// Visits every server and collects its `STAT <k> <v>` lines, keyed by
    /// `host:port` display name (spec §4.4, §6 status interface).
    pub fn stats(&self) -> HashMap<String, HashMap<String, String>> {
        let _guard = InFlightGuard::enter();
        let mut out = HashMap::new();
        for server in self.ring.servers() {
            let Some(conn) = server.pool.acquire() else {
                continue;
            };
            let mut lease = ConnectionLease::new(&server.pool, conn);
            if lease.write(b"stats\r\n").is_err() {
                trace_error!("stats: write command failed for {}", server.display_name());
                lease.mark_dirty();
                continue;
            }
            let mut server_stats = HashMap::new();
            loop {
                match lease.read_line() {
                    Ok(line) if line == "END" => break,
                    Ok(line) => {
                        if let Some(rest) = line.strip_prefix("STAT ") {
                            if let Some((k, v)) = rest.split_once(' ') {
                                server_stats.insert(k.to_string(), v.to_string());
                            }
                        }
                    }
                    Err(e) => {
                        trace_error!("stats: read failed for {}: {e}", server.display_name());
                        lease.mark_dirty();
                        break;
                    }
                }
            }
            out.insert(server.display_name(), server_stats);
        }
        out
    }
}

fn lease_looks_dirty(lease: &mut ConnectionLease<'_>) -> bool {
    lease.has_pending_bytes()
}

fn read_one_value_block<T, C: ValueCodec<T>>(
    lease: &mut ConnectionLease<'_>,
    wire_key: &[u8],
    codec: &C,
) -> Option<T> {
    let line = lease.read_line().ok()?;
    if line == "END" {
        return None;
    }
    let mut parts = line.split(' ');
    if parts.next() != Some("VALUE") {
        return None;
    }
    let returned_key = parts.next()?;
    let key_matches = returned_key.as_bytes() == wire_key;
    let flags: u16 = parts.next()?.parse().ok()?;
    let bytes: usize = parts.next()?.parse().ok()?;

    // Read the framed payload regardless of key match so the stream stays
    // in sync even if the server echoed something unexpected.
    let payload = lease.read_exact(bytes).ok()?;
    let _ = lease.skip_line(); // trailing CRLF after the payload
    let _ = lease.read_line(); // consume END

    if !key_matches {
        return None;
    }
    codec.decode(&payload, flags).ok()
}

fn read_value_blocks_until_end<T, C: ValueCodec<T>>(
    lease: &mut ConnectionLease<'_>,
    codec: &C,
) -> crate::error::Result<Vec<(Vec<u8>, Option<T>)>> {
    let mut blocks = Vec::new();
    loop {
        let line = lease.read_line()?;
        if line == "END" {
            break;
        }
        let mut parts = line.split(' ');
        if parts.next() != Some("VALUE") {
            return Err(crate::error::Error::ProtocolError(format!(
                "expected VALUE or END, got: {line}"
            )));
        }
        let returned_key = parts
            .next()
            .ok_or_else(|| crate::error::Error::ProtocolError("missing key in VALUE line".into()))?
            .as_bytes()
            .to_vec();
        let flags: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| crate::error::Error::ProtocolError("bad flags in VALUE line".into()))?;
        let bytes: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| crate::error::Error::ProtocolError("bad length in VALUE line".into()))?;

        let payload = lease.read_exact(bytes)?;
        lease.skip_line()?; // trailing CRLF after the payload
        let value = codec.decode(&payload, flags).ok();
        blocks.push((returned_key, value));
    }
    Ok(blocks)
}
