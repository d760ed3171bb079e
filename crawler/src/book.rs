//! Address book of known peers.
//!
//! Entries live in one of two tables of fixed-size buckets. The `new` table
//! holds addresses we have only heard about, `tried` holds those we crawled
//! successfully. Which bucket an address lands in is a keyed hash of its
//! network group, and for `new` entries also of the group it was learned
//! from, so a single operator or a single chatty peer can only ever occupy a
//! small slice of the book.
//!
//! # Bucket placement
//!
//! With `key` the node's own id and `H` the first eight bytes of SHA-256 over
//! the length-prefixed inputs, read big-endian:
//!
//! * new: `H(key, "new", src_group, H(key, "new", src_group, addr_group) % 32) % 256`
//! * tried: `H(key, "tried", addr_group, H(key, "tried", ip:port) % 8) % 64`
//!
//! When a bucket is full the entry with the highest
//! [`eviction score`](KnownAddress::eviction_score) makes room, ties going to
//! the greatest address.

use crate::address::{group, is_routable, AddressSource, KnownAddress, Tier, DEMOTION_THRESHOLD};
use crate::error::CrawlerError;
use cosmos_peers_connection::{unix_timestamp, NetAddress, NodeId, PexAddress};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Buckets in the new table.
pub const NEW_BUCKET_COUNT: usize = 256;
/// Buckets in the tried table.
pub const TRIED_BUCKET_COUNT: usize = 64;
/// Entries a single bucket holds.
pub const BUCKET_SIZE: usize = 64;
/// Most entries one bucket contributes to a sample.
pub const MAX_PICKS_PER_BUCKET: usize = 3;

/// New buckets reachable from one source group.
const NEW_BUCKETS_PER_SOURCE_GROUP: u64 = 32;
/// Tried buckets reachable from one address group.
const TRIED_BUCKETS_PER_GROUP: u64 = 8;

/// Entry counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookStats {
    pub new: usize,
    pub tried: usize,
}

impl BookStats {
    pub fn total(&self) -> usize {
        self.new + self.tried
    }
}

impl fmt::Display for BookStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} addresses ({} new, {} tried)", self.total(), self.new, self.tried)
    }
}

/// On-disk layout of the book.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    key: String,
    #[serde(default)]
    addrs: Vec<KnownAddress>,
}

#[derive(Debug)]
struct Slot {
    entry: KnownAddress,
    /// Index into the bucket table of the entry's tier.
    bucket: usize,
}

struct BookState {
    entries: HashMap<NetAddress, Slot>,
    new_buckets: Vec<Vec<NetAddress>>,
    tried_buckets: Vec<Vec<NetAddress>>,
    rng: StdRng,
}

impl BookState {
    fn new(rng: StdRng) -> Self {
        BookState {
            entries: HashMap::new(),
            new_buckets: vec![Vec::new(); NEW_BUCKET_COUNT],
            tried_buckets: vec![Vec::new(); TRIED_BUCKET_COUNT],
            rng,
        }
    }

    fn buckets(&self, tier: Tier) -> &[Vec<NetAddress>] {
        match tier {
            Tier::New => &self.new_buckets,
            Tier::Tried => &self.tried_buckets,
        }
    }

    fn buckets_mut(&mut self, tier: Tier) -> &mut [Vec<NetAddress>] {
        match tier {
            Tier::New => &mut self.new_buckets,
            Tier::Tried => &mut self.tried_buckets,
        }
    }

    fn count(&self, tier: Tier) -> usize {
        self.buckets(tier).iter().map(Vec::len).sum()
    }

    fn detach(&mut self, addr: &NetAddress) -> Option<KnownAddress> {
        let slot = self.entries.remove(addr)?;
        let bucket = &mut self.buckets_mut(slot.entry.tier)[slot.bucket];
        if let Some(position) = bucket.iter().position(|a| a == addr) {
            bucket.remove(position);
        }
        Some(slot.entry)
    }

    /// Put an entry into its tier's bucket, returning the entry evicted to
    /// make room, if any.
    fn place(&mut self, key: &NodeId, entry: KnownAddress, now: u64) -> Option<KnownAddress> {
        let tier = entry.tier;
        let index = bucket_index(key, &entry);

        let evicted = if self.buckets(tier)[index].len() >= BUCKET_SIZE {
            let victim = self.buckets(tier)[index]
                .iter()
                .filter_map(|addr| self.entries.get(addr))
                .max_by(|a, b| {
                    a.entry
                        .eviction_score(now)
                        .cmp(&b.entry.eviction_score(now))
                        .then_with(|| a.entry.addr.cmp(&b.entry.addr))
                })
                .map(|slot| slot.entry.addr.clone());
            victim.and_then(|addr| self.detach(&addr))
        } else {
            None
        };

        let addr = entry.addr.clone();
        self.buckets_mut(tier)[index].push(addr.clone());
        self.entries.insert(
            addr,
            Slot {
                entry,
                bucket: index,
            },
        );
        evicted
    }

    /// Place `entry`, moving a tried entry it displaces back to new.
    fn insert(&mut self, key: &NodeId, entry: KnownAddress, now: u64) {
        let Some(mut displaced) = self.place(key, entry, now) else {
            return;
        };
        if displaced.tier == Tier::Tried {
            debug!("Moving {} back to new to make room in tried", displaced.addr);
            displaced.tier = Tier::New;
            if let Some(dropped) = self.place(key, displaced, now) {
                debug!("Evicted {dropped} from a full new bucket");
            }
        } else {
            debug!("Evicted {displaced} from a full new bucket");
        }
    }

    /// Insert a new entry or refresh the last-seen time of an existing one.
    fn upsert(
        &mut self,
        key: &NodeId,
        addr: &NetAddress,
        source: AddressSource,
        seen: u64,
        now: u64,
    ) {
        if let Some(slot) = self.entries.get_mut(addr) {
            slot.entry.last_seen = slot.entry.last_seen.max(seen);
            return;
        }
        let entry = KnownAddress::new(addr.clone(), source, seen);
        self.insert(key, entry, now);
    }

    fn promote(&mut self, key: &NodeId, addr: &NetAddress, now: u64) {
        let Some(mut entry) = self.detach(addr) else {
            return;
        };
        entry.tier = Tier::Tried;
        self.insert(key, entry, now);
    }

    fn demote(&mut self, key: &NodeId, addr: &NetAddress, now: u64) {
        let Some(mut entry) = self.detach(addr) else {
            return;
        };
        entry.tier = Tier::New;
        self.insert(key, entry, now);
    }

    /// Bucket-diverse sample, see [`AddressBook::pick_addresses`].
    fn pick(&mut self, n: usize, exclude: Option<&NodeId>) -> Vec<KnownAddress> {
        let BookState {
            entries,
            new_buckets,
            tried_buckets,
            rng,
        } = self;

        // Each bucket offers a random few of its entries.
        let mut candidates: Vec<Vec<&NetAddress>> = Vec::new();
        for bucket in new_buckets.iter().chain(tried_buckets.iter()) {
            let mut offered: Vec<&NetAddress> = bucket
                .iter()
                .filter(|addr| exclude != Some(&addr.id))
                .collect();
            if offered.is_empty() {
                continue;
            }
            offered.shuffle(rng);
            offered.truncate(MAX_PICKS_PER_BUCKET);
            candidates.push(offered);
        }
        candidates.shuffle(rng);

        let mut picked = Vec::with_capacity(n.min(entries.len()));
        while picked.len() < n && !candidates.is_empty() {
            for bucket in candidates.iter_mut() {
                if picked.len() == n {
                    break;
                }
                if let Some(slot) = bucket.pop().and_then(|addr| entries.get(addr)) {
                    picked.push(slot.entry.clone());
                }
            }
            candidates.retain(|bucket| !bucket.is_empty());
        }
        picked
    }
}

fn bucket_hash(key: &NodeId, parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn new_bucket(key: &NodeId, source_group: &[u8], addr_group: &[u8]) -> usize {
    let slice =
        bucket_hash(key, &[b"new", source_group, addr_group]) % NEW_BUCKETS_PER_SOURCE_GROUP;
    (bucket_hash(key, &[b"new", source_group, &slice.to_be_bytes()]) % NEW_BUCKET_COUNT as u64)
        as usize
}

fn tried_bucket(key: &NodeId, addr: &NetAddress) -> usize {
    let endpoint = addr.socket_addr().to_string();
    let slice = bucket_hash(key, &[b"tried", endpoint.as_bytes()]) % TRIED_BUCKETS_PER_GROUP;
    let addr_group = group(&addr.ip);
    (bucket_hash(key, &[b"tried", &addr_group, &slice.to_be_bytes()])
        % TRIED_BUCKET_COUNT as u64) as usize
}

fn bucket_index(key: &NodeId, entry: &KnownAddress) -> usize {
    match entry.tier {
        Tier::New => new_bucket(key, &entry.source_group(), &group(&entry.addr.ip)),
        Tier::Tried => tried_bucket(key, &entry.addr),
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` next to `path`, sync, then rename over it.
async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let temporary = temporary_path(path);
    let mut file = tokio::fs::File::create(&temporary).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&temporary, path).await
}

/// Shared store of every address the crawler knows about.
///
/// All operations are atomic with respect to each other. The book is meant to
/// be wrapped in an [`Arc`](std::sync::Arc) and handed to each component that
/// needs it.
pub struct AddressBook {
    /// Our identity, keys the bucket hash and is never admitted.
    own_id: NodeId,
    strict_routing: bool,
    path: Option<PathBuf>,
    state: Mutex<BookState>,
    /// Serializes snapshot writes.
    persist_lock: Mutex<()>,
}

impl fmt::Debug for AddressBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressBook")
            .field("own_id", &self.own_id)
            .field("strict_routing", &self.strict_routing)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AddressBook {
    /// Create an empty, in-memory book.
    ///
    /// # Arguments
    ///
    /// * `own_id` - Identity of this node.
    /// * `strict_routing` - Refuse addresses that are not publicly routable.
    pub fn new(own_id: NodeId, strict_routing: bool) -> Self {
        AddressBook {
            own_id,
            strict_routing,
            path: None,
            state: Mutex::new(BookState::new(StdRng::from_entropy())),
            persist_lock: Mutex::new(()),
        }
    }

    /// Back the book with a snapshot file.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Seed the sampling RNG, making [`AddressBook::pick_addresses`] reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.state.get_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check an address against the admission rules without touching the book.
    pub fn admits(&self, addr: &NetAddress) -> Result<(), CrawlerError> {
        let reason = if addr.id == self.own_id {
            "own node id"
        } else if addr.port == 0 {
            "port zero"
        } else if self.strict_routing && !is_routable(&addr.ip) {
            "not publicly routable"
        } else {
            return Ok(());
        };
        Err(CrawlerError::AddressRejected {
            addr: addr.clone(),
            reason,
        })
    }

    fn accept(
        &self,
        state: &mut BookState,
        addr: &NetAddress,
        source: AddressSource,
        seen: u64,
        now: u64,
    ) -> bool {
        if let Err(e) = self.admits(addr) {
            debug!("{e}");
            return false;
        }
        state.upsert(&self.own_id, addr, source, seen, now);
        true
    }

    /// Record that `addr` exists.
    ///
    /// New addresses enter the new table, known ones have their last-seen
    /// time refreshed and keep their tier.
    ///
    /// # Returns
    ///
    /// `false` if the address was rejected.
    pub async fn add_or_update(&self, addr: &NetAddress, source: AddressSource) -> bool {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        self.accept(&mut state, addr, source, now, now)
    }

    /// Batch form of [`AddressBook::add_or_update`], returning how many were accepted.
    pub async fn add_many<'a>(
        &self,
        addrs: impl IntoIterator<Item = &'a NetAddress>,
        source: AddressSource,
    ) -> usize {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        addrs
            .into_iter()
            .filter(|addr| self.accept(&mut state, addr, source, now, now))
            .count()
    }

    /// Record addresses a peer advertised, trusting their last-seen hints
    /// only as far as the present.
    pub async fn add_advertised(&self, advertised: &[PexAddress], source: AddressSource) -> usize {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        advertised
            .iter()
            .filter(|pex| {
                let addr = pex.net_address();
                self.accept(&mut state, &addr, source, pex.last_seen.min(now), now)
            })
            .count()
    }

    /// Stamp a dial attempt.
    pub async fn mark_attempt(&self, addr: &NetAddress) -> bool {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        match state.entries.get_mut(addr) {
            Some(slot) => {
                slot.entry.attempts = slot.entry.attempts.saturating_add(1);
                slot.entry.last_attempt = Some(now);
                true
            }
            None => false,
        }
    }

    /// Record a successful exchange, promoting the address to tried.
    pub async fn mark_good(&self, addr: &NetAddress) -> bool {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        let Some(slot) = state.entries.get_mut(addr) else {
            debug!("Ignoring success for unknown address {addr}");
            return false;
        };
        slot.entry.failures = 0;
        slot.entry.last_success = Some(now);
        slot.entry.last_seen = now;
        if slot.entry.tier == Tier::New {
            state.promote(&self.own_id, addr, now);
            debug!("Promoted {addr} to tried");
        }
        true
    }

    /// Record a failed dial or exchange.
    ///
    /// A tried entry failing [`DEMOTION_THRESHOLD`] times in a row moves back
    /// to new.
    pub async fn mark_failed(&self, addr: &NetAddress) -> bool {
        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        let Some(slot) = state.entries.get_mut(addr) else {
            debug!("Ignoring failure for unknown address {addr}");
            return false;
        };
        slot.entry.failures = slot.entry.failures.saturating_add(1);
        slot.entry.last_attempt = Some(now);
        let failures = slot.entry.failures;
        if slot.entry.tier == Tier::Tried && failures >= DEMOTION_THRESHOLD {
            state.demote(&self.own_id, addr, now);
            debug!("Demoted {addr} to new after {failures} failures");
        }
        true
    }

    /// Sample up to `n` addresses spread across buckets.
    ///
    /// Non-empty buckets of both tables are visited in random order, taking
    /// one random entry from each per round. A bucket gives at most
    /// [`MAX_PICKS_PER_BUCKET`] entries, so a sample may come back short of
    /// `n` when few buckets are populated. Never returns duplicates, entries
    /// of the `exclude` node, or more than `n` addresses.
    pub async fn pick_addresses(&self, n: usize, exclude: Option<&NodeId>) -> Vec<NetAddress> {
        self.pick_known(n, exclude)
            .await
            .into_iter()
            .map(|entry| entry.addr)
            .collect()
    }

    /// Like [`AddressBook::pick_addresses`], but with full entries.
    pub async fn pick_known(&self, n: usize, exclude: Option<&NodeId>) -> Vec<KnownAddress> {
        if n == 0 {
            return Vec::new();
        }
        self.state.lock().await.pick(n, exclude)
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn stats(&self) -> BookStats {
        let state = self.state.lock().await;
        BookStats {
            new: state.count(Tier::New),
            tried: state.count(Tier::Tried),
        }
    }

    /// Copy of every entry, ordered by address.
    pub async fn snapshot(&self) -> Vec<KnownAddress> {
        let state = self.state.lock().await;
        let mut entries: Vec<KnownAddress> =
            state.entries.values().map(|slot| slot.entry.clone()).collect();
        entries.sort_by(|a, b| a.addr.cmp(&b.addr));
        entries
    }

    pub async fn get(&self, addr: &NetAddress) -> Option<KnownAddress> {
        let state = self.state.lock().await;
        state.entries.get(addr).map(|slot| slot.entry.clone())
    }

    /// Merge the snapshot file into the book.
    ///
    /// A missing file is an empty book. Entries that no longer pass admission
    /// are skipped.
    ///
    /// # Returns
    ///
    /// Number of entries loaded.
    pub async fn load_from_disk(&self) -> Result<usize, CrawlerError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No address book at {}, starting empty", path.display());
                return Ok(0);
            }
            Err(e) => return Err(CrawlerError::PersistenceFailure(e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if !snapshot.key.is_empty() && snapshot.key != self.own_id.as_str() {
            info!("Address book was written under key {}, re-bucketing", snapshot.key);
        }

        let now = unix_timestamp();
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        for entry in snapshot.addrs {
            if let Err(e) = self.admits(&entry.addr) {
                debug!("Skipping stored entry: {e}");
                continue;
            }
            if state.entries.contains_key(&entry.addr) {
                continue;
            }
            state.insert(&self.own_id, entry, now);
        }
        let loaded = state.entries.len().saturating_sub(before);
        info!("Loaded {loaded} addresses from {}", path.display());
        Ok(loaded)
    }

    /// Write the book to its snapshot file.
    ///
    /// The file is replaced atomically, a crash mid-write leaves the previous
    /// snapshot intact. No-op for in-memory books.
    pub async fn persist(&self) -> Result<(), CrawlerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let snapshot = Snapshot {
            key: self.own_id.to_string(),
            addrs: self.snapshot().await,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        write_atomically(path, &json)
            .await
            .map_err(CrawlerError::PersistenceFailure)?;
        debug!(
            "Persisted {} addresses to {}",
            snapshot.addrs.len(),
            path.display()
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn bucket_of(&self, addr: &NetAddress) -> Option<(Tier, usize)> {
        let state = self.state.lock().await;
        state
            .entries
            .get(addr)
            .map(|slot| (slot.entry.tier, slot.bucket))
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::net::IpAddr;

    fn book() -> AddressBook {
        AddressBook::new(own_id(), true).with_seed(7)
    }

    #[tokio::test]
    async fn test_add_is_keyed_by_full_address() {
        let book = book();
        let addr = address(1, "45.1.0.1");

        assert!(book.add_or_update(&addr, AddressSource::Seed).await);
        assert!(book.add_or_update(&addr, AddressSource::Seed).await);
        assert_eq!(book.size().await, 1);

        // Same identity on another endpoint is a distinct entry.
        let moved = NetAddress::new(addr.id.clone(), addr.ip, 26657);
        assert!(book.add_or_update(&moved, AddressSource::Seed).await);
        assert_eq!(book.size().await, 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_tier() {
        let book = book();
        let addr = address(1, "45.1.0.1");
        book.add_or_update(&addr, AddressSource::Seed).await;
        book.mark_good(&addr).await;

        let peer_ip: IpAddr = "46.1.0.1".parse().unwrap();
        book.add_or_update(&addr, AddressSource::Peer(peer_ip)).await;
        let entry = book.get(&addr).await.unwrap();
        assert_eq!(entry.tier, Tier::Tried);
        assert_eq!(entry.source, AddressSource::Seed);
    }

    #[tokio::test]
    async fn test_admission_rules() {
        let strict = book();
        assert!(
            !strict
                .add_or_update(&address(1, "192.168.1.1"), AddressSource::Seed)
                .await
        );
        assert!(
            !strict
                .add_or_update(&address(2, "127.0.0.1"), AddressSource::Seed)
                .await
        );
        let own = NetAddress::new(own_id(), "45.1.0.1".parse().unwrap(), 26656);
        assert!(!strict.add_or_update(&own, AddressSource::Seed).await);
        let zero_port = NetAddress::new(node_id(3), "45.1.0.1".parse().unwrap(), 0);
        assert!(!strict.add_or_update(&zero_port, AddressSource::Seed).await);
        assert_eq!(strict.size().await, 0);

        let lenient = AddressBook::new(own_id(), false);
        assert!(
            lenient
                .add_or_update(&address(1, "192.168.1.1"), AddressSource::Seed)
                .await
        );
        assert!(!lenient.add_or_update(&own, AddressSource::Seed).await);
        assert_eq!(lenient.size().await, 1);
    }

    #[tokio::test]
    async fn test_add_advertised_clamps_future_timestamps() {
        let book = book();
        let now = unix_timestamp();
        let advertised = vec![
            PexAddress::new(address(1, "45.1.0.1"), now + 86_400),
            PexAddress::new(address(2, "45.2.0.1"), 1_000),
            PexAddress::new(address(3, "10.0.0.1"), now),
        ];
        let source = AddressSource::Peer("46.0.0.1".parse().unwrap());

        assert_eq!(book.add_advertised(&advertised, source).await, 2);
        let future = book.get(&address(1, "45.1.0.1")).await.unwrap();
        assert!(future.last_seen <= unix_timestamp());
        let old = book.get(&address(2, "45.2.0.1")).await.unwrap();
        assert_eq!(old.last_seen, 1_000);
        assert_eq!(old.source, source);
    }

    #[tokio::test]
    async fn test_mark_good_promotes_and_failures_demote() {
        let book = book();
        let addr = address(1, "45.1.0.1");
        book.add_or_update(&addr, AddressSource::Seed).await;

        assert!(book.mark_failed(&addr).await);
        assert!(book.mark_good(&addr).await);
        let entry = book.get(&addr).await.unwrap();
        assert_eq!(entry.tier, Tier::Tried);
        assert_eq!(entry.failures, 0);
        assert!(entry.last_success.is_some());
        assert_eq!(book.bucket_of(&addr).await.unwrap().0, Tier::Tried);

        for _ in 0..DEMOTION_THRESHOLD - 1 {
            book.mark_failed(&addr).await;
        }
        assert_eq!(book.get(&addr).await.unwrap().tier, Tier::Tried);
        book.mark_failed(&addr).await;
        let entry = book.get(&addr).await.unwrap();
        assert_eq!(entry.tier, Tier::New);
        assert_eq!(entry.failures, DEMOTION_THRESHOLD);
        assert_eq!(book.stats().await, BookStats { new: 1, tried: 0 });
    }

    #[tokio::test]
    async fn test_marks_on_unknown_address() {
        let book = book();
        let addr = address(1, "45.1.0.1");
        assert!(!book.mark_attempt(&addr).await);
        assert!(!book.mark_good(&addr).await);
        assert!(!book.mark_failed(&addr).await);
        assert_eq!(book.size().await, 0);
    }

    #[tokio::test]
    async fn test_full_new_bucket_evicts_stalest() {
        let book = book();
        // One source group and one address group always hash to one bucket.
        let source = AddressSource::Peer("46.0.0.1".parse().unwrap());
        let advertised: Vec<PexAddress> = (0..BUCKET_SIZE as u32)
            .map(|i| {
                PexAddress::new(
                    address(i, &format!("45.1.{}.{}", i / 200, i % 200 + 1)),
                    1_000_000 + i as u64,
                )
            })
            .collect();
        assert_eq!(book.add_advertised(&advertised, source).await, BUCKET_SIZE);
        let mut buckets = HashSet::new();
        for pex in &advertised {
            buckets.insert(book.bucket_of(&pex.net_address()).await.unwrap());
        }
        assert_eq!(buckets.len(), 1);

        let newcomer = address(1000, "45.1.9.9");
        book.add_or_update(&newcomer, source).await;
        assert_eq!(book.size().await, BUCKET_SIZE);
        assert!(book.get(&newcomer).await.is_some());
        // The oldest last-seen scored highest.
        assert!(book.get(&advertised[0].net_address()).await.is_none());
        assert!(book.get(&advertised[1].net_address()).await.is_some());
    }

    #[tokio::test]
    async fn test_promotion_overflow_moves_back_to_new() {
        let book = book();
        // Many source groups, one address group: tried holds at most
        // TRIED_BUCKETS_PER_GROUP buckets worth of these.
        let addrs: Vec<NetAddress> = (0..600u32)
            .map(|i| address(i, &format!("45.1.{}.{}", i / 200, i % 200 + 1)))
            .collect();
        for (i, addr) in addrs.iter().enumerate() {
            let source = AddressSource::Peer(format!("{}.0.0.1", 60 + i % 150).parse().unwrap());
            assert!(book.add_or_update(addr, source).await);
        }
        assert_eq!(book.size().await, 600);

        for addr in &addrs {
            book.mark_good(addr).await;
        }
        let stats = book.stats().await;
        assert_eq!(stats.total(), 600);
        assert!(stats.tried <= TRIED_BUCKETS_PER_GROUP as usize * BUCKET_SIZE);
        assert!(stats.new >= 600 - TRIED_BUCKETS_PER_GROUP as usize * BUCKET_SIZE);
    }

    #[tokio::test]
    async fn test_pick_bounds() {
        let book = book();
        assert!(book.pick_addresses(10, None).await.is_empty());

        let addrs = spread_addresses(6);
        assert_eq!(book.add_many(&addrs, AddressSource::Seed).await, 6);

        assert!(book.pick_addresses(0, None).await.is_empty());
        let all = book.pick_addresses(10, None).await;
        assert_eq!(all.len(), 6);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 6);

        assert_eq!(book.pick_addresses(4, None).await.len(), 4);

        let excluded = &addrs[0].id;
        let picked = book.pick_addresses(10, Some(excluded)).await;
        assert_eq!(picked.len(), 5);
        assert!(picked.iter().all(|addr| &addr.id != excluded));
    }

    #[tokio::test]
    async fn test_pick_spreads_across_buckets() {
        let book = book();
        let addrs = spread_addresses(50);
        book.add_many(&addrs, AddressSource::Seed).await;

        let mut per_bucket: HashMap<(Tier, usize), usize> = HashMap::new();
        for addr in &addrs {
            *per_bucket
                .entry(book.bucket_of(addr).await.unwrap())
                .or_default() += 1;
        }
        assert!(per_bucket.len() >= 2);

        let n = 10;
        let picked = book.pick_addresses(n, None).await;
        assert_eq!(picked.len(), n);
        let mut picked_per_bucket: HashMap<(Tier, usize), usize> = HashMap::new();
        for addr in &picked {
            *picked_per_bucket
                .entry(book.bucket_of(addr).await.unwrap())
                .or_default() += 1;
        }
        assert!(picked_per_bucket
            .values()
            .all(|&count| count <= MAX_PICKS_PER_BUCKET));
    }

    #[tokio::test]
    async fn test_pick_caps_a_flooded_bucket() {
        let book = book();
        // One peer advertising a whole /16 lands everything in one bucket.
        let relay: IpAddr = "99.9.0.1".parse().unwrap();
        let flood: Vec<NetAddress> = (0..BUCKET_SIZE as u32)
            .map(|i| address(i, &format!("45.1.0.{}", i + 1)))
            .collect();
        for addr in &flood {
            assert!(book.add_or_update(addr, AddressSource::Peer(relay)).await);
        }
        let flooded = book.bucket_of(&flood[0]).await.unwrap();
        for addr in &flood {
            assert_eq!(book.bucket_of(addr).await.unwrap(), flooded);
        }
        let seed = address(1000, "46.0.0.1");
        book.add_or_update(&seed, AddressSource::Seed).await;

        let picked = book.pick_addresses(30, None).await;
        let from_flood = picked.iter().filter(|addr| flood.contains(addr)).count();
        assert_eq!(from_flood, MAX_PICKS_PER_BUCKET);
        assert!(picked.len() <= 2 * MAX_PICKS_PER_BUCKET);
    }

    #[tokio::test]
    async fn test_pick_is_deterministic_with_seed() {
        let addrs = spread_addresses(40);
        let first = AddressBook::new(own_id(), true).with_seed(42);
        let second = AddressBook::new(own_id(), true).with_seed(42);
        first.add_many(&addrs, AddressSource::Seed).await;
        second.add_many(&addrs, AddressSource::Seed).await;

        assert_eq!(
            first.pick_addresses(12, None).await,
            second.pick_addresses(12, None).await
        );
    }

    #[tokio::test]
    async fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("addrbook.json");

        let book = AddressBook::new(own_id(), true).with_path(&path);
        let addrs = spread_addresses(20);
        book.add_many(&addrs, AddressSource::Seed).await;
        book.mark_attempt(&addrs[0]).await;
        book.mark_good(&addrs[0]).await;
        book.mark_attempt(&addrs[1]).await;
        book.mark_failed(&addrs[1]).await;
        book.persist().await.unwrap();
        assert!(path.exists());
        assert!(!temporary_path(&path).exists());

        let restored = AddressBook::new(own_id(), true).with_path(&path);
        assert_eq!(restored.load_from_disk().await.unwrap(), 20);
        assert_eq!(restored.snapshot().await, book.snapshot().await);
        assert_eq!(restored.stats().await, BookStats { new: 19, tried: 1 });
        for addr in &addrs {
            assert_eq!(restored.bucket_of(addr).await, book.bucket_of(addr).await);
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let book = AddressBook::new(own_id(), true).with_path(dir.path().join("absent.json"));
        assert_eq!(book.load_from_disk().await.unwrap(), 0);
        assert_eq!(book.size().await, 0);
    }

    #[tokio::test]
    async fn test_load_ignores_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addrbook.json");
        let json = format!(
            r#"{{"key": "{}", "version": 2, "addrs": [
                {{"addr": "{}", "src": "seed", "tier": "new", "last_seen": 5, "rating": 9}},
                {{"addr": "{}"}}
            ]}}"#,
            own_id(),
            address(1, "45.1.0.1"),
            address(2, "10.0.0.1"),
        );
        std::fs::write(&path, json).unwrap();

        let book = AddressBook::new(own_id(), true).with_path(&path);
        // The private address no longer passes strict routing.
        assert_eq!(book.load_from_disk().await.unwrap(), 1);
        let entry = book.get(&address(1, "45.1.0.1")).await.unwrap();
        assert_eq!(entry.last_seen, 5);
    }

    #[tokio::test]
    async fn test_load_overflowing_tried_moves_to_new() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addrbook.json");

        // More tried entries from one /16 than its tried buckets can hold.
        let count = 600;
        let addrs: Vec<KnownAddress> = (0..count)
            .map(|i| {
                let addr = address(i, &format!("45.1.{}.{}", i / 250, i % 250 + 1));
                let mut entry = KnownAddress::new(addr, AddressSource::Seed, 1_700_000_000);
                entry.tier = Tier::Tried;
                entry
            })
            .collect();
        let snapshot = Snapshot {
            key: own_id().to_string(),
            addrs,
        };
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let book = AddressBook::new(own_id(), true).with_path(&path);
        let loaded = book.load_from_disk().await.unwrap();
        assert_eq!(loaded, book.size().await);
        assert!(loaded < count as usize);

        let stats = book.stats().await;
        assert!(stats.tried <= TRIED_BUCKETS_PER_GROUP as usize * BUCKET_SIZE);
        assert!(stats.new > 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addrbook.json");
        std::fs::write(&path, b"{not json").unwrap();

        let book = AddressBook::new(own_id(), true).with_path(&path);
        assert!(matches!(
            book.load_from_disk().await,
            Err(CrawlerError::PersistenceFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_persist_is_noop() {
        let book = book();
        book.add_many(&spread_addresses(3), AddressSource::Seed).await;
        book.persist().await.unwrap();
    }
}
