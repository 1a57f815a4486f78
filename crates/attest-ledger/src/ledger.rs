//! The chain engine.
//!
//! A [`Ledger`] owns one hash chain. Its only mutable state is the head
//! (`head_hash`, `length`, first/last timestamps), changed exclusively while
//! the writer lock is held and only after the backend has accepted the
//! write. Reads never take the writer lock.

use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use attest_crypto::{
    ChainFault, ChainVerifier, ContentHasher, FailureReason, HashAlgorithm, MerkleProof,
    MerkleTree, Signer, SignerRegistry,
};
use attest_store::{Backend, Compressor, StoredEntry};
use attest_types::{Digest, Value};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, EntryCache};
use crate::codec::EntryCodec;
use crate::config::LedgerConfig;
use crate::entry::{self, Entry};
use crate::error::{LedgerError, LedgerResult};
use crate::lock::WriterLock;
use crate::monitor::VerificationMonitor;
use crate::query::EntryIter;
use crate::verify::{StoredRecord, VerificationReport, Verification, VerifyOptions};

/// Receiver of committed entries, in commit order.
pub type EntryStream = broadcast::Receiver<Entry>;

/// One entry to append.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendRequest {
    payload: Value,
    metadata: Option<Value>,
    sign: Option<bool>,
}

impl AppendRequest {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            metadata: None,
            sign: None,
        }
    }

    pub fn metadata(mut self, metadata: impl Into<Value>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Override the ledger's `enable_signatures` default for this entry.
    pub fn sign(mut self, sign: bool) -> Self {
        self.sign = Some(sign);
        self
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

impl From<Value> for AppendRequest {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

impl From<serde_json::Value> for AppendRequest {
    fn from(payload: serde_json::Value) -> Self {
        Self::new(Value::from(payload))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerState {
    /// No entries; the head is the genesis sentinel.
    Empty,
    Active,
}

/// Summary of the committed chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerStats {
    pub total_entries: u64,
    pub first_entry_time: Option<DateTime<Utc>>,
    pub last_entry_time: Option<DateTime<Utc>>,
    pub hash_algorithm: HashAlgorithm,
    pub head: Digest,
}

#[derive(Clone, Debug)]
pub(crate) struct ChainHead {
    pub(crate) hash: Digest,
    pub(crate) length: u64,
    first_time: Option<DateTime<Utc>>,
    last_time: Option<DateTime<Utc>>,
}

impl ChainHead {
    fn genesis(hasher: &ContentHasher) -> Self {
        Self {
            hash: hasher.genesis(),
            length: 0,
            first_time: None,
            last_time: None,
        }
    }
}

pub(crate) struct LedgerInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: LedgerConfig,
    pub(crate) hasher: ContentHasher,
    pub(crate) codec: EntryCodec,
    cache: Option<EntryCache>,
    signer: Option<Arc<dyn Signer>>,
    signers: SignerRegistry,
    lock: WriterLock,
    head: RwLock<ChainHead>,
    events: broadcast::Sender<Entry>,
    closed: AtomicBool,
}

impl LedgerInner {
    pub(crate) fn ensure_open(&self) -> LedgerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> ChainHead {
        self.head.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn cached(&self, sequence: u64) -> Option<Entry> {
        self.cache.as_ref()?.get(sequence)
    }

    /// Decode a committed record, remembering the result.
    pub(crate) fn decode(&self, stored: &StoredEntry) -> LedgerResult<Entry> {
        let entry = self.codec.decode(stored)?;
        if let Some(cache) = &self.cache {
            cache.insert(entry.clone());
        }
        Ok(entry)
    }

    fn verification(&self) -> Verification<'_> {
        Verification {
            backend: self.backend.as_ref(),
            codec: &self.codec,
            hasher: self.hasher,
            signers: &self.signers,
            page_size: self.config.verify_page_size,
        }
    }

    /// Chain `requests` onto `head` in memory. No I/O.
    fn seal(&self, head: &ChainHead, requests: Vec<AppendRequest>) -> LedgerResult<Vec<Entry>> {
        let now = Utc::now();
        let timestamp = match head.last_time {
            Some(last) if last > now => last,
            _ => now,
        };

        let mut prev = head.hash.clone();
        let mut entries = Vec::with_capacity(requests.len());
        for (offset, request) in requests.into_iter().enumerate() {
            let sequence = head.length + offset as u64;
            let bytes = entry::preimage(
                sequence,
                &timestamp,
                &request.payload,
                request.metadata.as_ref(),
                &prev,
            )?;
            let content_hash = self.hasher.digest(&bytes);

            let (signature, signer_id) = if request.sign.unwrap_or(self.config.enable_signatures) {
                let signer = self.signer.as_ref().ok_or(LedgerError::SignerUnavailable)?;
                (
                    Some(signer.sign(content_hash.as_bytes())?),
                    Some(signer.signer_id().to_string()),
                )
            } else {
                (None, None)
            };

            entries.push(Entry::from_parts(
                sequence,
                timestamp,
                request.payload,
                request.metadata,
                prev,
                content_hash.clone(),
                signature,
                signer_id,
            ));
            prev = content_hash;
        }
        Ok(entries)
    }

    /// The critical section. The caller holds the writer lock.
    fn commit(&self, requests: Vec<AppendRequest>, bulk: bool) -> LedgerResult<Vec<Entry>> {
        self.ensure_open()?;
        let head = self.snapshot();
        let entries = self.seal(&head, requests)?;
        let mut records = entries
            .iter()
            .map(|e| self.codec.encode(e))
            .collect::<LedgerResult<Vec<StoredEntry>>>()?;
        let marked = records.len().saturating_sub(1);
        for record in &mut records[..marked] {
            record.commit = false;
        }

        let written = match records.as_slice() {
            [single] if !bulk => self.backend.append_one(single).map_err(LedgerError::from),
            _ => self
                .backend
                .append_many(&records)
                .map_err(|source| LedgerError::BatchCommit {
                    size: records.len(),
                    source,
                }),
        };
        if let Err(e) = written {
            warn!(sequence = head.length, count = records.len(), error = %e, "write rejected, head unchanged");
            self.report_divergence(&head);
            return Err(e);
        }

        let Some(last) = entries.last() else {
            return Ok(entries);
        };
        {
            let mut state = self.head.write().unwrap_or_else(PoisonError::into_inner);
            state.hash = last.content_hash().clone();
            state.length += entries.len() as u64;
            state.first_time = state.first_time.or(Some(last.timestamp()));
            state.last_time = Some(last.timestamp());
        }
        debug!(
            sequence = head.length,
            count = entries.len(),
            head = %last.content_hash().short_hex(),
            "entries committed"
        );

        if let Some(cache) = &self.cache {
            for entry in &entries {
                cache.insert(entry.clone());
            }
        }
        if self.events.receiver_count() > 0 {
            for entry in &entries {
                // Lagging or dropped receivers are their own concern.
                let _ = self.events.send(entry.clone());
            }
        }
        Ok(entries)
    }

    /// Mark closed and release the backend. The caller holds the writer lock.
    fn shut_down(&self) -> LedgerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self.backend.close()?;
        info!(length = self.snapshot().length, "ledger closed");
        Ok(())
    }

    fn report_divergence(&self, head: &ChainHead) {
        match self.backend.count() {
            Ok(count) if count != head.length => warn!(
                count,
                length = head.length,
                "backend holds records the chain never committed"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not re-check backend after failed write"),
        }
    }
}

/// Handle to a hash-chained ledger.
///
/// Cloning is cheap and every clone drives the same chain. Each chain-extending
/// call is serialized by a single writer lock, available through blocking
/// (`append`, `append_batch`) and async (`append_async`,
/// `append_batch_async`) entry points with identical ordering guarantees.
///
/// ```ignore
/// let ledger = Ledger::builder(Arc::new(InMemoryBackend::new())).open()?;
/// let entry = ledger.append(AppendRequest::new(json!({"action": "login"})))?;
/// assert!(ledger.verify_integrity(VerifyOptions::default())?.is_valid());
/// ```
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
}

impl Ledger {
    pub fn builder(backend: Arc<dyn Backend>) -> LedgerBuilder {
        LedgerBuilder::new(backend)
    }

    /// Append one entry, blocking until the writer lock is free.
    pub fn append(&self, request: impl Into<AppendRequest>) -> LedgerResult<Entry> {
        let _guard = self.inner.lock.acquire(self.inner.config.lock_timeout())?;
        single(self.inner.commit(vec![request.into()], false)?)
    }

    /// Append several entries as one atomic unit.
    pub fn append_batch(&self, requests: Vec<AppendRequest>) -> LedgerResult<Vec<Entry>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.inner.lock.acquire(self.inner.config.lock_timeout())?;
        self.inner.commit(requests, true)
    }

    /// Append one entry, suspending while waiting for the writer lock.
    ///
    /// Once the lock is held the write runs to completion on the blocking
    /// pool, even if this future is dropped. After a caller-side timeout,
    /// re-check [`get_stats`](Self::get_stats) rather than assume failure.
    pub async fn append_async(&self, request: impl Into<AppendRequest>) -> LedgerResult<Entry> {
        let request = request.into();
        single(self.commit_async(vec![request], false).await?)
    }

    pub async fn append_batch_async(&self, requests: Vec<AppendRequest>) -> LedgerResult<Vec<Entry>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.commit_async(requests, true).await
    }

    async fn commit_async(&self, requests: Vec<AppendRequest>, bulk: bool) -> LedgerResult<Vec<Entry>> {
        let guard = self
            .inner
            .lock
            .acquire_async(self.inner.config.lock_timeout())
            .await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            inner.commit(requests, bulk)
        })
        .await
        .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }

    /// Verify the chain as committed when the call starts. Entries appended
    /// concurrently are not checked.
    pub fn verify_integrity(&self, options: VerifyOptions) -> LedgerResult<VerificationReport> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        self.inner.verification().run(length, &options)
    }

    /// [`verify_integrity`](Self::verify_integrity) on the blocking pool.
    /// Cancel through [`VerifyOptions::cancel`].
    pub async fn verify_integrity_async(
        &self,
        options: VerifyOptions,
    ) -> LedgerResult<VerificationReport> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.verification().run(length, &options))
            .await
            .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }

    /// Re-verify the whole chain every `period` on a background task.
    ///
    /// Each run is logged; failures at `error` level. Must be called from
    /// within a Tokio runtime.
    pub fn spawn_verification(&self, period: Duration) -> VerificationMonitor {
        VerificationMonitor::spawn(self.clone(), period)
    }

    /// Check one entry: its hash, its link to the predecessor, and its
    /// signature.
    pub fn verify_entry(&self, sequence: u64) -> LedgerResult<VerificationReport> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        if sequence >= length {
            return Err(LedgerError::InvalidRange {
                start: sequence,
                end: sequence.saturating_add(1),
                length,
            });
        }

        let verification = self.inner.verification();
        let prev = match verification.link_before(sequence)? {
            Ok(prev) => prev,
            Err(fault) => return Ok(verification.failed(fault)),
        };
        let Some(stored) = self.inner.backend.get(sequence)? else {
            return Ok(verification.failed(ChainFault::new(
                sequence,
                FailureReason::MissingEntry,
                "entry is not stored",
            )));
        };

        let mut verifier =
            ChainVerifier::resume(self.inner.hasher, &self.inner.signers, sequence, prev);
        let record = StoredRecord {
            stored: &stored,
            codec: &self.inner.codec,
        };
        Ok(match verifier.check(&record) {
            Ok(()) => VerificationReport::Valid {
                head: stored.content_hash.clone(),
                length: sequence + 1,
                checked: 1,
                merkle_root: None,
            },
            Err(fault) => verification.failed(fault),
        })
    }

    /// The committed entry at `sequence`.
    pub fn get_entry(&self, sequence: u64) -> LedgerResult<Option<Entry>> {
        self.inner.ensure_open()?;
        if sequence >= self.inner.snapshot().length {
            return Ok(None);
        }
        if let Some(entry) = self.inner.cached(sequence) {
            return Ok(Some(entry));
        }
        self.inner
            .backend
            .get(sequence)?
            .map(|stored| self.inner.decode(&stored))
            .transpose()
    }

    /// Lazily read up to `limit` committed entries starting at `offset`.
    pub fn get_entries(&self, offset: u64, limit: usize) -> LedgerResult<EntryIter> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        let end = offset.saturating_add(limit as u64).min(length);
        Ok(EntryIter::new(Arc::clone(&self.inner), offset, end))
    }

    /// Lazily scan every committed entry, keeping those matching `predicate`.
    /// Read errors are passed through.
    pub fn query<F>(&self, predicate: F) -> LedgerResult<impl Iterator<Item = LedgerResult<Entry>>>
    where
        F: Fn(&Entry) -> bool,
    {
        Ok(self
            .get_entries(0, usize::MAX)?
            .filter(move |item| item.as_ref().map_or(true, &predicate)))
    }

    /// Committed entries signed by `signer_id`, filtered by the backend.
    pub fn find_by_signer(&self, signer_id: &str) -> LedgerResult<Vec<Entry>> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        let records = self.inner.backend.read_by_predicate(&|r: &StoredEntry| {
            r.sequence < length && r.signer_id.as_deref() == Some(signer_id)
        })?;
        records.iter().map(|r| self.inner.decode(r)).collect()
    }

    /// Counters of the read cache, when `cache_capacity` is non-zero.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(EntryCache::stats)
    }

    /// Drop every cached entry so later reads go to the backend.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
    }

    pub fn get_stats(&self) -> LedgerStats {
        let head = self.inner.snapshot();
        LedgerStats {
            total_entries: head.length,
            first_entry_time: head.first_time,
            last_entry_time: head.last_time,
            hash_algorithm: self.inner.hasher.algorithm(),
            head: head.hash,
        }
    }

    /// Merkle tree over the stored content hashes of `range`.
    pub fn merkle_tree(&self, range: Range<u64>) -> LedgerResult<MerkleTree> {
        self.inner.ensure_open()?;
        let length = self.inner.snapshot().length;
        if range.start > range.end || range.end > length {
            return Err(LedgerError::InvalidRange {
                start: range.start,
                end: range.end,
                length,
            });
        }

        let mut tree = MerkleTree::new(self.inner.hasher.algorithm());
        let mut next = range.start;
        while next < range.end {
            let want = (range.end - next).min(self.inner.config.verify_page_size as u64) as usize;
            let page = self.inner.backend.read_range(next, want)?;
            if page.is_empty() {
                return Err(LedgerError::MissingEntry { sequence: next });
            }
            for stored in page.into_iter().take_while(|r| r.sequence < range.end) {
                if stored.sequence != next {
                    return Err(LedgerError::MissingEntry { sequence: next });
                }
                tree.add_leaf(stored.content_hash);
                next += 1;
            }
        }
        tree.build();
        Ok(tree)
    }

    /// Inclusion proof for `sequence` and the root over every committed entry.
    pub fn inclusion_proof(&self, sequence: u64) -> LedgerResult<(MerkleProof, Digest)> {
        let length = self.inner.snapshot().length;
        if sequence >= length {
            return Err(LedgerError::InvalidRange {
                start: sequence,
                end: sequence.saturating_add(1),
                length,
            });
        }
        let tree = self.merkle_tree(0..length)?;
        Ok((tree.get_proof(sequence as usize)?, tree.get_root()?))
    }

    /// Observe every entry committed after this call.
    pub fn subscribe(&self) -> EntryStream {
        self.inner.events.subscribe()
    }

    /// Wait for any in-flight write, then release backend resources. Later
    /// operations fail with [`LedgerError::Closed`].
    ///
    /// Blocks the calling thread; async callers use
    /// [`close_async`](Self::close_async).
    pub fn close(&self) -> LedgerResult<()> {
        let _guard = self.inner.lock.acquire(self.inner.config.lock_timeout())?;
        self.inner.shut_down()
    }

    /// [`close`](Self::close) without blocking the scheduler thread.
    pub async fn close_async(&self) -> LedgerResult<()> {
        let guard = self
            .inner
            .lock
            .acquire_async(self.inner.config.lock_timeout())
            .await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            inner.shut_down()
        })
        .await
        .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LedgerState {
        if self.len() == 0 {
            LedgerState::Empty
        } else {
            LedgerState::Active
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> u64 {
        self.inner.snapshot().length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content hash of the last committed entry, or the genesis sentinel.
    pub fn head(&self) -> Digest {
        self.inner.snapshot().hash
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.inner.hasher.algorithm()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Id of the default signer, if one is configured.
    pub fn signer_id(&self) -> Option<&str> {
        self.inner.signer.as_ref().map(|s| s.signer_id())
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.inner.snapshot();
        f.debug_struct("Ledger")
            .field("length", &head.length)
            .field("head", &head.hash)
            .field("algorithm", &self.inner.hasher.algorithm())
            .field("codec", &self.inner.codec)
            .field("signers", &self.inner.signers)
            .finish()
    }
}

fn single(entries: Vec<Entry>) -> LedgerResult<Entry> {
    entries
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::TaskFailed("append produced no entry".into()))
}

/// Collects construction-time configuration for a [`Ledger`].
pub struct LedgerBuilder {
    backend: Arc<dyn Backend>,
    config: LedgerConfig,
    signer: Option<Arc<dyn Signer>>,
    verifiers: Vec<Arc<dyn Signer>>,
    compressor: Option<Arc<dyn Compressor>>,
}

impl LedgerBuilder {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: LedgerConfig::default(),
            signer: None,
            verifiers: Vec::new(),
            compressor: None,
        }
    }

    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.hash_algorithm = algorithm;
        self
    }

    pub fn enable_signatures(mut self, enable: bool) -> Self {
        self.config.enable_signatures = enable;
        self
    }

    /// Signer used for appends. Also registered for verification.
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Additional signer consulted only when verifying, e.g. a retired key.
    pub fn verifier(mut self, signer: Arc<dyn Signer>) -> Self {
        self.verifiers.push(signer);
        self
    }

    pub fn compression(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Recover the head from the backend and open the ledger.
    pub fn open(self) -> LedgerResult<Ledger> {
        let config = self.config;
        config.validate()?;

        if let Some(signer) = &self.signer {
            if !signer.can_sign() {
                return Err(LedgerError::InvalidConfig(format!(
                    "signer {} holds no private key",
                    signer.signer_id()
                )));
            }
        }
        if config.enable_signatures && self.signer.is_none() {
            return Err(LedgerError::InvalidConfig(
                "signatures enabled but no signer configured".into(),
            ));
        }

        let hasher = ContentHasher::new(config.hash_algorithm);
        let mut signers = SignerRegistry::new();
        for verifier in self.verifiers {
            signers.register(verifier);
        }
        if let Some(signer) = &self.signer {
            if signers.contains(signer.signer_id()) {
                warn!(
                    signer_id = signer.signer_id(),
                    "signing key replaces a verifier registered under the same id"
                );
            }
            signers.register(Arc::clone(signer));
        }

        let head = recover_head(self.backend.as_ref(), &hasher)?;
        let (events, _) = broadcast::channel(config.subscriber_capacity);
        let cache = NonZeroUsize::new(config.cache_capacity)
            .map(|capacity| EntryCache::new(capacity, config.cache_ttl()));
        info!(
            length = head.length,
            algorithm = %hasher.algorithm(),
            head = %head.hash.short_hex(),
            "ledger opened"
        );

        Ok(Ledger {
            inner: Arc::new(LedgerInner {
                backend: self.backend,
                codec: EntryCodec::new(self.compressor),
                cache,
                hasher,
                signer: self.signer,
                signers,
                lock: WriterLock::new(),
                head: RwLock::new(head),
                events,
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }
}

fn recover_head(backend: &dyn Backend, hasher: &ContentHasher) -> LedgerResult<ChainHead> {
    let Some(last) = backend.last()? else {
        return Ok(ChainHead::genesis(hasher));
    };
    let first = backend.first()?;

    for stored in first.iter().chain(std::iter::once(&last)) {
        if stored.content_hash.len() != hasher.output_len() {
            return Err(LedgerError::AlgorithmMismatch {
                configured: hasher.algorithm(),
                expected: hasher.output_len(),
                stored: stored.content_hash.len(),
            });
        }
    }

    let stored_length = last.sequence + 1;
    let count = backend.count()?;
    if count != stored_length {
        warn!(count, length = stored_length, "stored record count disagrees with last sequence");
    }

    let Some(committed) = last_committed(backend, last)? else {
        warn!(stored = stored_length, "no completed write found, starting from genesis");
        return Ok(ChainHead::genesis(hasher));
    };
    let length = committed.sequence + 1;
    if length < stored_length {
        warn!(
            length,
            stored = stored_length,
            "ignoring records left by an incomplete write"
        );
    }

    Ok(ChainHead {
        hash: committed.content_hash.clone(),
        length,
        first_time: first.as_ref().and_then(StoredEntry::timestamp),
        last_time: committed.timestamp(),
    })
}

/// Walk back from `last` to the newest record carrying a commit marker.
fn last_committed(backend: &dyn Backend, last: StoredEntry) -> LedgerResult<Option<StoredEntry>> {
    if last.commit {
        return Ok(Some(last));
    }
    let mut sequence = last.sequence;
    while sequence > 0 {
        sequence -= 1;
        match backend.get(sequence)? {
            Some(stored) if stored.commit => return Ok(Some(stored)),
            Some(_) => {}
            None => return Err(LedgerError::MissingEntry { sequence }),
        }
    }
    Ok(None)
}
