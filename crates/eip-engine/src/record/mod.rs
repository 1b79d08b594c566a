//! Transform Records
//!
//! A transform record is the engine-resident state of one crypto session:
//! control words, key material, HMAC pad space and mode trailer fields.
//! Every packet operation binds to exactly one record by address.
//!
//! # Lifecycle
//!
//! ```text
//! Active --free--> Draining --usage 0--> InvalidationPending --ack--> Freed
//! ```
//!
//! - The session holds one implicit reference; each in-flight operation
//!   holds another, capped at `max_inflight_per_record`
//! - `free` marks the record inactive, swaps its callbacks for a discard
//!   sink and drops the implicit reference
//! - The last reference hands the record to the reclaim worker, which
//!   submits a cache invalidation and retries with backoff while the ring
//!   is full
//! - Only the invalidation completion unlinks the record from its context
//!   and lets its memory go
//!
//! Rekey swaps the record behind a [`Session`] atomically; operations that
//! already referenced the old record finish on it.

mod aead;
mod ahash;
mod ipsec;
pub(crate) mod reclaim;
mod skcipher;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use eip_common::{EipError, EipResult, HwError};
use tracing::{debug, error, info, warn};

use crate::context::{Context, ContextInner, Service};
use crate::dma::{Completer, Segment, Submission};
use crate::flow::FlowTuple;
use crate::hw::{self, ctx, inst, token_hdr};
use crate::mem::DmaRegion;
use crate::stats::{RecordStats, RecordStatsSnapshot};
use crate::token::{CipherKind, Direction, Token, TokenTemplate};

pub use ipsec::{IpsecMode, IpsecParams, NattPorts, ReplayWindow};
pub(crate) use reclaim::{Job, Reclaimer};

pub(crate) use aead::ALGORITHMS as AEAD_ALGORITHMS;
pub(crate) use ahash::ALGORITHMS as AHASH_ALGORITHMS;
pub(crate) use ipsec::ALGORITHMS as IPSEC_ALGORITHMS;
pub(crate) use skcipher::ALGORITHMS as SKCIPHER_ALGORITHMS;

/// Hash function of an algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// MD5
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
    /// GHASH (GCM)
    Ghash,
}

impl HashAlg {
    /// Control word 0 algorithm bits
    pub const fn ctrl(self) -> u32 {
        match self {
            Self::Md5 => ctx::ALGO_MD5,
            Self::Sha1 => ctx::ALGO_SHA1,
            Self::Sha224 => ctx::ALGO_SHA224,
            Self::Sha256 => ctx::ALGO_SHA256,
            Self::Sha384 => ctx::ALGO_SHA384,
            Self::Sha512 => ctx::ALGO_SHA512,
            Self::Ghash => ctx::ALGO_GHASH,
        }
    }

    /// Full digest length in bytes
    pub const fn digest_len(self) -> u32 {
        match self {
            Self::Md5 | Self::Ghash => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Record bytes reserved for one HMAC pad state
    pub const fn state_len(self) -> u32 {
        match self {
            Self::Md5 | Self::Ghash => ctx::PAD_KEYSZ_MD5 as u32,
            Self::Sha1 => ctx::PAD_KEYSZ_SHA1 as u32,
            Self::Sha224 => ctx::PAD_KEYSZ_SHA224 as u32,
            Self::Sha256 => ctx::PAD_KEYSZ_SHA256 as u32,
            Self::Sha384 => ctx::PAD_KEYSZ_SHA384 as u32,
            Self::Sha512 => ctx::PAD_KEYSZ_SHA512 as u32,
        }
    }

    /// Record words reserved for one HMAC pad state
    pub const fn state_words(self) -> u32 {
        self.state_len() / 4
    }
}

/// One entry of a service's algorithm table
#[derive(Debug, PartialEq, Eq)]
pub struct Algorithm {
    /// Registered name
    pub name: &'static str,
    /// Cipher family
    pub cipher: CipherKind,
    /// Hash function, if any
    pub hash: Option<HashAlg>,
    /// Keyed hash (needs the pad precompute)
    pub hmac: bool,
    /// Control words before key-dependent bits
    pub ctrl: [u32; 2],
    /// Output digest or ICV length in bytes
    pub digest_len: u32,
    /// Cipher block length in bytes
    pub blk_len: u32,
    /// IV length in bytes
    pub iv_len: u32,
}

/// Key material and parameters of a new session
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Algorithm name in the service table
    pub algo: String,
    /// Cipher key; CTR and GCM keys carry the 4-byte nonce at the end
    pub cipher_key: Bytes,
    /// Authentication key
    pub auth_key: Bytes,
    /// IPsec SA parameters
    pub ipsec: Option<IpsecParams>,
}

impl SessionInfo {
    /// Session for `algo` with no keys yet
    pub fn new(algo: impl Into<String>) -> Self {
        Self {
            algo: algo.into(),
            ..Default::default()
        }
    }

    /// Set the cipher key
    pub fn with_cipher_key(mut self, key: impl Into<Bytes>) -> Self {
        self.cipher_key = key.into();
        self
    }

    /// Set the authentication key
    pub fn with_auth_key(mut self, key: impl Into<Bytes>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Set the IPsec SA parameters
    pub fn with_ipsec(mut self, params: IpsecParams) -> Self {
        self.ipsec = Some(params);
        self
    }
}

/// One packet operation
#[derive(Debug, Clone)]
pub struct Request {
    /// Opaque handle echoed in the completion
    pub tag: u64,
    /// Input fragments
    pub src: Vec<Segment>,
    /// Output fragments
    pub dst: Vec<Segment>,
    /// Cipher, hash or packet length in bytes
    pub len: u32,
    /// Associated data length (AEAD)
    pub assoc_len: u32,
    /// IV (cipher and AEAD)
    pub iv: [u8; 16],
    /// Inner protocol for ESP encapsulation
    pub next_hdr: u8,
}

impl Request {
    /// `len` bytes from `src` into `dst`
    pub fn new(tag: u64, src: Segment, dst: Segment, len: u32) -> Self {
        Self {
            tag,
            src: vec![src],
            dst: vec![dst],
            len,
            assoc_len: 0,
            iv: [0; 16],
            next_hdr: 0,
        }
    }

    /// Scatter-gather request
    pub fn with_fragments(tag: u64, src: Vec<Segment>, dst: Vec<Segment>, len: u32) -> Self {
        Self {
            src,
            dst,
            ..Self::new_empty(tag, len)
        }
    }

    fn new_empty(tag: u64, len: u32) -> Self {
        Self {
            tag,
            src: Vec::new(),
            dst: Vec::new(),
            len,
            assoc_len: 0,
            iv: [0; 16],
            next_hdr: 0,
        }
    }

    /// Set the IV
    pub fn with_iv(mut self, iv: [u8; 16]) -> Self {
        self.iv = iv;
        self
    }

    /// Set the associated data length
    pub fn with_assoc(mut self, assoc_len: u32) -> Self {
        self.assoc_len = assoc_len;
        self
    }

    /// Set the inner protocol
    pub fn with_next_hdr(mut self, next_hdr: u8) -> Self {
        self.next_hdr = next_hdr;
        self
    }

    /// Reject lengths the engine's 16-bit length fields cannot carry
    pub(crate) fn check_lengths(&self) -> EipResult<()> {
        let max = token_hdr::LEN_MASK;
        match self.len.checked_add(self.assoc_len) {
            Some(total) if total <= max => {}
            _ => {
                return Err(EipError::InvalidParam(format!(
                    "length {} with {} associated bytes exceeds {}",
                    self.len, self.assoc_len, max
                )))
            }
        }
        if let Some(seg) = self.src.iter().chain(&self.dst).find(|s| s.len() > max as usize) {
            return Err(EipError::InvalidParam(format!(
                "fragment of {} bytes exceeds {}",
                seg.len(),
                max
            )));
        }
        Ok(())
    }

    fn src_bytes(&self) -> usize {
        self.src.iter().map(Segment::len).sum()
    }

    /// Read input bytes starting at `offset`, across fragments
    fn read_src(&self, mut offset: usize, out: &mut [u8]) {
        let mut done = 0;
        for seg in &self.src {
            if done == out.len() {
                break;
            }
            if offset >= seg.len() {
                offset -= seg.len();
                continue;
            }
            let n = (seg.len() - offset).min(out.len() - done);
            seg.read(offset, &mut out[done..done + n]);
            done += n;
            offset = 0;
        }
    }
}

/// Successful completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Request tag
    pub request: u64,
    /// Output bytes written by the engine
    pub data_len: u32,
}

/// Receives completions of a record's operations
pub trait CompletionSink: Send + Sync {
    /// Operation succeeded
    fn complete(&self, done: Completion);
    /// Engine reported an error
    fn error(&self, request: u64, err: HwError);
}

/// Sink installed on freed records; consumes late completions
#[derive(Debug, Default)]
pub struct Discard;

impl CompletionSink for Discard {
    fn complete(&self, done: Completion) {
        debug!("discarding completion of request {}", done.request);
    }

    fn error(&self, request: u64, err: HwError) {
        debug!("discarding error of request {}: {}", request, err);
    }
}

/// Outcome delivered by [`ChannelSink`]
pub type Outcome = (u64, Result<u32, HwError>);

/// Sink forwarding every outcome to a channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Outcome>,
}

impl ChannelSink {
    /// Sink and the receiving end of its channel
    pub fn new() -> (Arc<Self>, Receiver<Outcome>) {
        let (tx, rx) = unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl CompletionSink for ChannelSink {
    fn complete(&self, done: Completion) {
        let _ = self.tx.send((done.request, Ok(done.data_len)));
    }

    fn error(&self, request: u64, err: HwError) {
        let _ = self.tx.send((request, Err(err)));
    }
}

/// Record lifecycle state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrState {
    /// Accepting operations
    Active = 0,
    /// Freed by its owner; waiting for in-flight operations
    Draining = 1,
    /// Cache invalidation queued or in flight
    InvalidationPending = 2,
    /// Invalidated and released
    Freed = 3,
}

impl TrState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Draining,
            2 => Self::InvalidationPending,
            _ => Self::Freed,
        }
    }
}

/// Operation kinds a record may be asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Encrypt,
    Decrypt,
    Digest,
    Ipsec,
}

/// HMAC pad precompute placement
#[derive(Debug, Clone, Copy)]
pub(crate) struct HmacSetup {
    pub hash: HashAlg,
    pub ipad_offset: u32,
    pub pad_words: u32,
}

/// Record contents produced by a service's setup
pub(crate) struct Layout {
    pub words: Vec<u32>,
    pub size_class: u32,
    pub template: TokenTemplate,
    pub hmac: Option<HmacSetup>,
    pub direction: Option<Direction>,
    pub flow: Option<FlowTuple>,
}

/// Cipher key as record words (little-endian memory copy)
pub(crate) fn key_words(key: &[u8]) -> impl Iterator<Item = u32> + '_ {
    key.chunks(4).map(|c| {
        let mut w = [0u8; 4];
        w[..c.len()].copy_from_slice(c);
        u32::from_le_bytes(w)
    })
}

/// Split a CTR/GCM key into the cipher key and its trailing nonce
pub(crate) fn split_nonce(algo: &Algorithm, key: &[u8]) -> EipResult<(Vec<u8>, u32)> {
    if key.len() < 4 {
        return Err(invalid_key(algo, key.len()));
    }
    let (k, n) = key.split_at(key.len() - 4);
    Ok((k.to_vec(), u32::from_le_bytes([n[0], n[1], n[2], n[3]])))
}

pub(crate) fn invalid_key(algo: &Algorithm, len: usize) -> EipError {
    EipError::InvalidKeyLength {
        algo: algo.name.to_string(),
        len,
    }
}

/// Cipher algorithm bits for a key of `len` bytes
pub(crate) fn cipher_algo_bits(algo: &Algorithm, len: usize) -> EipResult<u32> {
    match (algo.cipher, len) {
        (CipherKind::Null, 0) => Ok(0),
        (CipherKind::Des3, 24) => Ok(ctx::ALGO_3DES),
        (CipherKind::Aes | CipherKind::AesCtr | CipherKind::AesGcm, 16) => Ok(ctx::ALGO_AES128),
        (CipherKind::Aes | CipherKind::AesCtr | CipherKind::AesGcm, 24) => Ok(ctx::ALGO_AES192),
        (CipherKind::Aes | CipherKind::AesCtr | CipherKind::AesGcm, 32) => Ok(ctx::ALGO_AES256),
        _ => Err(invalid_key(algo, len)),
    }
}

struct SinkSlot(Arc<dyn CompletionSink>);

/// Engine-resident session state
pub struct TransformRecord {
    id: u64,
    algo: &'static Algorithm,
    service: Service,
    ctx: Arc<ContextInner>,
    mem: Arc<DmaRegion>,
    tr_addr_type: u32,
    template: TokenTemplate,
    direction: Option<Direction>,
    flow: Option<FlowTuple>,
    state: AtomicU8,
    usage: AtomicU32,
    max_inflight: u32,
    sink: ArcSwap<SinkSlot>,
    stats: RecordStats,
}

impl std::fmt::Debug for TransformRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRecord")
            .field("id", &self.id)
            .field("algo", &self.algo.name)
            .field("addr", &format_args!("{:#x}", self.mem.addr()))
            .field("state", &self.state())
            .field("usage", &self.usage())
            .finish()
    }
}

impl TransformRecord {
    /// Lay out, publish and, for keyed hashes, precompute a new record
    pub(crate) fn create(
        ctx: &Arc<ContextInner>,
        info: &SessionInfo,
        sink: Arc<dyn CompletionSink>,
    ) -> EipResult<Arc<Self>> {
        let result = Self::build(ctx, info, sink);
        if let Err(e) = &result {
            ctx.stats.record_alloc_fail();
            if !e.is_transient() {
                warn!("{}: record for {} rejected: {}", ctx.service.name(), info.algo, e);
            }
        }
        result
    }

    fn build(ctx: &Arc<ContextInner>, info: &SessionInfo, sink: Arc<dyn CompletionSink>) -> EipResult<Arc<Self>> {
        let algo = ctx.lookup(&info.algo)?;
        let device = ctx.device();
        let id = device.next_record_id();
        let home = device.ring_for(id);

        let layout = match ctx.service {
            Service::Skcipher => skcipher::layout(algo, info)?,
            Service::Ahash => ahash::layout(algo, info)?,
            Service::Aead => aead::layout(algo, info)?,
            Service::Ipsec => ipsec::layout(algo, info, None)?,
            Service::HybridIpsec => ipsec::layout(algo, info, Some(home))?,
        };

        let record_words = match layout.size_class {
            ctx::TYPE_SMALL => ctx::SIZE_SMALL_WORDS,
            _ => ctx::SIZE_LARGE_WORDS,
        }
        .max(layout.words.len());
        let mem = device.allocator().alloc_words(record_words)?;
        mem.write_words(0, &layout.words);
        // The engine owns the record from here on
        mem.clean();

        let record = Arc::new(Self {
            id,
            algo,
            service: ctx.service,
            ctx: ctx.clone(),
            tr_addr_type: mem.addr() | layout.size_class,
            mem,
            template: layout.template,
            direction: layout.direction,
            flow: layout.flow,
            state: AtomicU8::new(TrState::Active as u8),
            usage: AtomicU32::new(1),
            max_inflight: device.config().max_inflight_per_record,
            sink: ArcSwap::from_pointee(SinkSlot(sink)),
            stats: RecordStats::default(),
        });

        if let Some(hmac) = layout.hmac {
            if let Err(e) = ahash::precompute(&record, &info.auth_key, hmac) {
                error!("record {:#x}: pad precompute for {} failed: {}", record.addr(), algo.name, e);
                record.begin_free();
                return Err(e);
            }
        }

        ctx.link(record.clone());
        ctx.stats.record_alloc();
        metrics::counter!("eip_tr_alloc_total", "service" => ctx.service.name()).increment(1);

        if let Some(tuple) = &record.flow {
            match device.flow_table() {
                Some(table) => {
                    if table.lock().add(tuple, record.tr_addr_type).is_none() {
                        warn!("record {:#x}: flow spi {:#x} not offloaded", record.addr(), tuple.spi);
                    }
                }
                None => debug!("record {:#x}: no flow table, inline lookup disabled", record.addr()),
            }
        }

        info!("record {:#x} allocated for {} on ring {}", record.addr(), algo.name, home);
        Ok(record)
    }

    /// Unique id within the device
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bus address of the record
    pub fn addr(&self) -> u32 {
        self.mem.addr()
    }

    /// Address with the size-class tag, as carried in descriptors
    pub fn tr_addr_type(&self) -> u32 {
        self.tr_addr_type
    }

    /// Algorithm entry
    pub fn algorithm(&self) -> &'static Algorithm {
        self.algo
    }

    /// Lifecycle state
    pub fn state(&self) -> TrState {
        TrState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Outstanding references, the session's own included
    pub fn usage(&self) -> u32 {
        self.usage.load(Ordering::Acquire)
    }

    /// Counters
    pub fn stats(&self) -> &RecordStats {
        &self.stats
    }

    /// Counter snapshot
    pub fn stats_snapshot(&self) -> RecordStatsSnapshot {
        self.stats.snapshot()
    }

    /// Record word `idx` as the engine last wrote it
    pub fn word(&self, idx: usize) -> u32 {
        self.mem.invalidate();
        self.mem.read(idx)
    }

    /// Cached token fields
    pub fn template(&self) -> &TokenTemplate {
        &self.template
    }

    fn transition(&self, from: TrState, to: TrState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Successful completion, counted on the record and its context
    pub(crate) fn completed(&self, frags: u64, bytes: u64) {
        self.stats.record_rx(frags, bytes);
        self.ctx.stats.record_rx(bytes);
    }

    /// Failed completion, counted on the record and its context
    pub(crate) fn failed(&self) {
        self.stats.record_rx_error();
        self.ctx.stats.record_rx_error();
    }

    /// Take a reference for one operation
    pub(crate) fn acquire(self: &Arc<Self>) -> EipResult<UsageGuard> {
        if self.state() != TrState::Active {
            return Err(EipError::Inactive);
        }

        let mut cur = self.usage.load(Ordering::Acquire);
        loop {
            if cur == 0 {
                return Err(EipError::Inactive);
            }
            if cur > self.max_inflight {
                return Err(EipError::Busy);
            }
            match self
                .usage
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(v) => cur = v,
            }
        }
        Ok(UsageGuard { rec: self.clone() })
    }

    fn release(self: &Arc<Self>) {
        if self.usage.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained();
        }
    }

    /// Stop accepting work and drop the session reference
    pub(crate) fn begin_free(self: &Arc<Self>) {
        if !self.transition(TrState::Active, TrState::Draining) {
            error!("record {:#x}: free in state {:?}", self.addr(), self.state());
            return;
        }

        self.sink.store(Arc::new(SinkSlot(Arc::new(Discard))));
        self.ctx.stats.record_free_req();

        if let Some(tuple) = &self.flow {
            if let Some(table) = self.ctx.device().flow_table() {
                table.lock().delete(tuple);
            }
        }

        let in_flight = self.usage().saturating_sub(1);
        if in_flight > 0 {
            debug!("record {:#x}: draining {} operations", self.addr(), in_flight);
            self.ctx.device().reclaimer().send(Job::Watch(self.clone()));
        }
        self.release();
    }

    fn drained(self: &Arc<Self>) {
        if !self.transition(TrState::Draining, TrState::InvalidationPending) {
            error!("record {:#x}: drained in state {:?}", self.addr(), self.state());
            return;
        }
        debug!("record {:#x}: drained, invalidating", self.addr());
        self.ctx.device().reclaimer().send(Job::Invalidate(self.clone()));
    }

    /// Invalidation command for the reclaim worker
    pub(crate) fn invalidation(self: &Arc<Self>) -> Submission {
        Submission {
            token: None,
            tk_words: 0,
            hdr: token_hdr::CMN | token_hdr::REUSE_CTX,
            tr_addr_type: self.tr_addr_type,
            service: hw::CMD_HWSERVICE_INV_TRC,
            src: Vec::new(),
            dst: Vec::new(),
            completer: Completer::Invalidate(self.clone()),
        }
    }

    /// Invalidation acknowledged; the record may now go
    pub(crate) fn invalidated(self: &Arc<Self>, outcome: Result<(), HwError>) {
        if !self.transition(TrState::InvalidationPending, TrState::Freed) {
            error!("record {:#x}: invalidated in state {:?}", self.addr(), self.state());
            return;
        }
        if outcome.is_err() {
            warn!("record {:#x}: releasing after failed invalidation", self.addr());
        }

        self.ctx.unlink(self.id);
        self.ctx.stats.record_release();
        metrics::counter!("eip_tr_release_total", "service" => self.service.name()).increment(1);
        info!("record {:#x} released", self.addr());
    }

    fn build_token(&self, op: Op, req: &Request) -> EipResult<Token> {
        match self.service {
            Service::Skcipher => skcipher::token(self.algo, &self.template, op, req),
            Service::Ahash => ahash::token(&self.template, op, req),
            Service::Aead => aead::token(&self.template, op, req),
            Service::Ipsec => ipsec::token(&self.template, self.direction, op, req),
            Service::HybridIpsec => ipsec::inline_token(op, req),
        }
    }

    /// Queue one operation
    pub(crate) fn submit(self: &Arc<Self>, op: Op, req: &Request) -> EipResult<()> {
        req.check_lengths()?;
        let guard = self.acquire()?;
        let sink = self.sink.load().0.clone();

        let token = self.build_token(op, req)?;
        let data_len = hw::cmd_data_len(token.hdr());
        if req.src_bytes() < data_len as usize {
            return Err(EipError::InvalidParam(format!(
                "input of {} bytes shorter than {}",
                req.src_bytes(),
                data_len
            )));
        }

        let (slot, service) = if token.is_empty() {
            (None, hw::CMD_HWSERVICE_LIP)
        } else {
            let slot = self.ctx.tokens.acquire()?;
            slot.store(&token);
            (Some(slot), hw::CMD_HWSERVICE_LAC)
        };

        let frags = req.src.len().max(1) as u64;
        let engine = self.ctx.device().engine_for_current();
        engine.submit(Submission {
            token: slot,
            tk_words: token.len() as u32,
            hdr: token.hdr(),
            tr_addr_type: self.tr_addr_type,
            service,
            src: req.src.clone(),
            dst: req.dst.clone(),
            completer: Completer::Record {
                guard,
                sink,
                request: req.tag,
            },
        })?;

        self.stats.record_tx(frags, data_len as u64);
        self.ctx.stats.record_tx(data_len as u64);
        Ok(())
    }
}

/// One operation's reference on a record; released on drop
pub(crate) struct UsageGuard {
    rec: Arc<TransformRecord>,
}

impl UsageGuard {
    pub(crate) fn record(&self) -> &Arc<TransformRecord> {
        &self.rec
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        self.rec.release();
    }
}

/// Lifecycle probe that does not keep the record alive
#[derive(Debug, Clone)]
pub struct RecordWatch {
    rec: Weak<TransformRecord>,
    addr: u32,
}

impl RecordWatch {
    /// Current state; `Freed` once the record is gone
    pub fn state(&self) -> TrState {
        self.rec.upgrade().map(|r| r.state()).unwrap_or(TrState::Freed)
    }

    /// Whether every reference, hardware binding included, is gone
    pub fn is_released(&self) -> bool {
        self.rec.strong_count() == 0
    }

    /// Bus address the record had
    pub fn addr(&self) -> u32 {
        self.addr
    }
}

/// Owner handle of a transform record; dropping it frees the record
#[derive(Debug)]
pub struct Transform {
    rec: Arc<TransformRecord>,
}

impl Transform {
    pub(crate) fn new(rec: Arc<TransformRecord>) -> Self {
        Self { rec }
    }

    /// The record
    pub fn record(&self) -> &Arc<TransformRecord> {
        &self.rec
    }

    /// Probe for watching teardown
    pub fn watch(&self) -> RecordWatch {
        RecordWatch {
            rec: Arc::downgrade(&self.rec),
            addr: self.rec.addr(),
        }
    }

    /// Cipher or AEAD encrypt
    pub fn encrypt(&self, req: &Request) -> EipResult<()> {
        self.rec.submit(Op::Encrypt, req)
    }

    /// Cipher or AEAD decrypt
    pub fn decrypt(&self, req: &Request) -> EipResult<()> {
        self.rec.submit(Op::Decrypt, req)
    }

    /// Hash or HMAC
    pub fn digest(&self, req: &Request) -> EipResult<()> {
        self.rec.submit(Op::Digest, req)
    }

    /// ESP encapsulation or decapsulation, per the SA direction
    pub fn ipsec(&self, req: &Request) -> EipResult<()> {
        self.rec.submit(Op::Ipsec, req)
    }

    /// Mark inactive; memory is released after drain and invalidation
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        self.rec.begin_free();
    }
}

/// A session whose record can be replaced atomically
pub struct Session {
    ctx: Context,
    current: ArcSwap<TransformRecord>,
    sink: Arc<dyn CompletionSink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("current", &self.current.load()).finish()
    }
}

impl Session {
    /// Allocate the first record of a session
    pub fn new(ctx: &Context, info: &SessionInfo, sink: Arc<dyn CompletionSink>) -> EipResult<Self> {
        if ctx.service().is_ipsec() {
            return Err(EipError::Unsupported("rekey of IPsec records".into()));
        }
        let rec = TransformRecord::create(ctx.inner(), info, sink.clone())?;
        Ok(Self {
            ctx: ctx.clone(),
            current: ArcSwap::new(rec),
            sink,
        })
    }

    /// Record new operations bind to
    pub fn record(&self) -> Arc<TransformRecord> {
        self.current.load_full()
    }

    /// Replace the key material. Operations already holding the old
    /// record complete on it; the old record is freed once they drain.
    pub fn rekey(&self, info: &SessionInfo) -> EipResult<()> {
        let new = TransformRecord::create(self.ctx.inner(), info, self.sink.clone())?;
        let old = self.current.swap(new);
        debug!("session rekeyed: {:#x} -> {:#x}", old.addr(), self.current.load().addr());
        old.begin_free();
        Ok(())
    }

    fn submit(&self, op: Op, req: &Request) -> EipResult<()> {
        loop {
            let rec = self.current.load_full();
            match rec.submit(op, req) {
                Err(EipError::Inactive) if !Arc::ptr_eq(&rec, &self.current.load()) => continue,
                other => return other,
            }
        }
    }

    /// Cipher or AEAD encrypt
    pub fn encrypt(&self, req: &Request) -> EipResult<()> {
        self.submit(Op::Encrypt, req)
    }

    /// Cipher or AEAD decrypt
    pub fn decrypt(&self, req: &Request) -> EipResult<()> {
        self.submit(Op::Decrypt, req)
    }

    /// Hash or HMAC
    pub fn digest(&self, req: &Request) -> EipResult<()> {
        self.submit(Op::Digest, req)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.current.load_full().begin_free();
    }
}

/// Control words with the context length of a record of `words` words
pub(crate) fn with_context_words(ctrl0: u32, words: usize) -> u32 {
    ctrl0 | hw::ctrl_context_words(words.saturating_sub(inst::CTRL_WORDS) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_words_little_endian() {
        let words: Vec<u32> = key_words(&[1, 2, 3, 4, 5]).collect();
        assert_eq!(words, vec![0x0403_0201, 0x05]);
    }

    #[test]
    fn test_hash_sizes() {
        assert_eq!(HashAlg::Sha256.state_words(), 8);
        assert_eq!(HashAlg::Sha384.digest_len(), 48);
        assert_eq!(HashAlg::Sha384.state_words(), 16);
        assert_eq!(HashAlg::Sha1.state_words(), 5);
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [TrState::Active, TrState::Draining, TrState::InvalidationPending, TrState::Freed] {
            assert_eq!(TrState::from_u8(s as u8), s);
        }
    }

    #[test]
    fn test_read_src_spans_fragments() {
        let alloc = crate::mem::DmaAllocator::new();
        let a = alloc.alloc_buffer(&[1, 2, 3, 4], 0).unwrap();
        let b = alloc.alloc_buffer(&[5, 6, 7, 8], 0).unwrap();
        let req = Request::with_fragments(
            0,
            vec![Segment::whole(a), Segment::whole(b)],
            Vec::new(),
            8,
        );
        let mut out = [0u8; 4];
        req.read_src(2, &mut out);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(req.src_bytes(), 8);
    }
}
