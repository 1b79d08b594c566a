//! DMA Engine Adapter
//!
//! Turns one logical operation into command and result descriptors on a
//! ring pair, then reaps completions and dispatches them.
//!
//! # Design
//!
//! - One `DmaEngine` per ring instance, serialized by its own lock
//! - Capacity of both rings is checked before anything is written, so a
//!   busy submission leaves no trace
//! - In-flight operations live in a generation-tagged arena; the bypass
//!   words of the descriptor carry `(slot + 1, generation)` and a
//!   completion whose generation no longer matches is dropped as stale
//! - Callbacks run after the ring lock is released

use std::sync::Arc;

use crossbeam::channel::Sender;
use eip_common::{EipError, EipResult, HwError};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::hw::{self, HwDesc, Mmio};
use crate::mem::{DmaAllocator, DmaRegion};
use crate::record::{CompletionSink, TransformRecord, UsageGuard};
use crate::ring::{DescRing, RingKind};
use crate::stats::{DmaStats, DmaStatsSnapshot};
use crate::token::TokenSlot;

/// A contiguous piece of a DMA buffer
#[derive(Clone)]
pub struct Segment {
    region: Arc<DmaRegion>,
    offset: usize,
    len: usize,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment({:#x}+{})", self.addr(), self.len)
    }
}

impl Segment {
    /// `len` bytes at `offset` into `region`
    pub fn new(region: Arc<DmaRegion>, offset: usize, len: usize) -> EipResult<Self> {
        if offset + len > region.len_bytes() {
            return Err(EipError::InvalidParam(format!(
                "segment {}+{} exceeds region of {} bytes",
                offset,
                len,
                region.len_bytes()
            )));
        }
        Ok(Self { region, offset, len })
    }

    /// The whole region
    pub fn whole(region: Arc<DmaRegion>) -> Self {
        let len = region.len_bytes();
        Self { region, offset: 0, len }
    }

    /// Bus address of the first byte
    pub fn addr(&self) -> u32 {
        self.region.addr() + self.offset as u32
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length segment
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing region
    pub fn region(&self) -> &Arc<DmaRegion> {
        &self.region
    }

    /// Copy `len` bytes out, starting `at` bytes into the segment
    pub fn read(&self, at: usize, out: &mut [u8]) {
        self.region.invalidate();
        self.region.read_bytes(self.offset + at, out);
    }

    /// Copy the first `len` bytes into an owned buffer
    pub fn to_bytes(&self, len: usize) -> bytes::Bytes {
        self.region.invalidate();
        bytes::Bytes::from(self.region.to_vec(self.offset, len.min(self.len)))
    }
}

/// What to do when an operation completes
pub(crate) enum Completer {
    /// Packet operation on a transform record
    Record {
        guard: UsageGuard,
        sink: Arc<dyn CompletionSink>,
        request: u64,
    },
    /// Wake a waiter with the output length or error, optionally holding
    /// a record reference until then
    Notify {
        tx: Sender<Result<u32, HwError>>,
        guard: Option<UsageGuard>,
    },
    /// Record cache invalidation
    Invalidate(Arc<TransformRecord>),
}

/// One operation ready for the rings
pub(crate) struct Submission {
    pub token: Option<TokenSlot>,
    pub tk_words: u32,
    pub hdr: u32,
    pub tr_addr_type: u32,
    pub service: u32,
    pub src: Vec<Segment>,
    pub dst: Vec<Segment>,
    pub completer: Completer,
}

/// An operation between submit and completion
struct SwDesc {
    src_nsegs: u32,
    dst_nsegs: u32,
    _token: Option<TokenSlot>,
    _buffers: (Vec<Segment>, Vec<Segment>),
    completer: Completer,
}

struct SwSlot {
    gen: u32,
    entry: Option<SwDesc>,
}

/// Generation-tagged arena of in-flight operations
struct SwSlab {
    slots: Vec<SwSlot>,
    free: Vec<u32>,
}

impl SwSlab {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| SwSlot { gen: 0, entry: None }).collect(),
            free: (0..capacity as u32).rev().collect(),
        }
    }

    fn insert(&mut self, desc: SwDesc) -> Option<(u32, u32)> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[idx as usize];
        slot.entry = Some(desc);
        Some((idx, slot.gen))
    }

    fn take(&mut self, idx: u32, gen: u32) -> Option<SwDesc> {
        let slot = self.slots.get_mut(idx as usize)?;
        if slot.gen != gen || slot.entry.is_none() {
            return None;
        }
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(idx);
        slot.entry.take()
    }

    fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

struct Rings {
    cmd: DescRing,
    res: DescRing,
    sw: SwSlab,
}

/// Completed operation waiting for dispatch
struct Reaped {
    sw: SwDesc,
    token: [u32; 2],
}

/// One command/result ring pair
pub struct DmaEngine {
    ring_id: u32,
    rings: Mutex<Rings>,
    stats: DmaStats,
}

impl std::fmt::Debug for DmaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaEngine").field("ring_id", &self.ring_id).finish()
    }
}

impl DmaEngine {
    /// Program ring pair `ring_id`
    pub fn new(ring_id: u32, size: u32, mmio: Arc<dyn Mmio>, alloc: &DmaAllocator) -> EipResult<Self> {
        let cmd = DescRing::new(RingKind::Command, ring_id, size, mmio.clone(), alloc)?;
        let res = DescRing::new(RingKind::Result, ring_id, size, mmio, alloc)?;
        debug!("ring pair {} ready, {} descriptors", ring_id, size);

        Ok(Self {
            ring_id,
            rings: Mutex::new(Rings {
                cmd,
                res,
                sw: SwSlab::new(size as usize),
            }),
            stats: DmaStats::default(),
        })
    }

    /// Ring instance number
    pub fn ring_id(&self) -> u32 {
        self.ring_id
    }

    /// Counters
    pub fn stats(&self) -> DmaStatsSnapshot {
        self.stats.snapshot()
    }

    /// Operations submitted and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.rings.lock().sw.in_flight()
    }

    /// Free command descriptors
    pub fn cmd_avail(&self) -> u32 {
        self.rings.lock().cmd.avail_count()
    }

    /// Queue one operation. Fails with `Busy` when either ring lacks room
    /// for the whole operation.
    pub(crate) fn submit(&self, sub: Submission) -> EipResult<()> {
        let src_nsegs = sub.src.len().max(1) as u32;
        let dst_nsegs = sub.dst.len().max(1) as u32;
        let data_len = hw::cmd_data_len(sub.hdr);

        let mut rings = self.rings.lock();
        let (cmd_free, cmd_prod) = rings.cmd.reserve(src_nsegs);
        let (res_free, res_prod) = rings.res.reserve(dst_nsegs);
        if cmd_free == 0 || res_free == 0 {
            drop(rings);
            self.stats.record_busy();
            metrics::counter!("eip_dma_busy_total", "ring" => self.ring_id.to_string()).increment(1);
            trace!("ring {} busy: need {}+{}", self.ring_id, src_nsegs, dst_nsegs);
            return Err(EipError::Busy);
        }

        let tk_addr = sub.token.as_ref().map(|t| t.addr()).unwrap_or(0);
        let mut cmd_descs = Vec::with_capacity(src_nsegs as usize);
        let mut remaining = data_len;
        if sub.src.is_empty() {
            let mut desc = HwDesc::default();
            desc.frag[0] = hw::cmd_flags(true, true) | hw::cmd_token_words(sub.tk_words);
            cmd_descs.push(desc);
        }
        for (i, seg) in sub.src.iter().enumerate() {
            let len = (seg.len() as u32).min(remaining);
            remaining -= len;

            let mut desc = HwDesc::default();
            desc.frag[0] = hw::cmd_frag_len(len) | hw::cmd_flags(i == 0, i + 1 == sub.src.len());
            if i == 0 {
                desc.frag[0] |= hw::cmd_token_words(sub.tk_words);
            }
            desc.frag[2] = seg.addr();
            cmd_descs.push(desc);
        }
        {
            let first = &mut cmd_descs[0];
            first.token[0] = tk_addr;
            first.token[2] = sub.hdr;
            first.token[4] = sub.tr_addr_type;
            first.token[6] = sub.service;
        }

        let mut res_descs = Vec::with_capacity(dst_nsegs as usize);
        if sub.dst.is_empty() {
            let mut desc = HwDesc::default();
            desc.frag[0] = hw::res_flags(true, true);
            res_descs.push(desc);
        }
        for (i, seg) in sub.dst.iter().enumerate() {
            let mut desc = HwDesc::default();
            desc.frag[0] = hw::cmd_frag_len(seg.len() as u32) | hw::res_flags(i == 0, i + 1 == sub.dst.len());
            desc.frag[2] = seg.addr();
            res_descs.push(desc);
        }

        let sw = SwDesc {
            src_nsegs,
            dst_nsegs,
            _token: sub.token,
            _buffers: (sub.src, sub.dst),
            completer: sub.completer,
        };
        let (slot, gen) = match rings.sw.insert(sw) {
            Some(tag) => tag,
            None => {
                drop(rings);
                self.stats.record_tx_error();
                return Err(EipError::NoMemory("descriptor slab"));
            }
        };
        cmd_descs[0].bypass[0] = slot + 1;
        cmd_descs[0].bypass[1] = gen;

        for (i, desc) in res_descs.iter().enumerate() {
            rings.res.write(res_prod + i as u32, desc);
        }
        for (i, desc) in cmd_descs.iter().enumerate() {
            rings.cmd.write(cmd_prod + i as u32, desc);
        }

        let res_next = rings.res.idx_add(res_prod, dst_nsegs);
        let cmd_next = rings.cmd.idx_add(cmd_prod, src_nsegs);
        rings.res.commit(dst_nsegs, res_next);
        rings.cmd.commit(src_nsegs, cmd_next);
        drop(rings);

        self.stats.record_tx(src_nsegs as u64, data_len as u64);
        trace!("ring {} queued slot {} gen {} len {}", self.ring_id, slot, gen, data_len);
        Ok(())
    }

    /// Reap at most `budget` result descriptors and dispatch completions.
    /// Returns the number of operations completed.
    pub fn poll(&self, budget: u32) -> usize {
        let reaped = self.reap(budget);
        let done = reaped.len();
        for r in reaped {
            self.dispatch(r);
        }
        done
    }

    fn reap(&self, budget: u32) -> Vec<Reaped> {
        let mut rings = self.rings.lock();
        let window = rings.res.reap(budget);
        if window.count == 0 {
            return Vec::new();
        }

        let mut reaped = Vec::new();
        for i in 0..window.count {
            let idx = rings.res.idx_add(window.start, i);
            let desc = rings.res.read(idx);
            if desc.frag[0] & hw::RES_FLAGS_LAST == 0 {
                continue;
            }

            let tag = desc.bypass[0];
            // Skipped descriptor; it carries no operation
            if tag == 0 {
                self.stats.record_hole();
                warn!("ring {}: hole at result {}", self.ring_id, idx);
                continue;
            }

            match rings.sw.take(tag - 1, desc.bypass[1]) {
                Some(sw) => {
                    let consumed = sw.src_nsegs;
                    rings.cmd.advance_cons(consumed);
                    reaped.push(Reaped {
                        sw,
                        token: [desc.token[0], desc.token[1]],
                    });
                }
                None => {
                    // Not in flight, so no command descriptors to return
                    self.stats.record_stale();
                    warn!(
                        "ring {}: stale completion slot {} gen {}",
                        self.ring_id,
                        tag - 1,
                        desc.bypass[1]
                    );
                }
            }
        }
        rings.res.retire(window.count);
        reaped
    }

    fn dispatch(&self, r: Reaped) {
        let tr_err = hw::res_error(r.token[0]);
        let cle_err = hw::res_error_cle(r.token[1]);
        let data_len = hw::res_data_len(r.token[0]);
        self.stats.record_rx(r.sw.dst_nsegs as u64, data_len as u64);

        let outcome = match HwError::classify(tr_err, cle_err) {
            Some(e) => {
                self.stats.record_rx_error(tr_err, cle_err);
                metrics::counter!("eip_dma_hw_error_total", "ring" => self.ring_id.to_string()).increment(1);
                Err(e)
            }
            None => Ok(data_len),
        };

        let dst_nsegs = r.sw.dst_nsegs;
        match r.sw.completer {
            Completer::Record { guard, sink, request } => {
                let record = guard.record();
                match outcome {
                    Ok(len) => {
                        record.completed(dst_nsegs as u64, len as u64);
                        sink.complete(crate::record::Completion { request, data_len: len });
                    }
                    Err(e) => {
                        record.failed();
                        debug!("ring {}: request {} failed: {}", self.ring_id, request, e);
                        sink.error(request, e);
                    }
                }
                // Reference held for the operation ends here
                drop(guard);
            }
            Completer::Notify { tx, guard } => {
                if tx.send(outcome).is_err() {
                    trace!("ring {}: waiter gone", self.ring_id);
                }
                drop(guard);
            }
            Completer::Invalidate(record) => {
                if let Err(e) = &outcome {
                    error!("record {:#x}: invalidation failed: {}", record.addr(), e);
                }
                record.invalidated(outcome.map(|_| ()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::regs;
    use crate::ring::tests::CounterRegs;
    use crossbeam::channel::unbounded;

    fn engine(size: u32) -> (DmaEngine, Arc<CounterRegs>, DmaAllocator) {
        let regs = Arc::new(CounterRegs::default());
        let alloc = DmaAllocator::new();
        let dma = DmaEngine::new(0, size, regs.clone(), &alloc).unwrap();
        (dma, regs, alloc)
    }

    fn notify_sub(alloc: &DmaAllocator, nsrc: usize, tx: Sender<Result<u32, HwError>>) -> Submission {
        let buf = alloc.alloc_bytes(256).unwrap();
        let src = (0..nsrc)
            .map(|i| Segment::new(buf.clone(), i * 16, 16).unwrap())
            .collect();
        Submission {
            token: None,
            tk_words: 0,
            hdr: 16 * nsrc as u32,
            tr_addr_type: 0x2,
            service: hw::CMD_HWSERVICE_LAC,
            src,
            dst: vec![Segment::whole(buf)],
            completer: Completer::Notify { tx, guard: None },
        }
    }

    /// Let the counter model process everything and write result tokens
    fn process_all(dma: &DmaEngine, regs: &CounterRegs, token0: u32) {
        let rings = dma.rings.lock();
        let n = rings.res.outstanding();
        for i in 0..n {
            let idx = rings.res.idx_add(rings.res.cons(), i);
            let mut desc = rings.res.read(idx);
            desc.token[0] = token0;
            rings.res.write(idx, &desc);
        }
        // Copy bypass words of the first command descriptor of each op
        let mut c = rings.cmd.cons();
        for i in 0..n {
            let idx = rings.res.idx_add(rings.res.cons(), i);
            let mut desc = rings.res.read(idx);
            let cmd = rings.cmd.read(c);
            desc.bypass = cmd.bypass;
            rings.res.write(idx, &desc);
            let mut k = 0;
            while rings.cmd.read(rings.cmd.idx_add(c, k)).frag[0] & hw::CMD_FLAGS_LAST == 0 {
                k += 1;
            }
            c = rings.cmd.idx_add(c, k + 1);
        }
        drop(rings);
        regs.process(regs::rdr(0, regs::PROC_COUNT), regs::rdr(0, regs::PREP_COUNT), n);
    }

    #[test]
    fn test_submit_and_complete() {
        let (dma, regs, alloc) = engine(16);
        let (tx, rx) = unbounded();
        dma.submit(notify_sub(&alloc, 2, tx)).unwrap();
        assert_eq!(dma.in_flight(), 1);

        process_all(&dma, &regs, 48);
        assert_eq!(dma.poll(8), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 48);
        assert_eq!(dma.in_flight(), 0);

        let s = dma.stats();
        assert_eq!(s.tx_frags, 2);
        assert_eq!(s.rx_bytes, 48);
    }

    #[test]
    fn test_first_descriptor_binding() {
        let (dma, _regs, alloc) = engine(16);
        let (tx, _rx) = unbounded();
        dma.submit(notify_sub(&alloc, 3, tx)).unwrap();

        let rings = dma.rings.lock();
        let first = rings.cmd.read(0);
        assert_ne!(first.frag[0] & hw::CMD_FLAGS_FIRST, 0);
        assert_eq!(first.token[2], 48);
        assert_eq!(first.token[4], 0x2);
        assert_eq!(first.token[6], hw::CMD_HWSERVICE_LAC);
        assert_eq!(first.bypass[0], 1);
        let last = rings.cmd.read(2);
        assert_ne!(last.frag[0] & hw::CMD_FLAGS_LAST, 0);
        assert_eq!(rings.cmd.prod(), 3);
    }

    #[test]
    fn test_busy_leaves_rings_untouched() {
        let (dma, _regs, alloc) = engine(8);
        let (tx, _rx) = unbounded();
        for _ in 0..7 {
            dma.submit(notify_sub(&alloc, 1, tx.clone())).unwrap();
        }
        let before = {
            let r = dma.rings.lock();
            (r.cmd.prod(), r.res.prod(), r.sw.in_flight())
        };

        let err = dma.submit(notify_sub(&alloc, 1, tx)).unwrap_err();
        assert!(matches!(err, EipError::Busy));

        let r = dma.rings.lock();
        assert_eq!((r.cmd.prod(), r.res.prod(), r.sw.in_flight()), before);
        drop(r);
        assert_eq!(dma.stats().tx_busy, 1);
    }

    #[test]
    fn test_hardware_error_classified() {
        let (dma, regs, alloc) = engine(16);
        let (tx, rx) = unbounded();
        dma.submit(notify_sub(&alloc, 1, tx)).unwrap();

        process_all(&dma, &regs, 9 << 17);
        dma.poll(8);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.kind, eip_common::HwErrorKind::AuthFailure);
        assert_eq!(dma.stats().rx_err_code[9], 1);
    }

    #[test]
    fn test_holes_and_stale_tags_skipped() {
        let (dma, regs, alloc) = engine(16);
        let (tx, rx) = unbounded();
        for _ in 0..3 {
            dma.submit(notify_sub(&alloc, 1, tx.clone())).unwrap();
        }
        assert_eq!(dma.cmd_avail(), 12);

        {
            let rings = dma.rings.lock();
            // No back-pointer
            let mut hole = rings.res.read(0);
            hole.bypass = [0; 4];
            rings.res.write(0, &hole);

            // Live slot, wrong generation
            let cmd = rings.cmd.read(1);
            let mut stale = rings.res.read(1);
            stale.bypass = [cmd.bypass[0], cmd.bypass[1].wrapping_add(1), 0, 0];
            rings.res.write(1, &stale);

            let cmd = rings.cmd.read(2);
            let mut done = rings.res.read(2);
            done.bypass = cmd.bypass;
            done.token[0] = 16;
            rings.res.write(2, &done);
        }
        regs.process(regs::rdr(0, regs::PROC_COUNT), regs::rdr(0, regs::PREP_COUNT), 3);

        assert_eq!(dma.poll(8), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap(), 16);
        assert!(rx.try_recv().is_err());

        let s = dma.stats();
        assert_eq!((s.rx_holes, s.rx_stale, s.rx_pkts), (1, 1, 1));

        // Only the matched operation hands back its command descriptor
        assert_eq!(dma.in_flight(), 2);
        assert_eq!(dma.cmd_avail(), 13);
        let rings = dma.rings.lock();
        assert_eq!(rings.res.outstanding(), 0);
    }

    #[test]
    fn test_stale_generation_dropped() {
        let mut slab = SwSlab::new(2);
        let (tx, _rx) = unbounded();
        let desc = || SwDesc {
            src_nsegs: 1,
            dst_nsegs: 1,
            _token: None,
            _buffers: (Vec::new(), Vec::new()),
            completer: Completer::Notify {
                tx: tx.clone(),
                guard: None,
            },
        };
        let (idx, gen) = slab.insert(desc()).unwrap();
        assert!(slab.take(idx, gen).is_some());
        assert!(slab.take(idx, gen).is_none());

        let (idx2, gen2) = slab.insert(desc()).unwrap();
        assert_eq!(idx2, idx);
        assert_ne!(gen2, gen);
        assert!(slab.take(idx, gen).is_none());
        assert!(slab.take(idx2, gen2).is_some());
    }
}
