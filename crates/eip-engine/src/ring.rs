//! Descriptor Ring
//!
//! Fixed-capacity circular array of hardware descriptors shared with the
//! engine. One slot is always left empty so that `prod == cons` means
//! empty and never full.
//!
//! # Design
//!
//! - Power-of-two size, all index math masked
//! - Producer index advances only in `commit`, after every descriptor of
//!   the operation is written and a release fence is issued
//! - Consumer index advances only in `retire`, after the caller has read
//!   the reaped window

use std::ops::Range;
use std::sync::Arc;

use eip_common::{EipError, EipResult};
use tracing::trace;

use crate::hw::{self, regs, HwDesc, Mmio, DESC_BYTES, DESC_WORDS};
use crate::mem::{DmaAllocator, DmaRegion};

/// Which side of a ring pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    /// Command descriptor ring (driver to engine)
    Command,
    /// Result descriptor ring (engine to driver)
    Result,
}

/// Completed descriptors ready to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapWindow {
    /// First index
    pub start: u32,
    /// Number of descriptors
    pub count: u32,
}

/// One hardware descriptor ring
pub struct DescRing {
    kind: RingKind,
    ring_id: u32,
    mmio: Arc<dyn Mmio>,
    mem: Arc<DmaRegion>,
    size: u32,
    mask: u32,
    prod: u32,
    cons: u32,
}

impl std::fmt::Debug for DescRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescRing")
            .field("kind", &self.kind)
            .field("ring_id", &self.ring_id)
            .field("size", &self.size)
            .field("prod", &self.prod)
            .field("cons", &self.cons)
            .finish()
    }
}

impl DescRing {
    /// Allocate ring memory and program the ring registers
    pub fn new(
        kind: RingKind,
        ring_id: u32,
        size: u32,
        mmio: Arc<dyn Mmio>,
        alloc: &DmaAllocator,
    ) -> EipResult<Self> {
        if !size.is_power_of_two() || size < 4 {
            return Err(EipError::Config(format!("ring size {} not a power of two", size)));
        }

        let mem = alloc.alloc_words(size as usize * DESC_WORDS)?;
        let ring = Self {
            kind,
            ring_id,
            mmio,
            mem,
            size,
            mask: size - 1,
            prod: 0,
            cons: 0,
        };

        ring.mmio.write32(ring.reg(regs::PREP_COUNT), regs::COUNT_RST);
        ring.mmio.write32(ring.reg(regs::PROC_COUNT), regs::COUNT_RST);
        ring.mmio.write32(ring.reg(regs::BASE_ADDR_LO), ring.mem.addr());
        ring.mmio.write32(ring.reg(regs::BASE_ADDR_HI), 0);
        ring.mmio.write32(ring.reg(regs::RING_SIZE), size * DESC_BYTES as u32);
        ring.mmio.write32(ring.reg(regs::DESC_SIZE), DESC_WORDS as u32);
        if kind == RingKind::Result {
            ring.mmio.write32(ring.reg(regs::THRESH), regs::RDR_THRESH_VAL);
        }

        trace!("ring {} {:?} at {:#x}, {} slots", ring_id, kind, ring.mem.addr(), size);
        Ok(ring)
    }

    fn reg(&self, reg: u32) -> u32 {
        match self.kind {
            RingKind::Command => regs::cdr(self.ring_id, reg),
            RingKind::Result => regs::rdr(self.ring_id, reg),
        }
    }

    /// Ring capacity (one slot stays empty)
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Producer index
    #[inline(always)]
    pub fn prod(&self) -> u32 {
        self.prod
    }

    /// Consumer index
    #[inline(always)]
    pub fn cons(&self) -> u32 {
        self.cons
    }

    /// Ring memory base address
    pub fn base_addr(&self) -> u32 {
        self.mem.addr()
    }

    /// `idx + n` modulo ring size
    #[inline(always)]
    pub fn idx_add(&self, idx: u32, n: u32) -> u32 {
        idx.wrapping_add(n) & self.mask
    }

    /// `a - b` modulo ring size
    #[inline(always)]
    pub fn idx_sub(&self, a: u32, b: u32) -> u32 {
        a.wrapping_sub(b) & self.mask
    }

    /// Descriptors committed but not yet retired
    #[inline(always)]
    pub fn outstanding(&self) -> u32 {
        self.idx_sub(self.prod, self.cons)
    }

    /// Free slots
    #[inline(always)]
    pub fn avail_count(&self) -> u32 {
        self.idx_sub(self.cons, self.prod.wrapping_add(1))
    }

    /// Free slot count and producer index, or a zero count when fewer
    /// than `needed` slots are free. Nothing is published.
    #[inline]
    pub fn reserve(&self, needed: u32) -> (u32, u32) {
        let free = self.avail_count();
        if free < needed {
            return (0, self.prod);
        }
        (free, self.prod)
    }

    /// Write a descriptor into slot `idx`
    pub fn write(&self, idx: u32, desc: &HwDesc) {
        let base = (idx & self.mask) as usize * DESC_WORDS;
        self.mem.write_words(base, &desc.to_words());
    }

    /// Read the descriptor in slot `idx`
    pub fn read(&self, idx: u32) -> HwDesc {
        let base = (idx & self.mask) as usize * DESC_WORDS;
        let mut words = [0u32; DESC_WORDS];
        self.mem.read_words(base, &mut words);
        HwDesc::from_words(&words)
    }

    /// Bus address of slot `idx`
    pub fn slot_addr(&self, idx: u32) -> u32 {
        self.mem.word_addr((idx & self.mask) as usize * DESC_WORDS)
    }

    /// Publish `count` descriptors ending before `new_prod`
    pub fn commit(&mut self, count: u32, new_prod: u32) {
        debug_assert_eq!(self.idx_add(self.prod, count), new_prod & self.mask);
        self.prod = new_prod & self.mask;
        self.mem.clean();
        self.mmio.write32(
            self.reg(regs::PREP_COUNT),
            hw::prep_cnt_desc_sz((DESC_WORDS as u32) * count),
        );
    }

    /// Completed descriptors, at most `budget`
    pub fn reap(&self, budget: u32) -> ReapWindow {
        let words = hw::proc_desc_sz(self.mmio.read32(self.reg(regs::PROC_COUNT)));
        let processed = (words / DESC_WORDS as u32) & self.mask;
        let count = processed.min(budget).min(self.outstanding());
        if count == 0 {
            return ReapWindow { start: self.cons, count: 0 };
        }

        let (first, second) = self.window_ranges(self.cons, count);
        self.invalidate_range(first);
        if let Some(second) = second {
            self.invalidate_range(second);
        }
        ReapWindow { start: self.cons, count }
    }

    /// Slot ranges covered by a window, split in two on wrap
    pub fn window_ranges(&self, start: u32, count: u32) -> (Range<u32>, Option<Range<u32>>) {
        let end = start + count;
        if end <= self.size {
            (start..end, None)
        } else {
            (start..self.size, Some(0..end - self.size))
        }
    }

    fn invalidate_range(&self, range: Range<u32>) {
        trace!("ring {} {:?} invalidate {:?}", self.ring_id, self.kind, range);
        self.mem.invalidate();
    }

    /// Acknowledge `count` reaped descriptors and advance the consumer
    pub fn retire(&mut self, count: u32) {
        if count == 0 {
            return;
        }
        self.mmio.write32(
            self.reg(regs::PROC_COUNT),
            hw::proc_cnt_desc_sz((DESC_WORDS as u32) * count),
        );
        self.advance_cons(count);
    }

    /// Advance the consumer without touching hardware counters
    pub fn advance_cons(&mut self, count: u32) {
        debug_assert!(count <= self.outstanding());
        self.cons = self.idx_add(self.cons, count);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Register file whose processed counter behaves like the engine's:
    /// it grows when the test "processes" and shrinks on acknowledge.
    #[derive(Default)]
    pub(crate) struct CounterRegs {
        regs: Mutex<HashMap<u32, u32>>,
        pending: Mutex<HashMap<u32, u32>>,
    }

    impl CounterRegs {
        /// Move up to `n` prepared descriptors on ring `reg_base` to processed
        pub(crate) fn process(&self, proc_reg: u32, prep_reg: u32, n: u32) -> u32 {
            let mut pending = self.pending.lock();
            let avail = pending.get(&prep_reg).copied().unwrap_or(0);
            let n = n.min(avail);
            pending.insert(prep_reg, avail - n);
            let mut regs = self.regs.lock();
            *regs.entry(proc_reg).or_insert(0) += n * DESC_BYTES as u32;
            n
        }
    }

    impl Mmio for CounterRegs {
        fn read32(&self, offset: u32) -> u32 {
            self.regs.lock().get(&offset).copied().unwrap_or(0)
        }

        fn write32(&self, offset: u32, value: u32) {
            let reg = offset % regs::RING_BLOCK % regs::RDR_OFFSET;
            if value & regs::COUNT_RST != 0 {
                self.regs.lock().insert(offset, 0);
                return;
            }
            match reg {
                regs::PREP_COUNT => {
                    *self.pending.lock().entry(offset).or_insert(0) += value / DESC_BYTES as u32;
                }
                regs::PROC_COUNT => {
                    let mut regs = self.regs.lock();
                    let cur = regs.entry(offset).or_insert(0);
                    *cur = cur.saturating_sub(value);
                }
                _ => {
                    self.regs.lock().insert(offset, value);
                }
            }
        }
    }

    fn ring(size: u32) -> (DescRing, Arc<CounterRegs>) {
        let regs = Arc::new(CounterRegs::default());
        let alloc = DmaAllocator::new();
        let ring = DescRing::new(RingKind::Result, 0, size, regs.clone(), &alloc).unwrap();
        (ring, regs)
    }

    #[test]
    fn test_reserve_reports_shortfall_as_zero() {
        let (mut r, _) = ring(8);
        assert_eq!(r.reserve(7), (7, 0));
        assert_eq!(r.reserve(8), (0, 0));
        r.commit(5, 5);
        assert_eq!(r.reserve(2), (2, 5));
        assert_eq!(r.reserve(3).0, 0);
    }

    #[test]
    fn test_window_wraps() {
        let (r, _) = ring(8);
        assert_eq!(r.window_ranges(2, 3), (2..5, None));
        assert_eq!(r.window_ranges(6, 4), (6..8, Some(0..2)));
    }

    #[test]
    fn test_commit_reap_retire() {
        let (mut r, regs) = ring(16);
        let mut desc = HwDesc::default();
        desc.bypass[0] = 42;
        r.write(0, &desc);
        r.commit(1, 1);

        assert_eq!(r.reap(8).count, 0);
        regs.process(regs::rdr(0, regs::PROC_COUNT), regs::rdr(0, regs::PREP_COUNT), 1);
        let w = r.reap(8);
        assert_eq!(w, ReapWindow { start: 0, count: 1 });
        assert_eq!(r.read(w.start).bypass[0], 42);
        r.retire(w.count);
        assert_eq!(r.cons(), 1);
        assert_eq!(r.reap(8).count, 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Submit(u32),
        Process(u32),
        Reap(u32),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1u32..6).prop_map(Step::Submit),
            (0u32..8).prop_map(Step::Process),
            (1u32..8).prop_map(Step::Reap),
        ]
    }

    proptest! {
        #[test]
        fn prop_ring_accounting(steps in proptest::collection::vec(step(), 1..200)) {
            let (mut r, regs) = ring(16);
            let proc_reg = regs::rdr(0, regs::PROC_COUNT);
            let prep_reg = regs::rdr(0, regs::PREP_COUNT);

            for s in steps {
                match s {
                    Step::Submit(n) => {
                        let (free, prod) = r.reserve(n);
                        if free != 0 {
                            r.commit(n, r.idx_add(prod, n));
                        }
                    }
                    Step::Process(n) => {
                        regs.process(proc_reg, prep_reg, n);
                    }
                    Step::Reap(budget) => {
                        let w = r.reap(budget);
                        prop_assert!(w.count <= r.outstanding());
                        r.retire(w.count);
                    }
                }

                let available = hw::proc_desc_sz(regs.read32(proc_reg)) / DESC_WORDS as u32;
                prop_assert!(available <= r.outstanding());
                let in_flight = r.outstanding() - available;
                prop_assert_eq!(available + in_flight + r.avail_count(), r.size() - 1);
            }
        }
    }
}
