//! Engine Statistics
//!
//! Lock-free counters for records, ring instances and contexts. Every
//! holder has a plain `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::hw::{RES_ERROR_CLE_MAX, RES_ERROR_MAX};

/// Per-record counters
#[repr(C, align(64))]
#[derive(Default)]
pub struct RecordStats {
    tx_frags: AtomicU64,
    tx_pkts: AtomicU64,
    tx_bytes: AtomicU64,
    rx_frags: AtomicU64,
    rx_pkts: AtomicU64,
    rx_bytes: AtomicU64,
    rx_error: AtomicU64,
}

impl RecordStats {
    /// Operation queued
    #[inline(always)]
    pub fn record_tx(&self, frags: u64, bytes: u64) {
        self.tx_pkts.fetch_add(1, Ordering::Relaxed);
        self.tx_frags.fetch_add(frags, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Operation completed
    #[inline(always)]
    pub fn record_rx(&self, frags: u64, bytes: u64) {
        self.rx_pkts.fetch_add(1, Ordering::Relaxed);
        self.rx_frags.fetch_add(frags, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Operation completed with a hardware error
    #[inline(always)]
    pub fn record_rx_error(&self) {
        self.rx_error.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> RecordStatsSnapshot {
        RecordStatsSnapshot {
            tx_frags: self.tx_frags.load(Ordering::Relaxed),
            tx_pkts: self.tx_pkts.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_frags: self.rx_frags.load(Ordering::Relaxed),
            rx_pkts: self.rx_pkts.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_error: self.rx_error.load(Ordering::Relaxed),
        }
    }
}

/// Record counters (non-atomic)
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordStatsSnapshot {
    pub tx_frags: u64,
    pub tx_pkts: u64,
    pub tx_bytes: u64,
    pub rx_frags: u64,
    pub rx_pkts: u64,
    pub rx_bytes: u64,
    pub rx_error: u64,
}

/// Per ring instance counters (cache-line aligned)
#[repr(C, align(64))]
pub struct DmaStats {
    tx_pkts: AtomicU64,
    tx_frags: AtomicU64,
    tx_bytes: AtomicU64,
    tx_busy: AtomicU64,
    tx_error: AtomicU64,
    rx_pkts: AtomicU64,
    rx_frags: AtomicU64,
    rx_bytes: AtomicU64,
    rx_error: AtomicU64,
    rx_holes: AtomicU64,
    rx_stale: AtomicU64,
    rx_err_code: [AtomicU64; RES_ERROR_MAX],
    rx_cle_err_code: [AtomicU64; RES_ERROR_CLE_MAX],
}

impl Default for DmaStats {
    fn default() -> Self {
        Self {
            tx_pkts: AtomicU64::new(0),
            tx_frags: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            tx_busy: AtomicU64::new(0),
            tx_error: AtomicU64::new(0),
            rx_pkts: AtomicU64::new(0),
            rx_frags: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            rx_error: AtomicU64::new(0),
            rx_holes: AtomicU64::new(0),
            rx_stale: AtomicU64::new(0),
            rx_err_code: std::array::from_fn(|_| AtomicU64::new(0)),
            rx_cle_err_code: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl DmaStats {
    #[inline(always)]
    pub(crate) fn record_tx(&self, frags: u64, bytes: u64) {
        self.tx_pkts.fetch_add(1, Ordering::Relaxed);
        self.tx_frags.fetch_add(frags, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_busy(&self) {
        self.tx_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_tx_error(&self) {
        self.tx_error.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_rx(&self, frags: u64, bytes: u64) {
        self.rx_pkts.fetch_add(1, Ordering::Relaxed);
        self.rx_frags.fetch_add(frags, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_rx_error(&self, tr_code: u8, cle_code: u8) {
        self.rx_error.fetch_add(1, Ordering::Relaxed);
        if let Some(c) = self.rx_err_code.get(tr_code as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(c) = self.rx_cle_err_code.get(cle_code as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub(crate) fn record_hole(&self) {
        self.rx_holes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_stale(&self) {
        self.rx_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> DmaStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DmaStatsSnapshot {
            tx_pkts: load(&self.tx_pkts),
            tx_frags: load(&self.tx_frags),
            tx_bytes: load(&self.tx_bytes),
            tx_busy: load(&self.tx_busy),
            tx_error: load(&self.tx_error),
            rx_pkts: load(&self.rx_pkts),
            rx_frags: load(&self.rx_frags),
            rx_bytes: load(&self.rx_bytes),
            rx_error: load(&self.rx_error),
            rx_holes: load(&self.rx_holes),
            rx_stale: load(&self.rx_stale),
            rx_err_code: self.rx_err_code.iter().map(load).collect(),
            rx_cle_err_code: self.rx_cle_err_code.iter().map(load).collect(),
        }
    }
}

/// Ring instance counters (non-atomic)
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DmaStatsSnapshot {
    pub tx_pkts: u64,
    pub tx_frags: u64,
    pub tx_bytes: u64,
    pub tx_busy: u64,
    pub tx_error: u64,
    pub rx_pkts: u64,
    pub rx_frags: u64,
    pub rx_bytes: u64,
    pub rx_error: u64,
    pub rx_holes: u64,
    pub rx_stale: u64,
    /// Indexed by transform error code
    pub rx_err_code: Vec<u64>,
    /// Indexed by classification error code
    pub rx_cle_err_code: Vec<u64>,
}

impl DmaStatsSnapshot {
    /// Sum over ring instances
    pub fn merge(&mut self, other: &Self) {
        self.tx_pkts += other.tx_pkts;
        self.tx_frags += other.tx_frags;
        self.tx_bytes += other.tx_bytes;
        self.tx_busy += other.tx_busy;
        self.tx_error += other.tx_error;
        self.rx_pkts += other.rx_pkts;
        self.rx_frags += other.rx_frags;
        self.rx_bytes += other.rx_bytes;
        self.rx_error += other.rx_error;
        self.rx_holes += other.rx_holes;
        self.rx_stale += other.rx_stale;
        merge_codes(&mut self.rx_err_code, &other.rx_err_code);
        merge_codes(&mut self.rx_cle_err_code, &other.rx_cle_err_code);
    }
}

fn merge_codes(into: &mut Vec<u64>, from: &[u64]) {
    if into.len() < from.len() {
        into.resize(from.len(), 0);
    }
    for (a, b) in into.iter_mut().zip(from) {
        *a += b;
    }
}

/// Per-context counters
#[derive(Default)]
pub struct ContextStats {
    tr_alloc: AtomicU64,
    tr_alloc_fail: AtomicU64,
    tr_free_req: AtomicU64,
    tr_release: AtomicU64,
    tx_pkts: AtomicU64,
    tx_bytes: AtomicU64,
    rx_pkts: AtomicU64,
    rx_bytes: AtomicU64,
    rx_error: AtomicU64,
}

impl ContextStats {
    /// Operation queued on one of the context's records
    #[inline(always)]
    pub fn record_tx(&self, bytes: u64) {
        self.tx_pkts.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Operation completed
    #[inline(always)]
    pub fn record_rx(&self, bytes: u64) {
        self.rx_pkts.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Operation completed with a hardware error
    #[inline(always)]
    pub fn record_rx_error(&self) {
        self.rx_pkts.fetch_add(1, Ordering::Relaxed);
        self.rx_error.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_alloc(&self) {
        self.tr_alloc.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_alloc_fail(&self) {
        self.tr_alloc_fail.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_free_req(&self) {
        self.tr_free_req.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_release(&self) {
        self.tr_release.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> ContextStatsSnapshot {
        ContextStatsSnapshot {
            tr_alloc: self.tr_alloc.load(Ordering::Relaxed),
            tr_alloc_fail: self.tr_alloc_fail.load(Ordering::Relaxed),
            tr_free_req: self.tr_free_req.load(Ordering::Relaxed),
            tr_release: self.tr_release.load(Ordering::Relaxed),
            tx_pkts: self.tx_pkts.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_pkts: self.rx_pkts.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_error: self.rx_error.load(Ordering::Relaxed),
        }
    }
}

/// Context counters (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextStatsSnapshot {
    /// Records allocated
    pub tr_alloc: u64,
    /// Record allocations rejected
    pub tr_alloc_fail: u64,
    /// Free requests
    pub tr_free_req: u64,
    /// Records whose memory was released
    pub tr_release: u64,
    /// Operations queued
    pub tx_pkts: u64,
    /// Input bytes queued
    pub tx_bytes: u64,
    /// Operations completed, failed ones included
    pub rx_pkts: u64,
    /// Output bytes of successful completions
    pub rx_bytes: u64,
    /// Operations completed with a hardware error
    pub rx_error: u64,
}

impl ContextStatsSnapshot {
    /// Records freed by the caller but not yet released
    pub fn pending_release(&self) -> u64 {
        self.tr_free_req.saturating_sub(self.tr_release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stats() {
        let stats = RecordStats::default();
        stats.record_tx(2, 1500);
        stats.record_rx(1, 1532);
        stats.record_rx_error();

        let snap = stats.snapshot();
        assert_eq!(snap.tx_pkts, 1);
        assert_eq!(snap.tx_frags, 2);
        assert_eq!(snap.rx_bytes, 1532);
        assert_eq!(snap.rx_error, 1);
    }

    #[test]
    fn test_dma_error_codes() {
        let stats = DmaStats::default();
        stats.record_rx_error(9, 0);
        stats.record_rx_error(9, 31);
        // Out of range codes only bump the total
        stats.record_rx_error(200, 200);

        let snap = stats.snapshot();
        assert_eq!(snap.rx_error, 3);
        assert_eq!(snap.rx_err_code[9], 2);
        assert_eq!(snap.rx_cle_err_code[31], 1);
        assert_eq!(snap.rx_err_code.len(), RES_ERROR_MAX);
    }

    #[test]
    fn test_merge() {
        let a = DmaStats::default();
        let b = DmaStats::default();
        a.record_tx(1, 100);
        b.record_tx(3, 300);
        b.record_rx_error(2, 0);

        let mut total = DmaStatsSnapshot::default();
        total.merge(&a.snapshot());
        total.merge(&b.snapshot());
        assert_eq!(total.tx_pkts, 2);
        assert_eq!(total.tx_frags, 4);
        assert_eq!(total.rx_err_code[2], 1);
    }

    #[test]
    fn test_pending_release() {
        let stats = ContextStats::default();
        stats.record_alloc();
        stats.record_free_req();
        assert_eq!(stats.snapshot().pending_release(), 1);
        stats.record_release();
        assert_eq!(stats.snapshot().pending_release(), 0);
    }

    #[test]
    fn test_context_traffic() {
        let stats = ContextStats::default();
        stats.record_tx(80);
        stats.record_tx(64);
        stats.record_rx(112);
        stats.record_rx_error();

        let snap = stats.snapshot();
        assert_eq!((snap.tx_pkts, snap.tx_bytes), (2, 144));
        assert_eq!((snap.rx_pkts, snap.rx_bytes, snap.rx_error), (2, 112, 1));
    }
}
