//! Coherent DMA Memory
//!
//! Memory the driver shares with the engine: descriptor rings, tokens,
//! transform records, the flow table and packet buffers.
//!
//! # Design
//!
//! - Regions are word-addressed atomics so the engine model may read and
//!   write them while the driver holds its own references
//! - Bus addresses are 32-bit and cache-line aligned
//! - `clean` and `invalidate` stand in for cache maintenance: a release
//!   fence before handing memory to the engine, an acquire fence before
//!   reading what the engine wrote

use std::collections::BTreeMap;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use eip_common::{EipError, EipResult};
use parking_lot::{Mutex, RwLock};

/// Cache line size; every region starts on one
pub const CACHE_LINE: u32 = 64;

/// First bus address handed out
const DMA_BASE: u32 = 0x1000_0000;

/// One contiguous coherent allocation
pub struct DmaRegion {
    addr: u32,
    words: Box<[AtomicU32]>,
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("words", &self.words.len())
            .finish()
    }
}

impl DmaRegion {
    /// Bus address of word 0
    #[inline(always)]
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Bus address of `word`
    #[inline(always)]
    pub fn word_addr(&self, word: usize) -> u32 {
        self.addr + (word as u32) * 4
    }

    /// Size in words
    #[inline(always)]
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Size in bytes
    #[inline(always)]
    pub fn len_bytes(&self) -> usize {
        self.words.len() * 4
    }

    /// Read one word
    #[inline(always)]
    pub fn read(&self, word: usize) -> u32 {
        self.words[word].load(Ordering::Relaxed)
    }

    /// Write one word
    #[inline(always)]
    pub fn write(&self, word: usize, value: u32) {
        self.words[word].store(value, Ordering::Relaxed);
    }

    /// OR bits into one word
    #[inline(always)]
    pub fn set_bits(&self, word: usize, bits: u32) {
        self.words[word].fetch_or(bits, Ordering::Relaxed);
    }

    /// Copy words out starting at `word`
    pub fn read_words(&self, word: usize, out: &mut [u32]) {
        for (i, w) in out.iter_mut().enumerate() {
            *w = self.read(word + i);
        }
    }

    /// Copy words in starting at `word`
    pub fn write_words(&self, word: usize, data: &[u32]) {
        for (i, w) in data.iter().enumerate() {
            self.write(word + i, *w);
        }
    }

    /// Zero `count` words starting at `word`
    pub fn zero(&self, word: usize, count: usize) {
        for i in word..word + count {
            self.write(i, 0);
        }
    }

    /// Copy bytes out; memory is little-endian
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        for (i, b) in out.iter_mut().enumerate() {
            let pos = offset + i;
            *b = (self.read(pos / 4) >> ((pos % 4) * 8)) as u8;
        }
    }

    /// Copy bytes in; memory is little-endian
    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            let pos = offset + i;
            let shift = (pos % 4) * 8;
            let word = self.read(pos / 4);
            let word = (word & !(0xFF << shift)) | ((*b as u32) << shift);
            self.write(pos / 4, word);
        }
    }

    /// Copy bytes out into a new vector
    pub fn to_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_bytes(offset, &mut out);
        out
    }

    /// Publish CPU writes to the engine
    #[inline(always)]
    pub fn clean(&self) {
        fence(Ordering::Release);
    }

    /// Observe engine writes
    #[inline(always)]
    pub fn invalidate(&self) {
        fence(Ordering::Acquire);
    }
}

/// Bus-address allocator for coherent memory
pub struct DmaAllocator {
    next: Mutex<u32>,
    regions: RwLock<BTreeMap<u32, Weak<DmaRegion>>>,
}

impl Default for DmaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator {
    /// Create an empty address space
    pub fn new() -> Self {
        Self {
            next: Mutex::new(DMA_BASE),
            regions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Allocate a zeroed region of `words` words
    pub fn alloc_words(&self, words: usize) -> EipResult<Arc<DmaRegion>> {
        let words = words.max(1);
        let bytes = u32::try_from(words * 4).map_err(|_| EipError::NoMemory("dma region"))?;
        let span = bytes.div_ceil(CACHE_LINE) * CACHE_LINE;

        let addr = {
            let mut next = self.next.lock();
            let addr = *next;
            *next = addr.checked_add(span).ok_or(EipError::NoMemory("dma address space"))?;
            addr
        };

        let region = Arc::new(DmaRegion {
            addr,
            words: (0..words).map(|_| AtomicU32::new(0)).collect(),
        });

        let mut regions = self.regions.write();
        if regions.len() % 256 == 255 {
            regions.retain(|_, r| r.strong_count() > 0);
        }
        regions.insert(addr, Arc::downgrade(&region));
        Ok(region)
    }

    /// Allocate a zeroed region of at least `bytes` bytes
    pub fn alloc_bytes(&self, bytes: usize) -> EipResult<Arc<DmaRegion>> {
        self.alloc_words(bytes.div_ceil(4))
    }

    /// Allocate a buffer holding `data`, with `tailroom` spare bytes
    pub fn alloc_buffer(&self, data: &[u8], tailroom: usize) -> EipResult<Arc<DmaRegion>> {
        let region = self.alloc_bytes(data.len() + tailroom)?;
        region.write_bytes(0, data);
        Ok(region)
    }

    /// Map a bus address to its live region and the byte offset inside it
    pub fn resolve(&self, addr: u32) -> Option<(Arc<DmaRegion>, usize)> {
        let regions = self.regions.read();
        let (base, weak) = regions.range(..=addr).next_back()?;
        let region = weak.upgrade()?;
        let offset = (addr - base) as usize;
        if offset < region.len_bytes() {
            Some((region, offset))
        } else {
            None
        }
    }

    /// Live regions (diagnostics)
    pub fn live_regions(&self) -> usize {
        self.regions.read().values().filter(|r| r.strong_count() > 0).count()
    }
}
