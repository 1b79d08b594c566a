//! IPsec Flow Table
//!
//! Maps IPsec flow identities to transform records for inline redirection.
//! The engine hashes incoming packets itself and walks this table in DMA
//! memory, so the layout is fixed:
//!
//! ```text
//! [ bucket 0 | bucket 1 | ... | bucket N-1 | pool 0 | ... | pool M-1 ]
//!   16 words each: hash w0..3, record w12, next offset w15
//! ```
//!
//! # Design
//!
//! - Each non-empty bucket has exactly one sentinel whose bytes live in
//!   the bucket slot; further entries sit in the collision pool, linked
//!   by byte offsets from the table base with the low bit as valid flag
//! - The engine indexes by slot, so deleting a sentinel with successors
//!   moves the next entry's bytes into the bucket slot
//! - A full pool is not an error: the flow simply is not redirected

use std::net::IpAddr;
use std::sync::Arc;

use eip_common::{EipResult, FlowTableConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hw::{regs, Mmio};
use crate::mem::{DmaAllocator, DmaRegion};

/// Words per hardware flow entry
pub const FLOW_WORDS: usize = 16;
/// Hash input words, one mixing round each
pub const HASH_DATA_WORDS: usize = 13;
/// Valid flag of the next-entry offset
pub const FLOW_VALID_BIT: u32 = 0x1;

const W_HASH: usize = 0;
const W_RECORD: usize = 12;
const W_NEXT: usize = 15;

/// IP protocol number of ESP
pub const IPPROTO_ESP: u8 = 50;
/// IP protocol number of UDP (NAT traversal)
pub const IPPROTO_UDP: u8 = 17;

/// 128-bit flow hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowHash(pub [u32; 4]);

/// Flow identity as the engine sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    /// Outer source address
    pub src: IpAddr,
    /// Outer destination address
    pub dst: IpAddr,
    /// SPI, host order
    pub spi: u32,
    /// Outer IP protocol
    pub ip_proto: u8,
    /// DTLS epoch; zero for IPsec
    pub epoch: u16,
}

impl FlowTuple {
    /// ESP flow, UDP encapsulated when `natt` is set
    pub fn esp(src: IpAddr, dst: IpAddr, spi: u32, natt: bool) -> Self {
        Self {
            src,
            dst,
            spi,
            ip_proto: if natt { IPPROTO_UDP } else { IPPROTO_ESP },
            epoch: 0,
        }
    }

    /// True for an IPv6 outer header
    pub fn is_v6(&self) -> bool {
        self.dst.is_ipv6()
    }

    /// Normalized words fed to the hash
    pub fn hash_data(&self) -> [u32; HASH_DATA_WORDS] {
        let mut data = [0u32; HASH_DATA_WORDS];
        data[1] = (self.ip_proto as u32) << 8;
        if self.is_v6() {
            data[1] |= 1 << 25;
        }
        data[2] = self.spi;
        data[3] = self.epoch as u32;
        addr_words(&self.dst, &mut data[5..9]);
        addr_words(&self.src, &mut data[9..13]);
        data
    }
}

/// Address as the words the engine reads from the packet
fn addr_words(addr: &IpAddr, out: &mut [u32]) {
    match addr {
        IpAddr::V4(a) => out[0] = u32::from_le_bytes(a.octets()),
        IpAddr::V6(a) => {
            for (w, c) in out.iter_mut().zip(a.octets().chunks_exact(4)) {
                *w = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            }
        }
    }
}

#[inline(always)]
fn mix(h: &mut [u32; 4]) {
    const SHIFTS: [(u32, u32, u32); 3] = [(13, 8, 13), (12, 16, 5), (3, 10, 15)];
    for (a, b, c) in SHIFTS {
        h[1] = h[1].wrapping_sub(h[2]).wrapping_sub(h[3]) ^ (h[3] >> a);
        h[2] = h[2].wrapping_sub(h[3]).wrapping_sub(h[1]) ^ (h[1] << b);
        h[3] = h[3].wrapping_sub(h[1]).wrapping_sub(h[2]) ^ (h[2] >> c);
    }
}

/// The engine's flow hash, seeded with its four IV registers
pub fn flow_hash(iv: &[u32; 4], tuple: &FlowTuple) -> FlowHash {
    let data = tuple.hash_data();
    let mut h = *iv;
    for (i, d) in data.iter().enumerate() {
        h[0] = h[0].wrapping_add(*d);
        h[0] = h[0].wrapping_add(h[0] << 10);
        h[0] ^= h[0] >> 6;
        h[1 + i % 3] ^= *d;

        if i % 3 == 2 && i < HASH_DATA_WORDS - 1 {
            mix(&mut h);
        }
    }
    FlowHash(h)
}

/// Where an entry's hardware bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Bucket(usize),
    Pool(usize),
}

#[derive(Debug, Clone)]
struct FlowEntry {
    hash: FlowHash,
    tuple: FlowTuple,
    slot: Slot,
}

/// One entry of a bucket chain, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowView {
    /// Flow hash
    pub hash: FlowHash,
    /// Record binding stored in hardware
    pub tr_addr_type: u32,
    /// Entry occupies the bucket slot
    pub sentinel: bool,
}

/// Flow table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowStats {
    /// Entries added
    pub alloc: u64,
    /// Entries deleted
    pub free: u64,
    /// Entries ever placed in the collision pool
    pub collision: u64,
    /// Entries currently in the collision pool
    pub active_collision: u64,
}

/// Hash table of IPsec flows in engine-visible memory
pub struct FlowTable {
    mem: Arc<DmaRegion>,
    iv: [u32; 4],
    buckets: usize,
    max_collisions: usize,
    chains: Vec<Vec<FlowEntry>>,
    stats: FlowStats,
}

impl std::fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTable")
            .field("base", &format_args!("{:#x}", self.mem.addr()))
            .field("buckets", &self.buckets)
            .field("stats", &self.stats)
            .finish()
    }
}

impl FlowTable {
    /// Allocate the table, read the hash seed and point the engine at it
    pub fn new(config: &FlowTableConfig, mmio: &dyn Mmio, alloc: &DmaAllocator) -> EipResult<Self> {
        let buckets = config.buckets();
        let mem = alloc.alloc_words((buckets + config.max_collisions) * FLOW_WORDS)?;

        let iv = regs::FHASH_IV.map(|r| mmio.read32(r));
        mmio.write32(regs::FLUE_HASHBASE_LO, mem.addr());
        mmio.write32(regs::FLUE_HASHBASE_HI, 0);
        mmio.write32(regs::FLUE_CONFIG, config.size_order);
        info!(
            "flow table at {:#x}: {} buckets, {} collision entries",
            mem.addr(),
            buckets,
            config.max_collisions
        );

        Ok(Self {
            mem,
            iv,
            buckets,
            max_collisions: config.max_collisions,
            chains: vec![Vec::new(); buckets],
            stats: FlowStats::default(),
        })
    }

    /// Hash a tuple with this table's seed
    pub fn hash(&self, tuple: &FlowTuple) -> FlowHash {
        flow_hash(&self.iv, tuple)
    }

    /// Bucket a hash selects
    pub fn bucket_index(&self, hash: &FlowHash) -> usize {
        ((hash.0[0] >> 6) as usize) & (self.buckets - 1)
    }

    /// Bus address of the table base
    pub fn base_addr(&self) -> u32 {
        self.mem.addr()
    }

    /// Counters
    pub fn stats(&self) -> FlowStats {
        self.stats
    }

    fn slot_word(&self, slot: Slot) -> usize {
        match slot {
            Slot::Bucket(i) => i * FLOW_WORDS,
            Slot::Pool(i) => (self.buckets + i) * FLOW_WORDS,
        }
    }

    /// Byte offset of a slot from the table base
    fn slot_offset(&self, slot: Slot) -> u32 {
        (self.slot_word(slot) * 4) as u32
    }

    fn write_entry(&self, slot: Slot, hash: &FlowHash, tr_addr_type: u32, next: u32) {
        let base = self.slot_word(slot);
        self.mem.write(base + W_RECORD, 0);
        self.mem.write_words(base + W_HASH, &hash.0);
        self.mem.write(base + W_NEXT, next);
        self.mem.write(base + W_RECORD, tr_addr_type);
    }

    fn clear_slot(&self, slot: Slot) {
        let base = self.slot_word(slot);
        self.mem.write(base + W_RECORD, 0);
        self.mem.zero(base, FLOW_WORDS);
    }

    fn free_pool_slot(&self) -> Option<usize> {
        (0..self.max_collisions).find(|i| self.mem.read(self.slot_word(Slot::Pool(*i)) + W_RECORD) == 0)
    }

    /// Bind `tuple` to the record at `tr_addr_type`.
    ///
    /// Returns the bucket index, or `None` for a duplicate tuple or an
    /// exhausted collision pool.
    pub fn add(&mut self, tuple: &FlowTuple, tr_addr_type: u32) -> Option<usize> {
        let hash = self.hash(tuple);
        let idx = self.bucket_index(&hash);

        if self.chains[idx].iter().any(|e| e.hash == hash) {
            warn!("flow spi {:#x} already present in bucket {}", tuple.spi, idx);
            return None;
        }

        if self.chains[idx].is_empty() {
            self.write_entry(Slot::Bucket(idx), &hash, tr_addr_type, 0);
            self.mem.clean();
            self.chains[idx].push(FlowEntry {
                hash,
                tuple: *tuple,
                slot: Slot::Bucket(idx),
            });
            self.stats.alloc += 1;
            debug!("flow spi {:#x} added at head of bucket {}", tuple.spi, idx);
            return Some(idx);
        }

        let Some(pool) = self.free_pool_slot() else {
            warn!("flow spi {:#x}: collision pool exhausted", tuple.spi);
            return None;
        };
        let slot = Slot::Pool(pool);
        self.write_entry(slot, &hash, tr_addr_type, 0);

        let offset = self.slot_offset(slot) | FLOW_VALID_BIT;
        let tail = self.chains[idx].last().map(|e| e.slot);
        if let Some(tail) = tail {
            self.mem.write(self.slot_word(tail) + W_NEXT, offset);
        }
        self.mem.clean();

        self.chains[idx].push(FlowEntry { hash, tuple: *tuple, slot });
        self.stats.alloc += 1;
        self.stats.collision += 1;
        self.stats.active_collision += 1;
        metrics::counter!("eip_flow_collision_total").increment(1);
        debug!("flow spi {:#x} added after collision in bucket {}", tuple.spi, idx);
        Some(idx)
    }

    /// Remove `tuple`. Returns false when it was not present.
    pub fn delete(&mut self, tuple: &FlowTuple) -> bool {
        let hash = self.hash(tuple);
        let idx = self.bucket_index(&hash);

        let Some(pos) = self.chains[idx].iter().position(|e| e.hash == hash) else {
            warn!("flow spi {:#x} not found in bucket {}", tuple.spi, idx);
            return false;
        };

        let chain_len = self.chains[idx].len();
        let flow = self.chains[idx][pos].slot;
        if chain_len == 1 {
            self.clear_slot(flow);
        } else if pos == 0 {
            // Relocate the successor into the bucket slot
            let next = self.chains[idx][1].slot;
            let next_base = self.slot_word(next);
            let mut next_hash = [0u32; 4];
            self.mem.read_words(next_base + W_HASH, &mut next_hash);
            let next_tr = self.mem.read(next_base + W_RECORD);
            let next_next = self.mem.read(next_base + W_NEXT);

            self.write_entry(flow, &FlowHash(next_hash), next_tr, next_next);
            self.clear_slot(next);
            self.chains[idx][1].slot = flow;
            self.stats.active_collision -= 1;
        } else {
            let prev = self.chains[idx][pos - 1].slot;
            let next = self.mem.read(self.slot_word(flow) + W_NEXT);
            self.mem.write(self.slot_word(prev) + W_NEXT, next);
            self.clear_slot(flow);
            self.stats.active_collision -= 1;
        }
        self.mem.clean();

        self.chains[idx].remove(pos);
        self.stats.free += 1;
        debug!("flow spi {:#x} deleted from bucket {}", tuple.spi, idx);
        true
    }

    /// Whether `tuple` is present
    pub fn contains(&self, tuple: &FlowTuple) -> bool {
        let hash = self.hash(tuple);
        self.chains[self.bucket_index(&hash)]
            .iter()
            .any(|e| e.hash == hash && e.tuple == *tuple)
    }

    /// Chain of bucket `idx` as the engine would walk it
    pub fn bucket(&self, idx: usize) -> Vec<FlowView> {
        let mut out = Vec::new();
        let Some(head) = self.chains.get(idx).and_then(|c| c.first()) else {
            return out;
        };

        let mut word = self.slot_word(head.slot);
        loop {
            let mut hash = [0u32; 4];
            self.mem.read_words(word + W_HASH, &mut hash);
            out.push(FlowView {
                hash: FlowHash(hash),
                tr_addr_type: self.mem.read(word + W_RECORD),
                sentinel: word == idx * FLOW_WORDS,
            });
            let next = self.mem.read(word + W_NEXT);
            if next & FLOW_VALID_BIT == 0 || out.len() > self.max_collisions {
                break;
            }
            word = (next & !FLOW_VALID_BIT) as usize / 4;
        }
        out
    }

    /// Raw words of bucket slot `idx`
    pub fn bucket_words(&self, idx: usize) -> [u32; FLOW_WORDS] {
        let mut words = [0u32; FLOW_WORDS];
        self.mem.read_words(idx * FLOW_WORDS, &mut words);
        words
    }
}
