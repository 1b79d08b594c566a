//! Software Engine Model
//!
//! A register file plus a descriptor processor that behaves like the
//! engine as far as the driver can observe: it consumes prepared command
//! descriptors, writes result descriptors with the data length and error
//! words, copies the bypass words across and bumps the processed counter.
//!
//! # Design
//!
//! - Data is passed through, not transformed; output lengths follow the
//!   token program so completions carry the sizes the engine would report
//! - HMAC precompute stores deterministic pad words derived from the key
//! - ESP encapsulation increments the record's sequence number
//! - Processing runs on the command doorbell unless the model is stalled,
//!   in which case prepared work waits for [`SimEngine::process`]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use eip_common::MAX_RINGS;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::hw::{self, ctx, inst, regs, token_hdr, HwDesc, Mmio, DESC_BYTES, DESC_WORDS};
use crate::mem::{DmaAllocator, DmaRegion};

/// Hash seeds returned for the flow hash IV registers until written
const DEFAULT_FHASH_IV: [u32; 4] = [0x6A09_E667, 0xBB67_AE85, 0x3C6E_F372, 0xA54F_F53A];

/// Operations kept in the processed log
const LOG_DEPTH: usize = 4096;

/// Byte appended where the engine would emit digest or trailer bytes
const FILL: u8 = 0xD5;

/// One operation as the model saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOp {
    /// Ring instance
    pub ring: u32,
    /// Hardware service word
    pub service: u32,
    /// Command token header
    pub hdr: u32,
    /// Record address, type bits cleared
    pub tr_addr: u32,
    /// Reported output length
    pub out_len: u32,
    /// Injected transform error code
    pub tr_err: u8,
    /// Injected classification error code
    pub cle_err: u8,
}

impl SimOp {
    /// True for record cache invalidations
    pub fn is_invalidation(&self) -> bool {
        self.service & SERVICE_MASK == hw::CMD_HWSERVICE_INV_TRC
    }
}

const SERVICE_MASK: u32 = 0xF << 24;

#[derive(Debug, Default)]
struct SimQueue {
    base: u32,
    size: u32,
    next: u32,
    prepared: u32,
}

impl SimQueue {
    fn reset(&mut self) {
        self.next = 0;
        self.prepared = 0;
    }

    fn advance(&mut self, n: u32) {
        if self.size > 0 {
            self.next = (self.next + n) % self.size;
        }
        self.prepared -= n;
    }
}

#[derive(Debug, Default)]
struct SimRing {
    cmd: SimQueue,
    res: SimQueue,
    /// Processed result descriptors not yet acknowledged, in bytes
    processed: u32,
}

#[derive(Default)]
struct SimState {
    regs: HashMap<u32, u32>,
    rings: HashMap<u32, SimRing>,
    stalled: bool,
    faults: VecDeque<(u8, u8)>,
    log: VecDeque<SimOp>,
}

/// Register-level model of the engine
pub struct SimEngine {
    alloc: Arc<DmaAllocator>,
    state: Mutex<SimState>,
}

impl std::fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimEngine")
            .field("rings", &state.rings.len())
            .field("stalled", &state.stalled)
            .finish()
    }
}

struct Executed {
    out: Vec<u8>,
    tr_err: u8,
    cle_err: u8,
}

impl Executed {
    fn ok(out: Vec<u8>) -> Self {
        Self { out, tr_err: 0, cle_err: 0 }
    }
}

impl SimEngine {
    /// Model reading descriptors and buffers through `alloc`
    pub fn new(alloc: Arc<DmaAllocator>) -> Arc<Self> {
        Arc::new(Self {
            alloc,
            state: Mutex::new(SimState::default()),
        })
    }

    /// Stop processing on the doorbell; prepared work accumulates
    pub fn stall(&self) {
        self.state.lock().stalled = true;
    }

    /// Resume doorbell processing and run everything prepared so far
    pub fn resume(&self) -> usize {
        let mut state = self.state.lock();
        state.stalled = false;
        self.run_all(&mut state, usize::MAX)
    }

    /// Run at most `max_ops` prepared operations, stalled or not
    pub fn process(&self, max_ops: usize) -> usize {
        let mut state = self.state.lock();
        self.run_all(&mut state, max_ops)
    }

    /// Fail the next operation with the given error codes
    pub fn fail_next(&self, tr_code: u8, cle_code: u8) {
        self.state.lock().faults.push_back((tr_code, cle_code));
    }

    /// Command descriptors prepared and not yet processed, all rings
    pub fn pending(&self) -> u32 {
        self.state.lock().rings.values().map(|r| r.cmd.prepared).sum()
    }

    /// Operations processed so far, oldest first
    pub fn ops(&self) -> Vec<SimOp> {
        self.state.lock().log.iter().copied().collect()
    }

    /// Forget the processed log
    pub fn clear_ops(&self) {
        self.state.lock().log.clear();
    }

    fn ring_reg(offset: u32) -> Option<(u32, bool, u32)> {
        if offset >= MAX_RINGS as u32 * regs::RING_BLOCK {
            return None;
        }
        let ring = offset / regs::RING_BLOCK;
        let rel = offset % regs::RING_BLOCK;
        Some((ring, rel >= regs::RDR_OFFSET, rel % regs::RDR_OFFSET))
    }

    fn run_all(&self, state: &mut SimState, max_ops: usize) -> usize {
        let mut ids: Vec<u32> = state.rings.keys().copied().collect();
        ids.sort_unstable();
        let mut done = 0;
        for id in ids {
            if done >= max_ops {
                break;
            }
            done += self.run_ring(state, id, max_ops - done);
        }
        done
    }

    fn run_ring(&self, state: &mut SimState, id: u32, max_ops: usize) -> usize {
        let SimState {
            rings, faults, log, ..
        } = state;
        let Some(ring) = rings.get_mut(&id) else {
            return 0;
        };

        let mut done = 0;
        while done < max_ops && ring.cmd.prepared > 0 {
            let Some(cmds) = self.take_op(&ring.cmd, hw::CMD_FLAGS_LAST) else {
                break;
            };
            let Some(results) = self.take_op(&ring.res, hw::RES_FLAGS_LAST) else {
                trace!("sim ring {}: result ring short, waiting", id);
                break;
            };

            let first = cmds[0].1;
            let exec = match faults.pop_front() {
                Some((tr_err, cle_err)) => Executed {
                    out: Vec::new(),
                    tr_err,
                    cle_err,
                },
                None => self.execute(&cmds),
            };

            self.write_results(ring.res.base, &results, &first, &exec);

            let op = SimOp {
                ring: id,
                service: first.token[6],
                hdr: first.token[2],
                tr_addr: first.token[4] & !ctx::TYPE_MASK,
                out_len: exec.out.len() as u32,
                tr_err: exec.tr_err,
                cle_err: exec.cle_err,
            };
            if log.len() == LOG_DEPTH {
                log.pop_front();
            }
            log.push_back(op);

            ring.cmd.advance(cmds.len() as u32);
            ring.res.advance(results.len() as u32);
            ring.processed += results.len() as u32 * DESC_BYTES as u32;
            done += 1;
        }
        done
    }

    /// Descriptors of the next whole operation, with their slot numbers
    fn take_op(&self, q: &SimQueue, last_flag: u32) -> Option<Vec<(u32, HwDesc)>> {
        let mut descs = Vec::new();
        for i in 0..q.prepared {
            let slot = (q.next + i) % q.size.max(1);
            let desc = self.read_desc(q.base, slot)?;
            let last = desc.frag[0] & last_flag != 0;
            descs.push((slot, desc));
            if last {
                return Some(descs);
            }
        }
        None
    }

    fn read_desc(&self, base: u32, slot: u32) -> Option<HwDesc> {
        let (region, offset) = self.alloc.resolve(base)?;
        let word = offset / 4 + slot as usize * DESC_WORDS;
        let mut words = [0u32; DESC_WORDS];
        region.invalidate();
        region.read_words(word, &mut words);
        Some(HwDesc::from_words(&words))
    }

    fn write_desc(&self, base: u32, slot: u32, desc: &HwDesc) {
        if let Some((region, offset)) = self.alloc.resolve(base) {
            region.write_words(offset / 4 + slot as usize * DESC_WORDS, &desc.to_words());
            region.clean();
        }
    }

    fn record(&self, tr_addr_type: u32) -> Option<(Arc<DmaRegion>, usize)> {
        let (region, offset) = self.alloc.resolve(tr_addr_type & !ctx::TYPE_MASK)?;
        Some((region, offset / 4))
    }

    fn gather(&self, cmds: &[(u32, HwDesc)], data_len: usize) -> Vec<u8> {
        let mut input = Vec::with_capacity(data_len);
        for (_, desc) in cmds {
            let len = hw::cmd_frag_len(desc.frag[0]) as usize;
            if len == 0 {
                continue;
            }
            match self.alloc.resolve(desc.frag[2]) {
                Some((region, offset)) => {
                    let mut buf = vec![0u8; len];
                    region.invalidate();
                    region.read_bytes(offset, &mut buf);
                    input.extend_from_slice(&buf);
                }
                None => warn!("sim: source {:#x} not mapped", desc.frag[2]),
            }
        }
        input.truncate(data_len);
        input
    }

    fn token_words(&self, first: &HwDesc) -> Vec<u32> {
        let count = (first.frag[0] >> 24) as usize;
        let mut words = vec![0u32; count];
        if count > 0 {
            if let Some((region, offset)) = self.alloc.resolve(first.token[0]) {
                region.read_words(offset / 4, &mut words);
            }
        }
        words
    }

    fn execute(&self, cmds: &[(u32, HwDesc)]) -> Executed {
        let first = &cmds[0].1;
        let hdr = first.token[2];
        let data_len = hw::cmd_data_len(hdr) as usize;

        match first.token[6] & SERVICE_MASK {
            hw::CMD_HWSERVICE_INV_TRC => return Executed::ok(Vec::new()),
            hw::CMD_HWSERVICE_LIP => return Executed::ok(self.gather(cmds, data_len)),
            _ => {}
        }

        let input = self.gather(cmds, data_len);
        let tk = self.token_words(first);
        if tk.is_empty() {
            return Executed {
                out: Vec::new(),
                tr_err: 1,
                cle_err: 0,
            };
        }

        let digest = hdr & token_hdr::CTX_CTRL != 0 && hdr & token_hdr::REUSE_CTX == 0;
        let crypto = hdr & token_hdr::CTX_CTRL != 0;
        let inbound = hdr & token_hdr::DIR_MASK == token_hdr::INBOUND;

        if digest {
            self.store_pads(first.token[4], &tk, &input);
            return Executed::ok(Vec::new());
        }

        let field = |w: u32| (w & 0xFFFF) as usize;
        let out_len = if crypto {
            let last = tk[tk.len() - 1];
            match tk[0] & inst::CTRL_OP_MASK {
                inst::CTRL_OP_HMAC_ADD => field(last),
                inst::CTRL_OP_ENC_HMAC => data_len + field(last),
                inst::CTRL_OP_HMAC_DEC => data_len.saturating_sub(field(last)),
                _ => data_len,
            }
        } else if inbound {
            // iv(4) | bypass | esp header | payload | ...
            match (tk.get(4), tk.get(6)) {
                (Some(&bypass), Some(&payload)) => field(bypass) + field(payload),
                _ => data_len,
            }
        } else {
            self.bump_seq(first.token[4], &tk);
            // bypass | esp header | payload | trailer | icv | ...
            if tk.len() >= 5 {
                field(tk[0]) + field(tk[1]) + field(tk[2]) + (tk[3] & 0x1FF) as usize + field(tk[4])
            } else {
                data_len
            }
        };

        let mut out = input;
        out.resize(out_len, FILL);
        Executed::ok(out)
    }

    /// Inner and outer pad words for the key held in `input`
    fn store_pads(&self, tr_addr_type: u32, tk: &[u32], key: &[u8]) {
        let offset_of = |want: u32| {
            tk.iter()
                .find(|&&w| w & 0xF0FF_F800 == want)
                .map(|&w| (w & 0x7FF) as usize)
        };
        let (Some(ipad), Some(opad)) = (offset_of(inst::IPAD_ADD), offset_of(inst::OPAD_ADD)) else {
            warn!("sim: digest token without pad stores");
            return;
        };
        let Some((region, base)) = self.record(tr_addr_type) else {
            warn!("sim: record {:#x} not mapped", tr_addr_type);
            return;
        };

        let seed = key
            .iter()
            .fold(0x811C_9DC5u32, |h, &b| (h ^ b as u32).wrapping_mul(0x0100_0193));
        let words = opad.saturating_sub(ipad);
        for i in 0..words {
            region.write(base + ipad + i, (seed ^ 0x3636_3636).rotate_left(i as u32) | 1);
            region.write(base + opad + i, (seed ^ 0x5C5C_5C5C).rotate_left(i as u32) | 1);
        }
        region.clean();
    }

    fn bump_seq(&self, tr_addr_type: u32, tk: &[u32]) {
        let Some(&w) = tk.last() else {
            return;
        };
        let esn = match w & 0xFFFF_F800 {
            inst::SEQ_NO_UPDT => false,
            inst::SEQ_NO_UPDT_ESN => true,
            _ => return,
        };
        let Some((region, base)) = self.record(tr_addr_type) else {
            return;
        };
        let at = base + (w & 0x7FF) as usize;
        let seq = region.read(at).wrapping_add(1);
        region.write(at, seq);
        if esn && seq == 0 {
            region.write(at + 1, region.read(at + 1).wrapping_add(1));
        }
    }

    fn write_results(&self, res_base: u32, results: &[(u32, HwDesc)], first_cmd: &HwDesc, exec: &Executed) {
        let mut written = 0usize;
        let last = results.len() - 1;
        for (i, (slot, desc)) in results.iter().enumerate() {
            let mut desc = *desc;
            let cap = hw::res_frag_len(desc.frag[0]) as usize;
            let chunk = cap.min(exec.out.len().saturating_sub(written));
            if chunk > 0 {
                if let Some((region, offset)) = self.alloc.resolve(desc.frag[2]) {
                    region.write_bytes(offset, &exec.out[written..written + chunk]);
                    region.clean();
                }
                written += chunk;
            }

            if i == last {
                desc.token[0] = ((exec.tr_err as u32) << 17) | (exec.out.len() as u32 & 0xFFFF);
                desc.token[1] = (exec.cle_err as u32) << 16;
                desc.bypass = first_cmd.bypass;
            }
            self.write_desc(res_base, *slot, &desc);
        }
    }
}

impl Mmio for SimEngine {
    fn read32(&self, offset: u32) -> u32 {
        let state = self.state.lock();
        if let Some((ring, true, regs::PROC_COUNT)) = Self::ring_reg(offset) {
            return state.rings.get(&ring).map(|r| r.processed).unwrap_or(0);
        }
        if let Some(i) = regs::FHASH_IV.iter().position(|&r| r == offset) {
            return state.regs.get(&offset).copied().unwrap_or(DEFAULT_FHASH_IV[i]);
        }
        state.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut state = self.state.lock();
        let Some((id, result, reg)) = Self::ring_reg(offset) else {
            state.regs.insert(offset, value);
            return;
        };

        let ring = state.rings.entry(id).or_default();
        let q = if result { &mut ring.res } else { &mut ring.cmd };
        let doorbell = match reg {
            regs::PREP_COUNT if value & regs::COUNT_RST != 0 => {
                q.reset();
                false
            }
            regs::PREP_COUNT => {
                q.prepared += hw::prep_desc_sz(value) / DESC_WORDS as u32;
                !result
            }
            regs::PROC_COUNT if result && value & regs::COUNT_RST != 0 => {
                ring.processed = 0;
                false
            }
            regs::PROC_COUNT if result => {
                ring.processed = ring.processed.saturating_sub(value & 0xFF_FFFF);
                false
            }
            regs::BASE_ADDR_LO => {
                q.base = value;
                false
            }
            regs::RING_SIZE => {
                q.size = value / DESC_BYTES as u32;
                false
            }
            _ => {
                state.regs.insert(offset, value);
                false
            }
        };

        if doorbell && !state.stalled {
            self.run_ring(&mut state, id, usize::MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fhash_iv_defaults_and_override() {
        let sim = SimEngine::new(Arc::new(DmaAllocator::new()));
        assert_eq!(sim.read32(regs::FHASH_IV[0]), DEFAULT_FHASH_IV[0]);
        sim.write32(regs::FHASH_IV[0], 7);
        assert_eq!(sim.read32(regs::FHASH_IV[0]), 7);
        assert_eq!(sim.read32(regs::FLUE_CONFIG), 0);
    }

    #[test]
    fn test_ring_register_decode() {
        assert_eq!(
            SimEngine::ring_reg(regs::rdr(2, regs::PROC_COUNT)),
            Some((2, true, regs::PROC_COUNT))
        );
        assert_eq!(
            SimEngine::ring_reg(regs::cdr(1, regs::PREP_COUNT)),
            Some((1, false, regs::PREP_COUNT))
        );
        assert_eq!(SimEngine::ring_reg(regs::FLUE_CONFIG), None);
    }

    #[test]
    fn test_proc_count_acknowledge() {
        let sim = SimEngine::new(Arc::new(DmaAllocator::new()));
        let reg = regs::rdr(0, regs::PROC_COUNT);
        sim.state.lock().rings.entry(0).or_default().processed = 3 * DESC_BYTES as u32;
        assert_eq!(hw::proc_desc_sz(sim.read32(reg)), 3 * DESC_WORDS as u32);
        sim.write32(reg, hw::proc_cnt_desc_sz(DESC_WORDS as u32));
        assert_eq!(hw::proc_desc_sz(sim.read32(reg)), 2 * DESC_WORDS as u32);
        sim.write32(reg, regs::COUNT_RST);
        assert_eq!(sim.read32(reg), 0);
    }
}
