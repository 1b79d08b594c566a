//! Token Builder
//!
//! One pure function per primitive producing the instruction program the
//! engine runs for a single operation, plus the command token header that
//! travels in the first command descriptor.
//!
//! # Design
//!
//! - Builders never allocate and never fail: every program fits in
//!   `TOKEN_MAX_WORDS` by construction
//! - Builders read only the record's cached [`TokenTemplate`], never the
//!   record memory the engine may be updating
//! - Tokens live in a per-context pool of DMA slots

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use eip_common::{EipError, EipResult};

use crate::hw::inst::{self, TOKEN_MAX_WORDS};
use crate::hw::token_hdr;
use crate::mem::{DmaAllocator, DmaRegion};

/// Initial CTR block counter (big-endian 1)
pub const CTR_INITIAL_COUNTER: u32 = u32::from_le_bytes([0, 0, 0, 1]);

/// Processing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Encrypt / generate
    Outbound,
    /// Decrypt / verify
    Inbound,
}

impl Direction {
    fn hdr_bits(self) -> u32 {
        match self {
            Self::Outbound => token_hdr::OUTBOUND,
            Self::Inbound => token_hdr::INBOUND,
        }
    }
}

/// IV carried by a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSize {
    /// No IV words
    None,
    /// Two IV words (64-bit block ciphers)
    Words2,
    /// Four IV words
    Words4,
    /// Engine-generated IV
    Prng,
}

/// Fields recovered from a command token header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenHeader {
    /// Direction
    pub direction: Direction,
    /// Input data length
    pub data_len: u32,
    /// IV source
    pub iv: IvSize,
}

impl TokenHeader {
    /// Decode a command token header
    pub fn decode(hdr: u32) -> Self {
        let direction = if hdr & token_hdr::DIR_MASK == token_hdr::INBOUND {
            Direction::Inbound
        } else {
            Direction::Outbound
        };
        let iv = match (hdr >> 26) & 0x7 {
            7 => IvSize::Words4,
            6 => IvSize::Words2,
            1 => IvSize::Prng,
            _ => IvSize::None,
        };
        Self {
            direction,
            data_len: hdr & token_hdr::LEN_MASK,
            iv,
        }
    }
}

/// Cipher family of a record, as far as token layout is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// No cipher (hash only, or ESP null encryption)
    Null,
    /// 64-bit block cipher, two IV words
    Des3,
    /// AES block modes, four IV words
    Aes,
    /// AES counter mode with nonce (RFC 3686)
    AesCtr,
    /// AES-GCM (RFC 4106), engine-managed IV
    AesGcm,
}

/// Per-record values every token of that record needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTemplate {
    /// Cached control words 0 and 1
    pub ctrl: [u32; 2],
    /// CTR/GCM nonce
    pub nonce: u32,
    /// Cipher family
    pub cipher: CipherKind,
    /// Digest (ICV) length in bytes
    pub digest_len: u32,
    /// IV length in bytes
    pub iv_len: u32,
    /// Cipher block length in bytes
    pub blk_len: u32,
    /// ESP header bytes the engine passes through
    pub bypass_len: u32,
    /// Record word holding the ESP sequence number
    pub seq_offset: u32,
    /// Extended sequence numbers
    pub esn: bool,
}

impl Default for TokenTemplate {
    fn default() -> Self {
        Self {
            ctrl: [0; 2],
            nonce: 0,
            cipher: CipherKind::Null,
            digest_len: 0,
            iv_len: 0,
            blk_len: 0,
            bypass_len: 0,
            seq_offset: 0,
            esn: false,
        }
    }
}

/// A built token: instruction words and command token header
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Token {
    words: [u32; TOKEN_MAX_WORDS],
    len: usize,
    hdr: u32,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("hdr", &format_args!("{:#010x}", self.hdr))
            .field("words", &self.words())
            .finish()
    }
}

impl Token {
    const fn empty() -> Self {
        Self {
            words: [0; TOKEN_MAX_WORDS],
            len: 0,
            hdr: 0,
        }
    }

    #[inline(always)]
    fn push(&mut self, word: u32) {
        debug_assert!(self.len < TOKEN_MAX_WORDS);
        self.words[self.len] = word;
        self.len += 1;
    }

    fn push_iv(&mut self, t: &TokenTemplate, iv: &[u8; 16]) {
        let w = iv_words(iv);
        match t.cipher {
            CipherKind::Des3 => {
                self.push(w[0]);
                self.push(w[1]);
            }
            CipherKind::AesCtr => {
                self.push(t.nonce);
                self.push(w[0]);
                self.push(w[1]);
                self.push(CTR_INITIAL_COUNTER);
            }
            _ => {
                for word in w {
                    self.push(word);
                }
            }
        }
    }

    /// Instruction words
    #[inline(always)]
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    /// Word count
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for tokenless operations (invalidation, inline)
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Command token header
    #[inline(always)]
    pub fn hdr(&self) -> u32 {
        self.hdr
    }

    /// Token carrying only a header (tokenless services)
    pub fn header_only(hdr: u32) -> Self {
        let mut tk = Self::empty();
        tk.hdr = hdr;
        tk
    }
}

/// Split a 16-byte IV into the words the engine reads
#[inline(always)]
pub fn iv_words(iv: &[u8; 16]) -> [u32; 4] {
    [
        u32::from_le_bytes([iv[0], iv[1], iv[2], iv[3]]),
        u32::from_le_bytes([iv[4], iv[5], iv[6], iv[7]]),
        u32::from_le_bytes([iv[8], iv[9], iv[10], iv[11]]),
        u32::from_le_bytes([iv[12], iv[13], iv[14], iv[15]]),
    ]
}

fn iv_hdr(t: &TokenTemplate) -> u32 {
    match t.cipher {
        CipherKind::Des3 => token_hdr::CRYPTO_IV8,
        _ => token_hdr::CRYPTO_IV16,
    }
}

/// Plain cipher: encrypt or decrypt `cryptlen` bytes
pub fn cipher(t: &TokenTemplate, dir: Direction, iv: &[u8; 16], cryptlen: u32) -> Token {
    let mut tk = Token::empty();
    let op = match dir {
        Direction::Outbound => inst::CTRL_OP_ENC,
        Direction::Inbound => inst::CTRL_OP_DEC,
    };
    tk.push(t.ctrl[0] | op);
    tk.push(t.ctrl[1]);
    tk.push_iv(t, iv);

    match dir {
        Direction::Outbound => {
            tk.push(inst::ENC | cryptlen);
            tk.push(inst::PAD_ENC);
        }
        Direction::Inbound => {
            tk.push(inst::DEC | cryptlen);
            tk.push(inst::DEC_CHK_PAD);
        }
    }

    tk.hdr = iv_hdr(t) | dir.hdr_bits() | cryptlen;
    tk
}

/// Hash or HMAC over `nbytes` bytes
pub fn auth(t: &TokenTemplate, nbytes: u32) -> Token {
    let mut tk = Token::empty();
    tk.push(t.ctrl[0] | inst::CTRL_OP_HMAC_ADD);
    tk.push(t.ctrl[1]);
    tk.push(inst::HASH | nbytes);
    tk.push(inst::HMAC_ADD | t.digest_len);
    tk.hdr = token_hdr::CRYPTO_CMN | token_hdr::OUTBOUND | nbytes;
    tk
}

/// AEAD encrypt-then-authenticate or authenticate-then-decrypt.
///
/// `cryptlen` counts the digest on the inbound side.
pub fn aead(t: &TokenTemplate, dir: Direction, iv: &[u8; 16], assoclen: u32, cryptlen: u32) -> Token {
    let mut tk = Token::empty();
    let data_len = cryptlen.saturating_add(assoclen);
    debug_assert!(data_len <= token_hdr::LEN_MASK);

    let op = match dir {
        Direction::Outbound => inst::CTRL_OP_ENC_HMAC,
        Direction::Inbound => inst::CTRL_OP_HMAC_DEC,
    };
    tk.push(t.ctrl[0] | op);
    tk.push(t.ctrl[1]);
    tk.push_iv(t, iv);

    tk.push(inst::HMAC | assoclen);
    match dir {
        Direction::Outbound => {
            tk.push(inst::ENC_HMAC | cryptlen);
            tk.push(inst::NOPAD_ENC_HMAC);
            tk.push(inst::HMAC_ADD | t.digest_len);
        }
        Direction::Inbound => {
            tk.push(inst::HMAC_DEC | cryptlen.saturating_sub(t.digest_len));
            tk.push(inst::HMAC_GET | t.digest_len);
            tk.push(inst::HMAC_CHK | t.digest_len);
        }
    }

    tk.hdr = token_hdr::CRYPTO_IV16 | dir.hdr_bits() | data_len;
    tk
}

/// HMAC inner/outer pad precompute over an `key_len`-byte key.
///
/// The engine stores the inner pad state at record word `ipad_offset`
/// and the outer pad state right after it.
pub fn digest(t: &TokenTemplate, key_len: u32, ipad_offset: u32, pad_words: u32) -> Token {
    let mut tk = Token::empty();
    tk.push(
        inst::ctrl_len(inst::CTRL_WORDS as u32)
            | inst::UNFINISH_HASH_TO_CTX
            | inst::TOP_HMAC_ADD
            | inst::DIGEST_TYPE
            | (t.ctrl[0] & inst::HASH_OP_MASK),
    );
    tk.push(0);

    let opad_offset = ipad_offset + pad_words;
    tk.push(inst::DIGEST | key_len);
    tk.push(inst::IPAD_GEN);
    tk.push(inst::NOP);
    tk.push(inst::OPAD_GEN);
    tk.push(inst::IPAD_ADD | inst::context_access_len(pad_words) | ipad_offset);
    tk.push(inst::OPAD_ADD | inst::context_access_len(pad_words) | opad_offset);

    tk.hdr = token_hdr::DIGEST | key_len;
    tk
}

/// ESP trailer pad for a payload of `payload_len` bytes
#[inline]
pub fn esp_pad_len(payload_len: u32, blk_len: u32) -> u32 {
    let blk = blk_len.max(1);
    let raw = payload_len + inst::ESP_TRAILER_LEN;
    raw.div_ceil(blk) * blk - raw
}

/// ESP encapsulation of a `len`-byte packet whose first `bypass_len`
/// bytes are passed through untouched
pub fn esp_encap(t: &TokenTemplate, len: u32, next_hdr: u8) -> Token {
    let mut tk = Token::empty();
    let payload = len.saturating_sub(t.bypass_len);
    let pad = esp_pad_len(payload, t.blk_len);

    tk.push(inst::BYPASS | t.bypass_len);
    tk.push(inst::ESP_HDR_HMAC | (inst::ESP_HDR_LEN + t.iv_len));
    tk.push(inst::ENC_HMAC_IPSEC | payload);
    tk.push(inst::PAD_ENC_HMAC | inst::esp_nxt_hdr(next_hdr as u32) | (pad + inst::ESP_TRAILER_LEN));
    tk.push(inst::HMAC_ADD | t.digest_len);
    tk.push(inst::CHK_SEQ_NO_ROLLOVER);
    let seq = if t.esn { inst::SEQ_NO_UPDT_ESN } else { inst::SEQ_NO_UPDT };
    tk.push(seq | t.seq_offset);

    tk.hdr = token_hdr::IPSEC_CMN | token_hdr::IV_PRNG | token_hdr::OUTBOUND | len;
    tk
}

/// ESP decapsulation of a `len`-byte packet; `iv` is read from the packet
pub fn esp_decap(t: &TokenTemplate, len: u32, iv: &[u8; 16]) -> Token {
    let mut tk = Token::empty();
    let auth_len = inst::ESP_HDR_LEN + t.iv_len;
    let cipher_len = len
        .saturating_sub(t.bypass_len)
        .saturating_sub(auth_len)
        .saturating_sub(t.digest_len);

    for word in iv_words(iv) {
        tk.push(word);
    }
    tk.push(inst::BYPASS | t.bypass_len);
    tk.push(inst::ESP_HDR_CHK | auth_len);
    tk.push(inst::HMAC_DEC | cipher_len);
    tk.push(inst::HMAC_GET_IPSEC | t.digest_len);
    tk.push(inst::ICV_SPI_SEQ_NO_CHK | t.digest_len);
    tk.push(inst::SEQ_NO_AND_MASK_UPDT | t.seq_offset);

    tk.hdr = token_hdr::IPSEC_IV16 | token_hdr::INBOUND | len;
    tk
}

struct PoolInner {
    mem: Arc<DmaRegion>,
    free: ArrayQueue<u32>,
}

/// Fixed pool of DMA token slots
#[derive(Clone)]
pub struct TokenPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for TokenPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

impl TokenPool {
    /// Preallocate `slots` tokens
    pub fn new(alloc: &DmaAllocator, slots: usize) -> EipResult<Self> {
        let mem = alloc.alloc_words(slots * TOKEN_MAX_WORDS)?;
        let free = ArrayQueue::new(slots.max(1));
        for i in 0..slots as u32 {
            // Capacity equals slot count
            let _ = free.push(i);
        }
        Ok(Self {
            inner: Arc::new(PoolInner { mem, free }),
        })
    }

    /// Take a slot
    pub fn acquire(&self) -> EipResult<TokenSlot> {
        let index = self.inner.free.pop().ok_or(EipError::NoMemory("token pool"))?;
        Ok(TokenSlot {
            pool: self.inner.clone(),
            index,
        })
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.inner.free.capacity()
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }
}

/// A token slot; returns to its pool on drop
pub struct TokenSlot {
    pool: Arc<PoolInner>,
    index: u32,
}

impl std::fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenSlot({:#x})", self.addr())
    }
}

impl TokenSlot {
    fn base(&self) -> usize {
        self.index as usize * TOKEN_MAX_WORDS
    }

    /// Bus address of the slot
    pub fn addr(&self) -> u32 {
        self.pool.mem.word_addr(self.base())
    }

    /// Copy a token into the slot and flush it to the engine
    pub fn store(&self, token: &Token) {
        self.pool.mem.write_words(self.base(), token.words());
        self.pool.mem.clean();
    }
}

impl Drop for TokenSlot {
    fn drop(&mut self) {
        let _ = self.pool.free.push(self.index);
    }
}
