//! Hardware Interface
//!
//! Register map, descriptor layout and bit-field encodings of the engine.
//! Everything in here is a pure encoding; no state.

/// 32-bit register access to the engine
pub trait Mmio: Send + Sync {
    /// Read a register
    fn read32(&self, offset: u32) -> u32;
    /// Write a register
    fn write32(&self, offset: u32, value: u32);
}

/// Per-ring register offsets.
///
/// Each ring instance owns a 4 KiB block; the command ring registers sit
/// at the start of the block and the result ring registers at +0x800.
pub mod regs {
    /// Size of one ring register block
    pub const RING_BLOCK: u32 = 0x1000;
    /// Result ring offset within a ring block
    pub const RDR_OFFSET: u32 = 0x800;

    /// Ring base address, low word
    pub const BASE_ADDR_LO: u32 = 0x00;
    /// Ring base address, high word
    pub const BASE_ADDR_HI: u32 = 0x04;
    /// Ring size in bytes
    pub const RING_SIZE: u32 = 0x18;
    /// Descriptor size configuration
    pub const DESC_SIZE: u32 = 0x1C;
    /// Interrupt threshold
    pub const THRESH: u32 = 0x28;
    /// Prepared descriptor count (bytes)
    pub const PREP_COUNT: u32 = 0x2C;
    /// Processed descriptor count (bytes)
    pub const PROC_COUNT: u32 = 0x30;
    /// Ring status
    pub const STAT: u32 = 0x3C;

    /// Command ring register
    pub const fn cdr(ring: u32, reg: u32) -> u32 {
        ring * RING_BLOCK + reg
    }

    /// Result ring register
    pub const fn rdr(ring: u32, reg: u32) -> u32 {
        ring * RING_BLOCK + RDR_OFFSET + reg
    }

    /// Flow lookup engine block
    pub const FLUE_BASE: u32 = 0x76000;
    /// Flow lookup configuration
    pub const FLUE_CONFIG: u32 = FLUE_BASE + 0x10;
    /// Flow hash table base address, low word
    pub const FLUE_HASHBASE_LO: u32 = FLUE_BASE + 0x08;
    /// Flow hash table base address, high word
    pub const FLUE_HASHBASE_HI: u32 = FLUE_BASE + 0x0C;
    /// Flow hash initial values
    pub const FHASH_IV: [u32; 4] = [
        FLUE_BASE + 0x840,
        FLUE_BASE + 0x844,
        FLUE_BASE + 0x848,
        FLUE_BASE + 0x84C,
    ];

    /// Result ring threshold value (descriptors before interrupt)
    pub const RDR_THRESH_VAL: u32 = 0x10;
    /// Result ring processed-threshold interrupt status
    pub const RDR_PROC_IRQ_STATUS: u32 = 0x10;
    /// Prepared/processed counter reset bit
    pub const COUNT_RST: u32 = 0x8000_0000;
}

/// Words per hardware descriptor
pub const DESC_WORDS: usize = 16;
/// Bytes per hardware descriptor
pub const DESC_BYTES: usize = DESC_WORDS * 4;
/// Fragment words in a descriptor
pub const FRAG_WORDS: usize = 4;
/// Token words in a descriptor
pub const TOKEN_WORDS: usize = 8;
/// Bypass words in a descriptor
pub const BYPASS_WORDS: usize = 4;

/// One hardware descriptor, as laid out in ring memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct HwDesc {
    /// Fragment words: flags/length, reserved, buffer address, reserved
    pub frag: [u32; FRAG_WORDS],
    /// Token words: on the command side these carry the token binding
    pub token: [u32; TOKEN_WORDS],
    /// Opaque words carried from command to result
    pub bypass: [u32; BYPASS_WORDS],
}

impl HwDesc {
    /// Serialize to ring words
    pub fn to_words(&self) -> [u32; DESC_WORDS] {
        let mut words = [0u32; DESC_WORDS];
        words[..4].copy_from_slice(&self.frag);
        words[4..12].copy_from_slice(&self.token);
        words[12..].copy_from_slice(&self.bypass);
        words
    }

    /// Deserialize from ring words
    pub fn from_words(words: &[u32; DESC_WORDS]) -> Self {
        let mut desc = Self::default();
        desc.frag.copy_from_slice(&words[..4]);
        desc.token.copy_from_slice(&words[4..12]);
        desc.bypass.copy_from_slice(&words[12..]);
        desc
    }
}

// Command descriptor fields
/// First fragment of an operation
pub const CMD_FLAGS_FIRST: u32 = 1 << 23;
/// Last fragment of an operation
pub const CMD_FLAGS_LAST: u32 = 1 << 22;

/// Command fragment length field
pub const fn cmd_frag_len(len: u32) -> u32 {
    len & 0xFFFF
}

/// Command first/last flags
pub const fn cmd_flags(first: bool, last: bool) -> u32 {
    ((first as u32) << 23) | ((last as u32) << 22)
}

/// Token word count field of the first command fragment
pub const fn cmd_token_words(words: u32) -> u32 {
    words << 24
}

/// Input data length carried in the token header
pub const fn cmd_data_len(hdr: u32) -> u32 {
    hdr & 0xFFFF
}

// Result descriptor fields
/// First fragment of a result
pub const RES_FLAGS_FIRST: u32 = 1 << 23;
/// Last fragment of a result
pub const RES_FLAGS_LAST: u32 = 1 << 22;

/// Result first/last flags
pub const fn res_flags(first: bool, last: bool) -> u32 {
    cmd_flags(first, last)
}

/// Result fragment length field
pub const fn res_frag_len(word: u32) -> u32 {
    word & 0xFFFF
}

/// Output data length from result token word 0
pub const fn res_data_len(word: u32) -> u32 {
    word & 0xFFFF
}

/// Transform error code from result token word 0
pub const fn res_error(word: u32) -> u8 {
    ((word >> 17) & 0xFF) as u8
}

/// Classification error code from result token word 1
pub const fn res_error_cle(word: u32) -> u8 {
    ((word >> 16) & 0x1F) as u8
}

/// Distinct transform error codes
pub const RES_ERROR_MAX: usize = 15;
/// Distinct classification error codes
pub const RES_ERROR_CLE_MAX: usize = 32;

/// Prepared count register value for `words` descriptor words
pub const fn prep_cnt_desc_sz(words: u32) -> u32 {
    words << 2
}

/// Processed count register value for `words` descriptor words
pub const fn proc_cnt_desc_sz(words: u32) -> u32 {
    words << 2
}

/// Descriptor words held in a processed count register value
pub const fn proc_desc_sz(reg: u32) -> u32 {
    (reg & 0xFF_FFFF) >> 2
}

/// Descriptor words held in a prepared count register value
pub const fn prep_desc_sz(reg: u32) -> u32 {
    (reg & 0xFF_FFFF) >> 2
}

// Hardware services
/// Inline IPsec service code
pub const HWSERVICE_IPSEC: u32 = 0x3;
/// Lookaside crypto service code
pub const HWSERVICE_CRYPTO: u32 = 0x4;
/// Invalidate the record cache entry of a transform record
pub const CMD_HWSERVICE_INV_TRC: u32 = 0x6 << 24;
/// Inline IPsec
pub const CMD_HWSERVICE_LIP: u32 = HWSERVICE_IPSEC << 24;
/// Lookaside crypto
pub const CMD_HWSERVICE_LAC: u32 = HWSERVICE_CRYPTO << 24;

/// Context record size classes carried in the low two address bits
pub mod ctx {
    /// Small record tag
    pub const TYPE_SMALL: u32 = 0x2;
    /// Large record tag
    pub const TYPE_LARGE: u32 = 0x3;
    /// Size-class tag mask
    pub const TYPE_MASK: u32 = 0x3;
    /// Small record size in words
    pub const SIZE_SMALL_WORDS: usize = 46;
    /// Large record size in words
    pub const SIZE_LARGE_WORDS: usize = 62;

    /// Key is present in the record
    pub const WITH_KEY: u32 = 1 << 16;

    /// DES
    pub const ALGO_DES: u32 = 0x0;
    /// Triple DES
    pub const ALGO_3DES: u32 = 0x2 << 17;
    /// AES-128
    pub const ALGO_AES128: u32 = 0x5 << 17;
    /// AES-192
    pub const ALGO_AES192: u32 = 0x6 << 17;
    /// AES-256
    pub const ALGO_AES256: u32 = 0x7 << 17;

    /// MD5
    pub const ALGO_MD5: u32 = 0x0;
    /// SHA-1
    pub const ALGO_SHA1: u32 = 0x2 << 23;
    /// SHA-256
    pub const ALGO_SHA256: u32 = 0x3 << 23;
    /// SHA-224
    pub const ALGO_SHA224: u32 = 0x4 << 23;
    /// SHA-512
    pub const ALGO_SHA512: u32 = 0x5 << 23;
    /// SHA-384
    pub const ALGO_SHA384: u32 = 0x6 << 23;
    /// GHASH
    pub const ALGO_GHASH: u32 = 0x4 << 23;

    /// Plain hash
    pub const AUTH_MODE_HASH: u32 = 0x1 << 21;
    /// GMAC
    pub const AUTH_MODE_GMAC: u32 = 0x2 << 21;
    /// HMAC
    pub const AUTH_MODE_HMAC: u32 = 0x3 << 21;

    /// ECB
    pub const CIPHER_MODE_ECB: u32 = 0x0;
    /// CBC
    pub const CIPHER_MODE_CBC: u32 = 0x1;
    /// CTR
    pub const CIPHER_MODE_CTR: u32 = 0x2;
    /// GCM
    pub const CIPHER_MODE_GCM: u32 = (0x1 << 17) | 0x2;

    /// Pad space for MD5
    pub const PAD_KEYSZ_MD5: usize = 16;
    /// Pad space for SHA-1
    pub const PAD_KEYSZ_SHA1: usize = 20;
    /// Pad space for SHA-224
    pub const PAD_KEYSZ_SHA224: usize = 32;
    /// Pad space for SHA-256
    pub const PAD_KEYSZ_SHA256: usize = 32;
    /// Pad space for SHA-384
    pub const PAD_KEYSZ_SHA384: usize = 64;
    /// Pad space for SHA-512
    pub const PAD_KEYSZ_SHA512: usize = 64;
}

/// Context words field of control word 0
pub const fn ctrl_context_words(words: u32) -> u32 {
    (words & 0x3F) << 8
}

/// Token header encodings
pub mod token_hdr {
    /// Outbound direction
    pub const OUTBOUND: u32 = 0x0;
    /// Application id present
    pub const APP_ID: u32 = 0x20000;
    /// Context pointer present
    pub const CTX_PTR: u32 = 0x40000;
    /// Reuse cached context
    pub const REUSE_CTX: u32 = 0x200000;
    /// Inbound direction
    pub const INBOUND: u32 = 0x0180_0000;
    /// Basic token type
    pub const BASIC: u32 = 0xC000_0000;
    /// Token carries context control words
    pub const CTX_CTRL: u32 = 0x0200_0000;
    /// Two IV words in the token
    pub const IV8: u32 = 0x1800_0000;
    /// Four IV words in the token
    pub const IV16: u32 = 0x1C00_0000;
    /// IV generated by the engine PRNG
    pub const IV_PRNG: u32 = 0x0400_0000;
    /// Direction mask
    pub const DIR_MASK: u32 = INBOUND;
    /// Length mask
    pub const LEN_MASK: u32 = 0xFFFF;

    /// Common fields
    pub const CMN: u32 = BASIC | CTX_PTR | APP_ID;
    /// Digest precompute
    pub const DIGEST: u32 = CMN | CTX_CTRL;
    /// Extended (inline) token
    pub const EXTENDED: u32 = CMN;
    /// Lookaside crypto
    pub const CRYPTO_CMN: u32 = APP_ID | CTX_PTR | REUSE_CTX | CTX_CTRL | BASIC;
    /// Lookaside crypto with two IV words
    pub const CRYPTO_IV8: u32 = CRYPTO_CMN | IV8;
    /// Lookaside crypto with four IV words
    pub const CRYPTO_IV16: u32 = CRYPTO_CMN | IV16;
    /// Lookaside IPsec
    pub const IPSEC_CMN: u32 = APP_ID | CTX_PTR | REUSE_CTX | BASIC;
    /// Lookaside IPsec with four IV words
    pub const IPSEC_IV16: u32 = IPSEC_CMN | IV16;
}

/// Token instruction and control encodings
pub mod inst {
    /// Control words carried in a token
    pub const CTRL_WORDS: usize = 2;
    /// Token capacity in words
    pub const TOKEN_MAX_WORDS: usize = 16;

    /// Control word context length field
    pub const fn ctrl_len(words: u32) -> u32 {
        (words & 0x3F) << 8
    }

    /// Store the unfinished hash in the context record
    pub const UNFINISH_HASH_TO_CTX: u32 = 0x5 << 4;
    /// Hash algorithm bits of control word 0
    pub const HASH_OP_MASK: u32 = 0xF << 23;
    /// Digest type field for pad generation
    pub const DIGEST_TYPE: u32 = 0x3 << 21;
    /// Pad precompute opcode
    pub const TOP_HMAC_ADD: u32 = 0x2;

    /// Control opcodes
    pub const CTRL_OP_NO_OP: u32 = 0x0;
    /// Outbound hash
    pub const CTRL_OP_HMAC_ADD: u32 = 0x2;
    /// Inbound hash
    pub const CTRL_OP_HMAC_CHK: u32 = 0x3;
    /// Outbound cipher
    pub const CTRL_OP_ENC: u32 = 0x4;
    /// Inbound cipher
    pub const CTRL_OP_DEC: u32 = 0x5;
    /// Encrypt then hash
    pub const CTRL_OP_ENC_HMAC: u32 = 0x6;
    /// Decrypt then hash
    pub const CTRL_OP_DEC_HMAC: u32 = 0x7;
    /// Hash then encrypt
    pub const CTRL_OP_HMAC_ENC: u32 = 0xE;
    /// Hash then decrypt
    pub const CTRL_OP_HMAC_DEC: u32 = 0xF;
    /// Opcode mask
    pub const CTRL_OP_MASK: u32 = 0xF;

    /// Pass data through untouched
    pub const BYPASS: u32 = 0x0100_0000;
    /// Encrypt
    pub const ENC: u32 = 0x0594_0000;
    /// Encrypt pad
    pub const PAD_ENC: u32 = 0x2D06_0000;
    /// Decrypt
    pub const DEC: u32 = 0x0D96_0000;
    /// Decrypt and check pad
    pub const DEC_CHK_PAD: u32 = 0xD006_0000;
    /// Encrypt and hash
    pub const ENC_HMAC: u32 = 0x0F00_0000;
    /// AES-GCM encrypt
    pub const ENC_GCM: u32 = 0x0F00_0000;
    /// Encrypt and hash without padding
    pub const NOPAD_ENC_HMAC: u32 = 0x2F02_0000;
    /// Hash and decrypt
    pub const HMAC_DEC: u32 = 0x0F02_0000;
    /// Hash and decrypt, then check
    pub const HMAC_DEC_CHK: u32 = 0xD107_0000;
    /// Hash only
    pub const HMAC: u32 = 0x0300_0000;
    /// GCM associated data
    pub const GCM_HMAC: u32 = 0x0B00_0000;
    /// Pure hash
    pub const HASH: u32 = 0x0292_0000;
    /// No operation
    pub const NOP: u32 = 0x2000_0000;
    /// Digest precompute input
    pub const DIGEST: u32 = 0x0202_0000;
    /// Inner pad generation
    pub const IPAD_GEN: u32 = 0x20E0_0000;
    /// Outer pad generation
    pub const OPAD_GEN: u32 = 0x20E6_0000;
    /// Store inner pad in the record
    pub const IPAD_ADD: u32 = 0xE0EE_0800;
    /// Store outer pad in the record
    pub const OPAD_ADD: u32 = 0xE0E6_0800;
    /// Delete data
    pub const DEL_DATA: u32 = 0xA080_0000;
    /// Insert data
    pub const ADD_DATA: u32 = 0x2500_0000;
    /// Append generated digest
    pub const HMAC_ADD: u32 = 0x21E6_0000;
    /// Retrieve digest from input
    pub const HMAC_GET: u32 = 0x41E6_0000;
    /// Compare digest
    pub const HMAC_CHK: u32 = 0xD007_0000;

    /// Context access length field for pad stores
    pub const fn context_access_len(words: u32) -> u32 {
        (words & 0xF) << 24
    }

    /// ESP header and IV hashed, inserted by the engine
    pub const ESP_HDR_HMAC: u32 = 0x2390_0000;
    /// ESP payload encrypt and hash
    pub const ENC_HMAC_IPSEC: u32 = 0x0F00_0000;
    /// ESP trailer: pad, pad length and next header, encrypted and hashed
    pub const PAD_ENC_HMAC: u32 = 0x2F20_0000;
    /// Verify sequence number did not roll over
    pub const CHK_SEQ_NO_ROLLOVER: u32 = 0xD006_0000;
    /// Store the incremented sequence number in the record
    pub const SEQ_NO_UPDT: u32 = 0xE12E_0800;
    /// Store the incremented extended sequence number in the record
    pub const SEQ_NO_UPDT_ESN: u32 = 0xE256_0800;
    /// Hash ESP header and IV from input
    pub const ESP_HDR_CHK: u32 = 0x4300_0000;
    /// Retrieve ICV from input
    pub const HMAC_GET_IPSEC: u32 = 0x40E6_0000;
    /// Verify ICV, SPI and sequence number
    pub const ICV_SPI_SEQ_NO_CHK: u32 = 0xDD06_0000;
    /// Store sequence number and replay mask in the record
    pub const SEQ_NO_AND_MASK_UPDT: u32 = 0xE02E_1800;

    /// Next header field of the ESP trailer instruction
    pub const fn esp_nxt_hdr(proto: u32) -> u32 {
        (proto & 0xFF) << 9
    }

    /// Pad length byte plus next header byte
    pub const ESP_TRAILER_LEN: u32 = 2;
    /// SPI plus sequence number
    pub const ESP_HDR_LEN: u32 = 8;
}

/// Transform record fields specific to IPsec
pub mod tr_ipsec {
    /// Record size for IPsec services (trailer words 56..71 included)
    pub const RECORD_WORDS: usize = 80;

    /// SPI present
    pub const SPI: u32 = 1 << 27;
    /// Sequence number present
    pub const SEQ_NUM: u32 = 1 << 28;

    /// Extended sequence number enable
    pub const fn ext_seq_num(esn: bool) -> u32 {
        (esn as u32) << 29
    }

    /// IV control
    pub const fn control_iv(x: u32) -> u32 {
        x << 5
    }

    /// IV format
    pub const fn iv_format(x: u32) -> u32 {
        x << 10
    }

    /// Store updated sequence number
    pub const SEQ_NUM_STORE: u32 = 1 << 22;
    /// ESP padding type check
    pub const PAD_TYPE: u32 = 1 << 16;
    /// Process the IP header
    pub const IPHDR_PROC: u32 = 1 << 19;
    /// IPv6 outer header
    pub const IPV6_EN: u32 = 1 << 8;

    /// Default TTL
    pub const fn ttl(x: u32) -> u32 {
        x << 16
    }

    /// Encap verify instruction
    pub const ENCAP_TOKEN_VERIFY: u32 = 0xD006_0000;
    /// Encap sequence update instruction
    pub const ENCAP_TOKEN_INST: u32 = 0xE12E_0800;
    /// Encap sequence update instruction, extended sequence numbers
    pub const ENCAP_ESN_TOKEN_INST: u32 = 0xE256_0800;
    /// Encap token header template
    pub const ENCAP_TOKEN_HDR: u32 = 0x42_0000;
    /// Encap token header IV flag
    pub const ENCAP_TOKEN_HDR_IV: u32 = 0x400_0000;

    /// IV size field
    pub const fn iv_size(x: u32) -> u32 {
        x
    }

    /// ICV size field
    pub const fn icv_size(x: u32) -> u32 {
        x << 8
    }

    /// Outer header protocol field
    pub const fn ohdr_proto(x: u32) -> u32 {
        x << 16
    }

    /// ESP protocol field
    pub const fn esp_proto(x: u32) -> u32 {
        x << 24
    }

    /// Sequence number offset
    pub const fn seq_num_offset(x: u32) -> u32 {
        x << 24
    }

    /// Sequence number offset enable
    pub const SEQ_NUM_OFFSET_EN: u32 = 1 << 30;

    /// Outer DF handling: 0 copy, 1 clear, 2 set
    pub const fn df(x: u32) -> u32 {
        (x & 0x3) << 20
    }

    /// Default DSCP
    pub const fn dscp(x: u32) -> u32 {
        x << 24
    }

    /// Use the default DSCP instead of copying it
    pub const fn dscp_copy_en(x: bool) -> u32 {
        (x as u32) << 22
    }

    /// Decap verify instruction
    pub const DECAP_TOKEN_VERIFY: u32 = 0xD006_0000;
    /// Verify sequence number
    pub const DECAP_TOKEN_VERIFY_SEQ: u32 = 0x800_0000;
    /// Verify padding
    pub const DECAP_TOKEN_VERIFY_PAD: u32 = 0x500_0000;
    /// Verify ICV
    pub const DECAP_TOKEN_VERIFY_HMAC: u32 = 0x1_000C;

    /// Replay window mask, 32 packets
    pub const SEQ_NUM_MASK_32: u32 = 0x2 << 30;
    /// Replay window mask, 64 packets
    pub const SEQ_NUM_MASK_64: u32 = 0x1 << 30;
    /// Replay window mask, 128 packets
    pub const SEQ_NUM_MASK_128: u32 = 0x3 << 30;
    /// Replay window mask, 384 packets
    pub const SEQ_NUM_MASK_384: u32 = (0x2 << 30) | (0x1 << 15);

    /// Words to update after a replay check
    pub const fn decap_seq_update(words: u32) -> u32 {
        words << 24
    }

    /// Extended sequence number processing
    pub const fn ext_seq_num_proc(esn: bool) -> u32 {
        (esn as u32) << 29
    }

    /// Decap sequence update instruction
    pub const DECAP_TOKEN_INST: u32 = 0xE02E_1800;
    /// Decap sequence update instruction, extended sequence numbers
    pub const DECAP_ESN_TOKEN_INST: u32 = 0xE056_1800;
    /// Tunnel mode decap token header
    pub const DECAP_TUNNEL_TOKEN_HDR: u32 = 0x0102_0000;
    /// Transport mode decap token header
    pub const DECAP_TRANSPORT_TOKEN_HDR: u32 = 0x0182_0000;

    /// Outer header code, IPv4 tunnel encap
    pub const OHDR_V4_TUNNEL_ENC: u32 = 2;
    /// Outer header code, IPv4 tunnel decap
    pub const OHDR_V4_TUNNEL_DEC: u32 = 4;
    /// Outer header code, IPv4 transport encap
    pub const OHDR_V4_TRANSPORT_ENC: u32 = 5;
    /// Outer header code, IPv4 transport decap
    pub const OHDR_V4_TRANSPORT_DEC: u32 = 6;
    /// Outer header code, IPv6 tunnel encap
    pub const OHDR_V6_TUNNEL_ENC: u32 = 7;
    /// Outer header code, IPv6 tunnel decap
    pub const OHDR_V6_TUNNEL_DEC: u32 = 8;
    /// Outer header code, IPv6 transport encap
    pub const OHDR_V6_TRANSPORT_ENC: u32 = 11;
    /// Outer header code, IPv6 transport decap
    pub const OHDR_V6_TRANSPORT_DEC: u32 = 12;
    /// Outer header code, IPv4 NAT-T tunnel encap
    pub const OHDR_V4_TUNNEL_NATT_ENC: u32 = 22;
    /// Outer header code, IPv4 NAT-T tunnel decap
    pub const OHDR_V4_TUNNEL_NATT_DEC: u32 = 24;
    /// Outer header code, IPv4 NAT-T transport encap
    pub const OHDR_V4_TRANSPORT_NATT_ENC: u32 = 25;
    /// Outer header code, IPv4 NAT-T transport decap
    pub const OHDR_V4_TRANSPORT_NATT_DEC: u32 = 26;

    /// ESP protocol, outbound CBC
    pub const PROTO_OUT_CBC: u32 = 1;
    /// ESP protocol, outbound GCM
    pub const PROTO_OUT_GCM: u32 = 5;
    /// ESP protocol, inbound CBC
    pub const PROTO_IN_CBC: u32 = 7;
    /// ESP protocol, inbound GCM
    pub const PROTO_IN_GCM: u32 = 11;

    /// Redirect the result to another interface
    pub const REDIR_EN: u32 = 1 << 11;

    /// Redirect target interface
    pub const fn redir_iface(iface: u32) -> u32 {
        (iface & 0xF) << 12
    }

    /// Interface number of the inline path
    pub const INLINE_RING: u32 = 15;

    /// Trailer word: outer source address
    pub const W_SRC_IP: usize = 56;
    /// Trailer word: IPv4 header checksum seed
    pub const W_CSUM: usize = 57;
    /// Trailer word: outer destination address
    pub const W_DST_IP: usize = 60;
    /// Trailer word: token header
    pub const W_TOKEN_HDR: usize = 64;
    /// Trailer word: header processing flags
    pub const W_FLAGS: usize = 65;
    /// Trailer word: DSCP, TTL and half block length
    pub const W_TTL: usize = 66;
    /// Trailer word: outer header, ICV and IV sizes, ESP protocol
    pub const W_PROTO: usize = 68;
    /// Trailer word: NAT-T ports
    pub const W_NATT: usize = 69;
    /// Trailer word: verify instruction
    pub const W_VERIFY: usize = 70;
    /// Trailer word: sequence update instruction
    pub const W_SEQ_INST: usize = 71;
}
