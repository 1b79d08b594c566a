//! IPsec ESP records
//!
//! Large record extended to [`tr_ipsec::RECORD_WORDS`]. The crypto part
//! is `ctrl(2) | key | ipad | opad | [nonce] | spi | seq [| seq_hi] |
//! [replay mask]`, followed by the trailer words 56..71 the engine's
//! header processing reads.
//!
//! Lookaside operations carry a full ESP token. The caller supplies the
//! outer IPv4 header (plus the UDP header for NAT-T) on encapsulation,
//! which the token passes through, and strips it before decapsulation.
//! Hybrid records run tokenless on the inline service; the engine takes
//! the token header from record word 64.

use std::net::IpAddr;

use eip_common::{EipError, EipResult};

use super::{
    ahash::check_auth_key, cipher_algo_bits, key_words, split_nonce, with_context_words, Algorithm, HashAlg,
    HmacSetup, Layout, Op, Request, SessionInfo,
};
use crate::flow::FlowTuple;
use crate::hw::{ctx, inst, token_hdr, tr_ipsec};
use crate::token::{self, CipherKind, Direction, Token, TokenTemplate};

const IPV4_HDR_LEN: u32 = 20;
const UDP_HDR_LEN: u32 = 8;

/// Encapsulation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpsecMode {
    /// New outer IP header
    Tunnel,
    /// ESP inserted after the original IP header
    Transport,
}

/// Anti-replay window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayWindow {
    /// No replay check
    #[default]
    None,
    /// 32 packets
    W32,
    /// 64 packets
    W64,
    /// 128 packets
    W128,
    /// 256 packets (runs on the 384-packet window)
    W256,
    /// 384 packets
    W384,
}

impl ReplayWindow {
    /// Record words holding the window
    pub const fn words(self) -> u32 {
        match self {
            Self::None => 0,
            Self::W32 => 1,
            Self::W64 => 2,
            Self::W128 => 4,
            Self::W256 | Self::W384 => 12,
        }
    }

    /// Sequence mask bits of control word 0
    pub const fn mask_bits(self) -> u32 {
        match self {
            Self::None => 0,
            Self::W32 => tr_ipsec::SEQ_NUM_MASK_32,
            Self::W64 => tr_ipsec::SEQ_NUM_MASK_64,
            Self::W128 => tr_ipsec::SEQ_NUM_MASK_128,
            Self::W256 | Self::W384 => tr_ipsec::SEQ_NUM_MASK_384,
        }
    }

    fn enabled(self) -> bool {
        self != Self::None
    }
}

/// NAT traversal UDP ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NattPorts {
    /// Source port
    pub sport: u16,
    /// Destination port
    pub dport: u16,
}

/// Security association parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsecParams {
    /// `Outbound` encapsulates, `Inbound` decapsulates
    pub direction: Direction,
    /// Tunnel or transport
    pub mode: IpsecMode,
    /// SPI, host order
    pub spi: u32,
    /// Outer source address
    pub src: IpAddr,
    /// Outer destination address
    pub dst: IpAddr,
    /// UDP encapsulation
    pub natt: Option<NattPorts>,
    /// Extended sequence numbers
    pub esn: bool,
    /// Anti-replay window (decapsulation)
    pub replay: ReplayWindow,
    /// Copy DF from the inner header
    pub copy_df: bool,
    /// DF value when not copied
    pub df: bool,
    /// Copy DSCP from the inner header
    pub copy_dscp: bool,
    /// DSCP value when not copied
    pub dscp: u8,
    /// Outer TTL
    pub ttl: u8,
    /// ICV length in bytes
    pub icv_len: u8,
}

impl IpsecParams {
    /// Tunnel SA between `src` and `dst` with common defaults
    pub fn tunnel(direction: Direction, spi: u32, src: IpAddr, dst: IpAddr) -> Self {
        Self {
            direction,
            mode: IpsecMode::Tunnel,
            spi,
            src,
            dst,
            natt: None,
            esn: false,
            replay: ReplayWindow::W64,
            copy_df: true,
            df: false,
            copy_dscp: true,
            dscp: 0,
            ttl: 64,
            icv_len: 12,
        }
    }

    fn is_v6(&self) -> bool {
        self.src.is_ipv6()
    }

    fn encap(&self) -> bool {
        self.direction == Direction::Outbound
    }

    /// Outer header processing code
    fn ohdr(&self) -> u32 {
        use tr_ipsec::*;
        let tunnel = self.mode == IpsecMode::Tunnel;
        let natt = self.natt.is_some();
        match (self.encap(), tunnel, self.is_v6(), natt) {
            (true, true, _, true) => OHDR_V4_TUNNEL_NATT_ENC,
            (true, true, true, false) => OHDR_V6_TUNNEL_ENC,
            (true, true, false, false) => OHDR_V4_TUNNEL_ENC,
            (true, false, _, true) => OHDR_V4_TRANSPORT_NATT_ENC,
            (true, false, true, false) => OHDR_V6_TRANSPORT_ENC,
            (true, false, false, false) => OHDR_V4_TRANSPORT_ENC,
            (false, true, _, true) => OHDR_V4_TUNNEL_NATT_DEC,
            (false, true, true, false) => OHDR_V6_TUNNEL_DEC,
            (false, true, false, false) => OHDR_V4_TUNNEL_DEC,
            (false, false, _, true) => OHDR_V4_TRANSPORT_NATT_DEC,
            (false, false, true, false) => OHDR_V6_TRANSPORT_DEC,
            (false, false, false, false) => OHDR_V4_TRANSPORT_DEC,
        }
    }

    fn validate(&self) -> EipResult<()> {
        if self.src.is_ipv6() != self.dst.is_ipv6() {
            return Err(EipError::InvalidParam("mixed address families".into()));
        }
        if self.natt.is_some() && self.is_v6() {
            return Err(EipError::InvalidParam("NAT-T over IPv6".into()));
        }
        if !self.encap() && self.esn && !self.replay.enabled() {
            return Err(EipError::InvalidParam("ESN decapsulation needs a replay window".into()));
        }
        if self.icv_len == 0 || self.icv_len % 4 != 0 {
            return Err(EipError::InvalidParam(format!("icv length {}", self.icv_len)));
        }
        Ok(())
    }
}

const fn entry(
    name: &'static str,
    cipher: CipherKind,
    hash: HashAlg,
    mode: u32,
    iv_len: u32,
    blk_len: u32,
) -> Algorithm {
    let auth = match hash {
        HashAlg::Ghash => ctx::AUTH_MODE_GMAC,
        _ => ctx::AUTH_MODE_HMAC,
    };
    Algorithm {
        name,
        cipher,
        hash: Some(hash),
        hmac: !matches!(hash, HashAlg::Ghash),
        ctrl: [ctx::WITH_KEY | hash.ctrl() | auth | tr_ipsec::SPI | tr_ipsec::SEQ_NUM, mode],
        digest_len: hash.digest_len(),
        blk_len,
        iv_len,
    }
}

const GCM_MODE: u32 = ctx::CIPHER_MODE_GCM | tr_ipsec::control_iv(1) | tr_ipsec::iv_format(1);

pub(crate) static ALGORITHMS: &[Algorithm] = &[
    entry("eip-aes-cbc-sha1-hmac", CipherKind::Aes, HashAlg::Sha1, ctx::CIPHER_MODE_CBC, 16, 16),
    entry("eip-aes-cbc-md5-hmac", CipherKind::Aes, HashAlg::Md5, ctx::CIPHER_MODE_CBC, 16, 16),
    entry("eip-aes-cbc-sha256-hmac", CipherKind::Aes, HashAlg::Sha256, ctx::CIPHER_MODE_CBC, 16, 16),
    entry("eip-3des-cbc-sha1-hmac", CipherKind::Des3, HashAlg::Sha1, ctx::CIPHER_MODE_CBC, 8, 8),
    entry("eip-3des-cbc-md5-hmac", CipherKind::Des3, HashAlg::Md5, ctx::CIPHER_MODE_CBC, 8, 8),
    entry("eip-3des-cbc-sha256-hmac", CipherKind::Des3, HashAlg::Sha256, ctx::CIPHER_MODE_CBC, 8, 8),
    entry("eip-aes-gcm-rfc4106", CipherKind::AesGcm, HashAlg::Ghash, GCM_MODE, 8, 4),
    entry("eip-cbc-null-sha1-hmac", CipherKind::Null, HashAlg::Sha1, ctx::CIPHER_MODE_ECB, 0, 4),
    entry("eip-cbc-null-sha256-hmac", CipherKind::Null, HashAlg::Sha256, ctx::CIPHER_MODE_ECB, 0, 4),
];

/// Address as record words: network-order octets stored as-is
fn addr_words(addr: &IpAddr) -> Vec<u32> {
    match addr {
        IpAddr::V4(a) => vec![u32::from_le_bytes(a.octets())],
        IpAddr::V6(a) => a
            .octets()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

/// Seed for the engine's outer IPv4 header checksum
pub(crate) fn csum_seed(src: u32, dst: u32) -> u32 {
    let c = (src & 0xFFFF) + (src >> 16) + (dst & 0xFFFF) + (dst >> 16);
    (c & 0xFFFF) + (c >> 16)
}

/// Record for an SA; `redirect` is the ring the engine hands inline
/// decapsulation results to (hybrid service only)
pub(crate) fn layout(algo: &'static Algorithm, info: &SessionInfo, redirect: Option<u32>) -> EipResult<Layout> {
    let sa = info
        .ipsec
        .as_ref()
        .ok_or_else(|| EipError::InvalidParam(format!("{} needs SA parameters", algo.name)))?;
    sa.validate()?;
    let hash = algo
        .hash
        .ok_or_else(|| EipError::Unsupported(format!("{} has no hash", algo.name)))?;

    let (key, nonce) = match algo.cipher {
        CipherKind::AesGcm => {
            let (k, n) = split_nonce(algo, &info.cipher_key)?;
            (k, Some(n))
        }
        _ => (info.cipher_key.to_vec(), None),
    };
    let algo_bits = cipher_algo_bits(algo, key.len())?;
    if algo.hmac {
        check_auth_key(algo, hash, &info.auth_key)?;
    }

    let encap = sa.encap();
    let esn = sa.esn;
    let mut w = vec![0u32; tr_ipsec::RECORD_WORDS];

    let op = match (algo.cipher, encap) {
        (CipherKind::Null, true) => inst::CTRL_OP_HMAC_ADD,
        (CipherKind::Null, false) => inst::CTRL_OP_HMAC_CHK,
        (_, true) => inst::CTRL_OP_ENC_HMAC,
        (_, false) => inst::CTRL_OP_HMAC_DEC,
    };
    let mut ctrl0 = algo.ctrl[0] | algo_bits | op | tr_ipsec::ext_seq_num(esn);
    let mut ctrl1 = algo.ctrl[1];
    if !encap {
        ctrl0 |= sa.replay.mask_bits();
        ctrl1 |= tr_ipsec::PAD_TYPE;
    }

    // Crypto context words
    let mut at = inst::CTRL_WORDS;
    for k in key_words(&key) {
        w[at] = k;
        at += 1;
    }
    let ipad_offset = at as u32;
    let pad_words = if algo.hmac { hash.state_words() } else { 0 };
    at += 2 * pad_words as usize;
    if let Some(n) = nonce {
        w[at] = n;
        at += 1;
    }
    w[at] = sa.spi;
    at += 1;
    w[at] = if encap { 1 } else { 0 };
    let seq_offset = at as u32;
    at += 1;
    if esn {
        at += 1;
    }
    if !encap {
        let mask = sa.replay.words() + u32::from(sa.replay == ReplayWindow::W32);
        for _ in 0..mask {
            w[at] = u32::MAX;
            at += 1;
        }
    }
    ctrl0 = with_context_words(ctrl0, at);
    if encap {
        ctrl1 |= tr_ipsec::SEQ_NUM_OFFSET_EN | tr_ipsec::seq_num_offset(seq_offset) | tr_ipsec::SEQ_NUM_STORE;
    }
    w[0] = ctrl0;
    w[1] = ctrl1;

    // Header processing trailer
    let v6 = sa.is_v6();
    let mut flags = tr_ipsec::IPHDR_PROC | tr_ipsec::ext_seq_num_proc(esn);
    if v6 {
        flags |= tr_ipsec::IPV6_EN;
    }
    if encap {
        let src = addr_words(&sa.src);
        let dst = addr_words(&sa.dst);
        w[tr_ipsec::W_SRC_IP..tr_ipsec::W_SRC_IP + src.len()].copy_from_slice(&src);
        w[tr_ipsec::W_DST_IP..tr_ipsec::W_DST_IP + dst.len()].copy_from_slice(&dst);
        if !v6 {
            w[tr_ipsec::W_CSUM] = csum_seed(src[0], dst[0]);
        }
        w[tr_ipsec::W_TOKEN_HDR] = tr_ipsec::ENCAP_TOKEN_HDR | tr_ipsec::ENCAP_TOKEN_HDR_IV;

        let df = match (sa.copy_df, sa.df) {
            (true, _) => 0,
            (false, false) => 1,
            (false, true) => 2,
        };
        flags |= tr_ipsec::df(df) | tr_ipsec::dscp_copy_en(!sa.copy_dscp);
        if redirect.is_some() {
            flags |= tr_ipsec::REDIR_EN | tr_ipsec::redir_iface(tr_ipsec::INLINE_RING);
        }
        let dscp = if sa.copy_dscp { 0 } else { tr_ipsec::dscp(sa.dscp as u32) };
        w[tr_ipsec::W_TTL] = dscp | tr_ipsec::ttl(sa.ttl as u32) | algo.blk_len / 2;
        w[tr_ipsec::W_VERIFY] = tr_ipsec::ENCAP_TOKEN_VERIFY;
        let seq = if esn {
            tr_ipsec::ENCAP_ESN_TOKEN_INST
        } else {
            tr_ipsec::ENCAP_TOKEN_INST
        };
        w[tr_ipsec::W_SEQ_INST] = seq | seq_offset;
    } else {
        w[tr_ipsec::W_TOKEN_HDR] = match sa.mode {
            IpsecMode::Tunnel => tr_ipsec::DECAP_TUNNEL_TOKEN_HDR,
            IpsecMode::Transport => tr_ipsec::DECAP_TRANSPORT_TOKEN_HDR,
        };
        if let Some(ring) = redirect {
            flags |= tr_ipsec::REDIR_EN | tr_ipsec::redir_iface(ring);
        }
        w[tr_ipsec::W_TTL] = tr_ipsec::ttl(sa.ttl as u32) | algo.blk_len / 2;

        let mut verify = tr_ipsec::DECAP_TOKEN_VERIFY
            | tr_ipsec::DECAP_TOKEN_VERIFY_PAD
            | tr_ipsec::DECAP_TOKEN_VERIFY_HMAC;
        if sa.replay.enabled() {
            verify |= tr_ipsec::DECAP_TOKEN_VERIFY_SEQ;
        }
        w[tr_ipsec::W_VERIFY] = verify;

        let mut seq = if esn {
            tr_ipsec::DECAP_ESN_TOKEN_INST
        } else {
            tr_ipsec::DECAP_TOKEN_INST
        };
        seq |= seq_offset;
        if sa.replay.enabled() {
            seq |= tr_ipsec::decap_seq_update(esn as u32 + 1 + sa.replay.words());
        }
        w[tr_ipsec::W_SEQ_INST] = seq;
    }
    w[tr_ipsec::W_FLAGS] = flags;

    let proto = match (algo.cipher, encap) {
        (CipherKind::AesGcm, true) => tr_ipsec::PROTO_OUT_GCM,
        (CipherKind::AesGcm, false) => tr_ipsec::PROTO_IN_GCM,
        (_, true) => tr_ipsec::PROTO_OUT_CBC,
        (_, false) => tr_ipsec::PROTO_IN_CBC,
    };
    w[tr_ipsec::W_PROTO] = tr_ipsec::ohdr_proto(sa.ohdr())
        | tr_ipsec::icv_size(sa.icv_len as u32)
        | tr_ipsec::iv_size(algo.iv_len)
        | tr_ipsec::esp_proto(proto);
    if let Some(p) = sa.natt {
        w[tr_ipsec::W_NATT] = p.sport as u32 | (p.dport as u32) << 16;
    }

    let bypass_len = match (encap, sa.natt) {
        (true, Some(_)) => IPV4_HDR_LEN + UDP_HDR_LEN,
        (true, None) => IPV4_HDR_LEN,
        (false, _) => 0,
    };

    let flow = match (redirect, encap) {
        (Some(_), false) => Some(FlowTuple::esp(sa.src, sa.dst, sa.spi, sa.natt.is_some())),
        _ => None,
    };

    Ok(Layout {
        words: w,
        size_class: ctx::TYPE_LARGE,
        template: TokenTemplate {
            ctrl: [ctrl0, ctrl1],
            nonce: nonce.unwrap_or(0),
            cipher: algo.cipher,
            digest_len: sa.icv_len as u32,
            iv_len: algo.iv_len,
            blk_len: algo.blk_len,
            bypass_len,
            seq_offset,
            esn,
        },
        hmac: algo.hmac.then_some(HmacSetup {
            hash,
            ipad_offset,
            pad_words,
        }),
        direction: Some(sa.direction),
        flow,
    })
}

/// Lookaside ESP token
pub(crate) fn token(t: &TokenTemplate, dir: Option<Direction>, op: Op, req: &Request) -> EipResult<Token> {
    if op != Op::Ipsec {
        return Err(EipError::Unsupported(format!("{:?} on IPsec record", op)));
    }
    let min = t.bypass_len + inst::ESP_HDR_LEN;
    if req.len < min {
        return Err(EipError::InvalidParam(format!("packet of {} bytes too short", req.len)));
    }

    match dir {
        Some(Direction::Outbound) => Ok(token::esp_encap(t, req.len, req.next_hdr)),
        Some(Direction::Inbound) => {
            if req.len < min + t.iv_len + t.digest_len {
                return Err(EipError::InvalidParam(format!("packet of {} bytes too short", req.len)));
            }
            let mut iv = [0u8; 16];
            let n = t.iv_len as usize;
            req.read_src((t.bypass_len + inst::ESP_HDR_LEN) as usize, &mut iv[..n]);
            Ok(token::esp_decap(t, req.len, &iv))
        }
        None => Err(EipError::InvalidParam("record has no SA direction".into())),
    }
}

/// Inline ESP: the record carries the whole program
pub(crate) fn inline_token(op: Op, req: &Request) -> EipResult<Token> {
    if op != Op::Ipsec {
        return Err(EipError::Unsupported(format!("{:?} on IPsec record", op)));
    }
    Ok(Token::header_only(token_hdr::EXTENDED | (req.len & token_hdr::LEN_MASK)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn algo(name: &str) -> &'static Algorithm {
        ALGORITHMS.iter().find(|a| a.name == name).unwrap()
    }

    fn sa(direction: Direction) -> IpsecParams {
        IpsecParams::tunnel(
            direction,
            0x1000,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        )
    }

    fn info(params: IpsecParams) -> SessionInfo {
        SessionInfo::new("eip-aes-cbc-sha1-hmac")
            .with_cipher_key(vec![1; 16])
            .with_auth_key(vec![2; 20])
            .with_ipsec(params)
    }

    #[test]
    fn test_encap_record() {
        let l = layout(algo("eip-aes-cbc-sha1-hmac"), &info(sa(Direction::Outbound)), None).unwrap();
        let w = &l.words;
        // ctrl 2 + key 4 + pads 10: spi at 16, seq at 17
        assert_eq!(w[16], 0x1000);
        assert_eq!(w[17], 1);
        assert_eq!(l.template.seq_offset, 17);
        assert_eq!(w[0] & (0x3F << 8), crate::hw::ctrl_context_words(16));
        assert_ne!(w[1] & tr_ipsec::SEQ_NUM_STORE, 0);
        assert_eq!(w[tr_ipsec::W_SEQ_INST], tr_ipsec::ENCAP_TOKEN_INST | 17);
        assert_eq!(w[tr_ipsec::W_SRC_IP], u32::from_le_bytes([192, 168, 1, 1]));
        assert_eq!(w[tr_ipsec::W_CSUM], csum_seed(w[tr_ipsec::W_SRC_IP], w[tr_ipsec::W_DST_IP]));
        assert_eq!(w[tr_ipsec::W_PROTO] >> 24, tr_ipsec::PROTO_OUT_CBC);
        assert_eq!(l.template.bypass_len, 20);
        assert!(l.flow.is_none());
    }

    #[test]
    fn test_decap_replay_window() {
        let mut p = sa(Direction::Inbound);
        p.replay = ReplayWindow::W32;
        p.esn = true;
        let l = layout(algo("eip-aes-cbc-sha1-hmac"), &info(p), Some(3)).unwrap();
        let w = &l.words;
        assert_eq!(w[16], 0x1000);
        assert_eq!(w[17], 0);
        // seq_hi at 18, then two mask words for a 32-packet window
        assert_eq!(&w[19..21], &[u32::MAX, u32::MAX]);
        assert_eq!(w[21], 0);
        assert_eq!(w[0] & (0x3F << 8), crate::hw::ctrl_context_words(19));
        assert_ne!(w[0] & tr_ipsec::SEQ_NUM_MASK_32, 0);
        assert_eq!(
            w[tr_ipsec::W_SEQ_INST],
            tr_ipsec::DECAP_ESN_TOKEN_INST | 17 | tr_ipsec::decap_seq_update(3)
        );
        assert_ne!(w[tr_ipsec::W_VERIFY] & tr_ipsec::DECAP_TOKEN_VERIFY_SEQ, 0);
        assert_eq!(w[tr_ipsec::W_FLAGS] & tr_ipsec::redir_iface(0xF), tr_ipsec::redir_iface(3));
        assert_eq!(l.template.bypass_len, 0);
        assert_eq!(l.flow.unwrap().spi, 0x1000);
    }

    #[test]
    fn test_esn_decap_requires_replay() {
        let mut p = sa(Direction::Inbound);
        p.replay = ReplayWindow::None;
        p.esn = true;
        assert!(matches!(
            layout(algo("eip-aes-cbc-sha1-hmac"), &info(p), None),
            Err(EipError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_gcm_places_nonce() {
        let mut key = vec![9; 16];
        key.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let i = SessionInfo::new("eip-aes-gcm-rfc4106")
            .with_cipher_key(key)
            .with_ipsec(sa(Direction::Outbound));
        let l = layout(algo("eip-aes-gcm-rfc4106"), &i, None).unwrap();
        assert!(l.hmac.is_none());
        assert_eq!(l.words[6], 0xDDCC_BBAA);
        assert_eq!(l.words[7], 0x1000);
        assert_eq!(l.words[tr_ipsec::W_PROTO] >> 24, tr_ipsec::PROTO_OUT_GCM);
    }

    #[test]
    fn test_null_cipher_hashes_only() {
        let i = SessionInfo::new("eip-cbc-null-sha256-hmac")
            .with_auth_key(vec![3; 32])
            .with_ipsec(sa(Direction::Inbound));
        let l = layout(algo("eip-cbc-null-sha256-hmac"), &i, None).unwrap();
        assert_eq!(l.words[0] & inst::CTRL_OP_MASK, inst::CTRL_OP_HMAC_CHK);
        assert_eq!(l.hmac.unwrap().ipad_offset, 2);
    }

    #[test]
    fn test_natt_bypass_and_ports() {
        let mut p = sa(Direction::Outbound);
        p.natt = Some(NattPorts { sport: 4500, dport: 4501 });
        let l = layout(algo("eip-aes-cbc-sha1-hmac"), &info(p), None).unwrap();
        assert_eq!(l.template.bypass_len, 28);
        assert_eq!(l.words[tr_ipsec::W_NATT], 4500 | 4501 << 16);
        assert_eq!(
            (l.words[tr_ipsec::W_PROTO] >> 16) & 0xFF,
            tr_ipsec::OHDR_V4_TUNNEL_NATT_ENC
        );
    }

    #[test]
    fn test_csum_seed_folds_carry() {
        assert_eq!(csum_seed(0xFFFF_FFFF, 0xFFFF_FFFF), 0xFFFF);
        assert_eq!(csum_seed(0x0001_0002, 0x0003_0004), 10);
    }
}
