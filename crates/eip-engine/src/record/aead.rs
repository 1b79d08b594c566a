//! AEAD records (cipher plus HMAC)
//!
//! Large record: `ctrl(2) | key | ipad | opad`. The context-words field
//! counts everything after the control words.

use eip_common::{EipError, EipResult};

use super::{
    ahash::check_auth_key, cipher_algo_bits, key_words, split_nonce, with_context_words, Algorithm, HashAlg,
    HmacSetup, Layout, Op, Request, SessionInfo,
};
use crate::hw::{ctx, inst, token_hdr};
use crate::token::{self, CipherKind, Direction, Token, TokenTemplate};

const fn entry(name: &'static str, cipher: CipherKind, hash: HashAlg) -> Algorithm {
    let (mode, blk_len, iv_len) = match cipher {
        CipherKind::AesCtr => (ctx::CIPHER_MODE_CTR, 1, 8),
        _ => (ctx::CIPHER_MODE_CBC, 16, 16),
    };
    Algorithm {
        name,
        cipher,
        hash: Some(hash),
        hmac: true,
        ctrl: [hash.ctrl() | ctx::AUTH_MODE_HMAC, mode],
        digest_len: hash.digest_len(),
        blk_len,
        iv_len,
    }
}

pub(crate) static ALGORITHMS: &[Algorithm] = &[
    entry("eip-aes-cbc-md5-hmac", CipherKind::Aes, HashAlg::Md5),
    entry("eip-aes-cbc-sha1-hmac", CipherKind::Aes, HashAlg::Sha1),
    entry("eip-aes-cbc-sha256-hmac", CipherKind::Aes, HashAlg::Sha256),
    entry("eip-aes-cbc-sha384-hmac", CipherKind::Aes, HashAlg::Sha384),
    entry("eip-aes-cbc-sha512-hmac", CipherKind::Aes, HashAlg::Sha512),
    entry("eip-aes-ctr-rfc3686-md5-hmac", CipherKind::AesCtr, HashAlg::Md5),
    entry("eip-aes-ctr-rfc3686-sha1-hmac", CipherKind::AesCtr, HashAlg::Sha1),
    entry("eip-aes-ctr-rfc3686-sha256-hmac", CipherKind::AesCtr, HashAlg::Sha256),
    entry("eip-aes-ctr-rfc3686-sha384-hmac", CipherKind::AesCtr, HashAlg::Sha384),
    entry("eip-aes-ctr-rfc3686-sha512-hmac", CipherKind::AesCtr, HashAlg::Sha512),
];

pub(crate) fn layout(algo: &'static Algorithm, info: &SessionInfo) -> EipResult<Layout> {
    let hash = algo
        .hash
        .ok_or_else(|| EipError::Unsupported(format!("{} has no hash", algo.name)))?;
    let (key, nonce) = match algo.cipher {
        CipherKind::AesCtr => split_nonce(algo, &info.cipher_key)?,
        _ => (info.cipher_key.to_vec(), 0),
    };
    let algo_bits = cipher_algo_bits(algo, key.len())?;
    check_auth_key(algo, hash, &info.auth_key)?;

    let mut words = vec![0u32; inst::CTRL_WORDS];
    words.extend(key_words(&key));
    let ipad_offset = words.len() as u32;
    words.resize(words.len() + 2 * hash.state_words() as usize, 0);

    let ctrl0 = with_context_words(ctx::WITH_KEY | algo_bits | algo.ctrl[0], words.len());
    let ctrl1 = algo.ctrl[1];
    words[0] = ctrl0;
    words[1] = ctrl1;

    Ok(Layout {
        words,
        size_class: ctx::TYPE_LARGE,
        template: TokenTemplate {
            ctrl: [ctrl0, ctrl1],
            nonce,
            cipher: algo.cipher,
            digest_len: algo.digest_len,
            iv_len: algo.iv_len,
            blk_len: algo.blk_len,
            ..Default::default()
        },
        hmac: Some(HmacSetup {
            hash,
            ipad_offset,
            pad_words: hash.state_words(),
        }),
        direction: None,
        flow: None,
    })
}

/// `req.len` is the cipher length; on decrypt it includes the digest
pub(crate) fn token(t: &TokenTemplate, op: Op, req: &Request) -> EipResult<Token> {
    let dir = match op {
        Op::Encrypt => Direction::Outbound,
        Op::Decrypt => Direction::Inbound,
        _ => return Err(EipError::Unsupported(format!("{:?} on aead record", op))),
    };

    let payload = match dir {
        Direction::Outbound => req.len,
        Direction::Inbound => req.len.checked_sub(t.digest_len).ok_or_else(|| {
            EipError::InvalidParam(format!("length {} shorter than the digest", req.len))
        })?,
    };
    if t.blk_len > 1 && payload % t.blk_len != 0 {
        return Err(EipError::InvalidParam(format!(
            "length {} not a multiple of {}",
            payload, t.blk_len
        )));
    }

    match req.len.checked_add(req.assoc_len) {
        Some(total) if total <= token_hdr::LEN_MASK => {}
        _ => {
            return Err(EipError::InvalidParam(format!(
                "length {} with {} associated bytes exceeds {}",
                req.len,
                req.assoc_len,
                token_hdr::LEN_MASK
            )))
        }
    }

    Ok(token::aead(t, dir, &req.iv, req.assoc_len, req.len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::Segment;
    use crate::hw;

    fn algo(name: &str) -> &'static Algorithm {
        ALGORITHMS.iter().find(|a| a.name == name).unwrap()
    }

    fn info(name: &str) -> SessionInfo {
        SessionInfo::new(name)
            .with_cipher_key(vec![0x2B; 16])
            .with_auth_key(vec![0x0B; 32])
    }

    #[test]
    fn test_large_layout() {
        let l = layout(algo("eip-aes-cbc-sha256-hmac"), &info("eip-aes-cbc-sha256-hmac")).unwrap();
        // ctrl + 4 key words + 2 * 8 pad words
        assert_eq!(l.words.len(), 22);
        assert_eq!(l.size_class, ctx::TYPE_LARGE);
        assert_eq!(l.words[0] & (0x3F << 8), hw::ctrl_context_words(20));
        assert_eq!(l.words[2], 0x2B2B_2B2B);
        let h = l.hmac.unwrap();
        assert_eq!((h.ipad_offset, h.pad_words), (6, 8));
    }

    #[test]
    fn test_ctr_variant() {
        let mut key = vec![0x2B; 32];
        key.extend_from_slice(&[0, 0, 0, 1]);
        let i = info("eip-aes-ctr-rfc3686-sha1-hmac").with_cipher_key(key);
        let l = layout(algo("eip-aes-ctr-rfc3686-sha1-hmac"), &i).unwrap();
        assert_eq!(l.words.len(), 2 + 8 + 10);
        assert_eq!(l.template.nonce, 0x0100_0000);
        assert_eq!(l.template.digest_len, 20);
    }

    #[test]
    fn test_decrypt_needs_digest() {
        let l = layout(algo("eip-aes-cbc-sha1-hmac"), &info("eip-aes-cbc-sha1-hmac")).unwrap();
        let alloc = crate::mem::DmaAllocator::new();
        let seg = Segment::whole(alloc.alloc_bytes(128).unwrap());
        let req = Request::new(1, seg.clone(), seg, 10);
        assert!(token(&l.template, Op::Decrypt, &req).is_err());

        let req = Request { len: 64 + 20, ..req }.with_assoc(8);
        let tk = token(&l.template, Op::Decrypt, &req).unwrap();
        assert_eq!(hw::cmd_data_len(tk.hdr()), 92);
    }

    #[test]
    fn test_length_overflow_rejected() {
        let l = layout(algo("eip-aes-cbc-sha1-hmac"), &info("eip-aes-cbc-sha1-hmac")).unwrap();
        let alloc = crate::mem::DmaAllocator::new();
        let seg = Segment::whole(alloc.alloc_bytes(64).unwrap());

        let req = Request::new(1, seg.clone(), seg.clone(), 0xFFFF_FFF0).with_assoc(16);
        assert!(matches!(
            token(&l.template, Op::Encrypt, &req),
            Err(EipError::InvalidParam(_))
        ));

        let req = Request::new(2, seg.clone(), seg, 0xFFF0).with_assoc(16);
        assert!(matches!(
            token(&l.template, Op::Encrypt, &req),
            Err(EipError::InvalidParam(_))
        ));
    }
}
