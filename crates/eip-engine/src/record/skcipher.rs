//! Symmetric cipher records

use eip_common::{EipError, EipResult};

use super::{cipher_algo_bits, key_words, split_nonce, with_context_words, Algorithm, Layout, Op, Request, SessionInfo};
use crate::hw::{ctx, inst};
use crate::token::{self, CipherKind, Direction, Token, TokenTemplate};

pub(crate) static ALGORITHMS: &[Algorithm] = &[
    Algorithm {
        name: "eip-des3_ede-cbc",
        cipher: CipherKind::Des3,
        hash: None,
        hmac: false,
        ctrl: [0, ctx::CIPHER_MODE_CBC],
        digest_len: 0,
        blk_len: 8,
        iv_len: 8,
    },
    Algorithm {
        name: "eip-aes-cbc",
        cipher: CipherKind::Aes,
        hash: None,
        hmac: false,
        ctrl: [0, ctx::CIPHER_MODE_CBC],
        digest_len: 0,
        blk_len: 16,
        iv_len: 16,
    },
    Algorithm {
        name: "eip-aes-ctr-rfc3686",
        cipher: CipherKind::AesCtr,
        hash: None,
        hmac: false,
        ctrl: [0, ctx::CIPHER_MODE_CTR],
        digest_len: 0,
        blk_len: 1,
        iv_len: 8,
    },
    Algorithm {
        name: "eip-aes-ecb",
        cipher: CipherKind::Aes,
        hash: None,
        hmac: false,
        ctrl: [0, ctx::CIPHER_MODE_ECB],
        digest_len: 0,
        blk_len: 16,
        iv_len: 0,
    },
];

/// Small record: control words followed by the cipher key
pub(crate) fn layout(algo: &'static Algorithm, info: &SessionInfo) -> EipResult<Layout> {
    if !info.auth_key.is_empty() {
        return Err(EipError::InvalidParam(format!("{} takes no authentication key", algo.name)));
    }

    let (key, nonce) = match algo.cipher {
        CipherKind::AesCtr => split_nonce(algo, &info.cipher_key)?,
        _ => (info.cipher_key.to_vec(), 0),
    };
    let algo_bits = cipher_algo_bits(algo, key.len())?;

    let mut words = vec![0u32; inst::CTRL_WORDS];
    words.extend(key_words(&key));
    let ctrl0 = with_context_words(ctx::WITH_KEY | algo_bits | algo.ctrl[0], words.len());
    let ctrl1 = algo.ctrl[1];
    words[0] = ctrl0;
    words[1] = ctrl1;

    Ok(Layout {
        words,
        size_class: ctx::TYPE_SMALL,
        template: TokenTemplate {
            ctrl: [ctrl0, ctrl1],
            nonce,
            cipher: algo.cipher,
            iv_len: algo.iv_len,
            blk_len: algo.blk_len,
            ..Default::default()
        },
        hmac: None,
        direction: None,
        flow: None,
    })
}

pub(crate) fn token(algo: &Algorithm, t: &TokenTemplate, op: Op, req: &Request) -> EipResult<Token> {
    let dir = match op {
        Op::Encrypt => Direction::Outbound,
        Op::Decrypt => Direction::Inbound,
        _ => return Err(EipError::Unsupported(format!("{:?} on cipher record", op))),
    };
    if req.len == 0 || req.len % algo.blk_len != 0 {
        return Err(EipError::InvalidParam(format!(
            "{}: length {} not a multiple of {}",
            algo.name, req.len, algo.blk_len
        )));
    }
    Ok(token::cipher(t, dir, &req.iv, req.len))
}
