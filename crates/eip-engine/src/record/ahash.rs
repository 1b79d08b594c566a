//! Hash and HMAC records
//!
//! Keyed hashes need the inner and outer pad states in the record before
//! the first packet. They are derived by the engine itself: a dedicated
//! digest operation reads the key and stores both states into the record.
//! This is the one blocking path of the pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError};
use eip_common::{EipError, EipResult};
use tracing::{debug, warn};

use super::{with_context_words, Algorithm, HashAlg, HmacSetup, Layout, Op, Request, SessionInfo, TransformRecord};
use crate::dma::{Completer, Segment, Submission};
use crate::hw::{self, ctx, inst};
use crate::token::{self, CipherKind, Token, TokenTemplate};

const fn entry(name: &'static str, hash: HashAlg, hmac: bool) -> Algorithm {
    let mode = if hmac { ctx::AUTH_MODE_HMAC } else { ctx::AUTH_MODE_HASH };
    Algorithm {
        name,
        cipher: CipherKind::Null,
        hash: Some(hash),
        hmac,
        ctrl: [hash.ctrl() | mode, 0],
        digest_len: hash.digest_len(),
        blk_len: 0,
        iv_len: 0,
    }
}

pub(crate) static ALGORITHMS: &[Algorithm] = &[
    entry("eip-md5", HashAlg::Md5, false),
    entry("eip-sha1", HashAlg::Sha1, false),
    entry("eip-sha224", HashAlg::Sha224, false),
    entry("eip-sha256", HashAlg::Sha256, false),
    entry("eip-sha384", HashAlg::Sha384, false),
    entry("eip-sha512", HashAlg::Sha512, false),
    entry("eip-hmac-md5", HashAlg::Md5, true),
    entry("eip-hmac-sha1", HashAlg::Sha1, true),
    entry("eip-hmac-sha224", HashAlg::Sha224, true),
    entry("eip-hmac-sha256", HashAlg::Sha256, true),
    entry("eip-hmac-sha384", HashAlg::Sha384, true),
    entry("eip-hmac-sha512", HashAlg::Sha512, true),
];

/// Block size of the hash input, in bytes
const fn block_len(hash: HashAlg) -> usize {
    match hash {
        HashAlg::Sha384 | HashAlg::Sha512 => 128,
        HashAlg::Ghash => 16,
        _ => 64,
    }
}

/// Check an HMAC key against the hash block size
pub(crate) fn check_auth_key(algo: &Algorithm, hash: HashAlg, key: &[u8]) -> EipResult<()> {
    if key.is_empty() || key.len() > block_len(hash) {
        return Err(super::invalid_key(algo, key.len()));
    }
    Ok(())
}

/// Small record. The control words travel in the token, so the record
/// words stay zero; keyed variants reserve room for both pad states.
pub(crate) fn layout(algo: &'static Algorithm, info: &SessionInfo) -> EipResult<Layout> {
    if !info.cipher_key.is_empty() {
        return Err(EipError::InvalidParam(format!("{} takes no cipher key", algo.name)));
    }
    let hash = algo
        .hash
        .ok_or_else(|| EipError::Unsupported(format!("{} has no hash", algo.name)))?;

    let mut words = vec![0u32; inst::CTRL_WORDS];
    let hmac = if algo.hmac {
        check_auth_key(algo, hash, &info.auth_key)?;
        words.resize(inst::CTRL_WORDS + 2 * hash.state_words() as usize, 0);
        Some(HmacSetup {
            hash,
            ipad_offset: inst::CTRL_WORDS as u32,
            pad_words: hash.state_words(),
        })
    } else {
        if !info.auth_key.is_empty() {
            return Err(EipError::InvalidParam(format!("{} takes no key", algo.name)));
        }
        None
    };

    let ctrl0 = with_context_words(algo.ctrl[0], words.len());
    Ok(Layout {
        words,
        size_class: ctx::TYPE_SMALL,
        template: TokenTemplate {
            ctrl: [ctrl0, algo.ctrl[1]],
            digest_len: algo.digest_len,
            ..Default::default()
        },
        hmac,
        direction: None,
        flow: None,
    })
}

pub(crate) fn token(t: &TokenTemplate, op: Op, req: &Request) -> EipResult<Token> {
    if op != Op::Digest {
        return Err(EipError::Unsupported(format!("{:?} on hash record", op)));
    }
    Ok(token::auth(t, req.len))
}

/// Run the pad derivation for `record` and wait for it.
///
/// Busy rings are retried every millisecond; the whole wait is bounded by
/// `digest_timeout_ms`.
pub(crate) fn precompute(record: &Arc<TransformRecord>, key: &[u8], setup: HmacSetup) -> EipResult<()> {
    let device = record.ctx.device();
    let deadline = Instant::now() + device.config().digest_timeout();
    let tick = Duration::from_millis(1);

    let buf = device.allocator().alloc_buffer(key, 0)?;
    let seg = Segment::whole(buf);
    let template = TokenTemplate {
        ctrl: [setup.hash.ctrl(), 0],
        ..Default::default()
    };
    let tk = token::digest(&template, key.len() as u32, setup.ipad_offset, setup.pad_words);

    let engine = device.engine_for_current();
    let (tx, rx) = bounded(1);
    loop {
        let slot = record.ctx.tokens.acquire()?;
        slot.store(&tk);
        let sub = Submission {
            token: Some(slot),
            tk_words: tk.len() as u32,
            hdr: tk.hdr(),
            tr_addr_type: record.tr_addr_type(),
            service: hw::CMD_HWSERVICE_LAC,
            src: vec![seg.clone()],
            dst: vec![seg.clone()],
            completer: Completer::Notify {
                tx: tx.clone(),
                guard: Some(record.acquire()?),
            },
        };
        match engine.submit(sub) {
            Ok(()) => break,
            Err(EipError::Busy) if Instant::now() < deadline => {
                debug!("record {:#x}: ring busy, retrying precompute", record.addr());
                std::thread::sleep(tick);
            }
            Err(EipError::Busy) => return Err(EipError::Timeout("hmac precompute submission")),
            Err(e) => return Err(e),
        }
    }

    loop {
        engine.poll(device.config().rx_budget);
        match rx.recv_timeout(tick) {
            Ok(Ok(_)) => {
                debug!("record {:#x}: pads derived", record.addr());
                return Ok(());
            }
            Ok(Err(e)) => return Err(EipError::Hardware(e)),
            Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
            Err(_) => {
                warn!("record {:#x}: no precompute completion", record.addr());
                return Err(EipError::Timeout("hmac precompute"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn algo(name: &str) -> &'static Algorithm {
        ALGORITHMS.iter().find(|a| a.name == name).unwrap()
    }

    #[test]
    fn test_plain_hash_has_no_pad_space() {
        let l = layout(algo("eip-sha256"), &SessionInfo::new("eip-sha256")).unwrap();
        assert_eq!(l.words, vec![0, 0]);
        assert!(l.hmac.is_none());
        assert_eq!(l.template.digest_len, 32);
        assert_ne!(l.template.ctrl[0] & ctx::AUTH_MODE_HASH, 0);
    }

    #[test]
    fn test_hmac_reserves_both_pads() {
        let info = SessionInfo::new("eip-hmac-sha384").with_auth_key(vec![7; 48]);
        let l = layout(algo("eip-hmac-sha384"), &info).unwrap();
        assert_eq!(l.words.len(), 2 + 2 * 16);
        assert!(l.words.iter().all(|w| *w == 0));
        let h = l.hmac.unwrap();
        assert_eq!((h.ipad_offset, h.pad_words), (2, 16));
        assert_eq!(l.template.ctrl[0] & ctx::AUTH_MODE_HMAC, ctx::AUTH_MODE_HMAC);
    }

    #[test]
    fn test_key_rules() {
        let info = SessionInfo::new("eip-sha1").with_cipher_key(vec![0; 16]);
        assert!(matches!(layout(algo("eip-sha1"), &info), Err(EipError::InvalidParam(_))));

        let info = SessionInfo::new("eip-hmac-sha1");
        assert!(matches!(
            layout(algo("eip-hmac-sha1"), &info),
            Err(EipError::InvalidKeyLength { len: 0, .. })
        ));

        let info = SessionInfo::new("eip-hmac-sha256").with_auth_key(vec![0; 65]);
        assert!(layout(algo("eip-hmac-sha256"), &info).is_err());
    }

    #[test]
    fn test_only_digest_allowed() {
        let l = layout(algo("eip-md5"), &SessionInfo::new("eip-md5")).unwrap();
        let alloc = crate::mem::DmaAllocator::new();
        let seg = Segment::whole(alloc.alloc_bytes(64).unwrap());
        let req = Request::new(3, seg.clone(), seg, 64);
        assert!(token(&l.template, Op::Encrypt, &req).is_err());
        let tk = token(&l.template, Op::Digest, &req).unwrap();
        assert_eq!(hw::cmd_data_len(tk.hdr()), 64);
    }
}
