//! Service Contexts and Registry
//!
//! A context owns one service's resources: its algorithm table, its token
//! pool and the list of live transform records. Contexts are handed out
//! by a [`ServiceRegistry`], the explicit value that maps services to
//! algorithm tables on one device.
//!
//! # Design
//!
//! - Context handles are reference counted; every live record also holds
//!   the context, so teardown happens only once the record list drains
//! - The record list is behind a reader/writer lock, touched only when
//!   records are created or released

use std::collections::HashMap;
use std::sync::Arc;

use eip_common::{EipError, EipResult};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceInner};
use crate::record::{
    Algorithm, CompletionSink, SessionInfo, Transform, TransformRecord, AEAD_ALGORITHMS, AHASH_ALGORITHMS,
    IPSEC_ALGORITHMS, SKCIPHER_ALGORITHMS,
};
use crate::stats::{ContextStats, ContextStatsSnapshot};
use crate::token::TokenPool;

/// Crypto services a context can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Block and stream ciphers
    Skcipher,
    /// Hash and HMAC
    Ahash,
    /// Cipher plus HMAC
    Aead,
    /// Lookaside ESP
    Ipsec,
    /// ESP with inline redirection and flow offload
    HybridIpsec,
}

impl Service {
    /// Stable name used in logs and metrics labels
    pub const fn name(self) -> &'static str {
        match self {
            Self::Skcipher => "eip_skcipher",
            Self::Ahash => "eip_ahash",
            Self::Aead => "eip_aead",
            Self::Ipsec => "eip_ipsec",
            Self::HybridIpsec => "eip_hybrid_ipsec",
        }
    }

    /// Records carry SA state and cannot be rekeyed in place
    pub const fn is_ipsec(self) -> bool {
        matches!(self, Self::Ipsec | Self::HybridIpsec)
    }

    /// Built-in algorithm table
    pub fn default_algorithms(self) -> &'static [Algorithm] {
        match self {
            Self::Skcipher => SKCIPHER_ALGORITHMS,
            Self::Ahash => AHASH_ALGORITHMS,
            Self::Aead => AEAD_ALGORITHMS,
            Self::Ipsec | Self::HybridIpsec => IPSEC_ALGORITHMS,
        }
    }
}

pub(crate) struct ContextInner {
    pub(crate) service: Service,
    table: &'static [Algorithm],
    device: Arc<DeviceInner>,
    pub(crate) tokens: TokenPool,
    records: RwLock<HashMap<u64, Arc<TransformRecord>>>,
    pub(crate) stats: ContextStats,
}

impl ContextInner {
    pub(crate) fn device(&self) -> &Arc<DeviceInner> {
        &self.device
    }

    /// Linear scan of the algorithm table
    pub(crate) fn lookup(&self, name: &str) -> EipResult<&'static Algorithm> {
        self.table
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| EipError::UnknownAlgorithm(name.to_string()))
    }

    pub(crate) fn link(&self, record: Arc<TransformRecord>) {
        self.records.write().insert(record.id(), record);
    }

    pub(crate) fn unlink(&self, id: u64) {
        if self.records.write().remove(&id).is_none() {
            warn!("{}: record {} not in the live list", self.service.name(), id);
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        info!("{} context destroyed", self.service.name());
    }
}

/// Handle to a service context
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("service", &self.inner.service)
            .field("records", &self.live_records())
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}

impl Context {
    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    /// Service served
    pub fn service(&self) -> Service {
        self.inner.service
    }

    /// Algorithm entry by name
    pub fn algorithm(&self, name: &str) -> EipResult<&'static Algorithm> {
        self.inner.lookup(name)
    }

    /// Allocate a transform record for `info`; completions go to `sink`
    pub fn transform_alloc(&self, info: &SessionInfo, sink: Arc<dyn CompletionSink>) -> EipResult<Transform> {
        TransformRecord::create(&self.inner, info, sink).map(Transform::new)
    }

    /// Records linked and not yet released
    pub fn live_records(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Counters
    pub fn stats(&self) -> ContextStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Free tokens in the context's pool
    pub fn tokens_available(&self) -> usize {
        self.inner.tokens.available()
    }

    /// Drop this handle. The context goes away once its records drain.
    pub fn free(self) {
        let live = self.live_records();
        if live > 0 {
            debug!("{}: context freed with {} live records", self.inner.service.name(), live);
        }
    }
}

/// Services available on one device, each with its algorithm table
pub struct ServiceRegistry {
    device: Device,
    services: HashMap<Service, &'static [Algorithm]>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistry {
    /// Registry with no services
    pub fn new(device: Device) -> Self {
        Self {
            device,
            services: HashMap::new(),
        }
    }

    /// Registry with every built-in service
    pub fn with_default_services(device: Device) -> Self {
        let mut registry = Self::new(device);
        for service in [
            Service::Skcipher,
            Service::Ahash,
            Service::Aead,
            Service::Ipsec,
            Service::HybridIpsec,
        ] {
            registry.register(service, service.default_algorithms());
        }
        registry
    }

    /// Register (or replace) the algorithm table of a service
    pub fn register(&mut self, service: Service, table: &'static [Algorithm]) {
        debug!("{}: {} algorithms registered", service.name(), table.len());
        self.services.insert(service, table);
    }

    /// Device the registry schedules onto
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Allocate a context for a registered service
    pub fn context_alloc(&self, service: Service) -> EipResult<Context> {
        let table = *self
            .services
            .get(&service)
            .ok_or_else(|| EipError::Unsupported(format!("{} not registered", service.name())))?;
        let device = self.device.inner().clone();
        let tokens = TokenPool::new(device.allocator(), device.config().token_pool_size)?;

        info!("{} context allocated", service.name());
        Ok(Context {
            inner: Arc::new(ContextInner {
                service,
                table,
                device,
                tokens,
                records: RwLock::new(HashMap::new()),
                stats: ContextStats::default(),
            }),
        })
    }
}

/// Allocate a context for `service`
pub fn context_alloc(registry: &ServiceRegistry, service: Service) -> EipResult<Context> {
    registry.context_alloc(service)
}

/// Allocate a transform record in `ctx`
pub fn transform_alloc(ctx: &Context, info: &SessionInfo, sink: Arc<dyn CompletionSink>) -> EipResult<Transform> {
    ctx.transform_alloc(info, sink)
}

/// Free a transform record; its memory goes after drain and invalidation
pub fn transform_free(tr: Transform) {
    tr.free();
}

/// Release a context handle
pub fn context_free(ctx: Context) {
    ctx.free();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Poller;
    use crate::dma::Segment;
    use crate::flow::FlowTuple;
    use crate::mem::DmaAllocator;
    use crate::record::{ChannelSink, IpsecParams, Op, Outcome, Request, Session, TrState};
    use crate::sim::SimEngine;
    use crate::token::Direction;
    use crossbeam::channel::Receiver;
    use eip_common::{EngineConfig, HwErrorKind};
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::{Duration, Instant};

    fn config() -> EngineConfig {
        EngineConfig {
            ring_size: 16,
            num_rings: 1,
            token_pool_size: 64,
            drain_timeout_ms: 200,
            digest_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn setup(config: EngineConfig) -> (ServiceRegistry, Arc<SimEngine>) {
        let alloc = Arc::new(DmaAllocator::new());
        let sim = SimEngine::new(alloc.clone());
        let device = Device::new(config, sim.clone(), alloc).unwrap();
        (ServiceRegistry::with_default_services(device), sim)
    }

    /// Poll until `done` holds, for at most five seconds
    fn wait_until(device: &Device, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            device.poll();
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn next_outcome(device: &Device, rx: &Receiver<Outcome>) -> Outcome {
        let mut got = None;
        assert!(wait_until(device, || {
            got = rx.try_recv().ok();
            got.is_some()
        }));
        got.unwrap()
    }

    fn buffer(device: &Device, len: usize) -> Segment {
        Segment::whole(device.allocator().alloc_bytes(len).unwrap())
    }

    fn aes_cbc() -> SessionInfo {
        SessionInfo::new("eip-aes-cbc").with_cipher_key(vec![0x11; 16])
    }

    #[test]
    fn test_unregistered_service() {
        let alloc = Arc::new(DmaAllocator::new());
        let sim = SimEngine::new(alloc.clone());
        let device = Device::new(config(), sim, alloc).unwrap();
        let registry = ServiceRegistry::new(device);
        assert!(matches!(
            registry.context_alloc(Service::Aead),
            Err(EipError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm() {
        let (registry, _sim) = setup(config());
        let ctx = context_alloc(&registry, Service::Skcipher).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let err = transform_alloc(&ctx, &SessionInfo::new("eip-rot13"), sink).unwrap_err();
        assert!(matches!(err, EipError::UnknownAlgorithm(_)));
        assert_eq!(ctx.stats().tr_alloc_fail, 1);
        assert_eq!(ctx.live_records(), 0);
    }

    #[test]
    fn test_aead_encrypt_reports_digest_length() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Aead).unwrap();
        let (sink, rx) = ChannelSink::new();
        let info = SessionInfo::new("eip-aes-cbc-sha256-hmac")
            .with_cipher_key(vec![0x2B; 16])
            .with_auth_key(vec![0x0B; 32]);
        let tr = ctx.transform_alloc(&info, sink).unwrap();

        let src = buffer(device, 80);
        let dst = buffer(device, 128);
        let req = Request::new(1, src, dst, 64).with_assoc(16).with_iv([7; 16]);
        tr.encrypt(&req).unwrap();

        let (tag, outcome) = next_outcome(device, &rx);
        assert_eq!(tag, 1);
        assert_eq!(outcome.unwrap(), 112);

        let s = tr.record().stats_snapshot();
        assert_eq!((s.tx_pkts, s.rx_pkts), (1, 1));
        assert_eq!(tr.record().usage(), 1);

        let c = ctx.stats();
        assert_eq!((c.tx_pkts, c.tx_bytes), (1, 80));
        assert_eq!((c.rx_pkts, c.rx_bytes, c.rx_error), (1, 112, 0));
    }

    #[test]
    fn test_oversized_request_rejected() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        let tokens = ctx.tokens_available();

        let buf = buffer(device, 64);
        let err = tr.encrypt(&Request::new(1, buf.clone(), buf, 65536)).unwrap_err();
        assert!(matches!(err, EipError::InvalidParam(_)));

        // Fragment lengths share the 16-bit field
        let big = buffer(device, 0x10000 + 64);
        let err = tr.encrypt(&Request::new(2, big.clone(), big, 64)).unwrap_err();
        assert!(matches!(err, EipError::InvalidParam(_)));

        assert!(sim.ops().is_empty());
        assert_eq!(ctx.tokens_available(), tokens);
        assert_eq!(tr.record().usage(), 1);
        assert_eq!(tr.record().stats_snapshot().tx_pkts, 0);
        assert_eq!(device.stats().tx_pkts, 0);
    }

    #[test]
    fn test_aead_length_overflow_rejected() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Aead).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let info = SessionInfo::new("eip-aes-cbc-sha256-hmac")
            .with_cipher_key(vec![0x2B; 16])
            .with_auth_key(vec![0x0B; 32]);
        let tr = ctx.transform_alloc(&info, sink).unwrap();
        sim.clear_ops();

        let buf = buffer(device, 128);
        let req = Request::new(1, buf.clone(), buf.clone(), 0xFFFF_FFF0).with_assoc(16);
        assert!(matches!(tr.encrypt(&req), Err(EipError::InvalidParam(_))));

        let req = Request::new(2, buf.clone(), buf, 0xFFF0).with_assoc(16);
        assert!(matches!(tr.encrypt(&req), Err(EipError::InvalidParam(_))));
        assert!(sim.ops().is_empty());
        assert_eq!(ctx.stats().tx_pkts, 0);
    }

    #[test]
    fn test_hmac_precompute_fills_pads() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Ahash).unwrap();
        let (sink, rx) = ChannelSink::new();
        let info = SessionInfo::new("eip-hmac-sha256").with_auth_key(b"key".to_vec());
        let tr = ctx.transform_alloc(&info, sink).unwrap();

        let rec = tr.record();
        let ipad: Vec<u32> = (2..10).map(|i| rec.word(i)).collect();
        let opad: Vec<u32> = (10..18).map(|i| rec.word(i)).collect();
        assert!(ipad.iter().all(|w| *w != 0));
        assert!(opad.iter().all(|w| *w != 0));
        assert_ne!(ipad, opad);
        assert_eq!(rec.usage(), 1);

        let buf = buffer(device, 64);
        tr.digest(&Request::new(5, buf.clone(), buf, 64)).unwrap();
        assert_eq!(next_outcome(device, &rx), (5, Ok(32)));
    }

    #[test]
    fn test_hmac_precompute_times_out() {
        let (registry, sim) = setup(EngineConfig {
            digest_timeout_ms: 30,
            ..config()
        });
        let ctx = registry.context_alloc(Service::Ahash).unwrap();
        sim.stall();

        let (sink, _rx) = ChannelSink::new();
        let info = SessionInfo::new("eip-hmac-sha1").with_auth_key(vec![1; 20]);
        let err = ctx.transform_alloc(&info, sink).unwrap_err();
        assert!(matches!(err, EipError::Timeout(_)));
        assert_eq!(ctx.stats().tr_alloc_fail, 1);
        assert_eq!(ctx.live_records(), 0);
    }

    #[test]
    fn test_full_ring_is_busy_and_harmless() {
        let (registry, sim) = setup(EngineConfig {
            ring_size: 8,
            ..config()
        });
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        sim.stall();

        let buf = buffer(device, 16);
        for tag in 0..7 {
            tr.encrypt(&Request::new(tag, buf.clone(), buf.clone(), 16)).unwrap();
        }
        let tokens = ctx.tokens_available();
        let err = tr.encrypt(&Request::new(99, buf.clone(), buf, 16)).unwrap_err();
        assert!(matches!(err, EipError::Busy));
        assert!(err.is_transient());

        assert_eq!(tr.record().state(), TrState::Active);
        assert_eq!(tr.record().usage(), 8);
        assert_eq!(ctx.tokens_available(), tokens);
        assert_eq!(device.engines()[0].in_flight(), 7);
        assert_eq!(device.stats().tx_busy, 1);

        sim.resume();
        let mut tags = Vec::new();
        assert!(wait_until(device, || {
            tags.extend(rx.try_iter().map(|(t, _)| t));
            tags.len() == 7
        }));
        assert_eq!(tags, (0..7).collect::<Vec<_>>());
        assert_eq!(tr.record().usage(), 1);
    }

    #[test]
    fn test_hardware_error_reaches_sink() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();

        sim.fail_next(0, 5);
        let buf = buffer(device, 32);
        tr.decrypt(&Request::new(3, buf.clone(), buf, 32)).unwrap();

        let (tag, outcome) = next_outcome(device, &rx);
        assert_eq!(tag, 3);
        let err = outcome.unwrap_err();
        assert_eq!(err.kind, HwErrorKind::LookupFailure);
        assert_eq!(tr.record().stats_snapshot().rx_error, 1);
        assert_eq!(device.stats().rx_cle_err_code[5], 1);
        assert_eq!((ctx.stats().rx_pkts, ctx.stats().rx_error), (1, 1));
    }

    #[test]
    fn test_concurrent_submit_and_rekey() {
        const THREADS: u64 = 4;
        const OPS: u64 = 200;
        const REKEYS: u64 = 50;

        let (registry, _sim) = setup(EngineConfig {
            ring_size: 64,
            num_rings: 2,
            token_pool_size: 128,
            ..config()
        });
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let session = Session::new(&ctx, &aes_cbc(), sink).unwrap();
        let poller = Poller::start(device, Duration::from_micros(50)).unwrap();

        std::thread::scope(|s| {
            for t in 0..THREADS {
                let session = &session;
                s.spawn(move || {
                    let buf = buffer(device, 32);
                    for i in 0..OPS {
                        let req = Request::new(t * 1000 + i, buf.clone(), buf.clone(), 32);
                        loop {
                            match session.encrypt(&req) {
                                Ok(()) => break,
                                Err(e) if e.is_transient() => std::thread::yield_now(),
                                Err(e) => panic!("submit {} failed: {}", req.tag, e),
                            }
                        }
                    }
                });
            }
            s.spawn(|| {
                for k in 0..REKEYS {
                    let info = SessionInfo::new("eip-aes-cbc").with_cipher_key(vec![k as u8; 16]);
                    session.rekey(&info).unwrap();
                    std::thread::yield_now();
                }
            });
        });

        let total = (THREADS * OPS) as usize;
        let mut seen = HashSet::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.len() < total && Instant::now() < deadline {
            if let Ok((tag, outcome)) = rx.recv_timeout(Duration::from_millis(50)) {
                assert_eq!(outcome, Ok(32));
                assert!(seen.insert(tag), "request {} completed twice", tag);
            }
        }
        assert_eq!(seen.len(), total);

        assert!(wait_until(device, || ctx.stats().tr_release == REKEYS));
        poller.stop();
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.live_records(), 1);
        assert_eq!(session.record().state(), TrState::Active);
        assert_eq!(session.record().usage(), 1);
        assert_eq!(ctx.stats().tx_pkts, THREADS * OPS);
    }

    #[test]
    fn test_free_waits_for_drain_and_invalidation() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        let watch = tr.watch();
        sim.stall();

        let buf = buffer(device, 16);
        for tag in 0..3 {
            tr.encrypt(&Request::new(tag, buf.clone(), buf.clone(), 16)).unwrap();
        }
        transform_free(tr);
        assert_eq!(watch.state(), TrState::Draining);
        assert_eq!(ctx.stats().tr_free_req, 1);
        assert_eq!(ctx.live_records(), 1);

        // Operations queued before the free still report
        assert_eq!(sim.process(3), 3);
        assert!(wait_until(device, || watch.state() == TrState::InvalidationPending));
        assert_eq!(rx.try_iter().count(), 3);
        assert_eq!(ctx.stats().tr_release, 0);
        assert!(!watch.is_released());

        // The invalidation is queued but the engine has not acknowledged it
        assert!(wait_until(device, || sim.pending() > 0));
        assert_eq!(watch.state(), TrState::InvalidationPending);
        assert_eq!(ctx.stats().pending_release(), 1);

        sim.resume();
        assert!(wait_until(device, || watch.is_released()));
        assert_eq!(ctx.stats().tr_release, 1);
        assert_eq!(ctx.live_records(), 0);

        let last = *sim.ops().last().unwrap();
        assert!(last.is_invalidation());
        assert_eq!(last.tr_addr, watch.addr());
    }

    #[test]
    fn test_free_idle_record() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        let watch = tr.watch();

        tr.free();
        assert!(wait_until(device, || watch.is_released()));
        assert_eq!(watch.state(), TrState::Freed);
        let s = ctx.stats();
        assert_eq!((s.tr_alloc, s.tr_free_req, s.tr_release), (1, 1, 1));
    }

    #[test]
    fn test_session_drop_drains_and_rejects() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let session = Session::new(&ctx, &aes_cbc(), sink).unwrap();
        let rec = session.record();
        sim.stall();

        let buf = buffer(device, 16);
        session.encrypt(&Request::new(1, buf.clone(), buf.clone(), 16)).unwrap();
        drop(session);
        assert_eq!(rec.state(), TrState::Draining);
        assert_eq!(rec.usage(), 1);
        assert!(matches!(
            rec.submit(Op::Encrypt, &Request::new(2, buf.clone(), buf, 16)),
            Err(EipError::Inactive)
        ));
        sim.resume();
        assert!(wait_until(device, || rec.state() == TrState::Freed));
    }

    #[test]
    fn test_rekey_switches_new_operations() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let session = Session::new(&ctx, &aes_cbc(), sink).unwrap();
        let old = session.record();
        sim.stall();

        let buf = buffer(device, 32);
        session.encrypt(&Request::new(1, buf.clone(), buf.clone(), 32)).unwrap();
        session
            .rekey(&SessionInfo::new("eip-aes-cbc").with_cipher_key(vec![0x22; 16]))
            .unwrap();
        let new = session.record();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(old.state(), TrState::Draining);
        assert_eq!(new.word(2), 0x2222_2222);

        session.encrypt(&Request::new(2, buf.clone(), buf, 32)).unwrap();
        sim.resume();

        let mut tags = Vec::new();
        assert!(wait_until(device, || {
            tags.extend(rx.try_iter().map(|(t, _)| t));
            tags.len() == 2
        }));
        assert_eq!(tags, vec![1, 2]);

        let bound: Vec<u32> = sim
            .ops()
            .iter()
            .filter(|op| !op.is_invalidation())
            .map(|op| op.tr_addr)
            .collect();
        assert_eq!(bound, vec![old.addr(), new.addr()]);

        assert!(wait_until(device, || old.state() == TrState::Freed));
        assert_eq!(new.state(), TrState::Active);
        assert_eq!(ctx.live_records(), 1);
    }

    #[test]
    fn test_ipsec_session_cannot_rekey() {
        let (registry, _sim) = setup(config());
        let ctx = registry.context_alloc(Service::Ipsec).unwrap();
        let (sink, _rx) = ChannelSink::new();
        assert!(matches!(
            Session::new(&ctx, &aes_cbc(), sink),
            Err(EipError::Unsupported(_))
        ));
    }

    fn esp_sa(direction: Direction) -> IpsecParams {
        IpsecParams::tunnel(
            direction,
            0x4242,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        )
    }

    fn esp_info(direction: Direction) -> SessionInfo {
        SessionInfo::new("eip-aes-cbc-sha1-hmac")
            .with_cipher_key(vec![1; 16])
            .with_auth_key(vec![2; 20])
            .with_ipsec(esp_sa(direction))
    }

    #[test]
    fn test_esp_encap_advances_sequence() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Ipsec).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&esp_info(Direction::Outbound), sink).unwrap();
        let seq_offset = tr.record().template().seq_offset as usize;
        assert_eq!(tr.record().word(seq_offset), 1);

        // 20-byte outer header plus 64 bytes of payload
        let src = buffer(device, 84);
        let dst = buffer(device, 192);
        tr.ipsec(&Request::new(9, src, dst, 84).with_next_hdr(4)).unwrap();

        // header 20 + esp 8 + iv 16 + payload 64 + trailer 16 + icv 12
        assert_eq!(next_outcome(device, &rx), (9, Ok(136)));
        assert_eq!(tr.record().word(seq_offset), 2);
    }

    #[test]
    fn test_hybrid_decap_registers_flow() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::HybridIpsec).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&esp_info(Direction::Inbound), sink).unwrap();

        let sa = esp_sa(Direction::Inbound);
        let tuple = FlowTuple::esp(sa.src, sa.dst, sa.spi, false);
        assert_eq!(device.with_flow_table(|t| t.contains(&tuple)), Some(true));
        assert_eq!(device.flow_stats().unwrap().alloc, 1);

        tr.free();
        assert_eq!(device.with_flow_table(|t| t.contains(&tuple)), Some(false));
    }

    #[test]
    fn test_hybrid_encap_is_tokenless() {
        let (registry, sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::HybridIpsec).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&esp_info(Direction::Outbound), sink).unwrap();
        assert_eq!(device.flow_stats().unwrap().alloc, 0);

        let tokens = ctx.tokens_available();
        let buf = buffer(device, 128);
        tr.ipsec(&Request::new(4, buf.clone(), buf, 100)).unwrap();
        assert_eq!(next_outcome(device, &rx), (4, Ok(100)));
        assert_eq!(ctx.tokens_available(), tokens);

        let op = *sim.ops().last().unwrap();
        assert_eq!(op.service, crate::hw::CMD_HWSERVICE_LIP);
        assert_eq!(op.tr_addr, tr.record().addr());
    }

    #[test]
    fn test_poller_delivers_completions() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        let poller = Poller::start(device, Duration::from_millis(1)).unwrap();

        let buf = buffer(device, 48);
        tr.encrypt(&Request::new(8, buf.clone(), buf, 48)).unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, (8, Ok(48)));
        poller.stop();
    }

    #[test]
    fn test_context_outlives_handle() {
        let (registry, _sim) = setup(config());
        let device = registry.device();
        let ctx = registry.context_alloc(Service::Skcipher).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let tr = ctx.transform_alloc(&aes_cbc(), sink).unwrap();
        let watch = tr.watch();

        let probe = ctx.clone();
        context_free(ctx);
        assert_eq!(probe.live_records(), 1);
        drop(tr);
        assert!(wait_until(device, || watch.is_released()));
        assert_eq!(probe.live_records(), 0);
    }
}
