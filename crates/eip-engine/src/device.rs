//! Engine Device
//!
//! One accelerator instance: its per-CPU ring pairs, the inline flow
//! table and the reclaim worker.
//!
//! # Design
//!
//! - Each thread sticks to one ring instance, picked round-robin on its
//!   first submission, so submission order on a thread is processing order
//! - Completions are reaped by `Device::poll` or by a [`Poller`]
//! - Dropping the device stops the reclaim worker after it has flushed
//!   queued invalidations

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use eip_common::{EngineConfig, EipError, EipResult};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::dma::DmaEngine;
use crate::flow::{FlowStats, FlowTable};
use crate::hw::Mmio;
use crate::mem::DmaAllocator;
use crate::record::Reclaimer;
use crate::stats::DmaStatsSnapshot;

thread_local! {
    static RING_HINT: Cell<Option<usize>> = const { Cell::new(None) };
}

pub(crate) struct DeviceInner {
    config: EngineConfig,
    alloc: Arc<DmaAllocator>,
    engines: Vec<Arc<DmaEngine>>,
    flow: Option<Mutex<FlowTable>>,
    reclaimer: Reclaimer,
    next_id: AtomicU64,
    next_ring: AtomicUsize,
}

impl DeviceInner {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn allocator(&self) -> &Arc<DmaAllocator> {
        &self.alloc
    }

    pub(crate) fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    pub(crate) fn flow_table(&self) -> Option<&Mutex<FlowTable>> {
        self.flow.as_ref()
    }

    pub(crate) fn next_record_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Ring instance a record's housekeeping runs on
    pub(crate) fn ring_for(&self, id: u64) -> u32 {
        self.engines[id as usize % self.engines.len()].ring_id()
    }

    /// Ring hint of the calling thread, handed out round-robin on first use
    fn ring_hint(&self) -> usize {
        RING_HINT.with(|hint| match hint.get() {
            Some(h) => h,
            None => {
                let h = self.next_ring.fetch_add(1, Ordering::Relaxed);
                hint.set(Some(h));
                h
            }
        })
    }

    /// Ring instance of the calling thread
    pub(crate) fn engine_for_current(&self) -> Arc<DmaEngine> {
        self.engines[self.ring_hint() % self.engines.len()].clone()
    }

    fn poll(&self) -> usize {
        self.engines
            .iter()
            .map(|e| e.poll(self.config.rx_budget))
            .sum()
    }
}

/// An accelerator instance
pub struct Device {
    inner: Arc<DeviceInner>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("rings", &self.inner.engines.len())
            .field("flow_table", &self.inner.flow.is_some())
            .finish()
    }
}

impl Device {
    /// Program every ring instance and the flow table, then start the
    /// reclaim worker
    pub fn new(config: EngineConfig, mmio: Arc<dyn Mmio>, alloc: Arc<DmaAllocator>) -> EipResult<Self> {
        config.validate()?;

        let engines = (0..config.num_rings as u32)
            .map(|ring| DmaEngine::new(ring, config.ring_size, mmio.clone(), &alloc).map(Arc::new))
            .collect::<EipResult<Vec<_>>>()?;

        let flow = if config.flow_table.enabled {
            Some(Mutex::new(FlowTable::new(&config.flow_table, &*mmio, &alloc)?))
        } else {
            None
        };

        let (reclaimer, worker) = Reclaimer::spawn(engines.clone(), &config)?;

        info!(
            "device up: {} rings of {} descriptors, flow table {}",
            config.num_rings,
            config.ring_size,
            if flow.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            inner: Arc::new(DeviceInner {
                config,
                alloc,
                engines,
                flow,
                reclaimer,
                next_id: AtomicU64::new(1),
                next_ring: AtomicUsize::new(0),
            }),
            worker: Some(worker),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<DeviceInner> {
        &self.inner
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Coherent memory allocator
    pub fn allocator(&self) -> &Arc<DmaAllocator> {
        &self.inner.alloc
    }

    /// Ring instances
    pub fn engines(&self) -> &[Arc<DmaEngine>] {
        &self.inner.engines
    }

    /// One budgeted completion pass over every ring; returns the number
    /// of operations completed
    pub fn poll(&self) -> usize {
        self.inner.poll()
    }

    /// DMA counters of all rings
    pub fn stats(&self) -> DmaStatsSnapshot {
        let mut total = DmaStatsSnapshot::default();
        for e in &self.inner.engines {
            total.merge(&e.stats());
        }
        total
    }

    /// Flow table counters, when the table is enabled
    pub fn flow_stats(&self) -> Option<FlowStats> {
        self.inner.flow.as_ref().map(|f| f.lock().stats())
    }

    /// Run `f` on the flow table, when enabled
    pub fn with_flow_table<R>(&self, f: impl FnOnce(&FlowTable) -> R) -> Option<R> {
        self.inner.flow.as_ref().map(|t| f(&t.lock()))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.inner.reclaimer.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("reclaim worker panicked");
            }
        }
        debug!("device stopped");
    }
}

/// Background completion polling, one thread per ring instance
pub struct Poller {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").field("threads", &self.threads.len()).finish()
    }
}

impl Poller {
    /// Poll every ring each `interval` until stopped
    pub fn start(device: &Device, interval: Duration) -> EipResult<Self> {
        let budget = device.config().rx_budget;
        // Dropped on error, which stops the threads already running
        let mut poller = Self {
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::with_capacity(device.engines().len()),
        };

        for (i, engine) in device.engines().iter().enumerate() {
            let engine = engine.clone();
            let stop = poller.stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("eip-poll-{}", i))
                .spawn(move || {
                    // Submissions from this thread stay on the ring it polls
                    RING_HINT.with(|h| h.set(Some(i)));
                    while !stop.load(Ordering::Acquire) {
                        if engine.poll(budget) == 0 {
                            std::thread::sleep(interval);
                        }
                    }
                })
                .map_err(|_| EipError::NoMemory("poller thread"))?;
            poller.threads.push(handle);
        }

        debug!("poller started on {} rings", poller.threads.len());
        Ok(poller)
    }

    /// Stop and join the polling threads
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.halt();
    }
}
