//! Record reclaim worker
//!
//! Drives the tail of the record lifecycle off the submission path:
//! - `Invalidate`: submit the cache invalidation of a drained record,
//!   retrying with capped exponential backoff while the ring is full
//! - `Watch`: log a diagnostic when a freed record keeps operations in
//!   flight longer than `drain_timeout_ms`
//!
//! The invalidation completion arrives through the normal completion
//! path and finishes the record there.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use eip_common::{EngineConfig, EipError, EipResult};
use tracing::{debug, error, info, warn};

use super::{TrState, TransformRecord};
use crate::dma::DmaEngine;

/// Work for the reclaim worker
pub(crate) enum Job {
    /// Record freed with operations still in flight
    Watch(Arc<TransformRecord>),
    /// Record drained; invalidate its cache entry
    Invalidate(Arc<TransformRecord>),
    /// Finish queued invalidations and exit
    Shutdown,
}

/// Handle for queueing reclaim jobs
#[derive(Debug, Clone)]
pub(crate) struct Reclaimer {
    tx: Sender<Job>,
}

impl Reclaimer {
    /// Start the worker over `engines`
    pub(crate) fn spawn(engines: Vec<Arc<DmaEngine>>, config: &EngineConfig) -> EipResult<(Self, JoinHandle<()>)> {
        let (tx, rx) = unbounded();
        let worker = Worker {
            rx,
            engines,
            retry_min: config.invalidation_retry(),
            retry_max: config.invalidation_retry_max(),
            drain_timeout: config.drain_timeout(),
            retries: Vec::new(),
            watches: Vec::new(),
        };
        let handle = std::thread::Builder::new()
            .name("eip-reclaim".into())
            .spawn(move || worker.run())
            .map_err(|_| EipError::NoMemory("reclaim thread"))?;
        Ok((Self { tx }, handle))
    }

    pub(crate) fn send(&self, job: Job) {
        if let Err(e) = self.tx.send(job) {
            match e.into_inner() {
                Job::Invalidate(rec) => {
                    warn!("record {:#x}: reclaim worker stopped, left pending", rec.addr());
                }
                Job::Watch(_) | Job::Shutdown => {}
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        self.send(Job::Shutdown);
    }
}

fn backoff(delay: Duration, max: Duration) -> Duration {
    (delay * 2).min(max)
}

struct Retry {
    rec: Arc<TransformRecord>,
    due: Instant,
    delay: Duration,
    attempts: u32,
}

struct Watch {
    rec: Weak<TransformRecord>,
    addr: u32,
    since: Instant,
    next_report: Instant,
}

struct Worker {
    rx: Receiver<Job>,
    engines: Vec<Arc<DmaEngine>>,
    retry_min: Duration,
    retry_max: Duration,
    drain_timeout: Duration,
    retries: Vec<Retry>,
    watches: Vec<Watch>,
}

impl Worker {
    fn run(mut self) {
        debug!("reclaim worker started");
        loop {
            let job = match self.next_wake() {
                Some(at) => self.rx.recv_deadline(at),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match job {
                Ok(Job::Invalidate(rec)) => self.invalidate(rec, self.retry_min, 0),
                Ok(Job::Watch(rec)) => self.watch(&rec),
                Ok(Job::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.run_retries();
            self.check_watches();
        }
        self.flush();
        info!("reclaim worker stopped");
    }

    fn next_wake(&self) -> Option<Instant> {
        let retry = self.retries.iter().map(|r| r.due);
        let watch = self.watches.iter().map(|w| w.next_report);
        retry.chain(watch).min()
    }

    fn engine_for(&self, rec: &TransformRecord) -> &Arc<DmaEngine> {
        &self.engines[rec.id() as usize % self.engines.len()]
    }

    fn invalidate(&mut self, rec: Arc<TransformRecord>, delay: Duration, attempts: u32) {
        if rec.state() != TrState::InvalidationPending {
            error!("record {:#x}: invalidation requested in state {:?}", rec.addr(), rec.state());
            return;
        }

        match self.engine_for(&rec).submit(rec.invalidation()) {
            Ok(()) => debug!("record {:#x}: invalidation queued", rec.addr()),
            Err(e) if e.is_transient() => {
                warn!(
                    "record {:#x}: invalidation deferred {:?} (attempt {})",
                    rec.addr(),
                    delay,
                    attempts + 1
                );
                self.retries.push(Retry {
                    rec,
                    due: Instant::now() + delay,
                    delay: backoff(delay, self.retry_max),
                    attempts: attempts + 1,
                });
            }
            Err(e) => {
                error!("record {:#x}: invalidation rejected: {}", rec.addr(), e);
            }
        }
    }

    fn run_retries(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = self.retries.drain(..).partition(|r| r.due <= now);
        self.retries = waiting;
        for r in due {
            self.invalidate(r.rec, r.delay, r.attempts);
        }
    }

    fn watch(&mut self, rec: &Arc<TransformRecord>) {
        let now = Instant::now();
        self.watches.push(Watch {
            rec: Arc::downgrade(rec),
            addr: rec.addr(),
            since: now,
            next_report: now + self.drain_timeout,
        });
    }

    fn check_watches(&mut self) {
        let now = Instant::now();
        let timeout = self.drain_timeout;
        self.watches.retain_mut(|w| {
            let Some(rec) = w.rec.upgrade() else {
                return false;
            };
            if rec.state() != TrState::Draining {
                return false;
            }
            if now >= w.next_report {
                warn!(
                    "record {:#x}: {} operations still in flight after {:?}",
                    w.addr,
                    rec.usage(),
                    now - w.since
                );
                w.next_report = now + timeout;
            }
            true
        });
    }

    /// Drain queued jobs, then keep retrying for at most one drain timeout
    fn flush(&mut self) {
        while let Ok(job) = self.rx.try_recv() {
            if let Job::Invalidate(rec) = job {
                self.invalidate(rec, self.retry_min, 0);
            }
        }

        let deadline = Instant::now() + self.drain_timeout;
        while !self.retries.is_empty() && Instant::now() < deadline {
            std::thread::sleep(self.retry_min);
            self.run_retries();
        }
        for r in self.retries.drain(..) {
            warn!("record {:#x}: invalidation still pending at shutdown", r.rec.addr());
        }
    }
}
