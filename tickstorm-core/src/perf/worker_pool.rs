//! Bounded Worker Pool
//!
//! Fixed set of OS threads pulling jobs from one crossbeam channel.
//! `scatter_gather` is the tick's rendezvous: it fans chunks out, then
//! blocks until every chunk reports or the deadline passes. Chunks that
//! panic or miss the deadline come back as `TransientWorkerFailure`; their
//! late results are discarded when they eventually arrive.
//!
//! ```text
//!   tick ──scatter──► [job queue] ──► worker 0..N
//!     ▲                                   │
//!     └──── gather (bounded, deadline) ◄──┘
//! ```

use crate::core::errors::SimError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Body run by one worker thread
pub type WorkerLoop = Box<dyn FnOnce() + Send + 'static>;

/// Starts a worker thread; swapped out in tests to simulate spawn failure
pub type Spawner = fn(String, WorkerLoop) -> io::Result<JoinHandle<()>>;

enum Message {
    Run(Job),
    Stop,
}

/// Default spawner: a named OS thread
pub fn spawn_thread(name: String, body: WorkerLoop) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(body)
}

#[derive(Default)]
struct Gauges {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

pub struct WorkerPool {
    name: &'static str,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    spawner: Spawner,
    handles: Mutex<Vec<JoinHandle<()>>>,
    target: AtomicUsize,
    next_id: AtomicUsize,
    gauges: Arc<Gauges>,
}

impl WorkerPool {
    /// Create a pool with up to `size` workers
    ///
    /// Spawn failures are logged and leave the pool smaller.
    pub fn new(name: &'static str, size: usize) -> Self {
        Self::with_spawner(name, size, spawn_thread)
    }

    pub fn with_spawner(name: &'static str, size: usize, spawner: Spawner) -> Self {
        let (tx, rx) = channel::unbounded();
        let pool = Self {
            name,
            tx,
            rx,
            spawner,
            handles: Mutex::new(Vec::with_capacity(size)),
            target: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            gauges: Arc::new(Gauges::default()),
        };
        let started = pool.resize(size);
        info!(pool = name, requested = size, started, "worker pool started");
        pool
    }

    fn spawn_worker(&self) -> io::Result<JoinHandle<()>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.rx.clone();
        let gauges = Arc::clone(&self.gauges);
        let body: WorkerLoop = Box::new(move || worker_loop(rx, gauges));
        (self.spawner)(format!("{}-{}", self.name, id), body)
    }

    /// Grow or shrink toward `target` workers; returns the resulting size
    pub fn resize(&self, target: usize) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        let current = self.target.load(Ordering::Acquire);

        if target > current {
            let mut started = 0;
            for _ in current..target {
                match self.spawn_worker() {
                    Ok(handle) => {
                        handles.push(handle);
                        started += 1;
                    }
                    Err(e) => {
                        warn!(
                            pool = self.name,
                            error = %e,
                            running = current + started,
                            "worker creation failed, continuing with fewer workers"
                        );
                        break;
                    }
                }
            }
            self.target.store(current + started, Ordering::Release);
        } else if target < current {
            for _ in target..current {
                // queued behind pending jobs; the first idle workers exit
                let _ = self.tx.send(Message::Stop);
            }
            self.target.store(target, Ordering::Release);
            debug!(pool = self.name, from = current, to = target, "worker pool shrinking");
        }

        self.target.load(Ordering::Acquire)
    }

    /// Number of workers the pool is running (or converging to)
    pub fn size(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Highest number of jobs observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.gauges.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn completed_jobs(&self) -> usize {
        self.gauges.completed.load(Ordering::Relaxed)
    }

    pub fn panicked_jobs(&self) -> usize {
        self.gauges.panicked.load(Ordering::Relaxed)
    }

    /// Queue a fire-and-forget job
    pub fn execute<F>(&self, f: F) -> Result<(), SimError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.size() == 0 {
            return Err(SimError::ResourceExhaustion {
                resource: "worker_pool",
                detail: "no workers running".to_string(),
            });
        }
        self.tx
            .send(Message::Run(Box::new(f)))
            .map_err(|_| SimError::ResourceExhaustion {
                resource: "worker_pool",
                detail: "job queue closed".to_string(),
            })
    }

    /// Run `f` over every chunk on the pool and wait for all of them
    ///
    /// Results keep chunk order. A chunk that panics, cannot be queued, or
    /// misses `timeout` yields `Err(TransientWorkerFailure)`.
    pub fn scatter_gather<T, R, F>(
        &self,
        chunks: Vec<T>,
        f: Arc<F>,
        timeout: Duration,
    ) -> Vec<Result<R, SimError>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let n = chunks.len();
        let (result_tx, result_rx) = channel::bounded::<(usize, thread::Result<R>)>(n);
        let mut results: Vec<Option<Result<R, SimError>>> = (0..n).map(|_| None).collect();
        let mut pending = 0usize;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let tx = result_tx.clone();
            let f = Arc::clone(&f);
            let job = move || {
                let out = panic::catch_unwind(AssertUnwindSafe(|| f(chunk)));
                // receiver may already have given up on us
                let _ = tx.send((idx, out));
            };
            match self.execute(job) {
                Ok(()) => pending += 1,
                Err(e) => {
                    results[idx] = Some(Err(SimError::TransientWorkerFailure {
                        batch: idx,
                        reason: e.to_string(),
                    }))
                }
            }
        }
        drop(result_tx);

        let deadline = Instant::now() + timeout;
        while pending > 0 {
            match result_rx.recv_deadline(deadline) {
                Ok((idx, Ok(value))) => results[idx] = Some(Ok(value)),
                Ok((idx, Err(payload))) => {
                    results[idx] = Some(Err(SimError::TransientWorkerFailure {
                        batch: idx,
                        reason: format!("panicked: {}", panic_message(&payload)),
                    }))
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pool = self.name, pending, ?timeout, "batch deadline passed");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            pending -= 1;
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, r)| {
                r.unwrap_or_else(|| {
                    Err(SimError::TransientWorkerFailure {
                        batch: idx,
                        reason: "timed out".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Stop every worker and join them
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock();
        for _ in 0..handles.len() {
            let _ = self.tx.send(Message::Stop);
        }
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        self.target.store(0, Ordering::Release);
        debug!(pool = self.name, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Message>, gauges: Arc<Gauges>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            Message::Run(job) => {
                let now = gauges.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                gauges.peak_in_flight.fetch_max(now, Ordering::Relaxed);
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    gauges.panicked.fetch_add(1, Ordering::Relaxed);
                }
                gauges.in_flight.fetch_sub(1, Ordering::AcqRel);
                gauges.completed.fetch_add(1, Ordering::Relaxed);
            }
            Message::Stop => break,
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<no message>".to_string()
    }
}
