use crate::Result;
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::spawn;

type Worker = Box<dyn FnOnce() + Send + 'static>;

/// Trait for the pools that run request workers. Dispatched workers are
/// never joined individually; the server instead blocks on `wait_idle`
/// until every outstanding request has finished replying before it tears
/// down the lock registry.
pub trait ThreadPool: Sized {
    /// Constructs a pool with a specified number of threads
    fn new(threads: u32) -> Result<Self>;

    /// Hands one request worker to the pool
    fn spawn<F>(&self, worker: F)
    where
        F: FnOnce() + Send + 'static;

    /// Blocks until every dispatched worker has finished, including ones
    /// that panicked
    fn wait_idle(&self);
}

/// Starts a detached thread per request, the server's original worker
/// model. The only record of a running worker is its in-flight token.
pub struct DetachedThreadPool {
    inflight: Arc<Inflight>,
}

impl ThreadPool for DetachedThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(Self {
            inflight: Arc::default(),
        })
    }

    fn spawn<F>(&self, worker: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = Inflight::checkout(&self.inflight);
        spawn(move || {
            let _token = token;
            run_worker(worker);
        });
    }

    fn wait_idle(&self) {
        self.inflight.wait_drained();
    }
}

/// Runs request workers on a fixed set of threads fed over a shared
/// channel, bounding how many file rewrites can be in flight at once
pub struct SharedQueueThreadPool {
    sender: Sender<Worker>,
    inflight: Arc<Inflight>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let (sender, receiver) = channel::<Worker>();
        let receiver = Arc::new(Mutex::new(receiver));

        for _ in 0..threads {
            let receiver = Arc::clone(&receiver);
            spawn(move || loop {
                let worker = match receiver.lock().expect("worker channel poisoned").recv() {
                    Ok(worker) => worker,
                    // The sender is gone, so the pool is shutting down.
                    Err(_) => return,
                };
                run_worker(worker);
            });
        }

        Ok(Self {
            sender,
            inflight: Arc::default(),
        })
    }

    fn spawn<F>(&self, worker: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = Inflight::checkout(&self.inflight);
        self.sender
            .send(Box::new(move || {
                let _token = token;
                worker();
            }))
            .expect("all worker threads exited");
    }

    fn wait_idle(&self) {
        self.inflight.wait_drained();
    }
}

/// Runs request workers on a rayon pool
pub struct RayonThreadPool {
    pool: rayon::ThreadPool,
    inflight: Arc<Inflight>,
}

impl ThreadPool for RayonThreadPool {
    fn new(threads: u32) -> Result<Self> {
        Ok(Self {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads as usize)
                .build()?,
            inflight: Arc::default(),
        })
    }

    fn spawn<F>(&self, worker: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = Inflight::checkout(&self.inflight);
        self.pool.spawn(move || {
            let _token = token;
            run_worker(worker);
        });
    }

    fn wait_idle(&self) {
        self.inflight.wait_drained();
    }
}

// A panicking worker only loses its own request; the reply never goes out
// and the client is left to retry.
fn run_worker<F: FnOnce()>(worker: F) {
    if catch_unwind(AssertUnwindSafe(worker)).is_err() {
        error!("Request worker panicked");
    }
}

// Counts dispatched workers until each drops its token. The token travels
// into the worker closure, so a panicking worker still registers as
// finished while it unwinds.
#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Inflight {
    fn checkout(inflight: &Arc<Self>) -> InflightToken {
        *inflight.count.lock().expect("inflight count poisoned") += 1;
        InflightToken {
            inflight: Arc::clone(inflight),
        }
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock().expect("inflight count poisoned");
        while *count > 0 {
            count = self.drained.wait(count).expect("inflight count poisoned");
        }
    }
}

struct InflightToken {
    inflight: Arc<Inflight>,
}

impl Drop for InflightToken {
    fn drop(&mut self) {
        let mut count = self.inflight.count.lock().expect("inflight count poisoned");
        *count -= 1;
        if *count == 0 {
            self.inflight.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn dispatch_and_drain<P: ThreadPool>(threads: u32, workers: u32) {
        let pool = P::new(threads).expect("pool construction");
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..workers {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), workers);
    }

    #[test]
    fn detached_pool_drains_every_worker() {
        dispatch_and_drain::<DetachedThreadPool>(4, 64);
    }

    #[test]
    fn shared_queue_pool_drains_every_worker() {
        dispatch_and_drain::<SharedQueueThreadPool>(4, 64);
    }

    #[test]
    fn rayon_pool_drains_every_worker() {
        dispatch_and_drain::<RayonThreadPool>(4, 64);
    }

    #[test]
    fn wait_idle_returns_immediately_when_nothing_was_dispatched() {
        let pool = SharedQueueThreadPool::new(2).expect("pool construction");
        pool.wait_idle();
    }

    #[test]
    fn panicking_worker_still_counts_as_finished() {
        let pool = SharedQueueThreadPool::new(2).expect("pool construction");
        let finished = Arc::new(AtomicU32::new(0));

        for idx in 0..8 {
            let finished = Arc::clone(&finished);
            pool.spawn(move || {
                if idx % 2 == 0 {
                    panic!("worker provoked");
                }
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Only returns if the panicked workers dropped their tokens too.
        pool.wait_idle();
        assert_eq!(finished.load(Ordering::SeqCst), 4);

        // The pool must keep accepting work afterwards.
        let after = Arc::new(AtomicU32::new(0));
        let count = Arc::clone(&after);
        pool.spawn(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait_idle();
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
