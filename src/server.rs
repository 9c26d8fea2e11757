use crate::protocol::*;
use crate::queue::MessageQueue;
use crate::thread_pool::ThreadPool;
use crate::{CreateOutcome, Result, VectorStore};
use crossbeam::channel::{bounded, Receiver, Sender};
use log::{error, info, warn};
use std::io::prelude::*;
use std::sync::Arc;
use std::thread::{sleep, spawn};
use std::time::Duration;

const EXIT_COMMAND: &str = "q";
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Handles vector requests read from the four intake queues. Every
/// received record is decoded into an owned request and moved into a
/// pooled worker, so the intake buffers are reusable the moment a worker
/// is spawned.
pub struct VectorServer<P: ThreadPool + Send + Sync + 'static> {
    store: VectorStore,
    pool: Arc<P>,
    receiver: Receiver<()>,
    sender: Sender<()>,
}

// Derive clone is not working properly, so we have to write this manually
impl<P: ThreadPool + Send + Sync + 'static> Clone for VectorServer<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pool: self.pool.clone(),
            receiver: self.receiver.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<P: ThreadPool + Send + Sync + 'static> VectorServer<P> {
    /// Instantiates the worker pool over the given store
    pub fn new(store: VectorStore, num_threads: u32) -> Result<Self> {
        let (sender, receiver) = bounded(1);

        Ok(Self {
            store,
            pool: Arc::new(P::new(num_threads)?),
            sender,
            receiver,
        })
    }

    /// Signals a running server to leave its intake loop
    pub fn shutdown(&self) -> Result<()> {
        info!("Sending server shutdown signal");
        self.sender.send(())?;
        Ok(())
    }

    /// Starts a background thread that watches standard input and signals
    /// shutdown when the exit command arrives.
    pub fn watch_stdin(&self) {
        let server = self.clone();

        spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(ref command) if command.trim() == EXIT_COMMAND => {
                        if let Err(err) = server.shutdown() {
                            error!("Could not signal shutdown: {}", err);
                        }
                        break;
                    }
                    Ok(_) => (),
                    Err(err) => {
                        error!("Could not read user input: {}", err);
                        break;
                    }
                }
            }
        });
    }

    /// Runs the intake loop until a shutdown signal arrives. Cycles over
    /// the four queues with non-blocking receives and dispatches a worker
    /// per received request. On shutdown the intake queues are unlinked
    /// and in-flight workers are waited out before teardown.
    pub fn run(&self, names: &QueueNames) -> Result<()> {
        let q_create = MessageQueue::create(&names.create, INTAKE_QUEUE_DEPTH, CreateRequest::SIZE)?;
        let q_set = MessageQueue::create(&names.set, INTAKE_QUEUE_DEPTH, SetRequest::SIZE)?;
        let q_get = MessageQueue::create(&names.get, INTAKE_QUEUE_DEPTH, GetRequest::SIZE)?;
        let q_destroy =
            MessageQueue::create(&names.destroy, INTAKE_QUEUE_DEPTH, DestroyRequest::SIZE)?;
        info!(
            "Listening on {}, {}, {} and {}",
            names.create, names.set, names.get, names.destroy
        );

        let mut create_buf = [0; CreateRequest::SIZE];
        let mut set_buf = [0; SetRequest::SIZE];
        let mut get_buf = [0; GetRequest::SIZE];
        let mut destroy_buf = [0; DestroyRequest::SIZE];

        loop {
            if self.receiver.try_recv().is_ok() {
                info!("Shutdown signal received");
                break;
            }

            let mut idle = true;
            if let Some(len) = poll(&q_create, &mut create_buf) {
                idle = false;
                self.dispatch_create(&create_buf[..len]);
            }
            if let Some(len) = poll(&q_set, &mut set_buf) {
                idle = false;
                self.dispatch_set(&set_buf[..len]);
            }
            if let Some(len) = poll(&q_get, &mut get_buf) {
                idle = false;
                self.dispatch_get(&get_buf[..len]);
            }
            if let Some(len) = poll(&q_destroy, &mut destroy_buf) {
                idle = false;
                self.dispatch_destroy(&destroy_buf[..len]);
            }

            if idle {
                sleep(POLL_INTERVAL);
            }
        }

        for queue in &[q_create, q_set, q_get, q_destroy] {
            if let Err(err) = queue.unlink() {
                error!("Could not unlink intake queue {}: {}", queue.name(), err);
            }
        }

        // Quiescence barrier: replies for already-received requests go out
        // before the store and registry are torn down.
        self.pool.wait_idle();
        info!("Server shut down");
        Ok(())
    }

    fn dispatch_create(&self, msg: &[u8]) {
        let req = match CreateRequest::decode(msg) {
            Ok(req) => req,
            Err(err) => {
                warn!("Discarding undecodable create request: {}", err);
                return;
            }
        };

        let store = self.store.clone();
        self.pool.spawn(move || {
            let status = match store.create(&req.name, req.size) {
                Ok(CreateOutcome::Created) => {
                    info!("Created vector {} with size {}", req.name, req.size);
                    STATUS_CREATED
                }
                Ok(CreateOutcome::AlreadyExists) => {
                    info!("Vector {} already exists with size {}", req.name, req.size);
                    STATUS_OK
                }
                Err(err) => {
                    warn!("Create {} FAILED: {}", req.name, err);
                    STATUS_ERR
                }
            };

            send_int_reply(&req.reply_queue, status);
        });
    }

    fn dispatch_set(&self, msg: &[u8]) {
        let req = match SetRequest::decode(msg) {
            Ok(req) => req,
            Err(err) => {
                warn!("Discarding undecodable set request: {}", err);
                return;
            }
        };

        let store = self.store.clone();
        self.pool.spawn(move || {
            let status = match store.set(&req.name, req.pos, req.value) {
                Ok(()) => {
                    info!("Set {}[{}] = {}", req.name, req.pos, req.value);
                    STATUS_OK
                }
                Err(err) => {
                    warn!("Set {}[{}] FAILED: {}", req.name, req.pos, err);
                    STATUS_ERR
                }
            };

            send_int_reply(&req.reply_queue, status);
        });
    }

    fn dispatch_get(&self, msg: &[u8]) {
        let req = match GetRequest::decode(msg) {
            Ok(req) => req,
            Err(err) => {
                warn!("Discarding undecodable get request: {}", err);
                return;
            }
        };

        let store = self.store.clone();
        self.pool.spawn(move || {
            let reply = match store.get(&req.name, req.pos) {
                Ok(value) => {
                    info!("Get {}[{}] = {}", req.name, req.pos, value);
                    GetReply {
                        value,
                        status: STATUS_OK,
                    }
                }
                Err(err) => {
                    warn!("Get {}[{}] FAILED: {}", req.name, req.pos, err);
                    GetReply {
                        value: 0,
                        status: STATUS_ERR,
                    }
                }
            };

            send_reply(&req.reply_queue, &reply.encode());
        });
    }

    fn dispatch_destroy(&self, msg: &[u8]) {
        let req = match DestroyRequest::decode(msg) {
            Ok(req) => req,
            Err(err) => {
                warn!("Discarding undecodable destroy request: {}", err);
                return;
            }
        };

        let store = self.store.clone();
        self.pool.spawn(move || {
            let status = match store.destroy(&req.name) {
                Ok(()) => {
                    info!("Destroyed vector {}", req.name);
                    STATUS_DESTROYED
                }
                Err(err) => {
                    warn!("Destroy {} FAILED: {}", req.name, err);
                    STATUS_ERR
                }
            };

            send_int_reply(&req.reply_queue, status);
        });
    }
}

fn poll(queue: &MessageQueue, buf: &mut [u8]) -> Option<usize> {
    match queue.try_receive(buf) {
        Ok(received) => received,
        Err(err) => {
            error!("Receive failure on {}: {}", queue.name(), err);
            None
        }
    }
}

fn send_int_reply(queue_name: &str, status: i32) {
    send_reply(queue_name, &IntReply { status }.encode());
}

// A reply failure is the client's loss alone; the on-disk outcome stands.
fn send_reply(queue_name: &str, msg: &[u8]) {
    match MessageQueue::open_write(queue_name) {
        Ok(queue) => {
            if let Err(err) = queue.send(msg) {
                error!("Could not send reply to {}: {}", queue_name, err);
            }
        }
        Err(err) => error!("Could not open reply queue {}: {}", queue_name, err),
    }
}
