use crate::Result;
use libc::{c_long, mqd_t};
use log::warn;
use nix::errno::Errno;
use nix::mqueue::{self, MqAttr, MQ_OFlag};
use nix::sys::stat::Mode;
use nix::unistd::getpid;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

// POSIX message queue names are limited to NAME_MAX - 4 on Linux; the
// wire protocol caps reply queue names well below that.
const MAX_QUEUE_NAME_LEN: usize = 63;

/// Handle to an open POSIX message queue. The descriptor is closed on
/// drop; unlinking the name is a separate, explicit step because only the
/// queue's owner should remove it.
pub struct MessageQueue {
    mqd: mqd_t,
    name: String,
}

impl MessageQueue {
    /// Creates (or attaches to) `name` for non-blocking reads, the mode
    /// the server opens its intake queues with.
    pub fn create(name: &str, max_messages: i64, message_size: usize) -> Result<Self> {
        let attr = MqAttr::new(0, max_messages as c_long, message_size as c_long, 0);
        let flags = MQ_OFlag::O_RDONLY | MQ_OFlag::O_CREAT | MQ_OFlag::O_NONBLOCK;
        let mqd = mqueue::mq_open(&cstr(name)?, flags, owner_mode(), Some(&attr))?;
        Ok(Self {
            mqd,
            name: name.to_owned(),
        })
    }

    /// Opens an existing queue write-only, the mode used for submitting
    /// requests and for sending replies.
    pub fn open_write(name: &str) -> Result<Self> {
        let mqd = mqueue::mq_open(&cstr(name)?, MQ_OFlag::O_WRONLY, Mode::empty(), None)?;
        Ok(Self {
            mqd,
            name: name.to_owned(),
        })
    }

    /// The queue's name, as passed to open.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends one message.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        mqueue::mq_send(self.mqd, message, 0)?;
        Ok(())
    }

    /// Blocks until a message arrives and returns its length.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        let mut priority = 0;
        Ok(mqueue::mq_receive(self.mqd, buf, &mut priority)?)
    }

    /// Non-blocking receive. Returns None when the queue is empty.
    pub fn try_receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut priority = 0;
        match mqueue::mq_receive(self.mqd, buf, &mut priority) {
            Ok(len) => Ok(Some(len)),
            Err(nix::Error::Sys(Errno::EAGAIN)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the queue name from the system. Open descriptors (ours
    /// included) stay usable until closed.
    pub fn unlink(&self) -> Result<()> {
        mqueue::mq_unlink(&cstr(&self.name)?)?;
        Ok(())
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if let Err(err) = mqueue::mq_close(self.mqd) {
            warn!("Could not close queue {}: {}", self.name, err);
        }
    }
}

static REPLY_SEQ: AtomicU64 = AtomicU64::new(0);

/// A client's private, single-message reply queue. Created exclusively
/// under a unique name; closed and unlinked on drop so failure paths
/// never leak queue names.
pub struct ReplyQueue {
    queue: MessageQueue,
}

impl ReplyQueue {
    /// Creates a fresh reply queue named `/<prefix><pid>`, extending the
    /// name with a process-wide counter while it collides with another
    /// live queue.
    pub fn create(prefix: &str, message_size: usize) -> Result<Self> {
        let attr = MqAttr::new(0, 1, message_size as c_long, 0);
        let flags = MQ_OFlag::O_RDONLY | MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL;

        let mut name = format!("/{}{}", prefix, getpid());
        loop {
            debug_assert!(name.len() <= MAX_QUEUE_NAME_LEN);
            match mqueue::mq_open(&cstr(&name)?, flags, owner_mode(), Some(&attr)) {
                Ok(mqd) => {
                    return Ok(Self {
                        queue: MessageQueue { mqd, name },
                    });
                }
                Err(nix::Error::Sys(Errno::EEXIST)) => {
                    name = format!(
                        "/{}{}-{}",
                        prefix,
                        getpid(),
                        REPLY_SEQ.fetch_add(1, Ordering::Relaxed)
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The unique name to embed in a request record.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Blocks until the reply arrives and returns its length.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        self.queue.receive(buf)
    }
}

impl Drop for ReplyQueue {
    fn drop(&mut self) {
        if let Err(err) = self.queue.unlink() {
            warn!("Could not unlink reply queue {}: {}", self.queue.name(), err);
        }
    }
}

fn cstr(name: &str) -> Result<CString> {
    Ok(CString::new(name)?)
}

fn owner_mode() -> Mode {
    Mode::S_IRUSR | Mode::S_IWUSR
}
