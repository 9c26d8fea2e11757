use crate::protocol::*;
use crate::queue::{MessageQueue, ReplyQueue};
use crate::{valid_name, CreateOutcome, InvalidName, InvalidSize, Result};
use failure::format_err;

/// Client for submitting vector requests to a running server. Each
/// operation opens the matching intake queue, creates a private reply
/// queue, sends one request record and blocks for the single reply.
pub struct VectorClient {
    names: QueueNames,
}

impl VectorClient {
    /// Creates a client bound to a set of intake queue names
    pub fn new(names: QueueNames) -> Self {
        Self { names }
    }

    /// Asks the server to create a vector of `size` zeroes. Name and size
    /// are validated locally before any queue is touched.
    pub fn create(&self, name: &str, size: i32) -> Result<CreateOutcome> {
        if !valid_name(name) {
            return Err(InvalidName.into());
        }
        if size < 1 {
            return Err(InvalidSize(size).into());
        }

        let command = MessageQueue::open_write(&self.names.create)?;
        let reply = ReplyQueue::create(CREATE_REPLY_PREFIX, IntReply::SIZE)?;
        let request = CreateRequest {
            name: name.to_owned(),
            size,
            reply_queue: reply.name().to_owned(),
        };
        command.send(&request.encode()?)?;

        match read_status(&reply)? {
            STATUS_CREATED => Ok(CreateOutcome::Created),
            STATUS_OK => Ok(CreateOutcome::AlreadyExists),
            status => Err(server_error("create", name, status)),
        }
    }

    /// Asks the server to overwrite the element of `name` at `pos`.
    pub fn set(&self, name: &str, pos: i32, value: i32) -> Result<()> {
        let command = MessageQueue::open_write(&self.names.set)?;
        let reply = ReplyQueue::create(SET_REPLY_PREFIX, IntReply::SIZE)?;
        let request = SetRequest {
            name: name.to_owned(),
            pos,
            value,
            reply_queue: reply.name().to_owned(),
        };
        command.send(&request.encode()?)?;

        match read_status(&reply)? {
            STATUS_OK => Ok(()),
            status => Err(server_error("set", name, status)),
        }
    }

    /// Asks the server for the element of `name` at `pos`.
    pub fn get(&self, name: &str, pos: i32) -> Result<i32> {
        let command = MessageQueue::open_write(&self.names.get)?;
        let reply = ReplyQueue::create(GET_REPLY_PREFIX, GetReply::SIZE)?;
        let request = GetRequest {
            name: name.to_owned(),
            pos,
            reply_queue: reply.name().to_owned(),
        };
        command.send(&request.encode()?)?;

        let mut buf = [0; GetReply::SIZE];
        let len = reply.receive(&mut buf)?;
        let response = GetReply::decode(&buf[..len])?;
        match response.status {
            STATUS_OK => Ok(response.value),
            status => Err(server_error("get", name, status)),
        }
    }

    /// Asks the server to remove the vector `name`.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let command = MessageQueue::open_write(&self.names.destroy)?;
        let reply = ReplyQueue::create(DESTROY_REPLY_PREFIX, IntReply::SIZE)?;
        let request = DestroyRequest {
            name: name.to_owned(),
            reply_queue: reply.name().to_owned(),
        };
        command.send(&request.encode()?)?;

        match read_status(&reply)? {
            STATUS_DESTROYED => Ok(()),
            status => Err(server_error("destroy", name, status)),
        }
    }
}

fn read_status(reply: &ReplyQueue) -> Result<i32> {
    let mut buf = [0; IntReply::SIZE];
    let len = reply.receive(&mut buf)?;
    Ok(IntReply::decode(&buf[..len])?.status)
}

fn server_error(operation: &str, name: &str, status: i32) -> failure::Error {
    format_err!(
        "server rejected {} of vector {} (status {})",
        operation,
        name,
        status
    )
}
