use crate::{Result, MAX_NAME_LEN};
use failure::{ensure, format_err};
use std::str;

/// Well-known intake queue for create requests
pub const CREATE_QUEUE: &str = "/init";
/// Well-known intake queue for set requests
pub const SET_QUEUE: &str = "/set";
/// Well-known intake queue for get requests
pub const GET_QUEUE: &str = "/get";
/// Well-known intake queue for destroy requests
pub const DESTROY_QUEUE: &str = "/destroy";

/// Reply queue name prefix used by create
pub const CREATE_REPLY_PREFIX: &str = "initvec";
/// Reply queue name prefix used by set
pub const SET_REPLY_PREFIX: &str = "setval";
/// Reply queue name prefix used by get
pub const GET_REPLY_PREFIX: &str = "getval";
/// Reply queue name prefix used by destroy
pub const DESTROY_REPLY_PREFIX: &str = "destr";

/// Maximum number of pending messages on each intake queue
pub const INTAKE_QUEUE_DEPTH: i64 = 10;

/// Status reported for a successful set or get, and for a create that
/// found the vector already present with the requested size
pub const STATUS_OK: i32 = 0;
/// Status reported when a new vector file was written
pub const STATUS_CREATED: i32 = 1;
/// Status reported for a successful destroy
pub const STATUS_DESTROYED: i32 = 1;
/// Status reported for any failed operation
pub const STATUS_ERR: i32 = -1;

// Field widths of the fixed-layout records. Names occupy MAX_NAME_LEN
// bytes plus a terminator; reply queue names follow the mq name limit.
const NAME_FIELD: usize = MAX_NAME_LEN + 1;
const REPLY_FIELD: usize = 64;

/// Names of the four intake queues a server instance listens on. The
/// default is the well-known set; tests derive private namespaces so
/// parallel server instances stay isolated.
#[derive(Debug, Clone)]
pub struct QueueNames {
    /// Queue carrying create requests
    pub create: String,
    /// Queue carrying set requests
    pub set: String,
    /// Queue carrying get requests
    pub get: String,
    /// Queue carrying destroy requests
    pub destroy: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            create: CREATE_QUEUE.to_owned(),
            set: SET_QUEUE.to_owned(),
            get: GET_QUEUE.to_owned(),
            destroy: DESTROY_QUEUE.to_owned(),
        }
    }
}

impl QueueNames {
    /// Derives a namespace with `suffix` appended to each well-known name.
    pub fn with_suffix(suffix: &str) -> Self {
        Self {
            create: format!("{}-{}", CREATE_QUEUE, suffix),
            set: format!("{}-{}", SET_QUEUE, suffix),
            get: format!("{}-{}", GET_QUEUE, suffix),
            destroy: format!("{}-{}", DESTROY_QUEUE, suffix),
        }
    }
}

fn put_str(field: &mut [u8], value: &str) -> Result<()> {
    ensure!(
        value.len() < field.len(),
        "string of {} bytes does not fit a {} byte field",
        value.len(),
        field.len()
    );
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn get_str(field: &[u8]) -> Result<String> {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| format_err!("unterminated string field"))?;
    Ok(str::from_utf8(&field[..end])?.to_owned())
}

fn put_i32(field: &mut [u8], value: i32) {
    field[..4].copy_from_slice(&value.to_le_bytes());
}

fn get_i32(field: &[u8]) -> i32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&field[..4]);
    i32::from_le_bytes(raw)
}

fn check_len(record: &str, buf: &[u8], expected: usize) -> Result<()> {
    ensure!(
        buf.len() == expected,
        "{} record of {} bytes, expected {}",
        record,
        buf.len(),
        expected
    );
    Ok(())
}

/// Request to create a vector of a given size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Name of the vector to create
    pub name: String,
    /// Number of elements, all initialized to zero
    pub size: i32,
    /// Client-owned queue the reply is sent to
    pub reply_queue: String,
}

impl CreateRequest {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = NAME_FIELD + 4 + REPLY_FIELD;

    /// Encodes the request into its fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0; Self::SIZE];
        put_str(&mut buf[..NAME_FIELD], &self.name)?;
        put_i32(&mut buf[NAME_FIELD..], self.size);
        put_str(&mut buf[NAME_FIELD + 4..], &self.reply_queue)?;
        Ok(buf)
    }

    /// Decodes a received record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("create", buf, Self::SIZE)?;
        Ok(Self {
            name: get_str(&buf[..NAME_FIELD])?,
            size: get_i32(&buf[NAME_FIELD..]),
            reply_queue: get_str(&buf[NAME_FIELD + 4..])?,
        })
    }
}

/// Request to overwrite one element of a vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRequest {
    /// Name of the vector
    pub name: String,
    /// Zero-based element index
    pub pos: i32,
    /// Value to store
    pub value: i32,
    /// Client-owned queue the reply is sent to
    pub reply_queue: String,
}

impl SetRequest {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = NAME_FIELD + 4 + 4 + REPLY_FIELD;

    /// Encodes the request into its fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0; Self::SIZE];
        put_str(&mut buf[..NAME_FIELD], &self.name)?;
        put_i32(&mut buf[NAME_FIELD..], self.pos);
        put_i32(&mut buf[NAME_FIELD + 4..], self.value);
        put_str(&mut buf[NAME_FIELD + 8..], &self.reply_queue)?;
        Ok(buf)
    }

    /// Decodes a received record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("set", buf, Self::SIZE)?;
        Ok(Self {
            name: get_str(&buf[..NAME_FIELD])?,
            pos: get_i32(&buf[NAME_FIELD..]),
            value: get_i32(&buf[NAME_FIELD + 4..]),
            reply_queue: get_str(&buf[NAME_FIELD + 8..])?,
        })
    }
}

/// Request to read one element of a vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    /// Name of the vector
    pub name: String,
    /// Zero-based element index
    pub pos: i32,
    /// Client-owned queue the reply is sent to
    pub reply_queue: String,
}

impl GetRequest {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = NAME_FIELD + 4 + REPLY_FIELD;

    /// Encodes the request into its fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0; Self::SIZE];
        put_str(&mut buf[..NAME_FIELD], &self.name)?;
        put_i32(&mut buf[NAME_FIELD..], self.pos);
        put_str(&mut buf[NAME_FIELD + 4..], &self.reply_queue)?;
        Ok(buf)
    }

    /// Decodes a received record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("get", buf, Self::SIZE)?;
        Ok(Self {
            name: get_str(&buf[..NAME_FIELD])?,
            pos: get_i32(&buf[NAME_FIELD..]),
            reply_queue: get_str(&buf[NAME_FIELD + 4..])?,
        })
    }
}

/// Request to remove a vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyRequest {
    /// Name of the vector
    pub name: String,
    /// Client-owned queue the reply is sent to
    pub reply_queue: String,
}

impl DestroyRequest {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = NAME_FIELD + REPLY_FIELD;

    /// Encodes the request into its fixed wire layout.
    pub fn encode(&self) -> Result<[u8; Self::SIZE]> {
        let mut buf = [0; Self::SIZE];
        put_str(&mut buf[..NAME_FIELD], &self.name)?;
        put_str(&mut buf[NAME_FIELD..], &self.reply_queue)?;
        Ok(buf)
    }

    /// Decodes a received record.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("destroy", buf, Self::SIZE)?;
        Ok(Self {
            name: get_str(&buf[..NAME_FIELD])?,
            reply_queue: get_str(&buf[NAME_FIELD..])?,
        })
    }
}

/// Reply shape shared by create, set and destroy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntReply {
    /// Operation status code
    pub status: i32,
}

impl IntReply {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = 4;

    /// Encodes the reply into its fixed wire layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.status.to_le_bytes()
    }

    /// Decodes a received reply.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("int reply", buf, Self::SIZE)?;
        Ok(Self {
            status: get_i32(buf),
        })
    }
}

/// Reply shape used by get
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetReply {
    /// Element value; zero when the operation failed
    pub value: i32,
    /// Operation status code
    pub status: i32,
}

impl GetReply {
    /// Size of the encoded record in bytes
    pub const SIZE: usize = 8;

    /// Encodes the reply into its fixed wire layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0; Self::SIZE];
        put_i32(&mut buf, self.value);
        put_i32(&mut buf[4..], self.status);
        buf
    }

    /// Decodes a received reply.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_len("get reply", buf, Self::SIZE)?;
        Ok(Self {
            value: get_i32(buf),
            status: get_i32(&buf[4..]),
        })
    }
}
