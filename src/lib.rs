#![deny(missing_docs)]
//! Implements a concurrent named-vector storage service over POSIX message queues.
use failure::{Error, Fail};
use log::error;
use std::fs::{self, File};
use std::io::prelude::*;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Custom Result type used for vector store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Client for sending vector requests to a running server
pub mod client;
/// Wire records and queue naming shared between server and client
pub mod protocol;
/// Thin RAII wrappers around POSIX message queues
pub mod queue;
/// Server handling vector requests read from the intake queues
pub mod server;
/// Pools that run request workers and provide the shutdown drain barrier
pub mod thread_pool;

mod registry;

use registry::LockRegistry;

/// Longest allowed vector name, in bytes. The wire format reserves one
/// extra byte for the terminator.
pub const MAX_NAME_LEN: usize = 39;

/// Error thrown when a vector name is empty, too long or contains
/// characters outside `[A-Za-z0-9]`
#[derive(Debug, Fail)]
#[fail(display = "Invalid vector name")]
pub struct InvalidName;

/// Error thrown by create() when the requested size is less than one
#[derive(Debug, Fail)]
#[fail(display = "Invalid vector size {}", _0)]
pub struct InvalidSize(pub i32);

/// Error thrown when no vector with the given name exists
#[derive(Debug, Fail)]
#[fail(display = "Vector not found")]
pub struct VectorNotFound;

/// Error thrown by create() when the vector exists with a different size
#[derive(Debug, Fail)]
#[fail(display = "Vector already exists with size {}", _0)]
pub struct SizeConflict(pub i32);

/// Error thrown when a position falls outside the vector
#[derive(Debug, Fail)]
#[fail(display = "Position {} out of range", _0)]
pub struct OutOfRange(pub i32);

/// Error thrown when a vector file is missing or unreadable while its
/// lock entry exists
#[derive(Debug, Fail)]
#[fail(display = "Vector file corrupted")]
pub struct CorruptVector;

/// Error thrown by create() when a destroy of the same name is still in
/// flight
#[derive(Debug, Fail)]
#[fail(display = "Vector is being destroyed")]
pub struct DestroyInProgress;

/// Result of a successful create operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new vector file was written
    Created,
    /// A vector with the same name and size already existed
    AlreadyExists,
}

/// Checks a vector name against the naming rules: ASCII alphanumeric,
/// 1 to 39 bytes.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn check_name(name: &str) -> Result<()> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(InvalidName.into())
    }
}

const VECTOR_FILE_EXTENSION: &str = "txt";
const TEMP_FILE_EXTENSION: &str = "tmp";

/// Disk-backed store of named integer vectors. Every vector lives in its
/// own text file; concurrent access to one vector is serialized by a
/// per-vector lock while distinct vectors never block each other.
/// ```
/// use vecd::Result;
///
/// # fn main() -> Result<()> {
///     use vecd::VectorStore;
///     use tempfile::TempDir;
///
///     let temp_dir = TempDir::new().expect("unable to create temporary working directory");
///     let store = VectorStore::open(temp_dir.path())?;
///     store.create("counts", 4)?;
///     store.set("counts", 2, 9)?;
///     assert_eq!(store.get("counts", 2)?, 9);
/// #   Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct VectorStore {
    dir: Arc<PathBuf>,
    locks: Arc<LockRegistry>,
}

impl VectorStore {
    /// Opens the store directory, creating it if absent, and registers a
    /// lock entry for every well-formed vector file found in it. Files
    /// with a different extension or an invalid name are ignored.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let locks = LockRegistry::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.metadata()?.is_file() {
                continue;
            }

            let path = entry.path();
            let extension = path.extension().and_then(std::ffi::OsStr::to_str);
            let stem = path.file_stem().and_then(std::ffi::OsStr::to_str);
            if let (Some(ext), Some(name)) = (extension, stem) {
                if ext == VECTOR_FILE_EXTENSION && valid_name(name) {
                    locks.insert(name);
                }
            }
        }

        Ok(Self {
            dir: Arc::new(dir.to_owned()),
            locks: Arc::new(locks),
        })
    }

    /// Creates a vector of `size` zeroes. Returns `AlreadyExists` if the
    /// vector is already on disk with the same size, and fails if it
    /// exists with a different size.
    pub fn create(&self, name: &str, size: i32) -> Result<CreateOutcome> {
        check_name(name)?;
        if size < 1 {
            return Err(InvalidSize(size).into());
        }

        let path = self.vector_path(name);
        if let Some(existing) = read_size(&path)? {
            return create_outcome(existing, size);
        }

        let lock = self.locks.ensure(name).ok_or(DestroyInProgress)?;
        let _held = lock.lock();

        // A second creator may have won the entry's mutex first; its file
        // must not be reinitialized.
        if let Some(existing) = read_size(&path)? {
            return create_outcome(existing, size);
        }

        match create_file(&path, size) {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(err) => {
                if !path.exists() {
                    lock.mark_removed();
                }
                Err(err)
            }
        }
    }

    /// Overwrites the element at `pos` with `value`. The file is rewritten
    /// through a temporary and renamed into place, so a partially written
    /// vector is never visible.
    pub fn set(&self, name: &str, pos: i32, value: i32) -> Result<()> {
        check_name(name)?;

        let lock = self.locks.acquire(name).ok_or(VectorNotFound)?;
        let _held = lock.lock();

        let path = self.vector_path(name);
        let size = read_size(&path)?.ok_or(CorruptVector)?;
        if pos < 0 || pos >= size {
            return Err(OutOfRange(pos).into());
        }

        write_at(&path, &self.temp_path(name), pos, value)
    }

    /// Returns the element at `pos`.
    pub fn get(&self, name: &str, pos: i32) -> Result<i32> {
        check_name(name)?;

        let lock = self.locks.acquire(name).ok_or(VectorNotFound)?;
        let _held = lock.lock();

        let path = self.vector_path(name);
        let size = read_size(&path)?.ok_or(CorruptVector)?;
        if pos < 0 || pos >= size {
            return Err(OutOfRange(pos).into());
        }

        read_at(&path, pos)
    }

    /// Removes the vector file and retires its lock entry. Workers that
    /// already hold the entry finish normally; the entry is torn down by
    /// the last of them.
    pub fn destroy(&self, name: &str) -> Result<()> {
        check_name(name)?;

        let lock = self.locks.acquire(name).ok_or(VectorNotFound)?;
        let _held = lock.lock();

        fs::remove_file(self.vector_path(name))?;
        lock.mark_removed();
        Ok(())
    }

    fn vector_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", name, VECTOR_FILE_EXTENSION))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, TEMP_FILE_EXTENSION))
    }
}

fn create_outcome(existing: i32, requested: i32) -> Result<CreateOutcome> {
    if existing == requested {
        Ok(CreateOutcome::AlreadyExists)
    } else {
        Err(SizeConflict(existing).into())
    }
}

// Line 0 of a vector file holds the decimal size; lines 1..=size hold the
// elements in index order.
fn read_size(path: &Path) -> Result<Option<i32>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(ref err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut header = String::new();
    if BufReader::new(file).read_line(&mut header)? == 0 {
        return Ok(None);
    }
    Ok(header.trim().parse().ok())
}

fn read_at(path: &Path, pos: i32) -> Result<i32> {
    if pos < 0 {
        return Err(OutOfRange(pos).into());
    }

    let reader = BufReader::new(File::open(path)?);
    match reader.lines().skip(1).nth(pos as usize) {
        Some(line) => Ok(line?.trim().parse().map_err(|_| CorruptVector)?),
        None => Err(OutOfRange(pos).into()),
    }
}

fn create_file(path: &Path, size: i32) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", size)?;
    for _ in 0..size {
        writeln!(writer, "0")?;
    }
    writer.flush()?;
    Ok(())
}

// Rewrites the whole file into `temp`, substituting line `pos + 1`, then
// renames it over the original. The caller must hold the vector's lock.
fn write_at(path: &Path, temp: &Path, pos: i32, value: i32) -> Result<()> {
    if pos < 0 {
        return Err(OutOfRange(pos).into());
    }
    let target = pos as usize + 1;

    let reader = BufReader::new(File::open(path)?);
    let mut writer = BufWriter::new(File::create(temp)?);

    let mut substituted = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if idx == target {
            writeln!(writer, "{}", value)?;
            substituted = true;
        } else {
            writeln!(writer, "{}", line)?;
        }
    }

    if !substituted {
        drop(writer);
        if let Err(err) = fs::remove_file(temp) {
            error!("Failed to remove {} after range miss: {}", temp.display(), err);
        }
        return Err(OutOfRange(pos).into());
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);
    fs::rename(temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, VectorStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = VectorStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn read_size_of_missing_file_is_absent() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(read_size(&dir.path().join("nope.txt")).unwrap(), None);
    }

    #[test]
    fn read_size_of_garbage_header_is_absent() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.txt");
        fs::write(&path, "not a number\n3\n").unwrap();
        assert_eq!(read_size(&path).unwrap(), None);
    }

    #[test]
    fn write_at_out_of_range_leaves_file_and_no_temp() {
        let (dir, store) = scratch();
        store.create("v", 3).unwrap();

        let path = dir.path().join("v.txt");
        let before = fs::read_to_string(&path).unwrap();
        let temp = dir.path().join("v.tmp");

        assert!(write_at(&path, &temp, 7, 1).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!temp.exists());
    }

    #[test]
    fn created_file_is_well_formed() {
        let (dir, store) = scratch();
        store.create("v", 3).unwrap();

        let contents = fs::read_to_string(dir.path().join("v.txt")).unwrap();
        assert_eq!(contents, "3\n0\n0\n0\n");
    }

    #[test]
    fn set_rewrites_only_the_target_line() {
        let (dir, store) = scratch();
        store.create("v", 3).unwrap();
        store.set("v", 1, 42).unwrap();

        let contents = fs::read_to_string(dir.path().join("v.txt")).unwrap();
        assert_eq!(contents, "3\n0\n42\n0\n");
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("a"));
        assert!(valid_name("Abc123"));
        assert!(valid_name(&"x".repeat(39)));
        assert!(!valid_name(""));
        assert!(!valid_name(&"x".repeat(40)));
        assert!(!valid_name("**bad**"));
        assert!(!valid_name("with space"));
        assert!(!valid_name("dash-ed"));
    }
}
