//! Append-only log file operations
//!
//! One data file per environment. Records are framed by
//! [`Loggable`](crate::loggable::Loggable); a record's address is its byte
//! offset and the high-water mark is the file length. `append` fsyncs
//! before returning; durability is this layer's responsibility.
//!
//! Opening scans the file and truncates a torn or corrupt tail, so a crash
//! in the middle of an append leaves the log at its last durable record.
//!
//! For crash testing, `inject_append_failures` and
//! `inject_set_high_failures` make the next write operations fail with an
//! I/O error without touching the file.

use crate::cache::RecordCache;
use crate::loggable::{Loggable, HEADER_LEN, TRAILER_LEN};
use arbor_core::{Address, Error, Result, StructureId};
use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the data file inside the environment directory
pub const LOG_FILE_NAME: &str = "data.ald";

const CACHE_CAPACITY: usize = 1024;

struct LogInner {
    dir: PathBuf,
    file: Mutex<File>,
    high: AtomicU64,
    cache: Mutex<RecordCache>,
    closed: AtomicBool,
    fail_next_append: AtomicU32,
    fail_append_skip: AtomicU32,
    fail_next_set_high: AtomicU32,
}

/// Append-only log of durable records addressed by byte offset
#[derive(Clone)]
pub struct Log {
    inner: Arc<LogInner>,
}

impl Log {
    /// Open (or create) the log in `dir`, truncating any torn tail
    pub fn open(dir: &Path) -> Result<Log> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        let durable = scan_durable_prefix(&mut file, file_len)?;
        if durable < file_len {
            warn!(
                path = %path.display(),
                durable,
                file_len,
                "truncating torn log tail"
            );
            file.set_len(durable)?;
            file.sync_data()?;
        }
        debug!(path = %path.display(), high = durable, "log opened");
        Ok(Log {
            inner: Arc::new(LogInner {
                dir: dir.to_path_buf(),
                file: Mutex::new(file),
                high: AtomicU64::new(durable),
                cache: Mutex::new(RecordCache::new(CACHE_CAPACITY)),
                closed: AtomicBool::new(false),
                fail_next_append: AtomicU32::new(0),
                fail_append_skip: AtomicU32::new(0),
                fail_next_set_high: AtomicU32::new(0),
            }),
        })
    }

    /// Directory this log lives in
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// One past the last durable byte
    pub fn high_address(&self) -> Address {
        self.inner.high.load(Ordering::Acquire)
    }

    /// Append records, fsync, and return their addresses
    pub fn append(&self, records: &[Loggable]) -> Result<Vec<Address>> {
        self.check_open()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut file = self.inner.file.lock();
        if self.consume_injected_append() {
            return Err(injected_failure("append"));
        }
        let high = self.inner.high.load(Ordering::Acquire);
        let mut buf = Vec::new();
        let mut addresses = Vec::with_capacity(records.len());
        let mut next = high;
        for record in records {
            addresses.push(next);
            next += record.encoded_len();
            record.encode_into(&mut buf);
        }
        file.seek(SeekFrom::Start(high))?;
        file.write_all(&buf)?;
        file.sync_data()?;
        self.inner.high.store(next, Ordering::Release);
        drop(file);

        let mut cache = self.inner.cache.lock();
        for (record, address) in records.iter().zip(&addresses) {
            cache.insert(*address, Arc::new(record.clone()));
        }
        Ok(addresses)
    }

    /// Read the record at `address`
    pub fn read(&self, address: Address) -> Result<Arc<Loggable>> {
        self.check_open()?;
        let high = self.high_address();
        if address >= high {
            return Err(Error::corruption(format!(
                "read at {address} beyond high address {high}"
            )));
        }
        if let Some(record) = self.inner.cache.lock().get(address) {
            return Ok(record);
        }
        let record = Arc::new(self.read_from_file(address)?);
        self.inner
            .cache
            .lock()
            .insert(address, Arc::clone(&record));
        Ok(record)
    }

    /// Truncate the log to `address`
    ///
    /// Used exclusively for post-failure rollback, inside the commit lock.
    pub fn set_high_address(&self, address: Address) -> Result<()> {
        self.check_open()?;
        let mut file = self.inner.file.lock();
        if consume_injected(&self.inner.fail_next_set_high) {
            return Err(injected_failure("set_high_address"));
        }
        let high = self.inner.high.load(Ordering::Acquire);
        if address > high {
            return Err(Error::corruption(format!(
                "cannot extend log: {address} > high address {high}"
            )));
        }
        file.set_len(address)?;
        file.sync_data()?;
        self.inner.high.store(address, Ordering::Release);
        drop(file);
        self.inner.cache.lock().evict_at_or_above(address);
        Ok(())
    }

    /// Discard all records
    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        let file = self.inner.file.lock();
        file.set_len(0)?;
        file.sync_data()?;
        self.inner.high.store(0, Ordering::Release);
        drop(file);
        self.inner.cache.lock().clear();
        Ok(())
    }

    /// Sync and mark the log closed; idempotent
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let file = self.inner.file.lock();
        file.sync_all()?;
        debug!(high = self.inner.high.load(Ordering::Acquire), "log closed");
        Ok(())
    }

    /// Check if the log has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Fraction of reads served from the record cache
    pub fn cache_hit_rate(&self) -> f32 {
        self.inner.cache.lock().hit_rate()
    }

    /// Iterate records from `address` up to the current high address
    pub fn iter_from(&self, address: Address) -> LogIterator {
        LogIterator {
            log: self.clone(),
            next: address,
            high: self.high_address(),
        }
    }

    /// Test support: make the next `count` appends fail with an I/O error
    pub fn inject_append_failures(&self, count: u32) {
        self.inject_append_failures_after(0, count);
    }

    /// Test support: let `skip` appends through, then fail `count` of
    /// them
    ///
    /// A commit appends in stages (values, leaf pages, root); skipping
    /// lets a test fail a later stage so earlier stages really hit the
    /// log and the rollback has something to truncate.
    pub fn inject_append_failures_after(&self, skip: u32, count: u32) {
        self.inner.fail_append_skip.store(skip, Ordering::Release);
        self.inner
            .fail_next_append
            .store(count, Ordering::Release);
    }

    /// Test support: make the next `count` truncations fail with an I/O
    /// error
    pub fn inject_set_high_failures(&self, count: u32) {
        self.inner
            .fail_next_set_high
            .store(count, Ordering::Release);
    }

    fn consume_injected_append(&self) -> bool {
        if self.inner.fail_next_append.load(Ordering::Acquire) == 0 {
            return false;
        }
        if consume_injected(&self.inner.fail_append_skip) {
            return false;
        }
        consume_injected(&self.inner.fail_next_append)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn read_from_file(&self, address: Address) -> Result<Loggable> {
        let mut file = self.inner.file.lock();
        file.seek(SeekFrom::Start(address))?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)?;
        let data_len = BigEndian::read_u32(&header[9..13]) as usize;
        let mut rest = vec![0u8; data_len + TRAILER_LEN];
        file.read_exact(&mut rest)?;
        drop(file);
        let mut frame = Vec::with_capacity(HEADER_LEN + rest.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&rest);
        let (record, _) = Loggable::decode(&frame)?;
        Ok(record)
    }
}

/// Iterator over `(address, record)` pairs of a log
pub struct LogIterator {
    log: Log,
    next: Address,
    high: Address,
}

impl Iterator for LogIterator {
    type Item = Result<(Address, Arc<Loggable>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.high {
            return None;
        }
        let address = self.next;
        match self.log.read(address) {
            Ok(record) => {
                self.next = record.next_address(address);
                Some(Ok((address, record)))
            }
            Err(e) => {
                // Stop after an error; a damaged record makes every later
                // offset meaningless.
                self.next = self.high;
                Some(Err(e))
            }
        }
    }
}

/// Scan from the start of the file and return the length of the prefix of
/// intact records.
fn scan_durable_prefix(file: &mut File, file_len: u64) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = std::io::BufReader::new(file);
    let mut pos: u64 = 0;
    while pos < file_len {
        let mut header = [0u8; HEADER_LEN];
        if reader.read_exact(&mut header).is_err() {
            break;
        }
        if StructureId::from_key_bytes(&header[1..9]).is_err() {
            break;
        }
        let data_len = BigEndian::read_u32(&header[9..13]) as usize;
        let mut rest = vec![0u8; data_len + TRAILER_LEN];
        if reader.read_exact(&mut rest).is_err() {
            break;
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + rest.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&rest);
        if Loggable::decode(&frame).is_err() {
            break;
        }
        pos += frame.len() as u64;
    }
    Ok(pos)
}

fn consume_injected(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

fn injected_failure(op: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("injected {op} failure"),
    ))
}
