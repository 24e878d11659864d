//! Storage abstraction (spec §4.1): a named byte-range container that every
//! codec reads and writes through, so segments never see raw filesystem
//! paths. Two backends exist: `directory::FileStorage` (one file per name)
//! and `compound::CompoundStorage` (many files packed into one with a
//! trailing directory). Grounded in the teacher's straightforward use of
//! `std::fs`/`memmap` in `mem/key_val_files.rs` and `io_helper.rs`, and in
//! `original_source/src/whoosh/filedb/filestore.py`'s `BaseFileStorage`
//! interface for the method set.

pub mod compound;
pub mod directory;

use crate::Error;
use memmap::Mmap;
use std::io::Write;
use std::sync::Arc;

/// A sequential, write-once output handle. Matches the teacher's pattern of
/// wrapping a `BufWriter<File>` and tracking position as bytes are written.
pub trait OutputFile: Write {
    fn tell(&self) -> u64;
    /// Flush and finalize; after this the file is visible to `open_file`.
    fn close(self: Box<Self>) -> Result<(), Error>;
}

/// A random-access view onto file bytes: either a zero-copy slice into a
/// shared mmap, or an owned buffer when the backend doesn't support mmap
/// (spec §4.1: "may or may not be zero-copy").
#[derive(Clone)]
pub enum Data {
    Mapped { mmap: Arc<Mmap>, start: usize, len: usize },
    Owned { bytes: Arc<Vec<u8>>, start: usize, len: usize },
}

impl Data {
    pub fn len(&self) -> usize {
        match self {
            Data::Mapped { len, .. } => *len,
            Data::Owned { len, .. } => *len,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Data::Mapped { mmap, start, len } => &mmap[*start..*start + *len],
            Data::Owned { bytes, start, len } => &bytes[*start..*start + *len],
        }
    }
    /// A sub-range of this view; used to hand each term dictionary region or
    /// posting block its own bounded `Data` without copying.
    pub fn subset(&self, offset: usize, length: usize) -> Result<Data, Error> {
        if offset + length > self.len() {
            return Err(Error::OverrunError);
        }
        Ok(match self {
            Data::Mapped { mmap, start, .. } => {
                Data::Mapped { mmap: mmap.clone(), start: start + offset, len: length }
            }
            Data::Owned { bytes, start, .. } => {
                Data::Owned { bytes: bytes.clone(), start: start + offset, len: length }
            }
        })
    }
    pub fn read_u32_be(&self, at: usize) -> Result<u32, Error> {
        let b = self.as_bytes();
        if at + 4 > b.len() {
            return Err(Error::OverrunError);
        }
        Ok(u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]))
    }
    pub fn read_u64_be(&self, at: usize) -> Result<u64, Error> {
        let b = self.as_bytes();
        if at + 8 > b.len() {
            return Err(Error::OverrunError);
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&b[at..at + 8]);
        Ok(u64::from_be_bytes(arr))
    }
}

/// An advisory, process-wide lock (spec §4.1's `lock(name)`). Held for the
/// lifetime of the value; dropping releases it. Backed by `fs2` the way a
/// writer's `WRITELOCK` is taken in spec §6.
pub trait Lock: Send {}

/// A named byte-range container. Implementors back either a real directory
/// of files or a compound file layered on top of one.
pub trait Storage: Send + Sync {
    fn create_file(&self, name: &str) -> Result<Box<dyn OutputFile>, Error>;
    fn open_file(&self, name: &str) -> Result<Data, Error>;
    fn map_file(&self, name: &str, offset: usize, length: usize) -> Result<Data, Error>;
    fn list(&self) -> Result<Vec<String>, Error>;
    fn file_exists(&self, name: &str) -> bool;
    fn file_length(&self, name: &str) -> Result<u64, Error>;
    fn delete_file(&self, name: &str) -> Result<(), Error>;
    fn rename_file(&self, old: &str, new: &str, safe: bool) -> Result<(), Error>;
    fn lock(&self, name: &str) -> Result<Box<dyn Lock>, Error>;
    /// A throwaway storage for spill/merge scratch files, rooted in the same
    /// backend (directory) or a temp directory (compound, which is
    /// read-only and cannot host scratch files itself).
    fn temp_storage(&self) -> Result<Box<dyn Storage>, Error>;
    fn read_only(&self) -> bool {
        false
    }
}
