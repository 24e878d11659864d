//! Compound file backend (spec §4.1, grounded in
//! `original_source/src/whoosh/filedb/compound.py`'s `AssemblingStorage`/
//! `CompoundStorage`): concatenate several segment files into one, with a
//! trailing directory mapping name to `(offset, length, mtime)`. Used when a
//! merge or commit decides a segment's many small files are cheaper to open
//! as one.
//!
//! Layout: `"Cmpd"` magic, then each assembled file's bytes back to back,
//! then one directory entry per file (`name_len: u16, offset: u64, length:
//! u64, mtime: u64`), then a footer (`dir_offset: u64, dir_count: u32,
//! "Cmpd"` repeated as a trailer for cheap validation).

use super::{Data, Lock, OutputFile, Storage};
use crate::io::write_vbyte;
use crate::Error;
use std::collections::HashMap;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: &[u8; 4] = b"Cmpd";

/// Packs a set of already-written files (read from `source`) into one
/// compound file on `source`, named `name`. Consumes the list of file names
/// to assemble, in the order given.
pub fn assemble(source: &dyn Storage, name: &str, files: &[String]) -> Result<(), Error> {
    let mut out = source.create_file(name)?;
    out.write_all(MAGIC)?;

    let mut directory: Vec<(String, u64, u64, u64)> = Vec::with_capacity(files.len());
    for file_name in files {
        let data = source.open_file(file_name)?;
        let offset = out.tell();
        out.write_all(data.as_bytes())?;
        let length = data.len() as u64;
        let mtime = now_secs();
        directory.push((file_name.clone(), offset, length, mtime));
    }

    let dir_offset = out.tell();
    for (file_name, offset, length, mtime) in &directory {
        let name_bytes = file_name.as_bytes();
        write_vbyte(name_bytes.len() as u64, &mut out)?;
        out.write_all(name_bytes)?;
        out.write_all(&offset.to_be_bytes())?;
        out.write_all(&length.to_be_bytes())?;
        out.write_all(&mtime.to_be_bytes())?;
    }
    out.write_all(&dir_offset.to_be_bytes())?;
    out.write_all(&(directory.len() as u32).to_be_bytes())?;
    out.write_all(MAGIC)?;
    out.close()?;

    for file_name in files {
        source.delete_file(file_name)?;
    }
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

struct Entry {
    offset: u64,
    length: u64,
    #[allow(dead_code)]
    mtime: u64,
}

/// A read-only `Storage` backed by one compound file. All writes fail with
/// `ReadOnlyError`, matching spec §4.1's "attempting to write through a
/// read-only compound yields `ReadOnlyError`".
pub struct CompoundStorage {
    data: Data,
    directory: HashMap<String, Entry>,
}

impl CompoundStorage {
    pub fn open(source: &dyn Storage, name: &str) -> Result<Self, Error> {
        let length = source.file_length(name)? as usize;
        let data = source.map_file(name, 0, length)?;
        let bytes = data.as_bytes();
        if bytes.len() < 4 || &bytes[..4] != MAGIC {
            return Err(Error::FileHeaderError {
                expected: *MAGIC,
                found: [bytes.first().copied().unwrap_or(0); 4],
            });
        }
        if bytes.len() < 16 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::SchemaError("truncated compound footer".into()));
        }
        let footer_start = bytes.len() - 16;
        let dir_offset = data.read_u64_be(footer_start)? as usize;
        let dir_count = data.read_u32_be(footer_start + 8)?;

        let mut directory = HashMap::with_capacity(dir_count as usize);
        let mut cursor = dir_offset;
        for _ in 0..dir_count {
            let (name_len, consumed) = read_vbyte_at(bytes, cursor)?;
            cursor += consumed;
            let name_end = cursor + name_len as usize;
            let file_name = std::str::from_utf8(&bytes[cursor..name_end])?.to_owned();
            cursor = name_end;
            let offset = data.read_u64_be(cursor)?;
            cursor += 8;
            let length = data.read_u64_be(cursor)?;
            cursor += 8;
            let mtime = data.read_u64_be(cursor)?;
            cursor += 8;
            directory.insert(file_name, Entry { offset, length, mtime });
        }

        Ok(Self { data, directory })
    }

    fn entry(&self, name: &str) -> Result<&Entry, Error> {
        self.directory.get(name).ok_or_else(|| Error::SchemaError(format!("unknown file in compound: {}", name)))
    }
}

fn read_vbyte_at(bytes: &[u8], mut at: usize) -> Result<(u64, usize), Error> {
    let start = at;
    let mut result: u64 = 0;
    let mut bit_p = 0u8;
    loop {
        let byte = *bytes.get(at).ok_or(Error::OverrunError)? as u64;
        at += 1;
        if byte & 0x80 > 0 {
            result |= (byte & 0x7f) << bit_p;
            return Ok((result, at - start));
        }
        result |= byte << bit_p;
        bit_p += 7;
    }
}

impl Storage for CompoundStorage {
    fn create_file(&self, _name: &str) -> Result<Box<dyn OutputFile>, Error> {
        Err(Error::ReadOnlyError)
    }
    fn open_file(&self, name: &str) -> Result<Data, Error> {
        let entry = self.entry(name)?;
        self.data.subset(entry.offset as usize, entry.length as usize)
    }
    fn map_file(&self, name: &str, offset: usize, length: usize) -> Result<Data, Error> {
        let entry = self.entry(name)?;
        self.data.subset(entry.offset as usize + offset, length)
    }
    fn list(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self.directory.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
    fn file_exists(&self, name: &str) -> bool {
        self.directory.contains_key(name)
    }
    fn file_length(&self, name: &str) -> Result<u64, Error> {
        Ok(self.entry(name)?.length)
    }
    fn delete_file(&self, _name: &str) -> Result<(), Error> {
        Err(Error::ReadOnlyError)
    }
    fn rename_file(&self, _old: &str, _new: &str, _safe: bool) -> Result<(), Error> {
        Err(Error::ReadOnlyError)
    }
    fn lock(&self, _name: &str) -> Result<Box<dyn Lock>, Error> {
        Err(Error::ReadOnlyError)
    }
    fn temp_storage(&self) -> Result<Box<dyn Storage>, Error> {
        Ok(Box::new(super::directory::FileStorage::new(std::env::temp_dir().join("parchment-spill"))?))
    }
    fn read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::directory::FileStorage;

    #[test]
    fn assembles_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        for (name, contents) in [("a.dat", "hello"), ("b.dat", "world!!")] {
            let mut out = storage.create_file(name).unwrap();
            out.write_all(contents.as_bytes()).unwrap();
            out.close().unwrap();
        }
        assemble(&storage, "seg.cmpd", &["a.dat".to_string(), "b.dat".to_string()]).unwrap();
        assert!(!storage.file_exists("a.dat"));

        let compound = CompoundStorage::open(&storage, "seg.cmpd").unwrap();
        assert_eq!(compound.open_file("a.dat").unwrap().as_bytes(), b"hello");
        assert_eq!(compound.open_file("b.dat").unwrap().as_bytes(), b"world!!");
        assert!(compound.create_file("c.dat").is_err());
    }
}
