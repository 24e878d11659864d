//! Directory-of-files `Storage` backend: every named file is a real file in
//! a real directory. The simplest of the two backends, and the one an
//! `IndexWriter` always writes fresh segments through before an optional
//! compound step packs them up.

use super::{Data, Lock, OutputFile, Storage};
use crate::Error;
use fs2::FileExt;
use memmap::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

pub struct DirectoryOutputFile {
    file: File,
    written: u64,
}

impl Write for DirectoryOutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl OutputFile for DirectoryOutputFile {
    fn tell(&self) -> u64 {
        self.written
    }
    fn close(mut self: Box<Self>) -> Result<(), Error> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

struct DirectoryLock {
    file: File,
}
impl Lock for DirectoryLock {}
impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Storage for FileStorage {
    fn create_file(&self, name: &str) -> Result<Box<dyn OutputFile>, Error> {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(self.path(name))?;
        Ok(Box::new(DirectoryOutputFile { file, written: 0 }))
    }

    fn open_file(&self, name: &str) -> Result<Data, Error> {
        let length = self.file_length(name)? as usize;
        self.map_file(name, 0, length)
    }

    fn map_file(&self, name: &str, offset: usize, length: usize) -> Result<Data, Error> {
        let file = File::open(self.path(name))?;
        if length == 0 {
            return Ok(Data::Owned { bytes: Arc::new(Vec::new()), start: 0, len: 0 });
        }
        let mmap = unsafe { Mmap::map(&file)? };
        if offset + length > mmap.len() {
            return Err(Error::OverrunError);
        }
        Ok(Data::Mapped { mmap: Arc::new(mmap), start: offset, len: length })
    }

    fn list(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            } else {
                return Err(Error::BadFileName(entry.file_name()));
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn file_length(&self, name: &str) -> Result<u64, Error> {
        Ok(fs::metadata(self.path(name))?.len())
    }

    fn delete_file(&self, name: &str) -> Result<(), Error> {
        fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn rename_file(&self, old: &str, new: &str, safe: bool) -> Result<(), Error> {
        if safe && self.path(new).exists() {
            return Err(Error::SchemaError(format!("refusing to overwrite {}", new)));
        }
        fs::rename(self.path(old), self.path(new))?;
        Ok(())
    }

    fn lock(&self, name: &str) -> Result<Box<dyn Lock>, Error> {
        let file = OpenOptions::new().write(true).create(true).open(self.path(name))?;
        FileExt::try_lock_exclusive(&file).map_err(|_| Error::LockError)?;
        Ok(Box::new(DirectoryLock { file }))
    }

    fn temp_storage(&self) -> Result<Box<dyn Storage>, Error> {
        Ok(Box::new(FileStorage::new(self.root.join("_spill"))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn round_trips_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let mut out = storage.create_file("seg.dat").unwrap();
        out.write_all(b"hello world").unwrap();
        out.close().unwrap();

        assert!(storage.file_exists("seg.dat"));
        assert_eq!(storage.file_length("seg.dat").unwrap(), 11);
        let data = storage.open_file("seg.dat").unwrap();
        assert_eq!(data.as_bytes(), b"hello world");
    }

    #[test]
    fn lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let _held = storage.lock("WRITELOCK").unwrap();
        assert!(storage.lock("WRITELOCK").is_err());
    }

    #[test]
    fn rename_moves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let mut out = storage.create_file("a").unwrap();
        out.write_all(b"x").unwrap();
        out.close().unwrap();
        storage.rename_file("a", "b", false).unwrap();
        assert!(!storage.file_exists("a"));
        let mut f = File::open(dir.path().join("b")).unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "x");
    }
}
