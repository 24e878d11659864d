//! Two-level term dictionary (spec §4.3): sorted, size-bounded "regions" of
//! `(termbytes, TermInfo)` pairs with shared-prefix compression, plus a
//! top-level index of one `(first_key, last_key, offset, count)` entry per
//! region for binary search. Grounded in the teacher's `galago::btree`
//! (`Vocabulary`/`VocabularyBlock`, a first-key-per-block index over
//! fixed-size blocks), generalized from Galago's opaque byte blocks into an
//! explicit region format this crate also writes (the teacher only reads
//! Galago's btree; here writer and reader must agree on the bytes).

use crate::io::{write_vbyte, Bytes, DataInputStream, InputStream, SliceInputStream};
use crate::store::Data;
use crate::Error;
use std::io::Write;

const MAGIC: &[u8; 4] = b"TDct";
const TARGET_REGION_BYTES: usize = 16 * 1024;

/// Everything a searcher needs about one term without touching its
/// postings (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermInfo {
    pub doc_frequency: u64,
    pub total_term_frequency: u64,
    pub min_length_byte: u8,
    pub max_length_byte: u8,
    pub max_weight: f32,
    pub first_block_offset: u64,
    pub postings_byte_length: u64,
}

impl TermInfo {
    fn encode<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        write_vbyte(self.doc_frequency, out)?;
        write_vbyte(self.total_term_frequency, out)?;
        out.write_all(&[self.min_length_byte, self.max_length_byte])?;
        out.write_all(&self.max_weight.to_be_bytes())?;
        write_vbyte(self.first_block_offset, out)?;
        write_vbyte(self.postings_byte_length, out)?;
        Ok(())
    }

    fn decode(stream: &mut SliceInputStream) -> Result<Self, Error> {
        let doc_frequency = stream.read_vbyte()?;
        let total_term_frequency = stream.read_vbyte()?;
        let min_length_byte = stream.read_u8()?;
        let max_length_byte = stream.read_u8()?;
        let max_weight = stream.read_f32()?;
        let first_block_offset = stream.read_vbyte()?;
        let postings_byte_length = stream.read_vbyte()?;
        Ok(TermInfo {
            doc_frequency,
            total_term_frequency,
            min_length_byte,
            max_length_byte,
            max_weight,
            first_block_offset,
            postings_byte_length,
        })
    }
}

struct IndexEntry {
    first_key: Bytes,
    last_key: Bytes,
    offset: u64,
    count: u32,
}

/// Accepts `(termbytes, TermInfo)` pairs in strictly ascending key order
/// (the writer pipeline sorts postings by term before flush) and packs them
/// into ~16 KiB regions, prefix-compressing consecutive keys within a
/// region.
pub struct TermDictWriter<'a, W: Write> {
    out: &'a mut W,
    offset: u64,
    index: Vec<IndexEntry>,
    region: Vec<u8>,
    region_first_key: Option<Bytes>,
    region_last_key: Option<Bytes>,
    region_count: u32,
    prev_key: Bytes,
}

impl<'a, W: Write> TermDictWriter<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Self {
            out,
            offset: 0,
            index: Vec::new(),
            region: Vec::new(),
            region_first_key: None,
            region_last_key: None,
            region_count: 0,
            prev_key: Bytes::from_slice(&[]),
        }
    }

    pub fn add(&mut self, key: &[u8], info: TermInfo) -> Result<(), Error> {
        debug_assert!(self.region_last_key.is_none() || self.prev_key.as_bytes() < key, "keys must be strictly ascending");
        let shared = common_prefix_len(self.prev_key.as_bytes(), key);
        let suffix = &key[shared..];

        write_vbyte(shared as u64, &mut self.region)?;
        write_vbyte(suffix.len() as u64, &mut self.region)?;
        self.region.write_all(suffix)?;
        info.encode(&mut self.region)?;

        if self.region_first_key.is_none() {
            self.region_first_key = Some(Bytes::from_slice(key));
        }
        self.region_last_key = Some(Bytes::from_slice(key));
        self.region_count += 1;
        self.prev_key = Bytes::from_slice(key);

        if self.region.len() >= TARGET_REGION_BYTES {
            self.flush_region()?;
        }
        Ok(())
    }

    fn flush_region(&mut self) -> Result<(), Error> {
        if self.region_count == 0 {
            return Ok(());
        }
        self.out.write_all(&self.region)?;
        self.index.push(IndexEntry {
            first_key: self.region_first_key.take().unwrap(),
            last_key: self.region_last_key.take().unwrap(),
            offset: self.offset,
            count: self.region_count,
        });
        self.offset += self.region.len() as u64;
        self.region.clear();
        self.region_count = 0;
        self.prev_key = Bytes::from_slice(&[]);
        Ok(())
    }

    /// Flush the final partial region and write the top-level index.
    pub fn finish(mut self) -> Result<(), Error> {
        self.flush_region()?;
        let index_offset = self.offset;
        for entry in &self.index {
            write_vbyte(entry.first_key.len() as u64, self.out)?;
            self.out.write_all(entry.first_key.as_bytes())?;
            write_vbyte(entry.last_key.len() as u64, self.out)?;
            self.out.write_all(entry.last_key.as_bytes())?;
            self.out.write_all(&entry.offset.to_be_bytes())?;
            self.out.write_all(&entry.count.to_be_bytes())?;
        }
        self.out.write_all(&index_offset.to_be_bytes())?;
        self.out.write_all(&(self.index.len() as u32).to_be_bytes())?;
        self.out.write_all(MAGIC)?;
        Ok(())
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

struct ReaderIndexEntry {
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    offset: u64,
    count: u32,
}

/// Random-access reader over a term dictionary file. `seek` binary-searches
/// the top-level index, then linearly scans the target region (regions are
/// small by construction, so a linear scan is cheap and keeps prefix
/// decompression simple).
pub struct TermDict {
    data: Data,
    index: Vec<ReaderIndexEntry>,
}

impl TermDict {
    pub fn open(data: Data) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < 16 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [0; 4] });
        }
        let trailer_start = bytes.len() - 16;
        let index_offset = data.read_u64_be(trailer_start)? as usize;
        let index_count = data.read_u32_be(trailer_start + 8)?;

        let mut cursor = index_offset;
        let mut index = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let (first_key, next) = read_len_prefixed(bytes, cursor)?;
            cursor = next;
            let (last_key, next) = read_len_prefixed(bytes, cursor)?;
            cursor = next;
            let offset = data.read_u64_be(cursor)?;
            cursor += 8;
            let count = data.read_u32_be(cursor)?;
            cursor += 4;
            index.push(ReaderIndexEntry { first_key, last_key, offset, count });
        }
        Ok(Self { data, index })
    }

    /// Exact lookup; `None` if the key isn't present.
    pub fn get(&self, key: &[u8]) -> Result<Option<TermInfo>, Error> {
        let region_idx = match self.index.binary_search_by(|e| {
            if key < e.first_key.as_slice() {
                std::cmp::Ordering::Greater
            } else if key > e.last_key.as_slice() {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        }) {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        self.scan_region(region_idx, |found, info| if found == key { Some(info) } else { None })
    }

    /// All `(termbytes, TermInfo)` pairs whose key starts with `prefix`, in
    /// ascending order (used by wildcard/prefix query expansion).
    pub fn expand_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, TermInfo)>, Error> {
        let upper = bump(prefix);
        let mut results = Vec::new();
        for (idx, entry) in self.index.iter().enumerate() {
            if entry.last_key.as_slice() < prefix {
                continue;
            }
            if entry.first_key.as_slice() >= upper.as_slice() {
                break;
            }
            self.collect_region_prefix(idx, prefix, &mut results)?;
        }
        Ok(results)
    }

    fn collect_region_prefix(&self, region_idx: usize, prefix: &[u8], out: &mut Vec<(Vec<u8>, TermInfo)>) -> Result<(), Error> {
        self.for_each_in_region(region_idx, |key, info| {
            if key.starts_with(prefix) {
                out.push((key.to_vec(), info));
            }
        })
    }

    /// All `(termbytes, TermInfo)` pairs within `[lower, upper]` (bounds
    /// optional, inclusivity per `include_lower`/`include_upper`), in
    /// ascending order. Used by range-query lowering (spec §4.8).
    pub fn range(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Vec<(Vec<u8>, TermInfo)>, Error> {
        let mut results = Vec::new();
        for (idx, entry) in self.index.iter().enumerate() {
            if let Some(u) = upper {
                if entry.first_key.as_slice() > u {
                    break;
                }
            }
            if let Some(l) = lower {
                if entry.last_key.as_slice() < l {
                    continue;
                }
            }
            self.for_each_in_region(idx, |key, info| {
                let above_lower = match lower {
                    None => true,
                    Some(l) => if include_lower { key >= l } else { key > l },
                };
                let below_upper = match upper {
                    None => true,
                    Some(u) => if include_upper { key <= u } else { key < u },
                };
                if above_lower && below_upper {
                    results.push((key.to_vec(), info));
                }
            })?;
        }
        Ok(results)
    }

    fn scan_region<T>(&self, region_idx: usize, mut f: impl FnMut(&[u8], TermInfo) -> Option<T>) -> Result<Option<T>, Error> {
        let mut found = None;
        self.for_each_in_region(region_idx, |key, info| {
            if found.is_none() {
                found = f(key, info);
            }
        })?;
        Ok(found)
    }

    fn for_each_in_region(&self, region_idx: usize, mut f: impl FnMut(&[u8], TermInfo)) -> Result<(), Error> {
        let entry = &self.index[region_idx];
        let bytes = self.data.as_bytes();
        let mut cursor = entry.offset as usize;
        let mut key = Vec::new();
        for _ in 0..entry.count {
            let mut stream = SliceInputStream::new(&bytes[cursor..]);
            let shared = stream.read_vbyte()? as usize;
            let suffix_len = stream.read_vbyte()? as usize;
            let suffix = stream.read_bytes(suffix_len)?;
            key.truncate(shared);
            key.extend_from_slice(suffix);
            let info = TermInfo::decode(&mut stream)?;
            f(&key, info);
            cursor += stream.tell();
        }
        Ok(())
    }
}

fn read_len_prefixed(bytes: &[u8], mut at: usize) -> Result<(Vec<u8>, usize), Error> {
    let mut stream = SliceInputStream::new(&bytes[at..]);
    let len = stream.read_vbyte()? as usize;
    let consumed = stream.tell();
    at += consumed;
    if at + len > bytes.len() {
        return Err(Error::OverrunError);
    }
    Ok((bytes[at..at + len].to_vec(), at + len))
}

/// Smallest byte string greater than every string with `prefix` as a
/// prefix; used to bound prefix expansion across regions.
fn bump(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < 0xff {
            *last += 1;
            return out;
        }
        out.pop();
    }
    vec![0xff; prefix.len() + 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn info(df: u64) -> TermInfo {
        TermInfo {
            doc_frequency: df,
            total_term_frequency: df * 2,
            min_length_byte: 1,
            max_length_byte: 10,
            max_weight: 1.0,
            first_block_offset: 0,
            postings_byte_length: 100,
        }
    }

    fn build(keys: &[&str]) -> TermDict {
        let mut buf = Vec::new();
        {
            let mut writer = TermDictWriter::new(&mut buf);
            for (i, k) in keys.iter().enumerate() {
                writer.add(k.as_bytes(), info(i as u64 + 1)).unwrap();
            }
            writer.finish().unwrap();
        }
        let len = buf.len();
        TermDict::open(Data::Owned { bytes: Arc::new(buf), start: 0, len }).unwrap()
    }

    #[test]
    fn exact_lookup_round_trips() {
        let dict = build(&["apple", "banana", "cherry", "date", "fig"]);
        assert_eq!(dict.get(b"banana").unwrap().unwrap().doc_frequency, 2);
        assert_eq!(dict.get(b"fig").unwrap().unwrap().doc_frequency, 5);
        assert!(dict.get(b"grape").unwrap().is_none());
    }

    #[test]
    fn prefix_expansion_finds_matches() {
        let dict = build(&["car", "cart", "cat", "do", "dog"]);
        let mut hits: Vec<_> = dict.expand_prefix(b"ca").unwrap().into_iter().map(|(k, _)| k).collect();
        hits.sort();
        assert_eq!(hits, vec![b"car".to_vec(), b"cart".to_vec(), b"cat".to_vec()]);
    }

    #[test]
    fn many_keys_span_multiple_regions() {
        let keys: Vec<String> = (0..4000).map(|i| format!("term{:06}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        let dict = build(&refs);
        assert!(dict.index.len() > 1);
        assert_eq!(dict.get(b"term003999").unwrap().unwrap().doc_frequency, 4000);
        assert_eq!(dict.get(b"term000000").unwrap().unwrap().doc_frequency, 1);
    }
}
