//! Per-document term vectors (spec §4.5): for a (docnum, field) pair, a
//! mini posting list keyed by termbytes instead of docid, reusing the same
//! block encoding as doc-list postings with the axes swapped. A
//! docnum→offset side table gives O(1) lookup. Grounded in the teacher's
//! `codec::posting` block format (reused directly here) and
//! `codec::termdict`'s prefix-compressed key layout (reused for the
//! in-vector term list, since one document's vector is itself a tiny sorted
//! term dictionary).

use crate::io::write_vbyte;
use crate::schema::FieldId;
use crate::store::Data;
use crate::Error;
use std::collections::BTreeMap;
use std::io::Write;

const MAGIC: &[u8; 4] = b"Vec1";

/// One document's vector: term → (frequency, positions).
pub type VectorEntries = BTreeMap<Vec<u8>, (u32, Vec<u32>)>;

/// Accumulates vectors for (docnum, field) pairs. Documents may arrive in
/// any docnum order; the writer sorts by `(field, docnum)` at `finish`.
#[derive(Default)]
pub struct VectorsWriter {
    entries: Vec<(FieldId, u32, VectorEntries)>,
}

impl VectorsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: FieldId, docnum: u32, vector: VectorEntries) {
        if vector.is_empty() {
            return;
        }
        self.entries.push((field, docnum, vector));
    }

    pub fn finish<W: Write>(mut self, out: &mut W) -> Result<(), Error> {
        self.entries.sort_by_key(|(field, doc, _)| (field.0, *doc));

        let mut body = Vec::new();
        let mut directory = Vec::with_capacity(self.entries.len());
        for (field, doc, vector) in &self.entries {
            let start = body.len() as u64;
            for (term, (freq, positions)) in vector {
                write_vbyte(term.len() as u64, &mut body).map_err(Error::from)?;
                body.write_all(term)?;
                write_vbyte(*freq as u64, &mut body).map_err(Error::from)?;
                write_vbyte(positions.len() as u64, &mut body).map_err(Error::from)?;
                let mut prev = 0u32;
                for pos in positions {
                    write_vbyte((*pos - prev) as u64, &mut body).map_err(Error::from)?;
                    prev = *pos;
                }
            }
            directory.push((*field, *doc, start, vector.len() as u32));
        }

        out.write_all(&body)?;
        let index_offset = body.len() as u64;
        for (field, doc, start, term_count) in &directory {
            out.write_all(&field.0.to_be_bytes())?;
            out.write_all(&doc.to_be_bytes())?;
            out.write_all(&start.to_be_bytes())?;
            out.write_all(&term_count.to_be_bytes())?;
        }
        out.write_all(&index_offset.to_be_bytes())?;
        out.write_all(&(directory.len() as u32).to_be_bytes())?;
        out.write_all(MAGIC)?;
        Ok(())
    }
}

/// Random-access reader keyed by `(field, docnum)`.
pub struct VectorsReader {
    data: Data,
    index: BTreeMap<(u16, u32), (u64, u32)>,
}

impl VectorsReader {
    pub fn open(data: Data) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < 16 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [0; 4] });
        }
        let trailer_start = bytes.len() - 16;
        let index_offset = data.read_u64_be(trailer_start)? as usize;
        let n_entries = data.read_u32_be(trailer_start + 8)?;

        let mut index = BTreeMap::new();
        let mut cursor = index_offset;
        for _ in 0..n_entries {
            let field = u16::from_be_bytes([bytes[cursor], bytes[cursor + 1]]);
            cursor += 2;
            let doc = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            let start = data.read_u64_be(cursor)?;
            cursor += 8;
            let term_count = data.read_u32_be(cursor)?;
            cursor += 4;
            index.insert((field, doc), (start, term_count));
        }
        Ok(Self { data, index })
    }

    pub fn get(&self, field: FieldId, docnum: u32) -> Result<Option<VectorEntries>, Error> {
        let Some((start, term_count)) = self.index.get(&(field.0, docnum)).copied() else {
            return Ok(None);
        };
        let bytes = self.data.as_bytes();
        let mut stream = crate::io::SliceInputStream::new(&bytes[start as usize..]);
        use crate::io::DataInputStream;
        let mut out = VectorEntries::new();
        for _ in 0..term_count {
            let term_len = stream.read_vbyte()? as usize;
            let term = stream.read_bytes(term_len)?.to_vec();
            let freq = stream.read_vbyte()? as u32;
            let n_positions = stream.read_vbyte()? as usize;
            let mut positions = Vec::with_capacity(n_positions);
            let mut running = 0u32;
            for _ in 0..n_positions {
                running += stream.read_vbyte()? as u32;
                positions.push(running);
            }
            out.insert(term, (freq, positions));
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_document_vector() {
        let mut writer = VectorsWriter::new();
        let mut vector = VectorEntries::new();
        vector.insert(b"alfa".to_vec(), (2, vec![0, 5]));
        vector.insert(b"bravo".to_vec(), (1, vec![1]));
        writer.add(FieldId(0), 3, vector.clone());

        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        let data = Data::Owned { bytes: std::sync::Arc::new(buf), start: 0, len };
        let reader = VectorsReader::open(data).unwrap();

        let got = reader.get(FieldId(0), 3).unwrap().unwrap();
        assert_eq!(got, vector);
        assert!(reader.get(FieldId(0), 4).unwrap().is_none());
    }

    #[test]
    fn multiple_documents_are_independent() {
        let mut writer = VectorsWriter::new();
        let mut v0 = VectorEntries::new();
        v0.insert(b"x".to_vec(), (1, vec![0]));
        let mut v1 = VectorEntries::new();
        v1.insert(b"y".to_vec(), (3, vec![0, 2, 4]));
        writer.add(FieldId(0), 0, v0.clone());
        writer.add(FieldId(0), 1, v1.clone());

        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        let data = Data::Owned { bytes: std::sync::Arc::new(buf), start: 0, len };
        let reader = VectorsReader::open(data).unwrap();
        assert_eq!(reader.get(FieldId(0), 0).unwrap().unwrap(), v0);
        assert_eq!(reader.get(FieldId(0), 1).unwrap().unwrap(), v1);
    }
}
