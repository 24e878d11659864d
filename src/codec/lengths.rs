//! Per-segment field lengths store (spec §4.4): for each scored field, a
//! dense array of `length_to_byte`-compressed lengths indexed by docnum.
//! Grounded in the teacher's `mem/index.rs` `DenseU32FieldBuilder`, which
//! pads missing docnums with zero to stay dense and append-only; generalized
//! from one dense `u32` array per field to one length-byte array per scored
//! field, multiplexed into a single `<segid>.fln` file with a trailing
//! per-field directory (spec §6's "ordered fixed-width fields per file
//! type" header convention).

use crate::codec::length_byte::{byte_to_length, length_to_byte};
use crate::schema::FieldId;
use crate::store::Data;
use crate::Error;
use std::collections::BTreeMap;
use std::io::Write;

const MAGIC: &[u8; 4] = b"Fln1";

/// Accumulates one length-byte array per scored field. `add` must be called
/// with non-decreasing docnums per field; gaps are padded with zero, the
/// byte for length 0 (matches the teacher's dense-builder padding).
#[derive(Default)]
pub struct LengthsWriter {
    fields: BTreeMap<FieldId, Vec<u8>>,
}

impl LengthsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: FieldId, docnum: u32, length: u32) {
        let bytes = self.fields.entry(field).or_default();
        while bytes.len() < docnum as usize {
            bytes.push(0);
        }
        debug_assert_eq!(bytes.len(), docnum as usize);
        bytes.push(length_to_byte(length));
    }

    pub fn finish<W: Write>(self, out: &mut W) -> Result<(), Error> {
        let mut offset = 0u64;
        let mut directory = Vec::new();
        for (field, bytes) in &self.fields {
            out.write_all(bytes)?;
            directory.push((*field, offset, bytes.len() as u32));
            offset += bytes.len() as u64;
        }
        let index_offset = offset;
        for (field, field_offset, count) in &directory {
            out.write_all(&field.0.to_be_bytes())?;
            out.write_all(&field_offset.to_be_bytes())?;
            out.write_all(&count.to_be_bytes())?;
        }
        out.write_all(&index_offset.to_be_bytes())?;
        out.write_all(&(directory.len() as u32).to_be_bytes())?;
        out.write_all(MAGIC)?;
        Ok(())
    }
}

struct FieldSlot {
    offset: usize,
    count: u32,
}

/// Random-access reader: `get(field, docnum)` decompresses one byte back
/// into an approximate length in O(1).
pub struct LengthsReader {
    data: Data,
    fields: BTreeMap<FieldId, FieldSlot>,
}

impl LengthsReader {
    pub fn open(data: Data) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < 16 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [0; 4] });
        }
        let trailer_start = bytes.len() - 16;
        let index_offset = data.read_u64_be(trailer_start)? as usize;
        let n_fields = data.read_u32_be(trailer_start + 8)?;

        let mut fields = BTreeMap::new();
        let mut cursor = index_offset;
        for _ in 0..n_fields {
            let field = crate::schema::FieldId(u16::from_be_bytes([bytes[cursor], bytes[cursor + 1]]));
            cursor += 2;
            let field_offset = data.read_u64_be(cursor)? as usize;
            cursor += 8;
            let count = data.read_u32_be(cursor)?;
            cursor += 4;
            fields.insert(field, FieldSlot { offset: field_offset, count });
        }
        Ok(Self { data, fields })
    }

    /// Approximate token count the analyzer emitted for `field` of
    /// `docnum`; `None` if the field has no length array or the doc is past
    /// its extent (never indexed for this field).
    pub fn get(&self, field: FieldId, docnum: u32) -> Option<u32> {
        let slot = self.fields.get(&field)?;
        if docnum >= slot.count {
            return None;
        }
        let byte = self.data.as_bytes()[slot.offset + docnum as usize];
        Some(byte_to_length(byte))
    }

    pub fn has_field(&self, field: FieldId) -> bool {
        self.fields.contains_key(&field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn round_trips_dense_lengths() {
        let mut writer = LengthsWriter::new();
        writer.add(FieldId(0), 0, 5);
        writer.add(FieldId(0), 1, 12);
        writer.add(FieldId(0), 2, 1000);
        writer.add(FieldId(1), 0, 3);

        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        let data = Data::Owned { bytes: Arc::new(buf), start: 0, len };
        let reader = LengthsReader::open(data).unwrap();

        assert_eq!(reader.get(FieldId(0), 0), Some(5));
        assert_eq!(reader.get(FieldId(0), 1), Some(12));
        assert_eq!(reader.get(FieldId(1), 0), Some(3));
        assert_eq!(reader.get(FieldId(0), 99), None);
        assert!(!reader.has_field(FieldId(2)));
    }

    #[test]
    fn pads_missing_docnums_with_zero() {
        let mut writer = LengthsWriter::new();
        writer.add(FieldId(0), 0, 5);
        writer.add(FieldId(0), 3, 7);
        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        let data = Data::Owned { bytes: Arc::new(buf), start: 0, len };
        let reader = LengthsReader::open(data).unwrap();
        assert_eq!(reader.get(FieldId(0), 1), Some(0));
        assert_eq!(reader.get(FieldId(0), 2), Some(0));
        assert_eq!(reader.get(FieldId(0), 3), Some(7));
    }
}
