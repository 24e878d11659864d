//! Stored-fields store (spec §4.4): one length-prefixed, lz4-compressed
//! serde_json blob per docnum, plus a docnum→offset index so random access
//! costs one seek. Grounded in the teacher's `mem/flush.rs`
//! `flush_direct_indexes` (one entry per docnum, keyed by doc id) and
//! `mem/encoders.rs`'s `LZ4StringEncoder` (compress the value, vbyte-prefix
//! its length) for the per-value encoding; generalized from per-field files
//! to one file per segment holding every stored field of a document
//! together, since the spec's stored-fields value is "a mapping from field
//! name to opaque value" rather than one value per file.

use crate::schema::FieldId;
use crate::store::Data;
use crate::Error;
use std::io::Write;

const MAGIC: &[u8; 4] = b"Fdt1";

/// One document's worth of stored field values, in field-id order.
pub type StoredDocument = Vec<(FieldId, String)>;

/// Accepts documents in ascending docnum order (the writer pipeline assigns
/// docnums in `add_document` call order) and appends each as a
/// length-prefixed JSON blob.
#[derive(Default)]
pub struct StoredFieldsWriter {
    body: Vec<u8>,
    offsets: Vec<u64>,
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc: &StoredDocument) -> Result<(), Error> {
        self.offsets.push(self.body.len() as u64);
        let encoded = serde_json::to_vec(doc)?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);
        crate::io::write_vbyte(compressed.len() as u64, &mut self.body).map_err(Error::from)?;
        self.body.write_all(&compressed)?;
        Ok(())
    }

    pub fn finish<W: Write>(self, out: &mut W) -> Result<(), Error> {
        out.write_all(&self.body)?;
        let index_offset = self.body.len() as u64;
        for offset in &self.offsets {
            out.write_all(&offset.to_be_bytes())?;
        }
        out.write_all(&index_offset.to_be_bytes())?;
        out.write_all(&(self.offsets.len() as u32).to_be_bytes())?;
        out.write_all(MAGIC)?;
        Ok(())
    }
}

/// Random-access reader over stored documents.
pub struct StoredFieldsReader {
    data: Data,
    offsets: Vec<u64>,
}

impl StoredFieldsReader {
    pub fn open(data: Data) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < 16 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [0; 4] });
        }
        let trailer_start = bytes.len() - 16;
        let index_offset = data.read_u64_be(trailer_start)? as usize;
        let n_docs = data.read_u32_be(trailer_start + 8)? as usize;

        let mut offsets = Vec::with_capacity(n_docs);
        let mut cursor = index_offset;
        for _ in 0..n_docs {
            offsets.push(data.read_u64_be(cursor)?);
            cursor += 8;
        }
        Ok(Self { data, offsets })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, docnum: u32) -> Result<StoredDocument, Error> {
        let idx = docnum as usize;
        if idx >= self.offsets.len() {
            return Err(Error::OverrunError);
        }
        let bytes = self.data.as_bytes();
        let start = self.offsets[idx] as usize;
        let mut stream = crate::io::SliceInputStream::new(&bytes[start..]);
        use crate::io::DataInputStream;
        let len = stream.read_vbyte()? as usize;
        let consumed = stream.tell();
        let blob = &bytes[start + consumed..start + consumed + len];
        let decompressed = lz4_flex::decompress_size_prepended(blob)
            .map_err(|e| Error::SchemaError(e.to_string()))?;
        Ok(serde_json::from_slice(&decompressed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn round_trips_stored_documents() {
        let mut writer = StoredFieldsWriter::new();
        writer.add(&vec![(FieldId(0), "First".to_owned())]).unwrap();
        writer.add(&vec![(FieldId(0), "Second".to_owned()), (FieldId(2), "extra".to_owned())]).unwrap();

        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        let data = Data::Owned { bytes: Arc::new(buf), start: 0, len };
        let reader = StoredFieldsReader::open(data).unwrap();

        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get(0).unwrap(), vec![(FieldId(0), "First".to_owned())]);
        assert_eq!(
            reader.get(1).unwrap(),
            vec![(FieldId(0), "Second".to_owned()), (FieldId(2), "extra".to_owned())]
        );
        assert!(reader.get(2).is_err());
    }
}
