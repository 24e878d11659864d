//! Per-field typed column stores (spec §4.4): one `<segid>.col.<field>`
//! file per column-typed field, selected by `schema::ColumnType`. Grounded
//! in the teacher's `mem/index.rs` `DenseU32FieldBuilder` (dense,
//! docnum-indexed, zero-padded on gaps) for the fixed-width variants, and in
//! `original_source/src/whoosh/columns.py` (`VarBytesColumn`,
//! `RefBytesColumn`, `CompressedBytesColumn`, `NumericColumn`,
//! `BitColumn`) for the variable-width and dictionary-encoded ones.
//!
//! `RoaringBitset` is encoded identically to `Bitset` (a plain bit vector):
//! the teacher's dependency stack carries no roaring-bitmap crate, and
//! adding one for a single column variant would violate "don't fabricate
//! dependencies" (see DESIGN.md). `CompactInt` shares the variable-length
//! "dense offsets" layout `VarBytes` uses rather than a true bit-packed
//! encoding, for the same reason: simplicity and an honest dependency set
//! over byte-perfect compactness.

use crate::schema::ColumnType;
use crate::store::Data;
use crate::Error;
use std::io::Write;

const MAGIC: &[u8; 4] = b"Col1";

/// One column cell. Writers accept whichever variant fits their
/// `ColumnType`; callers building a column for a numeric field pass `Int`,
/// a boolean field passes `Bool`, everything else passes `Bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Bytes(Vec<u8>),
    Int(i64),
    Bool(bool),
}

impl ColumnValue {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            ColumnValue::Bytes(b) => b,
            ColumnValue::Int(v) => zigzag_encode(v).to_vec(),
            ColumnValue::Bool(b) => vec![b as u8],
        }
    }
}

/// Folds a signed value into an unsigned one so small magnitudes (positive
/// or negative) vbyte-encode to few bytes. Implemented as the standard
/// shift/xor zigzag rather than negating `v` directly: negating `i64::MIN`
/// overflows (`-i64::MIN` doesn't fit in an `i64`), which `(-v) as u64`
/// would panic on in debug builds for every negative-extreme value this
/// column type can legally store.
fn zigzag_encode(v: i64) -> Vec<u8> {
    let folded = ((v << 1) ^ (v >> 63)) as u64;
    let mut buf = Vec::new();
    crate::io::write_vbyte(folded, &mut buf).unwrap();
    buf
}

fn zigzag_decode(bytes: &[u8]) -> i64 {
    use crate::io::{DataInputStream, SliceInputStream};
    let mut stream = SliceInputStream::new(bytes);
    let folded = stream.read_vbyte().unwrap_or(0);
    ((folded >> 1) as i64) ^ -((folded & 1) as i64)
}

/// Accumulates `(docnum, value)` pairs for one field's column, in
/// non-decreasing docnum order (spec §4.4's `add` contract), and emits a
/// self-describing footer naming the `ColumnType` so the reader doesn't
/// need it supplied from outside (though the schema always has it too).
pub struct ColumnWriter {
    column_type: ColumnType,
    entries: Vec<(u32, ColumnValue)>,
    last_docnum: Option<u32>,
}

impl ColumnWriter {
    pub fn new(column_type: ColumnType) -> Self {
        Self { column_type, entries: Vec::new(), last_docnum: None }
    }

    pub fn add(&mut self, docnum: u32, value: ColumnValue) {
        debug_assert!(self.last_docnum.map(|d| docnum >= d).unwrap_or(true), "docnums must be non-decreasing");
        self.last_docnum = Some(docnum);
        self.entries.push((docnum, value));
    }

    pub fn finish<W: Write>(self, out: &mut W) -> Result<(), Error> {
        let max_docnum = self.entries.iter().map(|(d, _)| *d).max();
        let n_docs = max_docnum.map(|m| m as usize + 1).unwrap_or(0);

        match self.column_type {
            ColumnType::Bitset | ColumnType::RoaringBitset => {
                let mut bits = vec![0u8; (n_docs + 7) / 8];
                for (doc, value) in &self.entries {
                    let present = match value {
                        ColumnValue::Bool(b) => *b,
                        _ => true,
                    };
                    if present {
                        bits[*doc as usize / 8] |= 1 << (*doc as usize % 8);
                    }
                }
                out.write_all(&bits)?;
                write_footer(out, &self.column_type, 0, n_docs as u32)
            }
            ColumnType::FixedBytes(width) => {
                let width = width as usize;
                let mut body = vec![0u8; n_docs * width];
                for (doc, value) in self.entries {
                    let bytes = value.into_bytes();
                    let at = doc as usize * width;
                    let n = bytes.len().min(width);
                    body[at..at + n].copy_from_slice(&bytes[..n]);
                }
                out.write_all(&body)?;
                write_footer(out, &self.column_type, width as u64, n_docs as u32)
            }
            ColumnType::VarBytes | ColumnType::Pickled | ColumnType::CompactInt => {
                let mut values = vec![Vec::new(); n_docs];
                for (doc, value) in self.entries {
                    values[doc as usize] = value.into_bytes();
                }
                write_varlen_dense(out, &values, &self.column_type, false)
            }
            ColumnType::CompressedBytes => {
                let mut values = vec![Vec::new(); n_docs];
                for (doc, value) in self.entries {
                    values[doc as usize] = value.into_bytes();
                }
                write_varlen_dense(out, &values, &self.column_type, true)
            }
            ColumnType::RefBytes => {
                let mut dict: Vec<Vec<u8>> = vec![Vec::new()];
                let mut dict_index: std::collections::HashMap<Vec<u8>, u32> = std::collections::HashMap::new();
                dict_index.insert(Vec::new(), 0);
                let mut refs = vec![0u32; n_docs];
                for (doc, value) in self.entries {
                    let bytes = value.into_bytes();
                    let idx = *dict_index.entry(bytes.clone()).or_insert_with(|| {
                        dict.push(bytes);
                        (dict.len() - 1) as u32
                    });
                    refs[doc as usize] = idx;
                }
                let mut ref_bytes = Vec::with_capacity(refs.len() * 2);
                for r in &refs {
                    crate::io::write_vbyte(*r as u64, &mut ref_bytes).map_err(Error::from)?;
                }
                write_varlen_dense_with_prefix(out, &dict, &ref_bytes, &ColumnType::RefBytes, n_docs as u32)
            }
        }
    }
}

fn write_footer<W: Write>(out: &mut W, column_type: &ColumnType, width: u64, n_docs: u32) -> Result<(), Error> {
    out.write_all(&width.to_be_bytes())?;
    out.write_all(&n_docs.to_be_bytes())?;
    out.write_all(&[tag_of(column_type)])?;
    out.write_all(MAGIC)?;
    Ok(())
}

fn write_varlen_dense<W: Write>(out: &mut W, values: &[Vec<u8>], column_type: &ColumnType, compress: bool) -> Result<(), Error> {
    let mut body = Vec::new();
    let mut offsets = Vec::with_capacity(values.len() + 1);
    for v in values {
        offsets.push(body.len() as u64);
        if compress {
            let mut encoder = snap::raw::Encoder::new();
            let compressed = encoder.compress_vec(v).map_err(|e| Error::SchemaError(e.to_string()))?;
            crate::io::write_vbyte(compressed.len() as u64, &mut body).map_err(Error::from)?;
            body.write_all(&compressed)?;
        } else {
            crate::io::write_vbyte(v.len() as u64, &mut body).map_err(Error::from)?;
            body.write_all(v)?;
        }
    }
    offsets.push(body.len() as u64);
    out.write_all(&body)?;
    let index_offset = body.len() as u64;
    for offset in &offsets {
        out.write_all(&offset.to_be_bytes())?;
    }
    out.write_all(&index_offset.to_be_bytes())?;
    out.write_all(&(values.len() as u32).to_be_bytes())?;
    out.write_all(&[tag_of(column_type)])?;
    out.write_all(MAGIC)?;
    Ok(())
}

/// `RefBytes` layout: dictionary blob (length-prefixed entries) then the
/// per-doc reference array, then the same trailer every variable-length
/// column uses, keyed by a dictionary-length field so the reader knows
/// where the dictionary ends and the reference array begins.
fn write_varlen_dense_with_prefix<W: Write>(
    out: &mut W,
    dict: &[Vec<u8>],
    refs: &[u8],
    column_type: &ColumnType,
    n_docs: u32,
) -> Result<(), Error> {
    let mut dict_body = Vec::new();
    for entry in dict {
        crate::io::write_vbyte(entry.len() as u64, &mut dict_body).map_err(Error::from)?;
        dict_body.write_all(entry)?;
    }
    out.write_all(&dict_body)?;
    out.write_all(refs)?;
    out.write_all(&(dict_body.len() as u64).to_be_bytes())?;
    out.write_all(&(dict.len() as u32).to_be_bytes())?;
    out.write_all(&(refs.len() as u64).to_be_bytes())?;
    out.write_all(&n_docs.to_be_bytes())?;
    out.write_all(&[tag_of(column_type)])?;
    out.write_all(MAGIC)?;
    Ok(())
}

fn tag_of(column_type: &ColumnType) -> u8 {
    match column_type {
        ColumnType::VarBytes => 1,
        ColumnType::FixedBytes(_) => 2,
        ColumnType::RefBytes => 3,
        ColumnType::CompactInt => 4,
        ColumnType::Bitset => 5,
        ColumnType::RoaringBitset => 6,
        ColumnType::CompressedBytes => 7,
        ColumnType::Pickled => 8,
    }
}

enum Body {
    Fixed { width: usize },
    Bitset,
    VarLen { compressed: bool },
    Ref,
}

/// Random-access reader over one column file.
pub struct ColumnReader {
    data: Data,
    n_docs: u32,
    body: Body,
    offsets: Vec<u64>,
    dict: Vec<(u64, u64)>,
    dict_base: usize,
    refs_base: usize,
}

impl ColumnReader {
    pub fn open(data: Data, column_type: ColumnType) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < 4 || &bytes[bytes.len() - 4..] != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [0; 4] });
        }
        match column_type {
            ColumnType::Bitset | ColumnType::RoaringBitset => {
                let trailer_start = bytes.len() - 4 - 1 - 4 - 8;
                let n_docs = data.read_u32_be(trailer_start + 8)?;
                Ok(Self { data, n_docs, body: Body::Bitset, offsets: Vec::new(), dict: Vec::new(), dict_base: 0, refs_base: 0 })
            }
            ColumnType::FixedBytes(width) => {
                let trailer_start = bytes.len() - 4 - 1 - 4 - 8;
                let n_docs = data.read_u32_be(trailer_start + 8)?;
                Ok(Self { data, n_docs, body: Body::Fixed { width: width as usize }, offsets: Vec::new(), dict: Vec::new(), dict_base: 0, refs_base: 0 })
            }
            ColumnType::RefBytes => {
                let trailer_start = bytes.len() - (8 + 4 + 8 + 4 + 1 + 4);
                let dict_len = data.read_u64_be(trailer_start)? as usize;
                let n_dict = data.read_u32_be(trailer_start + 8)?;
                let refs_len = data.read_u64_be(trailer_start + 12)? as usize;
                let n_docs = data.read_u32_be(trailer_start + 20)?;
                let mut dict = Vec::with_capacity(n_dict as usize);
                let mut cursor = 0usize;
                for _ in 0..n_dict {
                    let mut stream = crate::io::SliceInputStream::new(&bytes[cursor..]);
                    use crate::io::DataInputStream;
                    let len = stream.read_vbyte()? as usize;
                    let header = stream.tell();
                    dict.push(((cursor + header) as u64, len as u64));
                    cursor += header + len;
                }
                let refs_base = dict_len;
                let _ = refs_len;
                Ok(Self { data, n_docs, body: Body::Ref, offsets: Vec::new(), dict, dict_base: 0, refs_base })
            }
            ColumnType::VarBytes | ColumnType::Pickled | ColumnType::CompactInt | ColumnType::CompressedBytes => {
                let trailer_start = bytes.len() - 4 - 1 - 4 - 8;
                let index_offset = data.read_u64_be(trailer_start)? as usize;
                let n_docs = data.read_u32_be(trailer_start + 8)?;
                let mut offsets = Vec::with_capacity(n_docs as usize + 1);
                let mut cursor = index_offset;
                for _ in 0..=n_docs {
                    offsets.push(data.read_u64_be(cursor)?);
                    cursor += 8;
                }
                let compressed = matches!(column_type, ColumnType::CompressedBytes);
                Ok(Self { data, n_docs, body: Body::VarLen { compressed }, offsets, dict: Vec::new(), dict_base: 0, refs_base: 0 })
            }
        }
    }

    pub fn len(&self) -> u32 {
        self.n_docs
    }
    pub fn is_empty(&self) -> bool {
        self.n_docs == 0
    }

    pub fn get_bytes(&self, docnum: u32) -> Result<Option<Vec<u8>>, Error> {
        if docnum >= self.n_docs {
            return Ok(None);
        }
        let bytes = self.data.as_bytes();
        match &self.body {
            Body::Fixed { width } => {
                let at = docnum as usize * width;
                Ok(Some(bytes[at..at + width].to_vec()))
            }
            Body::VarLen { compressed } => {
                let start = self.offsets[docnum as usize] as usize;
                let end = self.offsets[docnum as usize + 1] as usize;
                let _ = end;
                let mut stream = crate::io::SliceInputStream::new(&bytes[start..]);
                use crate::io::DataInputStream;
                let len = stream.read_vbyte()? as usize;
                let header = stream.tell();
                let raw = &bytes[start + header..start + header + len];
                if *compressed {
                    let mut decoder = snap::raw::Decoder::new();
                    Ok(Some(decoder.decompress_vec(raw).map_err(|e| Error::SchemaError(e.to_string()))?))
                } else {
                    Ok(Some(raw.to_vec()))
                }
            }
            Body::Ref => {
                let ref_idx = self.read_ref(docnum)?;
                let (offset, len) = self.dict[ref_idx as usize];
                Ok(Some(bytes[offset as usize..offset as usize + len as usize].to_vec()))
            }
            Body::Bitset => {
                let present = bytes[docnum as usize / 8] & (1 << (docnum as usize % 8)) != 0;
                Ok(Some(vec![present as u8]))
            }
        }
    }

    /// Reference indices are vbyte-encoded, so looking one up means
    /// replaying the stream from the start of the reference array; fine for
    /// the small-cardinality categorical columns this encoding targets.
    fn read_ref(&self, docnum: u32) -> Result<u32, Error> {
        let bytes = self.data.as_bytes();
        let mut stream = crate::io::SliceInputStream::new(&bytes[self.refs_base..]);
        use crate::io::DataInputStream;
        for _ in 0..docnum {
            stream.read_vbyte()?;
        }
        Ok(stream.read_vbyte()? as u32)
    }

    pub fn get_int(&self, docnum: u32) -> Result<Option<i64>, Error> {
        Ok(self.get_bytes(docnum)?.map(|b| zigzag_decode(&b)))
    }

    pub fn get_bool(&self, docnum: u32) -> Result<bool, Error> {
        Ok(self.get_bytes(docnum)?.map(|b| b.first().copied().unwrap_or(0) != 0).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn build(column_type: ColumnType, entries: Vec<(u32, ColumnValue)>) -> ColumnReader {
        let mut writer = ColumnWriter::new(column_type);
        for (doc, value) in entries {
            writer.add(doc, value);
        }
        let mut buf = Vec::new();
        writer.finish(&mut buf).unwrap();
        let len = buf.len();
        ColumnReader::open(Data::Owned { bytes: Arc::new(buf), start: 0, len }, column_type).unwrap()
    }

    #[test]
    fn fixed_bytes_round_trips() {
        let reader = build(
            ColumnType::FixedBytes(4),
            vec![(0, ColumnValue::Int(7)), (1, ColumnValue::Int(-3))],
        );
        assert_eq!(reader.get_int(0).unwrap(), Some(7));
        assert_eq!(reader.get_int(1).unwrap(), Some(-3));
    }

    #[test]
    fn varbytes_round_trips_and_pads() {
        let reader = build(
            ColumnType::VarBytes,
            vec![(0, ColumnValue::Bytes(b"hello".to_vec())), (2, ColumnValue::Bytes(b"world!".to_vec()))],
        );
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get_bytes(0).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.get_bytes(1).unwrap(), Some(Vec::new()));
        assert_eq!(reader.get_bytes(2).unwrap(), Some(b"world!".to_vec()));
    }

    #[test]
    fn compact_int_round_trips_negative() {
        let reader = build(ColumnType::CompactInt, vec![(0, ColumnValue::Int(-42)), (1, ColumnValue::Int(42))]);
        assert_eq!(reader.get_int(0).unwrap(), Some(-42));
        assert_eq!(reader.get_int(1).unwrap(), Some(42));
    }

    #[test]
    fn compact_int_round_trips_extreme_values_without_overflow() {
        // i64::MIN can't be negated (`-i64::MIN` overflows `i64`), which a
        // naive zigzag implementation panics on in debug builds.
        let reader = build(
            ColumnType::CompactInt,
            vec![(0, ColumnValue::Int(i64::MIN)), (1, ColumnValue::Int(i64::MAX)), (2, ColumnValue::Int(0))],
        );
        assert_eq!(reader.get_int(0).unwrap(), Some(i64::MIN));
        assert_eq!(reader.get_int(1).unwrap(), Some(i64::MAX));
        assert_eq!(reader.get_int(2).unwrap(), Some(0));
    }

    #[test]
    fn bitset_round_trips() {
        let reader = build(
            ColumnType::Bitset,
            vec![(0, ColumnValue::Bool(true)), (1, ColumnValue::Bool(false)), (2, ColumnValue::Bool(true))],
        );
        assert!(reader.get_bool(0).unwrap());
        assert!(!reader.get_bool(1).unwrap());
        assert!(reader.get_bool(2).unwrap());
    }

    #[test]
    fn ref_bytes_dedups_repeated_values() {
        let reader = build(
            ColumnType::RefBytes,
            vec![
                (0, ColumnValue::Bytes(b"red".to_vec())),
                (1, ColumnValue::Bytes(b"blue".to_vec())),
                (2, ColumnValue::Bytes(b"red".to_vec())),
            ],
        );
        assert_eq!(reader.get_bytes(0).unwrap(), Some(b"red".to_vec()));
        assert_eq!(reader.get_bytes(1).unwrap(), Some(b"blue".to_vec()));
        assert_eq!(reader.get_bytes(2).unwrap(), Some(b"red".to_vec()));
    }

    #[test]
    fn compressed_bytes_round_trips() {
        let big = vec![b'x'; 500];
        let reader = build(ColumnType::CompressedBytes, vec![(0, ColumnValue::Bytes(big.clone()))]);
        assert_eq!(reader.get_bytes(0).unwrap(), Some(big));
    }
}
