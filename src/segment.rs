//! A segment: an immutable (except for its deletion bitmap) mini-index over
//! a disjoint, dense set of docnums (spec §3). Owns the codec file handles
//! listed in spec §6 and exposes the per-document reads a `SubSearcher`
//! needs. Grounded in the teacher's `mem/readers.rs`, which plays the same
//! role (bundling a vocabulary, postings, and per-doc stores behind one
//! reader) for Galago's flat file layout; generalized to the block codec in
//! `crate::codec` and the `Storage` abstraction instead of direct
//! filesystem paths.

use crate::codec::column::ColumnReader;
use crate::codec::length_byte::byte_to_length;
use crate::codec::lengths::LengthsReader;
use crate::codec::posting::PostingReader;
use crate::codec::stored::{StoredDocument, StoredFieldsReader};
use crate::codec::termdict::{TermDict, TermInfo};
use crate::codec::vectors::{VectorEntries, VectorsReader};
use crate::schema::{FieldId, Schema};
use crate::store::{Data, Storage};
use crate::{DocId, Error};
use crate::HashMap;
use std::sync::{Mutex, RwLock};

pub fn trm_file(id: &str) -> String {
    format!("{}.trm", id)
}
pub fn pst_file(id: &str) -> String {
    format!("{}.pst", id)
}
pub fn fln_file(id: &str) -> String {
    format!("{}.fln", id)
}
pub fn fdt_file(id: &str) -> String {
    format!("{}.fdt", id)
}
pub fn vec_file(id: &str) -> String {
    format!("{}.vec", id)
}
pub fn col_file(id: &str, field_name: &str) -> String {
    format!("{}.col.{}", id, field_name)
}
pub fn del_file(id: &str, generation: i64) -> String {
    format!("{}.del.{}", id, generation)
}

/// Generate a fresh random 16-byte hex segment id (spec §3).
pub fn new_segment_id() -> String {
    uuid::Uuid::new_v4().to_simple().to_string()
}

/// The committed shape of one segment, as stored in a TOC record (spec §3's
/// TOC "ordered list of segment records").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: String,
    pub total_doc_count: u32,
    /// Generation of the deletion sidecar to load, if any has ever been
    /// written for this segment (`None` means no doc in it is deleted yet).
    pub deletion_generation: Option<i64>,
}

impl SegmentRecord {
    pub fn fresh(id: String, total_doc_count: u32) -> Self {
        SegmentRecord { id, total_doc_count, deletion_generation: None }
    }
}

/// A bitmap of deleted docnums, OR-ed into every read (spec §3). The only
/// mutable per-segment state; guarded by a mutex since `delete_by_query` and
/// merge integration may touch it from different call sites.
#[derive(Debug, Default)]
pub struct DeletionBitmap {
    bits: Vec<u8>,
}

impl DeletionBitmap {
    pub fn new(total_doc_count: u32) -> Self {
        DeletionBitmap { bits: vec![0u8; (total_doc_count as usize + 7) / 8] }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        DeletionBitmap { bits: bytes }
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        let idx = doc.0 as usize;
        let byte = idx / 8;
        byte < self.bits.len() && self.bits[byte] & (1 << (idx % 8)) != 0
    }

    /// Returns `true` if this call newly deleted the document.
    pub fn delete(&mut self, doc: DocId) -> bool {
        let idx = doc.0 as usize;
        let byte = idx / 8;
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        let mask = 1 << (idx % 8);
        let was_set = self.bits[byte] & mask != 0;
        self.bits[byte] |= mask;
        !was_set
    }

    pub fn popcount(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// An open segment: immutable codec readers plus the one mutable deletion
/// bitmap. One `Segment` is shared (via `Arc`) across every `Searcher` that
/// references it.
pub struct Segment {
    pub id: String,
    pub total_doc_count: u32,
    term_dict: TermDict,
    postings_data: Data,
    lengths: Option<LengthsReader>,
    stored: Option<StoredFieldsReader>,
    columns: RwLock<HashMap<FieldId, ColumnReader>>,
    vectors: Option<VectorsReader>,
    deletions: Mutex<DeletionBitmap>,
}

impl Segment {
    pub fn open(storage: &dyn Storage, schema: &Schema, record: &SegmentRecord) -> Result<Self, Error> {
        let id = record.id.clone();
        let term_dict_data = storage.open_file(&trm_file(&id))?;
        let term_dict = TermDict::open(term_dict_data)?;
        let postings_data = storage.open_file(&pst_file(&id))?;

        let lengths = if storage.file_exists(&fln_file(&id)) {
            Some(LengthsReader::open(storage.open_file(&fln_file(&id))?)?)
        } else {
            None
        };
        let stored = if storage.file_exists(&fdt_file(&id)) {
            Some(StoredFieldsReader::open(storage.open_file(&fdt_file(&id))?)?)
        } else {
            None
        };
        let vectors = if storage.file_exists(&vec_file(&id)) {
            Some(VectorsReader::open(storage.open_file(&vec_file(&id))?)?)
        } else {
            None
        };

        let mut columns = HashMap::default();
        for (field_id, name, field_type) in schema.iter() {
            if let Some(column_type) = field_type.column() {
                let file = col_file(&id, name);
                if storage.file_exists(&file) {
                    columns.insert(field_id, ColumnReader::open(storage.open_file(&file)?, column_type)?);
                }
            }
        }

        let deletions = match record.deletion_generation {
            Some(generation) => {
                let file = del_file(&id, generation);
                if storage.file_exists(&file) {
                    DeletionBitmap::from_bytes(storage.open_file(&file)?.as_bytes().to_vec())
                } else {
                    DeletionBitmap::new(record.total_doc_count)
                }
            }
            None => DeletionBitmap::new(record.total_doc_count),
        };

        Ok(Segment {
            id,
            total_doc_count: record.total_doc_count,
            term_dict,
            postings_data,
            lengths,
            stored,
            columns: RwLock::new(columns),
            vectors,
            deletions: Mutex::new(deletions),
        })
    }

    /// Build the physical term dictionary key: `(field_number, termbytes)`
    /// (spec §4.3), with the field id as a big-endian prefix so keys for
    /// different fields sort into separate, contiguous ranges.
    pub fn term_key(field: FieldId, term: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(2 + term.len());
        key.extend_from_slice(&field.0.to_be_bytes());
        key.extend_from_slice(term);
        key
    }

    pub fn term_info(&self, field: FieldId, term: &[u8]) -> Result<Option<TermInfo>, Error> {
        self.term_dict.get(&Self::term_key(field, term))
    }

    /// All `(termbytes, TermInfo)` pairs in `field` whose term starts with
    /// `prefix`, used by wildcard/prefix query expansion (spec §4.8).
    pub fn expand_prefix(&self, field: FieldId, prefix: &[u8]) -> Result<Vec<(Vec<u8>, TermInfo)>, Error> {
        let key_prefix = Self::term_key(field, prefix);
        let pairs = self.term_dict.expand_prefix(&key_prefix)?;
        Ok(pairs.into_iter().map(|(k, v)| (k[2..].to_vec(), v)).collect())
    }

    /// All `(termbytes, TermInfo)` pairs in `field` within `[lower, upper]`
    /// (spec §4.8's range-query lowering), in ascending order.
    pub fn expand_range(
        &self,
        field: FieldId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Vec<(Vec<u8>, TermInfo)>, Error> {
        let lower_key = lower.map(|l| Self::term_key(field, l));
        let upper_key = upper.map(|u| Self::term_key(field, u));
        let pairs = self.term_dict.range(lower_key.as_deref(), upper_key.as_deref(), include_lower, include_upper)?;
        Ok(pairs.into_iter().map(|(k, v)| (k[2..].to_vec(), v)).collect())
    }

    pub fn posting_reader(&self, schema: &Schema, field: FieldId, info: &TermInfo) -> Result<PostingReader, Error> {
        let form = schema.field_type(field).indexed_form();
        let slice = self.postings_data.subset(info.first_block_offset as usize, info.postings_byte_length as usize)?;
        PostingReader::open(slice, form)
    }

    pub fn stored_doc(&self, docnum: u32) -> Result<Option<StoredDocument>, Error> {
        match &self.stored {
            Some(reader) => Ok(Some(reader.get(docnum)?)),
            None => Ok(None),
        }
    }

    pub fn field_length(&self, field: FieldId, docnum: u32) -> Option<u32> {
        self.lengths.as_ref().and_then(|l| l.get(field, docnum))
    }

    pub fn column_int(&self, field: FieldId, docnum: u32) -> Option<i64> {
        self.columns.read().unwrap().get(&field).and_then(|c| c.get_int(docnum).ok().flatten())
    }

    pub fn column_bytes(&self, field: FieldId, docnum: u32) -> Option<Vec<u8>> {
        self.columns.read().unwrap().get(&field).and_then(|c| c.get_bytes(docnum).ok().flatten())
    }

    pub fn vector(&self, field: FieldId, docnum: u32) -> Option<VectorEntries> {
        self.vectors.as_ref().and_then(|v| v.get(field, docnum).ok().flatten())
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deletions.lock().unwrap().is_deleted(doc)
    }

    /// Returns `true` if this call newly deleted the document.
    pub fn delete(&self, doc: DocId) -> bool {
        self.deletions.lock().unwrap().delete(doc)
    }

    pub fn live_doc_count(&self) -> u32 {
        self.total_doc_count - self.deletions.lock().unwrap().popcount()
    }

    pub fn deletion_bytes(&self) -> Vec<u8> {
        self.deletions.lock().unwrap().as_bytes().to_vec()
    }

    /// Average field length across live documents, for BM25-style scoring;
    /// `0.0` if the field has no lengths recorded at all.
    pub fn average_field_length(&self, field: FieldId) -> f32 {
        let Some(lengths) = &self.lengths else {
            return 0.0;
        };
        if !lengths.has_field(field) {
            return 0.0;
        }
        let mut total = 0u64;
        let mut count = 0u64;
        for doc in 0..self.total_doc_count {
            if self.is_deleted(DocId(doc)) {
                continue;
            }
            if let Some(len) = lengths.get(field, doc) {
                total += len as u64;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total as f32 / count as f32
        }
    }
}

/// Decode a `TermInfo`'s length-byte bounds back to approximate lengths,
/// used by `WeightLengthScorer::max_quality` (spec §4.7).
pub fn term_info_length_bounds(info: &TermInfo) -> (u32, u32) {
    (byte_to_length(info.min_length_byte), byte_to_length(info.max_length_byte))
}
