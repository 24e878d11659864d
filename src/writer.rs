//! The write side (spec §4.11): `SegmentWriter` turns buffered `Document`s
//! into one fresh segment's codec files; `IndexWriter` owns the WRITELOCK,
//! the current `SegmentList`, and the commit/merge/GC cycle that publishes
//! new `Toc` generations. Grounded in the teacher's `mem/flush.rs` (in-memory
//! posting accumulation keyed by term, flushed to one set of files per
//! commit) for the `SegmentWriter` shape, and in
//! `original_source/src/whoosh/writing.py`'s `SegmentWriter`/`IndexWriter`
//! split (buffer documents, flush on a size limit, merge on a tiered policy,
//! publish under a lock) for the overall pipeline this module generalizes.
//!
//! Background merge execution replaces the original's multiprocessing pool
//! with a `MergeExecutor` trait backed by an `mpsc` channel: `ThreadExecutor`
//! runs each merge on its own `std::thread`, `InlineExecutor` runs it on the
//! caller (useful for tests and small indices where a thread hop isn't
//! worth it). Either way, `SegmentList::integrate` only ever runs on the
//! `IndexWriter`'s own thread, so it never has to be made thread-safe itself.

use crate::analyzer::{self, AnalyzeMode};
use crate::codec::column::{ColumnValue, ColumnWriter};
use crate::codec::length_byte::length_to_byte;
use crate::codec::lengths::LengthsWriter;
use crate::codec::posting::{PostingEntry, PostingListWriter};
use crate::codec::stored::{StoredDocument, StoredFieldsWriter};
use crate::codec::termdict::{TermDictWriter, TermInfo};
use crate::codec::vectors::{VectorEntries, VectorsWriter};
use crate::config::{MergePolicyConfig, WriterConfig};
use crate::query::Query;
use crate::schema::{ColumnType, Document, FieldId, FieldType, Schema};
use crate::scoring::Model;
use crate::segment::{self, Segment, SegmentRecord};
use crate::segment_list::{DeleteMatcher, SegmentList};
use crate::store::Storage;
use crate::toc::Toc;
use crate::{DocId, Error};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::mpsc;
use std::sync::Arc;

fn write_file(storage: &dyn Storage, name: &str, bytes: &[u8]) -> Result<(), Error> {
    let mut out = storage.create_file(name)?;
    out.write_all(bytes)?;
    out.close()
}

/// Accumulates one segment's worth of documents in memory and flushes them
/// to codec files in one shot (spec §4.11's `finish_segment`). Postings are
/// kept in a `BTreeMap` keyed by `(field, termbytes)`: since documents are
/// added in increasing docnum order, each term's posting vector comes out
/// already sorted by docid, and the map itself yields terms in the
/// `(field, termbytes)` order the term dictionary wants them in — no
/// separate sort-merge pass is needed.
pub struct SegmentWriter {
    schema: Schema,
    next_docnum: u32,
    postings: BTreeMap<(FieldId, Vec<u8>), Vec<PostingEntry>>,
    lengths: LengthsWriter,
    stored: StoredFieldsWriter,
    columns: BTreeMap<FieldId, ColumnWriter>,
    vectors: VectorsWriter,
    estimated_bytes: usize,
}

/// Whether a field's indexed form records per-token positions, and so
/// should also get a term-vector entry (spec §4.11's supplemented
/// per-(doc,field) vectors).
fn carries_vector(field_type: &FieldType) -> bool {
    matches!(field_type, FieldType::Text { indexed_form, .. } if indexed_form.positions)
}

impl SegmentWriter {
    pub fn new(schema: Schema) -> Self {
        SegmentWriter {
            schema,
            next_docnum: 0,
            postings: BTreeMap::new(),
            lengths: LengthsWriter::new(),
            stored: StoredFieldsWriter::new(),
            columns: BTreeMap::new(),
            vectors: VectorsWriter::new(),
            estimated_bytes: 0,
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.next_docnum
    }

    pub fn estimated_mb(&self) -> f64 {
        self.estimated_bytes as f64 / (1024.0 * 1024.0)
    }

    /// Index one document: assign it the next docnum, analyze its text
    /// fields, and accumulate postings/lengths/stored/column/vector entries
    /// for it. Nothing touches disk until `finish`.
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId, Error> {
        let docnum = self.next_docnum;
        self.next_docnum += 1;

        let mut stored_doc: StoredDocument = Vec::new();
        let mut field_tokens: BTreeMap<FieldId, Vec<analyzer::Token>> = BTreeMap::new();
        let mut atomic_terms: BTreeMap<FieldId, Vec<u8>> = BTreeMap::new();
        let mut column_values: BTreeMap<FieldId, ColumnValue> = BTreeMap::new();

        for docfield in doc.as_ref() {
            self.estimated_bytes += docfield.value.len() + 32;
            let field_type = self.schema.field_type(docfield.field).clone();
            if field_type.stored() {
                stored_doc.push((docfield.field, docfield.value.clone()));
            }
            match &field_type {
                FieldType::Text { analyzer: analyzer_name, .. } => {
                    let analyzer_obj = analyzer::by_name(analyzer_name);
                    let base = field_tokens.get(&docfield.field).map(|v| v.len() as u32).unwrap_or(0);
                    let mut tokens = analyzer_obj.analyze(&docfield.value, AnalyzeMode::Index);
                    for token in tokens.iter_mut() {
                        token.position += base;
                    }
                    field_tokens.entry(docfield.field).or_default().extend(tokens);
                }
                FieldType::Boolean { .. } => {
                    atomic_terms.insert(docfield.field, docfield.value.as_bytes().to_vec());
                    let truthy = matches!(docfield.value.as_str(), "true" | "1" | "yes");
                    column_values.insert(docfield.field, ColumnValue::Bool(truthy));
                }
                FieldType::Id { .. } | FieldType::Keyword { .. } => {
                    let termbytes = field_type.to_termbytes(&docfield.value)?;
                    atomic_terms.insert(docfield.field, termbytes.as_bytes().to_vec());
                }
                FieldType::Numeric { .. } | FieldType::Datetime { .. } => {
                    let termbytes = field_type.to_termbytes(&docfield.value)?;
                    atomic_terms.insert(docfield.field, termbytes.as_bytes().to_vec());
                    if let Some(column_type) = field_type.column() {
                        if let Some(value) = numeric_column_value(&field_type, column_type, &docfield.value)? {
                            column_values.insert(docfield.field, value);
                        }
                    }
                }
                FieldType::Stored | FieldType::Column { .. } => {
                    if let Some(column_type) = field_type.column() {
                        let value = match column_type {
                            ColumnType::CompactInt => {
                                let v: i64 = docfield
                                    .value
                                    .parse()
                                    .map_err(|_| Error::SchemaError(format!("not an integer: {}", docfield.value)))?;
                                ColumnValue::Int(v)
                            }
                            ColumnType::Bitset | ColumnType::RoaringBitset => {
                                let truthy = matches!(docfield.value.as_str(), "true" | "1" | "yes");
                                ColumnValue::Bool(truthy)
                            }
                            _ => ColumnValue::Bytes(docfield.value.as_bytes().to_vec()),
                        };
                        column_values.insert(docfield.field, value);
                    }
                }
            }
        }

        for (field, tokens) in field_tokens {
            let field_type = self.schema.field_type(field).clone();
            let form = field_type.indexed_form();
            let length = tokens.len() as u32;
            if field_type.scored() {
                self.lengths.add(field, docnum, length);
            }

            let mut per_term: BTreeMap<Vec<u8>, (u32, Vec<u32>, Vec<(u32, u32)>)> = BTreeMap::new();
            for token in &tokens {
                let entry = per_term.entry(token.text.as_bytes().to_vec()).or_default();
                entry.0 += 1;
                if form.positions {
                    entry.1.push(token.position);
                }
                if form.chars {
                    entry.2.push((token.start_char, token.end_char));
                }
            }

            if carries_vector(&field_type) {
                let mut vector: VectorEntries = BTreeMap::new();
                for (term, (count, positions, _)) in &per_term {
                    vector.insert(term.clone(), (*count, positions.clone()));
                }
                self.vectors.add(field, docnum, vector);
            }

            for (term, (count, positions, chars)) in per_term {
                let entry = PostingEntry {
                    doc: DocId(docnum),
                    length,
                    weight: count as f32,
                    positions,
                    chars,
                    payloads: Vec::new(),
                };
                self.postings.entry((field, term)).or_default().push(entry);
            }
        }

        for (field, termbytes) in atomic_terms {
            let field_type = self.schema.field_type(field).clone();
            if field_type.scored() {
                self.lengths.add(field, docnum, 1);
            }
            let entry = PostingEntry { doc: DocId(docnum), length: 1, weight: 1.0, ..Default::default() };
            self.postings.entry((field, termbytes)).or_default().push(entry);
        }

        for (field, value) in column_values {
            let column_type = self.schema.field_type(field).column().expect("column value implies column type");
            self.columns.entry(field).or_insert_with(|| ColumnWriter::new(column_type)).add(docnum, value);
        }

        self.stored.add(&stored_doc)?;
        Ok(DocId(docnum))
    }

    /// Flush everything accumulated so far to fresh codec files under a new
    /// segment id, and return the record `IndexWriter` should publish for it.
    pub fn finish(mut self, storage: &dyn Storage, blocklimit: usize) -> Result<SegmentRecord, Error> {
        let id = segment::new_segment_id();
        let total_doc_count = self.next_docnum;

        let mut pst_buf = Vec::new();
        let mut trm_buf = Vec::new();
        {
            let mut dict_writer = TermDictWriter::new(&mut trm_buf);
            for ((field, term), postings) in std::mem::take(&mut self.postings) {
                let form = self.schema.field_type(field).indexed_form();
                let offset_start = pst_buf.len() as u64;
                let (doc_frequency, total_term_frequency, min_length, max_length, max_weight) = {
                    let mut list_writer = PostingListWriter::new(&mut pst_buf, form, blocklimit);
                    for entry in postings {
                        list_writer.add(entry)?;
                    }
                    let stats = (
                        list_writer.doc_frequency,
                        list_writer.total_term_frequency,
                        list_writer.min_length,
                        list_writer.max_length,
                        list_writer.max_weight,
                    );
                    list_writer.finish()?;
                    stats
                };
                let byte_len = pst_buf.len() as u64 - offset_start;
                let info = TermInfo {
                    doc_frequency,
                    total_term_frequency,
                    min_length_byte: if form.lengths { length_to_byte(min_length) } else { 0 },
                    max_length_byte: if form.lengths { length_to_byte(max_length) } else { 0 },
                    max_weight,
                    first_block_offset: offset_start,
                    postings_byte_length: byte_len,
                };
                dict_writer.add(&Segment::term_key(field, &term), info)?;
            }
            dict_writer.finish()?;
        }
        write_file(storage, &segment::pst_file(&id), &pst_buf)?;
        write_file(storage, &segment::trm_file(&id), &trm_buf)?;

        let mut fln_buf = Vec::new();
        self.lengths.finish(&mut fln_buf)?;
        write_file(storage, &segment::fln_file(&id), &fln_buf)?;

        let mut fdt_buf = Vec::new();
        self.stored.finish(&mut fdt_buf)?;
        write_file(storage, &segment::fdt_file(&id), &fdt_buf)?;

        let mut vec_buf = Vec::new();
        self.vectors.finish(&mut vec_buf)?;
        write_file(storage, &segment::vec_file(&id), &vec_buf)?;

        for (field, writer) in std::mem::take(&mut self.columns) {
            let name = self.schema.field_name(field).to_string();
            let mut buf = Vec::new();
            writer.finish(&mut buf)?;
            write_file(storage, &segment::col_file(&id, &name), &buf)?;
        }

        Ok(SegmentRecord::fresh(id, total_doc_count))
    }
}

/// Parse a numeric/datetime literal into the column value its `ColumnType`
/// expects: `CompactInt` stores the raw (non-sortable) integer so range
/// scans over the column read naturally, `FixedBytes` stores the
/// sign/bit-flipped sortable encoding `to_termbytes` also uses for postings,
/// so byte-lexicographic column order matches numeric order.
fn numeric_column_value(field_type: &FieldType, column_type: ColumnType, literal: &str) -> Result<Option<ColumnValue>, Error> {
    match (field_type, column_type) {
        (FieldType::Numeric { kind: crate::schema::NumericKind::Int, .. }, ColumnType::CompactInt)
        | (FieldType::Datetime { .. }, ColumnType::CompactInt) => {
            let v: i64 = literal.parse().map_err(|_| Error::SchemaError(format!("not an integer: {}", literal)))?;
            Ok(Some(ColumnValue::Int(v)))
        }
        (FieldType::Numeric { kind: crate::schema::NumericKind::Float, .. }, ColumnType::FixedBytes(_)) => {
            let v: f64 = literal.parse().map_err(|_| Error::SchemaError(format!("not a float: {}", literal)))?;
            Ok(Some(ColumnValue::Bytes(crate::schema::pack_sortable_f64(v).to_vec())))
        }
        _ => Ok(None),
    }
}

fn read_column_value(segment: &Segment, field: FieldId, column_type: ColumnType, docnum: u32) -> Option<ColumnValue> {
    match column_type {
        ColumnType::CompactInt => segment.column_int(field, docnum).map(ColumnValue::Int),
        ColumnType::Bitset | ColumnType::RoaringBitset => segment
            .column_bytes(field, docnum)
            .map(|bytes| ColumnValue::Bool(bytes.first().copied().unwrap_or(0) != 0)),
        _ => segment.column_bytes(field, docnum).map(ColumnValue::Bytes),
    }
}

/// Per-input-segment map from old docnum to new docnum, `None` for docs
/// dropped because they were deleted (spec §8 property 7, "merge
/// conservation": a merge carries over exactly the live docs of its
/// inputs, renumbered densely from 0).
struct DocRemap {
    maps: Vec<Vec<Option<u32>>>,
    total: u32,
}

fn build_remap(segments: &[Arc<Segment>]) -> DocRemap {
    let mut maps = Vec::with_capacity(segments.len());
    let mut next = 0u32;
    for seg in segments {
        let mut map = Vec::with_capacity(seg.total_doc_count as usize);
        for doc in 0..seg.total_doc_count {
            if seg.is_deleted(DocId(doc)) {
                map.push(None);
            } else {
                map.push(Some(next));
                next += 1;
            }
        }
        maps.push(map);
    }
    DocRemap { maps, total: next }
}

/// Merge several segments' live documents into one fresh segment. Runs
/// against immutable `Arc<Segment>` snapshots and touches no writer state,
/// so it's safe to run on a background thread (spec §4.10/§5: "a merge
/// task's inputs are read-only; it does not touch the `SegmentList`").
pub fn merge_segments(
    segments: &[Arc<Segment>],
    schema: &Schema,
    storage: &dyn Storage,
    blocklimit: usize,
) -> Result<SegmentRecord, Error> {
    let remap = build_remap(segments);
    let id = segment::new_segment_id();

    let mut pst_buf = Vec::new();
    let mut trm_buf = Vec::new();
    {
        let mut dict_writer = TermDictWriter::new(&mut trm_buf);
        for (field_id, _name, field_type) in schema.iter() {
            if !field_type.is_indexed() {
                continue;
            }
            let form = field_type.indexed_form();
            let mut cursors: Vec<std::collections::VecDeque<(Vec<u8>, TermInfo)>> = Vec::with_capacity(segments.len());
            for seg in segments {
                let pairs = seg.expand_range(field_id, None, None, true, true)?;
                cursors.push(pairs.into());
            }

            loop {
                let mut min_key: Option<Vec<u8>> = None;
                for cursor in &cursors {
                    if let Some((key, _)) = cursor.front() {
                        if min_key.as_ref().map_or(true, |m| key < m) {
                            min_key = Some(key.clone());
                        }
                    }
                }
                let Some(key) = min_key else { break };

                let offset_start = pst_buf.len() as u64;
                let (doc_frequency, total_term_frequency, min_length, max_length, max_weight) = {
                    let mut list_writer = PostingListWriter::new(&mut pst_buf, form, blocklimit);
                    for (seg_idx, seg) in segments.iter().enumerate() {
                        let matches = cursors[seg_idx].front().map(|(k, _)| k == &key).unwrap_or(false);
                        if !matches {
                            continue;
                        }
                        let (_, info) = cursors[seg_idx].pop_front().unwrap();
                        let mut reader = seg.posting_reader(schema, field_id, &info)?;
                        while reader.is_active() {
                            let old_doc = reader.id().0;
                            if let Some(new_doc) = remap.maps[seg_idx].get(old_doc as usize).copied().flatten() {
                                list_writer.add(PostingEntry {
                                    doc: DocId(new_doc),
                                    length: reader.length(),
                                    weight: reader.weight(),
                                    positions: if form.positions { reader.positions()?.to_vec() } else { Vec::new() },
                                    chars: if form.chars { reader.chars()?.to_vec() } else { Vec::new() },
                                    payloads: if form.payloads { reader.payloads()?.to_vec() } else { Vec::new() },
                                })?;
                            }
                            reader.next()?;
                        }
                    }
                    let stats = (
                        list_writer.doc_frequency,
                        list_writer.total_term_frequency,
                        list_writer.min_length,
                        list_writer.max_length,
                        list_writer.max_weight,
                    );
                    list_writer.finish()?;
                    stats
                };

                if doc_frequency == 0 {
                    continue;
                }
                let byte_len = pst_buf.len() as u64 - offset_start;
                let info = TermInfo {
                    doc_frequency,
                    total_term_frequency,
                    min_length_byte: if form.lengths { length_to_byte(min_length) } else { 0 },
                    max_length_byte: if form.lengths { length_to_byte(max_length) } else { 0 },
                    max_weight,
                    first_block_offset: offset_start,
                    postings_byte_length: byte_len,
                };
                dict_writer.add(&Segment::term_key(field_id, &key), info)?;
            }
        }
        dict_writer.finish()?;
    }
    write_file(storage, &segment::pst_file(&id), &pst_buf)?;
    write_file(storage, &segment::trm_file(&id), &trm_buf)?;

    let mut lengths = LengthsWriter::new();
    let mut stored = StoredFieldsWriter::new();
    let mut vectors = VectorsWriter::new();
    let mut columns: BTreeMap<FieldId, ColumnWriter> = BTreeMap::new();

    for (seg_idx, seg) in segments.iter().enumerate() {
        for old_doc in 0..seg.total_doc_count {
            let Some(new_doc) = remap.maps[seg_idx][old_doc as usize] else { continue };
            stored.add(&seg.stored_doc(old_doc)?.unwrap_or_default())?;
            for (field_id, _name, field_type) in schema.iter() {
                if field_type.scored() {
                    let length = seg.field_length(field_id, old_doc).unwrap_or(0);
                    lengths.add(field_id, new_doc, length);
                }
                if let Some(column_type) = field_type.column() {
                    if let Some(value) = read_column_value(seg, field_id, column_type, old_doc) {
                        columns.entry(field_id).or_insert_with(|| ColumnWriter::new(column_type)).add(new_doc, value);
                    }
                }
                if carries_vector(field_type) {
                    if let Some(vector) = seg.vector(field_id, old_doc) {
                        vectors.add(field_id, new_doc, vector);
                    }
                }
            }
        }
    }

    let mut fln_buf = Vec::new();
    lengths.finish(&mut fln_buf)?;
    write_file(storage, &segment::fln_file(&id), &fln_buf)?;

    let mut fdt_buf = Vec::new();
    stored.finish(&mut fdt_buf)?;
    write_file(storage, &segment::fdt_file(&id), &fdt_buf)?;

    let mut vec_buf = Vec::new();
    vectors.finish(&mut vec_buf)?;
    write_file(storage, &segment::vec_file(&id), &vec_buf)?;

    for (field_id, writer) in columns {
        let name = schema.field_name(field_id).to_string();
        let mut buf = Vec::new();
        writer.finish(&mut buf)?;
        write_file(storage, &segment::col_file(&id, &name), &buf)?;
    }

    Ok(SegmentRecord::fresh(id, remap.total))
}

/// One merge request: immutable inputs plus enough context to run
/// `merge_segments` on whatever thread picks it up.
pub struct MergeJob {
    pub merge_id: u64,
    pub segments: Vec<Arc<Segment>>,
    pub schema: Schema,
    pub storage: Arc<dyn Storage>,
    pub blocklimit: usize,
}

/// The other end of a submitted `MergeJob`: a channel `IndexWriter` polls
/// (non-blocking, via `commit`) or drains (blocking, via `wait_for_merges`).
pub struct MergeHandle {
    receiver: mpsc::Receiver<(u64, Result<SegmentRecord, Error>)>,
}

impl MergeHandle {
    fn try_recv(&self) -> Option<(u64, Result<SegmentRecord, Error>)> {
        self.receiver.try_recv().ok()
    }
    fn recv(&self) -> Option<(u64, Result<SegmentRecord, Error>)> {
        self.receiver.recv().ok()
    }
}

/// How merges actually run (spec §5: "the executor may be a thread pool, a
/// process pool, or inline; the rest of the system only sees a completion
/// queue").
pub trait MergeExecutor: Send + Sync {
    fn submit(&self, job: MergeJob) -> MergeHandle;
}

/// Runs each merge on its own `std::thread`, reporting back over an `mpsc`
/// channel. The default for a real `IndexWriter`.
#[derive(Debug, Default)]
pub struct ThreadExecutor;

impl MergeExecutor for ThreadExecutor {
    fn submit(&self, job: MergeJob) -> MergeHandle {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = merge_segments(&job.segments, &job.schema, job.storage.as_ref(), job.blocklimit);
            let _ = tx.send((job.merge_id, result));
        });
        MergeHandle { receiver: rx }
    }
}

/// Runs the merge synchronously on the calling thread. Useful for tests and
/// for small indices where a thread hop costs more than the merge itself.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl MergeExecutor for InlineExecutor {
    fn submit(&self, job: MergeJob) -> MergeHandle {
        let (tx, rx) = mpsc::channel();
        let result = merge_segments(&job.segments, &job.schema, job.storage.as_ref(), job.blocklimit);
        let _ = tx.send((job.merge_id, result));
        MergeHandle { receiver: rx }
    }
}

/// What `IndexWriter::commit` should do beyond publishing the next TOC
/// generation (spec §4.11's `commit(merge, optimize, expunge_deleted)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Run the tiered merge policy and schedule whatever candidates it proposes.
    pub merge: bool,
    /// Ignore the merge policy and merge every current segment into one.
    pub optimize: bool,
    /// Block until every in-flight merge (including ones this call starts) completes.
    pub wait_for_merges: bool,
}

fn now_unix_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as i64).unwrap_or(0)
}

/// The single writer for one index (spec §4.11, §6): holds `WRITELOCK` for
/// its whole lifetime, buffers documents into a `SegmentWriter`, and
/// publishes a new `Toc` generation on every `commit`. Grounded in the
/// teacher's `mem/index.rs` `Index` (one mutable writer, a generation
/// counter, and a lock file) generalized with the segmented merge/delete
/// machinery `original_source/src/whoosh/writing.py`'s `IndexWriter`
/// describes.
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    index_name: String,
    config: WriterConfig,
    merge_policy: MergePolicyConfig,
    schema: Schema,
    toc: Toc,
    segment_list: SegmentList,
    current: SegmentWriter,
    executor: Box<dyn MergeExecutor>,
    pending_merges: Vec<MergeHandle>,
    _lock: Box<dyn crate::store::Lock>,
}

impl IndexWriter {
    pub fn new(
        storage: Arc<dyn Storage>,
        index_name: &str,
        schema: Schema,
        config: WriterConfig,
        merge_policy: MergePolicyConfig,
    ) -> Result<Self, Error> {
        Self::with_executor(storage, index_name, schema, config, merge_policy, Box::new(ThreadExecutor))
    }

    pub fn with_executor(
        storage: Arc<dyn Storage>,
        index_name: &str,
        schema: Schema,
        config: WriterConfig,
        merge_policy: MergePolicyConfig,
        executor: Box<dyn MergeExecutor>,
    ) -> Result<Self, Error> {
        let lock = storage.lock("WRITELOCK")?;
        let toc = match Toc::open_latest(storage.as_ref(), index_name) {
            Ok(toc) => toc,
            Err(Error::TocNotFound) => Toc::fresh(schema.clone(), now_unix_micros()),
            Err(e) => return Err(e),
        };

        let mut segments = Vec::with_capacity(toc.segments.len());
        for record in &toc.segments {
            segments.push(Arc::new(Segment::open(storage.as_ref(), &toc.schema, record)?));
        }
        let segment_list = SegmentList::new(segments, toc.segments.clone());
        let schema = toc.schema.clone();
        let current = SegmentWriter::new(schema.clone());

        Ok(IndexWriter {
            storage,
            index_name: index_name.to_string(),
            config,
            merge_policy,
            schema,
            toc,
            segment_list,
            current,
            executor,
            pending_merges: Vec::new(),
            _lock: lock,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn generation(&self) -> i64 {
        self.toc.generation
    }

    /// Live docs already committed, plus docs buffered in the current
    /// in-memory segment.
    pub fn doc_count(&self) -> u64 {
        self.segment_list.segments().iter().map(|s| s.live_doc_count() as u64).sum::<u64>()
            + self.current.doc_count() as u64
    }

    /// Buffer one document, flushing the in-progress segment first if it has
    /// crossed `config.limitmb` (spec §4.11's `limitmb` flush trigger).
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId, Error> {
        let id = self.current.add_document(doc)?;
        if self.current.estimated_mb() >= self.config.limitmb {
            self.flush_current()?;
        }
        Ok(id)
    }

    fn flush_current(&mut self) -> Result<(), Error> {
        if self.current.doc_count() == 0 {
            return Ok(());
        }
        let fresh = SegmentWriter::new(self.schema.clone());
        let writer = std::mem::replace(&mut self.current, fresh);
        let record = writer.finish(self.storage.as_ref(), self.config.blocklimit)?;
        let segment = Arc::new(Segment::open(self.storage.as_ref(), &self.schema, &record)?);
        self.segment_list.add_segment(segment, record);
        Ok(())
    }

    /// Delete every live document matching `query` across every current
    /// segment, queuing the same deletion against any merge in flight (spec
    /// §4.10's `delete_by_query`).
    pub fn delete_by_query(&mut self, query: Query) -> Result<usize, Error> {
        let schema = self.schema.clone();
        let model = Model::default();
        let matcher: DeleteMatcher = Arc::new(move |segment: &Arc<Segment>| -> Result<Vec<DocId>, Error> {
            let mut m = query.matcher(segment, &schema, model)?;
            let mut hits = Vec::new();
            while m.is_active() {
                hits.push(m.id());
                m.next()?;
            }
            Ok(hits)
        });
        self.segment_list.delete_by_query(matcher)
    }

    /// Convenience wrapper for the common case of deleting by one term
    /// (spec §9 supplemented feature, mirroring `original_source`'s
    /// `Writer.delete_by_term`).
    pub fn delete_by_term(&mut self, field: &str, text: &str) -> Result<usize, Error> {
        self.delete_by_query(Query::term(field, text))
    }

    /// Number of segments currently in the live set (spec §8 scenario S3's
    /// "assert segment count").
    pub fn segment_count(&self) -> usize {
        self.segment_list.len()
    }

    fn start_merge(&mut self, ids: Vec<String>) {
        let segments: Vec<Arc<Segment>> = ids
            .iter()
            .filter_map(|id| self.segment_list.segments().iter().find(|s| &s.id == id).cloned())
            .collect();
        if segments.len() < 2 {
            return;
        }
        let merge_id = self.segment_list.add_merge(ids);
        let job = MergeJob {
            merge_id,
            segments,
            schema: self.schema.clone(),
            storage: self.storage.clone(),
            blocklimit: self.config.blocklimit,
        };
        let handle = self.executor.submit(job);
        self.pending_merges.push(handle);
    }

    fn integrate_merge(&mut self, merge_id: u64, result: Result<SegmentRecord, Error>) -> Result<(), Error> {
        match result {
            Ok(record) => {
                let segment = Arc::new(Segment::open(self.storage.as_ref(), &self.schema, &record)?);
                self.segment_list.integrate(merge_id, segment, record)
            }
            Err(e) => {
                warn!("merge {} failed: {}", merge_id, e);
                self.segment_list.fail_merge(merge_id);
                Ok(())
            }
        }
    }

    /// Pick up whichever in-flight merges have finished so far, without
    /// blocking on the ones that haven't.
    fn drain_merge_completions(&mut self) -> Result<(), Error> {
        let mut still_pending = Vec::new();
        for handle in self.pending_merges.drain(..) {
            match handle.try_recv() {
                Some((merge_id, result)) => self.integrate_merge(merge_id, result)?,
                None => still_pending.push(handle),
            }
        }
        self.pending_merges = still_pending;
        Ok(())
    }

    /// Block until every currently in-flight merge has completed (or failed).
    pub fn wait_for_merges(&mut self) -> Result<(), Error> {
        let handles = std::mem::take(&mut self.pending_merges);
        for handle in handles {
            if let Some((merge_id, result)) = handle.recv() {
                self.integrate_merge(merge_id, result)?;
            }
        }
        Ok(())
    }

    /// Write a fresh `.del` sidecar for every segment whose in-memory
    /// deletion bitmap has moved on from what's on disk, so a deletion made
    /// before this commit survives a process restart.
    fn persist_deletions(&self) -> Result<(), Error> {
        for record in self.segment_list.records() {
            if let Some(generation) = record.deletion_generation {
                let name = segment::del_file(&record.id, generation);
                if self.storage.file_exists(&name) {
                    continue;
                }
                if let Some(segment) = self.segment_list.segments().iter().find(|s| s.id == record.id) {
                    write_file(self.storage.as_ref(), &name, &segment.deletion_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn garbage_collect(&self, old_toc: &Toc) -> Result<(), Error> {
        let keep: std::collections::HashSet<String> = self.toc.referenced_files().into_iter().collect();
        for name in old_toc.referenced_files() {
            if !keep.contains(&name) && self.storage.file_exists(&name) {
                self.storage.delete_file(&name)?;
            }
        }
        Ok(())
    }

    /// Flush any buffered documents, optionally schedule merges, optionally
    /// wait for them, then publish the next `Toc` generation and garbage
    /// collect anything the previous generation referenced that the new one
    /// doesn't (spec §4.11's commit steps a-f).
    pub fn commit(&mut self, options: CommitOptions) -> Result<i64, Error> {
        self.flush_current()?;
        self.drain_merge_completions()?;

        if options.optimize {
            let ids: Vec<String> = self.segment_list.segments().iter().map(|s| s.id.clone()).collect();
            if ids.len() > 1 {
                self.start_merge(ids);
            }
        } else if options.merge {
            for plan in self.segment_list.plan_merges(&self.merge_policy) {
                self.start_merge(plan.segment_ids);
            }
        }

        if options.wait_for_merges {
            self.wait_for_merges()?;
        } else {
            self.drain_merge_completions()?;
        }

        self.persist_deletions()?;

        let old_toc = self.toc.clone();
        let created = now_unix_micros();
        let new_toc = self.toc.next(self.segment_list.records(), created);
        new_toc.publish(self.storage.as_ref(), &self.index_name)?;
        let generation = new_toc.generation;
        self.toc = new_toc;
        self.garbage_collect(&old_toc)?;
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, NumericKind};
    use crate::store::directory::FileStorage;
    use crate::IndexedForm;

    fn test_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_field("title", FieldType::Text { stored: true, indexed_form: IndexedForm::with_positions(), analyzer: "standard".into() })
            .unwrap();
        schema
            .add_field("body", FieldType::Text { stored: false, indexed_form: IndexedForm::with_positions(), analyzer: "standard".into() })
            .unwrap();
        schema.add_field("id", FieldType::Id { stored: true }).unwrap();
        schema
            .add_field("price", FieldType::Numeric { stored: true, kind: NumericKind::Int, sortable: true })
            .unwrap();
        schema
    }

    fn doc(id: &str, title: &str, body: &str, price: i64) -> Document {
        let schema = test_schema();
        let mut d = Document::new();
        d.add(schema.field_id("id").unwrap(), id);
        d.add(schema.field_id("title").unwrap(), title);
        d.add(schema.field_id("body").unwrap(), body);
        d.add(schema.field_id("price").unwrap(), price.to_string());
        d
    }

    #[test]
    fn add_document_then_commit_is_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let schema = test_schema();
        let mut writer =
            IndexWriter::with_executor(storage.clone(), "idx", schema, WriterConfig::default(), MergePolicyConfig::default(), Box::new(InlineExecutor))
                .unwrap();

        writer.add_document(&doc("1", "hello world", "a fine day for rust", 10)).unwrap();
        writer.add_document(&doc("2", "goodbye world", "another fine day", 20)).unwrap();
        writer.commit(CommitOptions::default()).unwrap();

        let searcher = crate::searcher::Searcher::open(storage, "idx").unwrap();
        assert_eq!(searcher.doc_count(), 2);

        let query = Query::term("title", "hello");
        let results = searcher
            .search(&query, Model::default(), crate::collector::CollectOptions { limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        let stored = searcher.doc(&results.hits[0]).unwrap().unwrap();
        assert!(stored.iter().any(|(_, v)| v == "1"));
    }

    #[test]
    fn optimize_merges_every_segment_into_one() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let schema = test_schema();
        let mut writer =
            IndexWriter::with_executor(storage.clone(), "idx", schema, WriterConfig::default(), MergePolicyConfig::default(), Box::new(InlineExecutor))
                .unwrap();

        for i in 0..10 {
            writer.add_document(&doc(&i.to_string(), "hello world", "body text", i)).unwrap();
            writer.commit(CommitOptions::default()).unwrap();
        }
        assert_eq!(writer.segment_list.len(), 10);

        writer.commit(CommitOptions { optimize: true, wait_for_merges: true, ..Default::default() }).unwrap();
        assert_eq!(writer.segment_list.len(), 1);

        let searcher = crate::searcher::Searcher::open(storage, "idx").unwrap();
        assert_eq!(searcher.doc_count(), 10);
        let query = Query::term("title", "hello");
        let results = searcher
            .search(&query, Model::default(), crate::collector::CollectOptions { limit: 20, ..Default::default() })
            .unwrap();
        assert_eq!(results.hits.len(), 10);
    }

    #[test]
    fn delete_by_term_survives_a_merge() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let schema = test_schema();
        let mut writer =
            IndexWriter::with_executor(storage.clone(), "idx", schema, WriterConfig::default(), MergePolicyConfig::default(), Box::new(InlineExecutor))
                .unwrap();

        writer.add_document(&doc("1", "hello world", "body", 1)).unwrap();
        writer.commit(CommitOptions::default()).unwrap();
        writer.add_document(&doc("2", "hello again", "body", 2)).unwrap();
        writer.commit(CommitOptions::default()).unwrap();

        let deleted = writer.delete_by_term("id", "1").unwrap();
        assert_eq!(deleted, 1);
        writer.commit(CommitOptions { optimize: true, wait_for_merges: true, ..Default::default() }).unwrap();

        let searcher = crate::searcher::Searcher::open(storage, "idx").unwrap();
        assert_eq!(searcher.doc_count(), 1);
        let query = Query::term("title", "hello");
        let results = searcher
            .search(&query, Model::default(), crate::collector::CollectOptions { limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        let stored = searcher.doc(&results.hits[0]).unwrap().unwrap();
        assert!(stored.iter().any(|(_, v)| v == "2"));
    }
}
