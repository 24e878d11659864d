//! The Table Of Contents: the atomic publication unit (spec §3, §6).
//! Written once per commit, never mutated; a new commit writes generation
//! N+1 and atomically renames it into place. Grounded in the teacher's
//! `indri::keyfile`/`galago::index` manifest-reading pattern (read a small
//! header file to learn what else to open) and in
//! `original_source/src/whoosh/filedb/filestore.py`'s `_toc` naming
//! (`_<indexname>_<generation>.toc`) for the on-disk name.

use crate::schema::Schema;
use crate::segment::SegmentRecord;
use crate::store::Storage;
use crate::Error;
use std::io::Write;

const MAGIC: &[u8; 4] = b"ToC1";
const FORMAT_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    pub generation: i64,
    pub schema: Schema,
    pub segments: Vec<SegmentRecord>,
    pub created_unix_micros: i64,
}

fn toc_file_name(index_name: &str, generation: i64) -> String {
    format!("_{}_{}.toc", index_name, generation)
}

impl Toc {
    pub fn fresh(schema: Schema, created_unix_micros: i64) -> Self {
        Toc { generation: 0, schema, segments: Vec::new(), created_unix_micros }
    }

    pub fn next(&self, segments: Vec<SegmentRecord>, created_unix_micros: i64) -> Self {
        Toc { generation: self.generation + 1, schema: self.schema.clone(), segments, created_unix_micros }
    }

    /// Encode per spec §6: `< magic:4, version:i32, generation:i64,
    /// schema_blob:varbytes, n_segments:u32, [segment_record]×n,
    /// created_unix_micros:i64 >`.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        out.write_all(MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_be_bytes())?;
        out.write_all(&self.generation.to_be_bytes())?;

        let schema_blob = serde_json::to_vec(&self.schema)?;
        crate::io::write_vbyte(schema_blob.len() as u64, &mut out).map_err(Error::from)?;
        out.write_all(&schema_blob)?;

        out.write_all(&(self.segments.len() as u32).to_be_bytes())?;
        for record in &self.segments {
            let record_blob = serde_json::to_vec(record)?;
            crate::io::write_vbyte(record_blob.len() as u64, &mut out).map_err(Error::from)?;
            out.write_all(&record_blob)?;
        }
        out.write_all(&self.created_unix_micros.to_be_bytes())?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        use crate::io::{DataInputStream, SliceInputStream};
        let mut stream = SliceInputStream::new(bytes);
        let magic = stream.read_bytes(4)?;
        if magic != MAGIC {
            return Err(Error::FileHeaderError { expected: *MAGIC, found: [magic[0], magic[1], magic[2], magic[3]] });
        }
        let _version = stream.read_u32()? as i32;
        let generation = stream.read_u64()? as i64;

        let schema_len = stream.read_vbyte()? as usize;
        let schema_bytes = stream.read_bytes(schema_len)?;
        let mut schema: Schema = serde_json::from_slice(schema_bytes)?;
        schema.rebuild_index();
        schema.validate_tags()?;

        let n_segments = stream.read_u32()?;
        let mut segments = Vec::with_capacity(n_segments as usize);
        for _ in 0..n_segments {
            let len = stream.read_vbyte()? as usize;
            let blob = stream.read_bytes(len)?;
            segments.push(serde_json::from_slice(blob)?);
        }
        let created_unix_micros = stream.read_u64()? as i64;

        Ok(Toc { generation, schema, segments, created_unix_micros })
    }

    /// Write this TOC under its generation's file name and fsync it. The
    /// file name itself encodes the generation, so writing it is
    /// equivalent to publishing: the next reader's generation scan will
    /// pick it up as the new latest-readable generation once `create_file`
    /// returns (spec §3's "a TOC file's name encodes its generation").
    pub fn publish(&self, storage: &dyn Storage, index_name: &str) -> Result<(), Error> {
        let name = toc_file_name(index_name, self.generation);
        let mut out = storage.create_file(&name)?;
        out.write_all(&self.encode()?)?;
        out.close()?;
        Ok(())
    }

    /// Scan storage for the largest-numbered complete TOC file (spec §3:
    /// "the latest readable generation is the largest-numbered TOC whose
    /// file is complete"). A torn/truncated file fails `decode` and is
    /// skipped rather than propagated, so a reader racing a writer's
    /// `publish` still finds the previous good generation.
    pub fn open_latest(storage: &dyn Storage, index_name: &str) -> Result<Self, Error> {
        let prefix = format!("_{}_", index_name);
        let mut candidates: Vec<i64> = storage
            .list()?
            .into_iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(&prefix)?;
                let rest = rest.strip_suffix(".toc")?;
                rest.parse::<i64>().ok()
            })
            .collect();
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        for generation in candidates {
            let name = toc_file_name(index_name, generation);
            let data = storage.open_file(&name)?;
            match Toc::decode(data.as_bytes()) {
                Ok(toc) => return Ok(toc),
                Err(_) => continue,
            }
        }
        Err(Error::TocNotFound)
    }

    /// Read one specific generation rather than whatever is newest (spec
    /// §5: "a Searcher opened at generation N sees exactly that TOC's docs
    /// minus its deletions, regardless of what later commits do").
    pub fn open_generation(storage: &dyn Storage, index_name: &str, generation: i64) -> Result<Self, Error> {
        let name = toc_file_name(index_name, generation);
        let data = storage.open_file(&name)?;
        Toc::decode(data.as_bytes())
    }

    /// Names of every file any segment in this TOC references, used by
    /// commit's garbage collection step to decide what's safe to delete
    /// (spec §4.11 commit step f).
    pub fn referenced_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for record in &self.segments {
            files.push(crate::segment::trm_file(&record.id));
            files.push(crate::segment::pst_file(&record.id));
            files.push(crate::segment::fln_file(&record.id));
            files.push(crate::segment::fdt_file(&record.id));
            files.push(crate::segment::vec_file(&record.id));
            for (_, name, field_type) in self.schema.iter() {
                if field_type.column().is_some() {
                    files.push(crate::segment::col_file(&record.id, name));
                }
            }
            if let Some(generation) = record.deletion_generation {
                files.push(crate::segment::del_file(&record.id, generation));
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut schema = Schema::new();
        schema.add_field("title", FieldType::Stored).unwrap();
        let toc = Toc { generation: 3, schema, segments: vec![SegmentRecord::fresh("abc".into(), 10)], created_unix_micros: 123 };

        let encoded = toc.encode().unwrap();
        let decoded = Toc::decode(&encoded).unwrap();
        assert_eq!(decoded.generation, 3);
        assert_eq!(decoded.segments.len(), 1);
        assert_eq!(decoded.segments[0].id, "abc");
        assert_eq!(decoded.created_unix_micros, 123);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 32];
        assert!(Toc::decode(&bytes).is_err());
    }

    #[test]
    fn open_latest_picks_largest_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::store::directory::FileStorage::new(dir.path()).unwrap();
        let schema = Schema::new();
        let toc0 = Toc::fresh(schema, 1);
        toc0.publish(&storage, "idx").unwrap();
        let toc1 = toc0.next(vec![SegmentRecord::fresh("s1".into(), 5)], 2);
        toc1.publish(&storage, "idx").unwrap();

        let latest = Toc::open_latest(&storage, "idx").unwrap();
        assert_eq!(latest.generation, 1);
        assert_eq!(latest.segments.len(), 1);
    }

    #[test]
    fn open_latest_fails_on_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::store::directory::FileStorage::new(dir.path()).unwrap();
        assert!(matches!(Toc::open_latest(&storage, "idx"), Err(Error::TocNotFound)));
    }
}
