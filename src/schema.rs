//! The schema: an ordered mapping from field name to `FieldType`. Adapted from
//! the teacher's `mem/document.rs` (`FieldType`/`FieldMetadata`/`DocFields`),
//! generalized from the teacher's small closed set of categorical/textual/
//! numeric variants into the tagged-variant schema the spec calls for.

use crate::io::Bytes;
use crate::{Error, IndexedForm};
use crate::HashMap;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u16);

/// Which typed array a field's column is stored as (spec §4.4).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    VarBytes,
    FixedBytes(u16),
    RefBytes,
    CompactInt,
    Bitset,
    RoaringBitset,
    CompressedBytes,
    Pickled,
}

/// A tag byte for each `FieldType` variant, used by the versioned on-disk
/// schema encoding (spec §7's "reject unknown tags" requirement).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum FieldTag {
    Id = 1,
    Text = 2,
    Numeric = 3,
    Boolean = 4,
    Datetime = 5,
    Keyword = 6,
    Stored = 7,
    Column = 8,
}

impl FieldTag {
    fn from_u8(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            1 => FieldTag::Id,
            2 => FieldTag::Text,
            3 => FieldTag::Numeric,
            4 => FieldTag::Boolean,
            5 => FieldTag::Datetime,
            6 => FieldTag::Keyword,
            7 => FieldTag::Stored,
            8 => FieldTag::Column,
            other => return Err(Error::SchemaError(format!("unknown field tag {}", other))),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NumericKind {
    Int,
    Float,
}

/// A field's shape: what gets analyzed, stored, scored, and column-indexed.
/// Mirrors the teacher's `FieldType` enum, expanded to the variants the
/// query language and parser plugins need self-parsing hooks for (`Numeric`,
/// `Datetime`) and to give every variant an explicit analyzer/indexed_form/
/// column triple instead of deriving them ad hoc from the variant itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldType {
    /// An atomic, unanalyzed identifier. One posting per document.
    Id { stored: bool },
    /// Prose: split into tokens by `analyzer`, optionally position-indexed.
    Text { stored: bool, indexed_form: IndexedForm, analyzer: String },
    /// Sortable/range-queryable numeric value; self-parsing.
    Numeric { stored: bool, kind: NumericKind, sortable: bool },
    Boolean { stored: bool },
    /// Self-parsing timestamp, stored internally as i64 (unix millis).
    Datetime { stored: bool, sortable: bool },
    /// Atomic like `Id` but lowercased/case-folded at analysis time.
    Keyword { stored: bool, scored: bool },
    /// Stored-only: never indexed, never scored, just retrievable.
    Stored,
    /// A bare column with no postings at all (spec §4.4's column writers).
    Column { column: ColumnType },
}

impl FieldType {
    pub fn stored(&self) -> bool {
        match self {
            FieldType::Id { stored } => *stored,
            FieldType::Text { stored, .. } => *stored,
            FieldType::Numeric { stored, .. } => *stored,
            FieldType::Boolean { stored } => *stored,
            FieldType::Datetime { stored, .. } => *stored,
            FieldType::Keyword { stored, .. } => *stored,
            FieldType::Stored => true,
            FieldType::Column { .. } => false,
        }
    }

    /// Whether per-document length is recorded for length-normalized scoring.
    pub fn scored(&self) -> bool {
        match self {
            FieldType::Text { indexed_form, .. } => indexed_form.weights,
            FieldType::Keyword { scored, .. } => *scored,
            _ => false,
        }
    }

    pub fn indexed_form(&self) -> IndexedForm {
        match self {
            FieldType::Id { .. } => IndexedForm::docs_only(),
            FieldType::Text { indexed_form, .. } => *indexed_form,
            FieldType::Numeric { .. } => IndexedForm::docs_only(),
            FieldType::Boolean { .. } => IndexedForm::docs_only(),
            FieldType::Datetime { .. } => IndexedForm::docs_only(),
            FieldType::Keyword { scored, .. } => {
                if *scored {
                    IndexedForm::with_weights()
                } else {
                    IndexedForm::docs_only()
                }
            }
            FieldType::Stored | FieldType::Column { .. } => IndexedForm::docs_only(),
        }
    }

    pub fn column(&self) -> Option<ColumnType> {
        match self {
            FieldType::Numeric { kind: NumericKind::Int, .. } => Some(ColumnType::CompactInt),
            FieldType::Numeric { kind: NumericKind::Float, .. } => Some(ColumnType::FixedBytes(8)),
            FieldType::Datetime { sortable: true, .. } => Some(ColumnType::CompactInt),
            FieldType::Boolean { .. } => Some(ColumnType::Bitset),
            FieldType::Column { column } => Some(*column),
            _ => None,
        }
    }

    /// Fields that parse their own query strings bypass the tokenizer chain
    /// entirely (spec §3's `self_parsing`); numeric/date range parsing lives
    /// on the field, not in the query parser.
    pub fn self_parsing(&self) -> bool {
        matches!(self, FieldType::Numeric { .. } | FieldType::Datetime { .. })
    }

    pub fn is_indexed(&self) -> bool {
        !matches!(self, FieldType::Stored | FieldType::Column { .. })
    }

    /// Encode a query-string literal into the canonical term bytes this
    /// field's postings are keyed by. Numeric/datetime fields pack a
    /// sign-flipped big-endian integer so lexicographic order on termbytes
    /// matches numeric order; other field types pass bytes through unchanged.
    pub fn to_termbytes(&self, literal: &str) -> Result<Bytes, Error> {
        match self {
            FieldType::Numeric { kind: NumericKind::Int, .. } => {
                let v: i64 = literal
                    .parse()
                    .map_err(|_| Error::SchemaError(format!("not an integer: {}", literal)))?;
                Ok(Bytes::from_slice(&pack_sortable_i64(v)))
            }
            FieldType::Numeric { kind: NumericKind::Float, .. } => {
                let v: f64 = literal
                    .parse()
                    .map_err(|_| Error::SchemaError(format!("not a float: {}", literal)))?;
                Ok(Bytes::from_slice(&pack_sortable_f64(v)))
            }
            FieldType::Datetime { .. } => {
                let v: i64 = literal
                    .parse()
                    .map_err(|_| Error::SchemaError(format!("not a timestamp: {}", literal)))?;
                Ok(Bytes::from_slice(&pack_sortable_i64(v)))
            }
            FieldType::Keyword { .. } => Ok(Bytes::from_slice(literal.to_lowercase().as_bytes())),
            _ => Ok(Bytes::from_slice(literal.as_bytes())),
        }
    }

    fn tag(&self) -> FieldTag {
        match self {
            FieldType::Id { .. } => FieldTag::Id,
            FieldType::Text { .. } => FieldTag::Text,
            FieldType::Numeric { .. } => FieldTag::Numeric,
            FieldType::Boolean { .. } => FieldTag::Boolean,
            FieldType::Datetime { .. } => FieldTag::Datetime,
            FieldType::Keyword { .. } => FieldTag::Keyword,
            FieldType::Stored => FieldTag::Stored,
            FieldType::Column { .. } => FieldTag::Column,
        }
    }
}

/// Sign-flip the top bit so two's-complement order becomes unsigned order,
/// which is what byte-lexicographic comparison of the dictionary needs.
pub fn pack_sortable_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1u64 << 63)).to_be_bytes()
}
pub fn unpack_sortable_i64(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1u64 << 63)) as i64
}

/// IEEE-754 bit tricks for monotonic unsigned ordering of floats: flip the
/// sign bit for positives, flip every bit for negatives.
pub fn pack_sortable_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let flipped = if bits & (1u64 << 63) != 0 { !bits } else { bits | (1u64 << 63) };
    flipped.to_be_bytes()
}
pub fn unpack_sortable_f64(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let orig = if bits & (1u64 << 63) != 0 { bits & !(1u64 << 63) } else { !bits };
    f64::from_bits(orig)
}

/// An ordered name → FieldType mapping. Fields may be appended but never
/// removed (spec §3); `field_id` is assigned on first insertion and is
/// stable for the life of the schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    names: Vec<String>,
    types: Vec<FieldType>,
    #[serde(skip)]
    by_name: HashMap<String, FieldId>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn add_field(&mut self, name: &str, kind: FieldType) -> Result<FieldId, Error> {
        if self.by_name.contains_key(name) {
            return Err(Error::SchemaError(format!("field already exists: {}", name)));
        }
        let id = FieldId(self.names.len() as u16);
        self.names.push(name.to_owned());
        self.types.push(kind);
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    pub fn field_type(&self, id: FieldId) -> &FieldType {
        &self.types[id.0 as usize]
    }

    pub fn field_name(&self, id: FieldId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Result<(FieldId, &FieldType), Error> {
        let id = self.field_id(name).ok_or_else(|| Error::SchemaError(format!("unknown field: {}", name)))?;
        Ok((id, self.field_type(id)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &str, &FieldType)> {
        self.names
            .iter()
            .zip(self.types.iter())
            .enumerate()
            .map(|(i, (name, kind))| (FieldId(i as u16), name.as_str(), kind))
    }

    /// Rebuild the `by_name` index; required after deserializing, since that
    /// map is not itself serialized (field order alone is authoritative).
    pub fn rebuild_index(&mut self) {
        self.by_name = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), FieldId(i as u16)))
            .collect();
    }

    /// Confirm every field type carries a known tag. The TOC envelope
    /// (`crate::toc`) calls this right after JSON-decoding a schema, so a
    /// future field-type addition that an older reader doesn't understand
    /// fails loudly instead of silently misreading bytes.
    pub fn validate_tags(&self) -> Result<(), Error> {
        for kind in &self.types {
            FieldTag::from_u8(kind.tag() as u8)?;
        }
        Ok(())
    }
}

/// One field/value pair of a document being indexed, mirroring the teacher's
/// `DocField`. Values are always plain strings at this layer; self-parsing
/// fields convert them through `FieldType::to_termbytes` during indexing.
#[derive(Clone, Debug)]
pub struct DocField {
    pub field: FieldId,
    pub value: String,
}

/// A document builder. Like the teacher's `DocFields`, this supports
/// chaining, but fields are looked up by name against a `Schema` rather than
/// constructed directly against a `FieldId`, since callers build documents
/// before they always know field ids offhand.
#[derive(Default, Clone, Debug)]
pub struct Document {
    fields: Vec<DocField>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn add(&mut self, field: FieldId, value: impl Into<String>) -> &mut Self {
        self.fields.push(DocField { field, value: value.into() });
        self
    }

    pub fn as_ref(&self) -> &[DocField] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_assigns_stable_ids() {
        let mut schema = Schema::new();
        let title = schema.add_field("title", FieldType::Text {
            stored: true,
            indexed_form: IndexedForm::with_positions(),
            analyzer: "whitespace".into(),
        }).unwrap();
        let n = schema.add_field("n", FieldType::Numeric {
            stored: true,
            kind: NumericKind::Int,
            sortable: true,
        }).unwrap();
        assert_eq!(title, FieldId(0));
        assert_eq!(n, FieldId(1));
        assert_eq!(schema.field_id("title"), Some(title));
        assert!(schema.add_field("title", FieldType::Stored).is_err());
    }

    #[test]
    fn sortable_i64_preserves_order() {
        let mut values = vec![5i64, 12, 78, 13, 9, 582_045, -5, i64::MIN, i64::MAX, 0];
        let mut packed: Vec<_> = values.iter().map(|v| pack_sortable_i64(*v)).collect();
        values.sort();
        packed.sort();
        let round_tripped: Vec<i64> = packed.into_iter().map(unpack_sortable_i64).collect();
        assert_eq!(values, round_tripped);
    }

    #[test]
    fn sortable_f64_preserves_order() {
        let mut values = vec![-5.5f64, 0.0, 1.5, -1.5, 100.25, -100.25];
        let mut packed: Vec<_> = values.iter().map(|v| pack_sortable_f64(*v)).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        packed.sort();
        let round_tripped: Vec<f64> = packed.into_iter().map(unpack_sortable_f64).collect();
        assert_eq!(values, round_tripped);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(FieldTag::from_u8(99).is_err());
        assert!(FieldTag::from_u8(1).is_ok());
    }
}
