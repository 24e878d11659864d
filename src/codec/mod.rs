//! The on-disk codec layer (spec §4.2-§4.5): block-structured postings, the
//! two-level term dictionary, and the three parallel per-document stores
//! (stored fields, field lengths, columns), plus per-document vectors.

pub mod column;
pub mod length_byte;
pub mod lengths;
pub mod posting;
pub mod stored;
pub mod termdict;
pub mod vectors;
