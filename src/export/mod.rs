//! Model persistence
//!
//! Trained detectors are written as self-describing files that carry the
//! algorithm tag, format version and a payload checksum, so loading rejects
//! foreign or damaged files with `CorruptOrMissingModel`.

mod serializer;

pub use serializer::{load_detector, read_header, save_detector, ModelHeader, SerializationFormat};
