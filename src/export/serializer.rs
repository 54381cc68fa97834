//! Self-describing model files
//!
//! Layout: `{ magic "KOLA", format_version, header, payload, checksum }`.
//! The payload is the bincode encoding of the detector config and fitted
//! model; the checksum is FNV-1a over the payload. The envelope itself is
//! bincode, or pretty JSON when the file name ends in `.json`.

use crate::engine::{Algorithm, Detector, DetectorConfig, TrainedModel};
use crate::error::{KolosalError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Magic bytes for model files
const MAGIC: [u8; 4] = *b"KOLA";
/// Current format version
const FORMAT_VERSION: u32 = 1;

/// Envelope encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializationFormat {
    /// Binary format using bincode (efficient)
    Binary,
    /// JSON format (portable, human-readable header)
    Json,
}

impl Default for SerializationFormat {
    fn default() -> Self {
        SerializationFormat::Binary
    }
}

impl SerializationFormat {
    /// JSON for `.json` paths, binary otherwise
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SerializationFormat::Json,
            _ => SerializationFormat::Binary,
        }
    }
}

/// Readable description of a stored model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHeader {
    pub algorithm: Algorithm,
    pub n_features: usize,
    /// RFC 3339 timestamp of the save
    pub trained_at: String,
    /// Crate version that wrote the file
    pub engine_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedModel {
    magic: [u8; 4],
    format_version: u32,
    header: ModelHeader,
    payload: Vec<u8>,
    checksum: u64,
}

impl SerializedModel {
    fn new(header: ModelHeader, payload: Vec<u8>) -> Self {
        let checksum = compute_checksum(&payload);
        Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            header,
            payload,
            checksum,
        }
    }

    fn verify(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(corrupt("not a model file (bad magic)"));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if compute_checksum(&self.payload) != self.checksum {
            return Err(corrupt("checksum verification failed, file may be corrupted"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    config: &'a DetectorConfig,
    model: &'a TrainedModel,
}

#[derive(Deserialize)]
struct Payload {
    config: DetectorConfig,
    model: TrainedModel,
}

/// Compute checksum using FNV-1a hash
fn compute_checksum(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn corrupt(message: impl Into<String>) -> KolosalError {
    KolosalError::CorruptOrMissingModel(message.into())
}

/// Write a trained detector to `path`, creating parent directories
pub fn save_detector(detector: &Detector, path: &Path) -> Result<ModelHeader> {
    let model = detector.model().ok_or(KolosalError::ModelNotTrained)?;

    let payload = bincode::serialize(&PayloadRef {
        config: detector.config(),
        model,
    })
    .map_err(|e| KolosalError::SerializationError(format!("Failed to serialize model: {}", e)))?;

    let header = ModelHeader {
        algorithm: detector.algorithm(),
        n_features: detector.n_features().unwrap_or(0),
        trained_at: chrono::Utc::now().to_rfc3339(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let serialized = SerializedModel::new(header.clone(), payload);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    let format = SerializationFormat::from_path(path);
    match format {
        SerializationFormat::Binary => {
            bincode::serialize_into(&mut writer, &serialized).map_err(|e| {
                KolosalError::SerializationError(format!("Failed to write model: {}", e))
            })?;
        }
        SerializationFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &serialized)?;
        }
    }
    writer.flush()?;

    info!(
        algorithm = %header.algorithm,
        path = %path.display(),
        format = ?format,
        bytes = serialized.payload.len(),
        "Model saved"
    );
    Ok(header)
}

fn read_envelope(path: &Path) -> Result<SerializedModel> {
    let file = File::open(path)
        .map_err(|e| corrupt(format!("cannot open {}: {}", path.display(), e)))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| corrupt(format!("cannot read {}: {}", path.display(), e)))?;

    let serialized: SerializedModel = match SerializationFormat::from_path(path) {
        SerializationFormat::Binary => {
            if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
                return Err(corrupt("not a model file (bad magic)"));
            }
            bincode::deserialize(&bytes)
                .map_err(|e| corrupt(format!("unreadable model envelope: {}", e)))?
        }
        SerializationFormat::Json => serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("unreadable model envelope: {}", e)))?,
    };

    serialized.verify()?;
    Ok(serialized)
}

/// Read only the header of a stored model
pub fn read_header(path: &Path) -> Result<ModelHeader> {
    Ok(read_envelope(path)?.header)
}

/// Load a detector written by [`save_detector`]
pub fn load_detector(path: &Path) -> Result<Detector> {
    let serialized = read_envelope(path)?;

    let payload: Payload = bincode::deserialize(&serialized.payload)
        .map_err(|e| corrupt(format!("unreadable model payload: {}", e)))?;

    if payload.config.algorithm() != serialized.header.algorithm {
        return Err(corrupt(format!(
            "header says {} but payload holds {}",
            serialized.header.algorithm,
            payload.config.algorithm()
        )));
    }

    let detector = Detector::from_parts(payload.config, payload.model)?;
    debug!(
        algorithm = %detector.algorithm(),
        path = %path.display(),
        trained_at = %serialized.header.trained_at,
        "Model loaded"
    );
    Ok(detector)
}
