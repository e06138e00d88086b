use serde::{Deserialize, Serialize};

use crate::error::BlobError;

/// Default number of elements per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Default upper bound on serializer worker threads.
pub const DEFAULT_MAX_SERIALIZER_THREADS: usize = 16;

/// Configuration for the serialization engine.
///
/// The configuration is fixed once the [`crate::BlobCodec`] is built.
///
/// NOTE: `serialize_fp16_as_bytes` changes the wire layout of FLOAT16 tensors.
/// Readers accept both layouts, but an older reader that only knows the int32
/// layout cannot read byte-pair records. There is no version negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Number of elements per chunk when the caller asks for the default.
    pub chunk_size: usize,
    /// Maximum number of worker threads used to encode the chunks of one tensor.
    pub max_serializer_threads: usize,
    /// Write FLOAT16 tensors as little-endian byte pairs instead of int32 bit patterns.
    pub serialize_fp16_as_bytes: bool,
    /// Reject overlapping and missing chunks when assembling tensors.
    pub strict_segments: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_serializer_threads: DEFAULT_MAX_SERIALIZER_THREADS,
            serialize_fp16_as_bytes: false,
            strict_segments: false,
        }
    }
}

const ENV_CHUNK_SIZE: &str = "TENSORBLOB_CHUNK_SIZE";
const ENV_MAX_SERIALIZER_THREADS: &str = "TENSORBLOB_MAX_SERIALIZER_THREADS";
const ENV_SERIALIZE_FP16_AS_BYTES: &str = "TENSORBLOB_SERIALIZE_FP16_AS_BYTES";
const ENV_STRICT_SEGMENTS: &str = "TENSORBLOB_STRICT_SEGMENTS";

impl SerializerConfig {
    /// Sets the default chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the maximum number of serializer threads.
    pub fn with_max_serializer_threads(mut self, threads: usize) -> Self {
        self.max_serializer_threads = threads;
        self
    }

    /// Sets the FLOAT16 wire layout.
    pub fn with_serialize_fp16_as_bytes(mut self, enabled: bool) -> Self {
        self.serialize_fp16_as_bytes = enabled;
        self
    }

    /// Enables strict chunk assembly.
    pub fn with_strict_segments(mut self, enabled: bool) -> Self {
        self.strict_segments = enabled;
        self
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if the JSON is malformed or the values are invalid.
    pub fn from_json(json: &str) -> Result<Self, BlobError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BlobError::invalid_config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the `TENSORBLOB_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, BlobError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BlobError> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_usize(ENV_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_SERIALIZER_THREADS) {
            config.max_serializer_threads = parse_usize(ENV_MAX_SERIALIZER_THREADS, &v)?;
        }
        if let Some(v) = lookup(ENV_SERIALIZE_FP16_AS_BYTES) {
            config.serialize_fp16_as_bytes = parse_bool(ENV_SERIALIZE_FP16_AS_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_STRICT_SEGMENTS) {
            config.strict_segments = parse_bool(ENV_STRICT_SEGMENTS, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if the chunk size is zero.
    pub fn validate(&self) -> Result<(), BlobError> {
        if self.chunk_size == 0 {
            return Err(BlobError::invalid_config("chunk_size", "must be > 0"));
        }
        Ok(())
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, BlobError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| BlobError::invalid_config(key, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, BlobError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BlobError::invalid_config(
            key,
            format!("expected a boolean, got {other:?}"),
        )),
    }
}
