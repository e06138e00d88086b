use tensorblob_tensor::{DeviceError, ElementType, TensorError};
use thiserror::Error;

/// An error type for blob serialization and deserialization.
///
/// Every variant except [`BlobError::Parse`] aborts the current call: the
/// output may be partially written and is not rolled back.
#[derive(Error, Debug)]
pub enum BlobError {
    /// A chunk range does not fit inside the tensor.
    #[error("Invalid chunk [{begin}, {end}) with total tensor size {numel}")]
    InvalidChunk {
        /// First element of the chunk
        begin: usize,
        /// One past the last element of the chunk
        end: usize,
        /// Number of elements in the tensor
        numel: usize,
    },

    /// A record's segment bounds do not fit in a `usize` on this host.
    #[error("Segment [{begin}, {end}) exceeds the addressable range")]
    InvalidSegment {
        /// First element of the segment, as written
        begin: u64,
        /// One past the last element of the segment, as written
        end: u64,
    },

    /// A record's dims do not describe an addressable tensor.
    #[error("Dims {0:?} overflow the addressable number of elements")]
    InvalidShape(Vec<u64>),

    /// A device ordinal does not fit the wire or host representation.
    #[error("Device ordinal {0} is out of range")]
    InvalidDeviceId(u64),

    /// The tensor has a non-zero shape but its data was never filled.
    #[error("Tensor {name:?} has {numel} elements but no data. Fill it before serializing.")]
    TensorNotFilled {
        /// Name of the blob being serialized
        name: String,
        /// Number of elements in the tensor
        numel: usize,
    },

    /// The target tensor must have storage and an element type before decoding into it.
    #[error("Tensor must be initialized before it is passed to the decoder")]
    TensorNotInitialized,

    /// The payload variant or length does not match the record header.
    #[error("Incorrect payload for {data_type}: expected {expected} values, got {actual}")]
    PayloadMismatch {
        /// Name of the wire data type
        data_type: &'static str,
        /// Expected number of payload values
        expected: usize,
        /// Actual number of payload values
        actual: usize,
    },

    /// The record's data type cannot be written into the target element type.
    #[error("Type mismatch: record holds {record}, tensor holds {tensor:?}")]
    TypeMismatch {
        /// Name of the wire data type of the record
        record: String,
        /// Element type of the destination tensor
        tensor: ElementType,
    },

    /// The wire data type code is not known.
    #[error("Unknown data type code {0}")]
    UnknownDataType(i32),

    /// BYTE is a read-only legacy wire type.
    #[error("BYTE is deprecated for serialization, uint8 tensors are written as UINT8")]
    DeprecatedByteType,

    /// Half precision byte serialization is only implemented for little endian hosts.
    #[error("Serialization of FLOAT16 as bytes on a big endian platform is not supported")]
    BigEndianUnsupported,

    /// No serializer was registered for the blob's type.
    #[error("No known serializer for {0}")]
    NoSerializer(String),

    /// No deserializer was registered for the record's type name.
    #[error("No registered deserializer for type {0}")]
    NoDeserializer(String),

    /// A serializer or deserializer is registered twice under the same key.
    #[error("Duplicate registration for {0}")]
    DuplicateRegistration(String),

    /// A record marked as a tensor carries no tensor.
    #[error("Record {0:?} is marked as a tensor but carries no tensor")]
    MissingTensor(String),

    /// A string record does not hold valid UTF-8.
    #[error("Record {0:?} does not hold valid UTF-8 text")]
    InvalidUtf8(String),

    /// The blob to serialize holds no value.
    #[error("Blob {0:?} is empty")]
    EmptyBlob(String),

    /// The serializer was handed a value of another type.
    #[error("Serializer for {expected} was handed a value of another type")]
    UnexpectedValue {
        /// The type the serializer handles
        expected: &'static str,
    },

    /// Chunks of one tensor disagree on shape, type or device.
    #[error("Inconsistent chunks for tensor {0:?}")]
    InconsistentChunks(String),

    /// Two chunks cover the same elements.
    #[error("Chunk [{begin}, {end}) overlaps an already applied chunk")]
    OverlappingChunks {
        /// First element of the rejected chunk
        begin: usize,
        /// One past the last element of the rejected chunk
        end: usize,
    },

    /// Not every element of the tensor was covered by a chunk.
    #[error("Tensor is incomplete: {covered} of {numel} elements received")]
    IncompleteTensor {
        /// Number of covered elements
        covered: usize,
        /// Number of elements in the tensor
        numel: usize,
    },

    /// No chunk was ever added.
    #[error("No chunks were received")]
    NoChunks,

    /// Invalid configuration value.
    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig {
        /// The configuration key
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The worker pool failed to build.
    #[error("Failed to build the serializer thread pool: {0}")]
    ThreadPool(String),

    /// Wire bytes could not be parsed into a record.
    #[error("Cannot parse content into a blob record: {0}")]
    Parse(#[from] bincode::error::DecodeError),

    /// A record could not be encoded.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Buffer error.
    #[error("Error with the tensor: {0}")]
    Tensor(#[from] TensorError),

    /// Device copy error.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl BlobError {
    /// Creates an InvalidChunk error.
    pub fn invalid_chunk(begin: usize, end: usize, numel: usize) -> Self {
        Self::InvalidChunk { begin, end, numel }
    }

    /// Creates an InvalidConfig error.
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error aborts the call.
    ///
    /// Only parse failures are reported as a recoverable result: a caller can
    /// check whether bytes parsed before acting on them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }

    /// Returns true if the error indicates a build or registration defect
    /// rather than bad data.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::NoSerializer(_) | Self::NoDeserializer(_) | Self::DuplicateRegistration(_)
        )
    }

    /// Returns a user-friendly suggestion for resolving the error.
    pub fn suggestion(&self) -> &str {
        match self {
            Self::InvalidChunk { .. } | Self::OverlappingChunks { .. } => {
                "Check that chunk segments lie within the tensor and do not overlap"
            }
            Self::TensorNotFilled { .. } => {
                "Fill the tensor data before serializing, or serialize a zero-sized tensor"
            }
            Self::TensorNotInitialized => "Allocate the tensor storage before decoding into it",
            Self::PayloadMismatch { .. }
            | Self::Parse(_)
            | Self::UnknownDataType(_)
            | Self::MissingTensor(_)
            | Self::InvalidUtf8(_)
            | Self::InvalidSegment { .. }
            | Self::InvalidShape(_) => {
                "The record is corrupted or was written by an incompatible producer"
            }
            Self::TypeMismatch { .. } => {
                "Decode into a tensor of the record's type, or let the decoder allocate one"
            }
            Self::DeprecatedByteType => "Store the data as a uint8 tensor",
            Self::BigEndianUnsupported => {
                "Disable serialize_fp16_as_bytes to write FLOAT16 as int32 bit patterns"
            }
            Self::NoSerializer(_) | Self::NoDeserializer(_) => {
                "Register the type in the Registry used to build the codec"
            }
            Self::DuplicateRegistration(_) => "Register each type only once",
            Self::EmptyBlob(_) | Self::UnexpectedValue { .. } => {
                "Store a value of the registered type in the blob"
            }
            Self::InconsistentChunks(_) | Self::IncompleteTensor { .. } | Self::NoChunks => {
                "Feed every chunk of one tensor, and only that tensor, to the assembler"
            }
            Self::InvalidConfig { .. } => "Check the configuration value",
            Self::ThreadPool(_) => "Lower max_serializer_threads",
            Self::Encode(_) => "Check the record contents",
            Self::Tensor(_) => "Check the tensor shape and element type",
            Self::InvalidDeviceId(_) => "Use a device ordinal below 2^32",
            Self::Device(e) => e.suggestion(),
        }
    }
}
