#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `tensorblob` turns blobs into self-describing wire records and back:
//!
//! - **BlobCodec**: entry point, bundling the registry, the configuration and the device copy service
//! - **Registry**: serializers keyed by value type, deserializers keyed by wire type name
//! - **ChunkPlan**: splits a tensor into bounded chunks, one record each
//! - **encoder / decoder**: convert one chunk between a [`tensorblob_tensor::TypedBuffer`] and a [`TensorRecord`]
//! - **TensorAssembler**: rebuilds a tensor from chunk records fed in any order
//!
//! Large tensors are encoded on a local worker pool. Decoding runs on the
//! calling thread.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Mutex;
//! use tensorblob::{BlobCodec, ChunkSize};
//! use tensorblob_tensor::{Blob, Device, TypedBuffer};
//!
//! let codec = BlobCodec::cpu();
//! let buffer = TypedBuffer::from_vec(vec![4], vec![1i64, 2, 3, 4], Device::cpu()).unwrap();
//!
//! let records = Mutex::new(Vec::new());
//! codec
//!     .serialize_blob(
//!         &Blob::new(buffer),
//!         "ids",
//!         &|key, bytes| records.lock().unwrap().push((key.to_string(), bytes)),
//!         ChunkSize::Elements(2),
//!     )
//!     .unwrap();
//!
//! let mut keys: Vec<_> = records.into_inner().unwrap().into_iter().map(|(k, _)| k).collect();
//! keys.sort();
//! assert_eq!(keys, vec!["ids#%0", "ids#%1"]);
//! ```

/// Rebuilding tensors from chunk records.
pub mod assembler;

pub mod chunk;

/// Blob serialization entry point.
pub mod codec;

/// Serializer configuration.
pub mod config;

/// Decoding tensor records into buffers.
pub mod decoder;

/// Encoding tensor chunks into records.
pub mod encoder;

/// Error types for serialization.
pub mod error;

pub mod record;

pub mod registry;

/// Worker pool for chunk encoding.
pub mod scheduler;

pub use crate::assembler::TensorAssembler;
pub use crate::chunk::{chunk_key, split_chunk_key, ChunkPlan, ChunkRange, ChunkSize};
pub use crate::codec::BlobCodec;
pub use crate::config::SerializerConfig;
pub use crate::error::BlobError;
pub use crate::record::{BlobRecord, DataType, DeviceDetail, Payload, Segment, TensorRecord};
pub use crate::registry::{BlobDeserializer, BlobSerializer, RecordSink, Registry};
