//! Serializers and deserializers, keyed by type.
//!
//! Serializers are found by the [`TypeTag`] of the value held in a blob.
//! Deserializers are found by the type name written into the record: tensor
//! records use `"Tensor" + DeviceType::name()`, other records use the name
//! their serializer wrote.

use std::any::Any;
use std::collections::HashMap;

use tensorblob_tensor::{Blob, DeviceType, TypeTag, TypedBuffer};

use crate::chunk::ChunkSize;
use crate::codec::BlobCodec;
use crate::decoder;
use crate::encoder;
use crate::error::BlobError;
use crate::record::{BlobRecord, TENSOR_BLOB_TYPE};

/// Receives every record produced by a serializer, with its key.
///
/// Tensor serializers call the sink from several worker threads at once.
pub type RecordSink<'a> = dyn Fn(&str, BlobRecord) -> Result<(), BlobError> + Sync + 'a;

/// Wire type name of [`String`] blobs.
pub const STRING_BLOB_TYPE: &str = "std::string";

/// Turns a value of one type into records.
pub trait BlobSerializer: Send + Sync {
    /// Serializes `value`, handing each record to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::UnexpectedValue`] if `value` is not of the
    /// serializer's type, or any error raised while encoding.
    fn serialize(
        &self,
        codec: &BlobCodec,
        value: &dyn Any,
        name: &str,
        sink: &RecordSink<'_>,
        chunk_size: ChunkSize,
    ) -> Result<(), BlobError>;
}

/// Turns a record back into a value stored in a blob.
pub trait BlobDeserializer: Send + Sync {
    /// Deserializes `record` into `blob`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be decoded.
    fn deserialize(
        &self,
        codec: &BlobCodec,
        record: &BlobRecord,
        blob: &mut Blob,
    ) -> Result<(), BlobError>;
}

/// Creates a serializer instance.
pub type SerializerFactory = Box<dyn Fn() -> Box<dyn BlobSerializer> + Send + Sync>;

/// Creates a deserializer instance.
pub type DeserializerFactory = Box<dyn Fn() -> Box<dyn BlobDeserializer> + Send + Sync>;

struct SerializerEntry {
    type_name: String,
    factory: SerializerFactory,
}

/// Maps value types to serializers and wire type names to deserializers.
///
/// A registry is built once, then shared read-only by every codec using it.
///
/// # Example
///
/// ```
/// use tensorblob::Registry;
/// use tensorblob_tensor::{TypeTag, TypedBuffer};
///
/// let registry = Registry::with_defaults();
/// assert!(registry.serializer(TypeTag::of::<TypedBuffer>()).is_ok());
/// assert!(registry.deserializer("TensorCUDA").is_ok());
/// assert!(registry.deserializer("Unknown").is_err());
/// ```
#[derive(Default)]
pub struct Registry {
    serializers: HashMap<TypeTag, SerializerEntry>,
    deserializers: HashMap<String, DeserializerFactory>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the tensor and string handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.serializers.insert(
            TypeTag::of::<TypedBuffer>(),
            SerializerEntry {
                type_name: TENSOR_BLOB_TYPE.to_string(),
                factory: Box::new(|| -> Box<dyn BlobSerializer> { Box::new(TensorSerializer) }),
            },
        );
        for device_type in DeviceType::ALL {
            registry.deserializers.insert(
                tensor_deserializer_key(device_type),
                Box::new(|| -> Box<dyn BlobDeserializer> { Box::new(TensorDeserializer) }),
            );
        }
        registry.serializers.insert(
            TypeTag::of::<String>(),
            SerializerEntry {
                type_name: STRING_BLOB_TYPE.to_string(),
                factory: Box::new(|| -> Box<dyn BlobSerializer> { Box::new(StringSerializer) }),
            },
        );
        registry.deserializers.insert(
            STRING_BLOB_TYPE.to_string(),
            Box::new(|| -> Box<dyn BlobDeserializer> { Box::new(StringDeserializer) }),
        );
        registry
    }

    /// Registers the serializer for values tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::DuplicateRegistration`] if `tag` already has a serializer.
    pub fn register_serializer<F>(
        &mut self,
        tag: TypeTag,
        type_name: impl Into<String>,
        factory: F,
    ) -> Result<(), BlobError>
    where
        F: Fn() -> Box<dyn BlobSerializer> + Send + Sync + 'static,
    {
        if self.serializers.contains_key(&tag) {
            return Err(BlobError::DuplicateRegistration(tag.name().to_string()));
        }
        self.serializers.insert(
            tag,
            SerializerEntry {
                type_name: type_name.into(),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Registers the deserializer for records of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::DuplicateRegistration`] if `type_name` already has a deserializer.
    pub fn register_deserializer<F>(
        &mut self,
        type_name: impl Into<String>,
        factory: F,
    ) -> Result<(), BlobError>
    where
        F: Fn() -> Box<dyn BlobDeserializer> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.deserializers.contains_key(&type_name) {
            return Err(BlobError::DuplicateRegistration(type_name));
        }
        self.deserializers.insert(type_name, Box::new(factory));
        Ok(())
    }

    /// Returns a serializer for values tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NoSerializer`] if none is registered.
    pub fn serializer(&self, tag: TypeTag) -> Result<Box<dyn BlobSerializer>, BlobError> {
        self.serializers
            .get(&tag)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| BlobError::NoSerializer(tag.name().to_string()))
    }

    /// Returns the wire type name registered with the serializer for `tag`.
    pub fn type_name(&self, tag: TypeTag) -> Option<&str> {
        self.serializers.get(&tag).map(|entry| entry.type_name.as_str())
    }

    /// Returns a deserializer for records of `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NoDeserializer`] if none is registered.
    pub fn deserializer(&self, type_name: &str) -> Result<Box<dyn BlobDeserializer>, BlobError> {
        self.deserializers
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| BlobError::NoDeserializer(type_name.to_string()))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut deserializers: Vec<_> = self.deserializers.keys().collect();
        deserializers.sort();
        f.debug_struct("Registry")
            .field("serializers", &self.serializers.len())
            .field("deserializers", &deserializers)
            .finish()
    }
}

/// Returns the deserializer key of tensors serialized from `device_type`.
pub fn tensor_deserializer_key(device_type: DeviceType) -> String {
    format!("{TENSOR_BLOB_TYPE}{}", device_type.name())
}

/// Serializes [`TypedBuffer`] blobs as chunked tensor records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorSerializer;

impl BlobSerializer for TensorSerializer {
    fn serialize(
        &self,
        codec: &BlobCodec,
        value: &dyn Any,
        name: &str,
        sink: &RecordSink<'_>,
        chunk_size: ChunkSize,
    ) -> Result<(), BlobError> {
        let buffer = value
            .downcast_ref::<TypedBuffer>()
            .ok_or(BlobError::UnexpectedValue {
                expected: "TypedBuffer",
            })?;
        encoder::encode_tensor(codec, buffer, name, chunk_size, sink)
    }
}

/// Deserializes tensor records into a [`TypedBuffer`] blob.
///
/// A blob already holding a buffer of the record's shape, element type and
/// device is filled in place, so the chunks of one tensor can be applied to
/// the same blob one after the other.
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorDeserializer;

impl BlobDeserializer for TensorDeserializer {
    fn deserialize(
        &self,
        codec: &BlobCodec,
        record: &BlobRecord,
        blob: &mut Blob,
    ) -> Result<(), BlobError> {
        let tensor = record
            .tensor
            .as_ref()
            .ok_or_else(|| BlobError::MissingTensor(record.name.clone()))?;

        if decoder::is_legacy_empty(tensor)? {
            blob.set(decoder::empty_tensor_from_record(codec, tensor)?);
            return Ok(());
        }

        let reusable = blob
            .get::<TypedBuffer>()
            .is_some_and(|buffer| decoder::matches_record(buffer, tensor));
        if !reusable {
            blob.set(decoder::empty_tensor_from_record(codec, tensor)?);
        }
        let buffer = blob
            .get_mut::<TypedBuffer>()
            .ok_or(BlobError::UnexpectedValue {
                expected: "TypedBuffer",
            })?;
        decoder::decode_into(codec, tensor, buffer)
    }
}

/// Serializes [`String`] blobs as one opaque record.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringSerializer;

impl BlobSerializer for StringSerializer {
    fn serialize(
        &self,
        _codec: &BlobCodec,
        value: &dyn Any,
        name: &str,
        sink: &RecordSink<'_>,
        _chunk_size: ChunkSize,
    ) -> Result<(), BlobError> {
        let text = value
            .downcast_ref::<String>()
            .ok_or(BlobError::UnexpectedValue { expected: "String" })?;
        sink(
            name,
            BlobRecord::opaque(name, STRING_BLOB_TYPE, text.as_bytes().to_vec()),
        )
    }
}

/// Deserializes `std::string` records into a [`String`] blob.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringDeserializer;

impl BlobDeserializer for StringDeserializer {
    fn deserialize(
        &self,
        _codec: &BlobCodec,
        record: &BlobRecord,
        blob: &mut Blob,
    ) -> Result<(), BlobError> {
        let text = String::from_utf8(record.content.clone())
            .map_err(|_| BlobError::InvalidUtf8(record.name.clone()))?;
        blob.set(text);
        Ok(())
    }
}
