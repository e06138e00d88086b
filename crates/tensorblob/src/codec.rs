use std::sync::{Arc, Mutex};

use tensorblob_tensor::{Blob, CpuCopyService, DeviceCopyService, DeviceType};

use crate::chunk::ChunkSize;
use crate::config::SerializerConfig;
use crate::error::BlobError;
use crate::record::BlobRecord;
use crate::registry::{tensor_deserializer_key, RecordSink, Registry};

/// Serializes blobs into wire records and back.
///
/// A codec bundles the type registry, the configuration and the device copy
/// service. It is cheap to clone and safe to share between threads.
///
/// # Example
///
/// ```
/// use tensorblob::{BlobCodec, ChunkSize};
/// use tensorblob_tensor::{Blob, Device, TypedBuffer};
///
/// let codec = BlobCodec::cpu();
/// let buffer = TypedBuffer::from_vec(vec![2], vec![1.0f32, 2.0], Device::cpu()).unwrap();
///
/// let bytes = codec.serialize_blob_to_bytes(&Blob::new(buffer), "w").unwrap();
/// let mut restored = Blob::empty();
/// codec.deserialize_blob(&bytes, &mut restored).unwrap();
/// assert_eq!(
///     restored.get::<TypedBuffer>().and_then(|b| b.as_slice::<f32>()),
///     Some(&[1.0, 2.0][..])
/// );
/// ```
#[derive(Clone)]
pub struct BlobCodec {
    registry: Arc<Registry>,
    config: SerializerConfig,
    devices: Arc<dyn DeviceCopyService>,
}

impl BlobCodec {
    /// Creates a codec.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        registry: Arc<Registry>,
        config: SerializerConfig,
        devices: Arc<dyn DeviceCopyService>,
    ) -> Result<Self, BlobError> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            devices,
        })
    }

    /// Creates a host-only codec with the default registry and configuration.
    pub fn cpu() -> Self {
        Self {
            registry: Arc::new(Registry::with_defaults()),
            config: SerializerConfig::default(),
            devices: Arc::new(CpuCopyService),
        }
    }

    /// Returns a copy of the codec using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(self, config: SerializerConfig) -> Result<Self, BlobError> {
        Self::new(self.registry, config, self.devices)
    }

    /// Returns a copy of the codec copying through `devices`.
    pub fn with_devices(mut self, devices: Arc<dyn DeviceCopyService>) -> Self {
        self.devices = devices;
        self
    }

    /// Returns the type registry.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Returns the device copy service.
    #[inline]
    pub fn devices(&self) -> &dyn DeviceCopyService {
        self.devices.as_ref()
    }

    /// Serializes `blob`, handing each record to `sink` without encoding it.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NoSerializer`] if the blob's type is not
    /// registered, [`BlobError::EmptyBlob`] if the blob holds nothing, or any
    /// error raised by the serializer or the sink.
    pub fn serialize_records(
        &self,
        blob: &Blob,
        name: &str,
        sink: &RecordSink<'_>,
        chunk_size: ChunkSize,
    ) -> Result<(), BlobError> {
        let (Some(tag), Some(value)) = (blob.tag(), blob.as_any()) else {
            return Err(BlobError::EmptyBlob(name.to_string()));
        };
        let serializer = self.registry.serializer(tag)?;
        serializer.serialize(self, value, name, sink, chunk_size)
    }

    /// Serializes `blob` and hands every encoded record to `acceptor`.
    ///
    /// Records are keyed by `name` under [`ChunkSize::NoChunking`] and by
    /// `name#%<index>` otherwise. Large tensors are encoded on several
    /// threads, so `acceptor` may be called concurrently and in any order.
    ///
    /// # Errors
    ///
    /// See [`BlobCodec::serialize_records`]. Records accepted before an error
    /// are not withdrawn.
    pub fn serialize_blob(
        &self,
        blob: &Blob,
        name: &str,
        acceptor: &(dyn Fn(&str, Vec<u8>) + Sync),
        chunk_size: ChunkSize,
    ) -> Result<(), BlobError> {
        self.serialize_records(
            blob,
            name,
            &|key: &str, record: BlobRecord| {
                acceptor(key, record.to_bytes()?);
                Ok(())
            },
            chunk_size,
        )
    }

    /// Serializes `blob` into a single record and returns its bytes.
    ///
    /// # Errors
    ///
    /// See [`BlobCodec::serialize_records`].
    pub fn serialize_blob_to_bytes(&self, blob: &Blob, name: &str) -> Result<Vec<u8>, BlobError> {
        self.serialize_to_record(blob, name)?.to_bytes()
    }

    /// Serializes `blob` into a single record.
    ///
    /// Elements of type-erased tensors are written through this call.
    ///
    /// # Errors
    ///
    /// See [`BlobCodec::serialize_records`].
    pub fn serialize_to_record(&self, blob: &Blob, name: &str) -> Result<BlobRecord, BlobError> {
        let output = Mutex::new(None);
        self.serialize_records(
            blob,
            name,
            &|_: &str, record: BlobRecord| {
                *output.lock().unwrap_or_else(|e| e.into_inner()) = Some(record);
                Ok(())
            },
            ChunkSize::NoChunking,
        )?;
        output
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or(BlobError::NoChunks)
    }

    /// Parses wire bytes into a record.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Parse`], a non-fatal error, if the bytes are malformed.
    pub fn parse_record(&self, bytes: &[u8]) -> Result<BlobRecord, BlobError> {
        BlobRecord::from_bytes(bytes)
    }

    /// Parses `bytes` and deserializes the record into `blob`.
    ///
    /// # Errors
    ///
    /// See [`BlobCodec::parse_record`] and [`BlobCodec::deserialize_record`].
    pub fn deserialize_blob(&self, bytes: &[u8], blob: &mut Blob) -> Result<(), BlobError> {
        let record = self.parse_record(bytes)?;
        self.deserialize_record(&record, blob)
    }

    /// Deserializes `record` into `blob`.
    ///
    /// Tensor records go to the deserializer registered for the device they
    /// were serialized from. Other records go to the deserializer registered
    /// for their type name.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NoDeserializer`] if no deserializer matches, or
    /// any error raised while decoding.
    pub fn deserialize_record(&self, record: &BlobRecord, blob: &mut Blob) -> Result<(), BlobError> {
        let key = if record.is_tensor() {
            let tensor = record
                .tensor
                .as_ref()
                .ok_or_else(|| BlobError::MissingTensor(record.name.clone()))?;
            tensor_deserializer_key(DeviceType::try_from(tensor.device_detail.device_type)?)
        } else {
            record.type_name.clone()
        };
        self.registry.deserializer(&key)?.deserialize(self, record, blob)
    }
}

impl std::fmt::Debug for BlobCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCodec")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorblob_tensor::{Device, ElementType, TypeTag, TypedBuffer};

    #[test]
    fn test_string_roundtrip() -> Result<(), BlobError> {
        let codec = BlobCodec::cpu();
        let bytes = codec.serialize_blob_to_bytes(&Blob::new("hello".to_string()), "greeting")?;
        let record = codec.parse_record(&bytes)?;
        assert_eq!(record.name, "greeting");
        assert_eq!(record.type_name, "std::string");

        let mut blob = Blob::empty();
        codec.deserialize_blob(&bytes, &mut blob)?;
        assert_eq!(blob.get::<String>().map(String::as_str), Some("hello"));
        Ok(())
    }

    #[test]
    fn test_empty_blob() {
        let codec = BlobCodec::cpu();
        let res = codec.serialize_blob_to_bytes(&Blob::empty(), "nothing");
        assert!(matches!(res, Err(BlobError::EmptyBlob(_))));
    }

    #[test]
    fn test_unregistered_type() {
        let codec = BlobCodec::cpu();
        let calls = Mutex::new(0);
        let res = codec.serialize_blob(
            &Blob::new(42u64),
            "n",
            &|_, _| *calls.lock().unwrap() += 1,
            ChunkSize::Default,
        );
        assert!(matches!(res, Err(BlobError::NoSerializer(_))));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_unknown_record_type() -> Result<(), BlobError> {
        let codec = BlobCodec::cpu();
        let bytes = BlobRecord::opaque("x", "Mystery", vec![1, 2]).to_bytes()?;
        let res = codec.deserialize_blob(&bytes, &mut Blob::empty());
        assert!(matches!(res, Err(BlobError::NoDeserializer(name)) if name == "Mystery"));
        Ok(())
    }

    #[test]
    fn test_invalid_utf8() -> Result<(), BlobError> {
        let codec = BlobCodec::cpu();
        let bytes = BlobRecord::opaque("x", "std::string", vec![0xff, 0xfe]).to_bytes()?;
        let res = codec.deserialize_blob(&bytes, &mut Blob::empty());
        assert!(matches!(res, Err(BlobError::InvalidUtf8(_))));
        Ok(())
    }

    #[test]
    fn test_tensor_record_without_tensor() -> Result<(), BlobError> {
        let codec = BlobCodec::cpu();
        let bytes = BlobRecord::opaque("t", "Tensor", Vec::new()).to_bytes()?;
        let res = codec.deserialize_blob(&bytes, &mut Blob::empty());
        assert!(matches!(res, Err(BlobError::MissingTensor(_))));
        Ok(())
    }

    #[test]
    fn test_isolated_registry() -> Result<(), BlobError> {
        let codec = BlobCodec::new(
            Arc::new(Registry::new()),
            SerializerConfig::default(),
            Arc::new(CpuCopyService),
        )?;
        let buffer = TypedBuffer::zeros(vec![1], ElementType::F32, Device::cpu())?;
        let res = codec.serialize_blob_to_bytes(&Blob::new(buffer), "w");
        assert!(res.is_err_and(|e| e.is_registration_error()));
        assert!(codec.registry().type_name(TypeTag::of::<String>()).is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let res = BlobCodec::cpu().with_config(SerializerConfig::default().with_chunk_size(0));
        assert!(matches!(res, Err(BlobError::InvalidConfig { .. })));
    }
}
