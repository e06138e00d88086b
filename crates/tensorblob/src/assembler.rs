use tensorblob_tensor::TypedBuffer;

use crate::codec::BlobCodec;
use crate::decoder;
use crate::error::BlobError;
use crate::record::{BlobRecord, DeviceDetail, TensorRecord};

/// Rebuilds one tensor from its chunk records, fed in any order.
///
/// The first record allocates the tensor. Every later record must describe
/// the same tensor: same name, dims, data type and device.
///
/// In the default mode chunks are applied as they come and a chunk covering
/// elements already written overwrites them. With
/// [`crate::SerializerConfig::strict_segments`] overlapping chunks are
/// rejected, and [`TensorAssembler::finish`] requires every element to be
/// covered.
///
/// # Example
///
/// ```
/// use std::sync::Mutex;
/// use tensorblob::{BlobCodec, ChunkSize, TensorAssembler};
/// use tensorblob_tensor::{Blob, Device, TypedBuffer};
///
/// let codec = BlobCodec::cpu();
/// let data: Vec<i32> = (0..10).collect();
/// let blob = Blob::new(TypedBuffer::from_vec(vec![10], data.clone(), Device::cpu()).unwrap());
///
/// let chunks = Mutex::new(Vec::new());
/// codec
///     .serialize_blob(&blob, "x", &|_, bytes| chunks.lock().unwrap().push(bytes), ChunkSize::Elements(3))
///     .unwrap();
///
/// let mut assembler = TensorAssembler::new(&codec);
/// for bytes in chunks.into_inner().unwrap().iter().rev() {
///     assembler.add_bytes(bytes).unwrap();
/// }
/// let tensor = assembler.finish().unwrap();
/// assert_eq!(tensor.as_slice::<i32>(), Some(&data[..]));
/// ```
#[derive(Debug)]
pub struct TensorAssembler<'a> {
    codec: &'a BlobCodec,
    strict: bool,
    header: Option<Header>,
    buffer: Option<TypedBuffer>,
    covered: Vec<(usize, usize)>,
}

#[derive(Debug, PartialEq)]
struct Header {
    name: String,
    dims: Vec<u64>,
    data_type: i32,
    device_detail: DeviceDetail,
}

impl Header {
    fn of(record: &TensorRecord) -> Self {
        Self {
            name: record.name.clone(),
            dims: record.dims.clone(),
            data_type: record.data_type,
            device_detail: record.device_detail,
        }
    }
}

impl<'a> TensorAssembler<'a> {
    /// Creates an assembler. Strictness follows the codec's configuration.
    pub fn new(codec: &'a BlobCodec) -> Self {
        Self {
            codec,
            strict: codec.config().strict_segments,
            header: None,
            buffer: None,
            covered: Vec::new(),
        }
    }

    /// Overrides the strictness of the codec's configuration.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Parses `bytes` and applies the chunk they hold.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Parse`] for malformed bytes, or see [`TensorAssembler::add_record`].
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<(), BlobError> {
        let record = self.codec.parse_record(bytes)?;
        self.add_record(&record)
    }

    /// Applies the chunk held by `record`.
    ///
    /// # Errors
    ///
    /// * [`BlobError::MissingTensor`] if the record holds no tensor.
    /// * [`BlobError::InconsistentChunks`] if the record belongs to another tensor.
    /// * [`BlobError::OverlappingChunks`] in strict mode, if the chunk overlaps one already applied.
    /// * Any decoding error.
    pub fn add_record(&mut self, record: &BlobRecord) -> Result<(), BlobError> {
        let tensor = record
            .tensor
            .as_ref()
            .ok_or_else(|| BlobError::MissingTensor(record.name.clone()))?;

        match &self.header {
            Some(header) if *header != Header::of(tensor) => {
                return Err(BlobError::InconsistentChunks(tensor.name.clone()));
            }
            Some(_) => {}
            None => {
                self.buffer = Some(decoder::empty_tensor_from_record(self.codec, tensor)?);
                self.header = Some(Header::of(tensor));
            }
        }

        if decoder::is_legacy_empty(tensor)? {
            return Ok(());
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(BlobError::NoChunks);
        };

        let (begin, end) = tensor.range(buffer.numel())?;
        if self.strict && begin < end && self.covered.iter().any(|&(b, e)| begin < e && b < end) {
            return Err(BlobError::OverlappingChunks { begin, end });
        }
        decoder::decode_into(self.codec, tensor, buffer)?;
        if begin < end {
            self.covered.push((begin, end));
        }
        Ok(())
    }

    /// Returns the number of elements written so far. An element written by
    /// several overlapping chunks is counted once per chunk.
    pub fn covered(&self) -> usize {
        self.covered.iter().map(|(b, e)| e - b).sum()
    }

    /// Returns the assembled tensor.
    ///
    /// # Errors
    ///
    /// * [`BlobError::NoChunks`] if no record was added.
    /// * [`BlobError::IncompleteTensor`] in strict mode, if some elements were never written.
    pub fn finish(self) -> Result<TypedBuffer, BlobError> {
        let covered = self.covered();
        let buffer = self.buffer.ok_or(BlobError::NoChunks)?;
        if self.strict && covered != buffer.numel() {
            return Err(BlobError::IncompleteTensor {
                covered,
                numel: buffer.numel(),
            });
        }
        Ok(buffer)
    }
}
