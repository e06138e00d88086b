//! Wire records.
//!
//! Every serialized blob is one [`BlobRecord`], encoded with `bincode`'s
//! standard configuration. Tensor chunks carry a [`TensorRecord`] with enough
//! metadata (shape, data type, device, segment) to be decoded on their own.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tensorblob_tensor::{checked_numel, Device, DeviceType, ElementType};

use crate::error::BlobError;

/// Type name carried by tensor records.
pub const TENSOR_BLOB_TYPE: &str = "Tensor";

/// On-wire data type code of a tensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    /// Element type unknown ahead of time: elements are nested blob records.
    Undefined = 0,
    /// 32-bit float.
    Float = 1,
    /// 32-bit signed integer.
    Int32 = 2,
    /// Raw bytes. Read-only legacy type.
    Byte = 3,
    /// Strings.
    String = 4,
    /// Boolean, stored as int32.
    Bool = 5,
    /// 8-bit unsigned, stored as int32.
    Uint8 = 6,
    /// 8-bit signed, stored as int32.
    Int8 = 7,
    /// 16-bit unsigned, stored as int32.
    Uint16 = 8,
    /// 16-bit signed, stored as int32.
    Int16 = 9,
    /// 64-bit signed integer.
    Int64 = 10,
    /// Half precision float, stored as byte pairs or int32 bit patterns.
    Float16 = 12,
    /// 64-bit float.
    Double = 13,
}

impl DataType {
    const ALL: [DataType; 13] = [
        DataType::Undefined,
        DataType::Float,
        DataType::Int32,
        DataType::Byte,
        DataType::String,
        DataType::Bool,
        DataType::Uint8,
        DataType::Int8,
        DataType::Uint16,
        DataType::Int16,
        DataType::Int64,
        DataType::Float16,
        DataType::Double,
    ];

    /// Resolves the wire data type of a buffer element type.
    pub fn from_element_type(element_type: ElementType) -> Self {
        // no wildcard arm: a new element type must be mapped here
        match element_type {
            ElementType::F32 => DataType::Float,
            ElementType::I32 => DataType::Int32,
            ElementType::Bool => DataType::Bool,
            ElementType::U8 => DataType::Uint8,
            ElementType::I8 => DataType::Int8,
            ElementType::U16 => DataType::Uint16,
            ElementType::I16 => DataType::Int16,
            ElementType::I64 => DataType::Int64,
            ElementType::F16 => DataType::Float16,
            ElementType::F64 => DataType::Double,
            ElementType::String => DataType::String,
            ElementType::Erased(_) | ElementType::Unset => DataType::Undefined,
        }
    }

    /// Returns the element type a decoded buffer gets for this data type.
    ///
    /// `Undefined` has no fixed element type: it is taken from the nested records.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            DataType::Undefined => None,
            DataType::Float => Some(ElementType::F32),
            DataType::Int32 => Some(ElementType::I32),
            DataType::Byte | DataType::Uint8 => Some(ElementType::U8),
            DataType::String => Some(ElementType::String),
            DataType::Bool => Some(ElementType::Bool),
            DataType::Int8 => Some(ElementType::I8),
            DataType::Uint16 => Some(ElementType::U16),
            DataType::Int16 => Some(ElementType::I16),
            DataType::Int64 => Some(ElementType::I64),
            DataType::Float16 => Some(ElementType::F16),
            DataType::Double => Some(ElementType::F64),
        }
    }

    /// Returns the upper-case wire name.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Undefined => "UNDEFINED",
            DataType::Float => "FLOAT",
            DataType::Int32 => "INT32",
            DataType::Byte => "BYTE",
            DataType::String => "STRING",
            DataType::Bool => "BOOL",
            DataType::Uint8 => "UINT8",
            DataType::Int8 => "INT8",
            DataType::Uint16 => "UINT16",
            DataType::Int16 => "INT16",
            DataType::Int64 => "INT64",
            DataType::Float16 => "FLOAT16",
            DataType::Double => "DOUBLE",
        }
    }

    /// Returns the wire code.
    #[inline]
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for DataType {
    type Error = BlobError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        DataType::ALL
            .into_iter()
            .find(|d| d.code() == code)
            .ok_or(BlobError::UnknownDataType(code))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open element range `[begin, end)` covered by a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct Segment {
    /// First element of the chunk.
    pub begin: u64,
    /// One past the last element of the chunk.
    pub end: u64,
}

/// Device the tensor was resident on when it was serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct DeviceDetail {
    /// Wire code of the device type.
    pub device_type: i32,
    /// Device ordinal.
    pub device_id: u32,
}

impl TryFrom<Device> for DeviceDetail {
    type Error = BlobError;

    fn try_from(device: Device) -> Result<Self, Self::Error> {
        let device_id = u32::try_from(device.device_id())
            .map_err(|_| BlobError::InvalidDeviceId(u64::try_from(device.device_id()).unwrap_or(u64::MAX)))?;
        Ok(Self {
            device_type: device.device_type().code(),
            device_id,
        })
    }
}

impl TryFrom<DeviceDetail> for Device {
    type Error = BlobError;

    fn try_from(detail: DeviceDetail) -> Result<Self, Self::Error> {
        let device_type = DeviceType::try_from(detail.device_type)?;
        let device_id = usize::try_from(detail.device_id)
            .map_err(|_| BlobError::InvalidDeviceId(u64::from(detail.device_id)))?;
        Ok(Device::new(device_type, device_id))
    }
}

/// The element values of one chunk. Exactly one representation is present.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum Payload {
    /// FLOAT values.
    Float(Vec<f32>),
    /// INT32 values, and every type widened to int32 on the wire.
    Int32(Vec<i32>),
    /// INT64 values.
    Int64(Vec<i64>),
    /// DOUBLE values.
    Double(Vec<f64>),
    /// Raw bytes: BYTE data or FLOAT16 byte pairs.
    Bytes(Vec<u8>),
    /// STRING values.
    Strings(Vec<String>),
    /// One nested record per element of an UNDEFINED tensor.
    Erased(Vec<BlobRecord>),
}

impl Payload {
    /// Returns the number of stored values (bytes for [`Payload::Bytes`]).
    pub fn len(&self) -> usize {
        match self {
            Payload::Float(v) => v.len(),
            Payload::Int32(v) => v.len(),
            Payload::Int64(v) => v.len(),
            Payload::Double(v) => v.len(),
            Payload::Bytes(v) => v.len(),
            Payload::Strings(v) => v.len(),
            Payload::Erased(v) => v.len(),
        }
    }

    /// Returns true if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the name of the payload field.
    pub fn field_name(&self) -> &'static str {
        match self {
            Payload::Float(_) => "float_data",
            Payload::Int32(_) => "int32_data",
            Payload::Int64(_) => "int64_data",
            Payload::Double(_) => "double_data",
            Payload::Bytes(_) => "byte_data",
            Payload::Strings(_) => "string_data",
            Payload::Erased(_) => "erased_data",
        }
    }
}

/// One chunk of a tensor.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Name of the tensor.
    pub name: String,
    /// Full shape of the tensor, not of the chunk.
    pub dims: Vec<u64>,
    /// Wire code of the data type, see [`DataType`].
    pub data_type: i32,
    /// Elements covered by this chunk. `None` means the whole tensor.
    pub segment: Option<Segment>,
    /// Device the tensor was serialized from.
    pub device_detail: DeviceDetail,
    /// Element values of the chunk.
    pub payload: Payload,
}

impl TensorRecord {
    /// Returns the decoded data type.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::UnknownDataType`] for an unknown code.
    pub fn data_type(&self) -> Result<DataType, BlobError> {
        DataType::try_from(self.data_type)
    }

    /// Returns the device the tensor was serialized from.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown device type code.
    pub fn device(&self) -> Result<Device, BlobError> {
        Device::try_from(self.device_detail)
    }

    /// Returns the full tensor shape.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidShape`] if the dims do not fit in a `usize`
    /// or their product overflows.
    pub fn shape(&self) -> Result<Vec<usize>, BlobError> {
        let shape = self
            .dims
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BlobError::InvalidShape(self.dims.clone()))?;
        if checked_numel(&shape).is_none() {
            return Err(BlobError::InvalidShape(self.dims.clone()));
        }
        Ok(shape)
    }

    /// Returns the number of elements of the full tensor.
    ///
    /// # Errors
    ///
    /// See [`TensorRecord::shape`].
    pub fn numel(&self) -> Result<usize, BlobError> {
        checked_numel(&self.shape()?).ok_or_else(|| BlobError::InvalidShape(self.dims.clone()))
    }

    /// Returns the chunk range, defaulting to `[0, numel)` when the record
    /// carries no segment. The range is not checked against `numel`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidSegment`] if a bound does not fit in a `usize`.
    pub fn range(&self, numel: usize) -> Result<(usize, usize), BlobError> {
        match self.segment {
            Some(Segment { begin, end }) => match (usize::try_from(begin), usize::try_from(end)) {
                (Ok(b), Ok(e)) => Ok((b, e)),
                _ => Err(BlobError::InvalidSegment { begin, end }),
            },
            None => Ok((0, numel)),
        }
    }
}

/// A serialized blob: a tensor chunk or a value of another registered type.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Name of the blob.
    pub name: String,
    /// `"Tensor"` for tensors, otherwise the registered type name.
    pub type_name: String,
    /// Opaque content of non-tensor types.
    pub content: Vec<u8>,
    /// Tensor chunk, for tensor records.
    pub tensor: Option<TensorRecord>,
}

impl BlobRecord {
    /// Creates a record for a non-tensor type.
    pub fn opaque(name: impl Into<String>, type_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            content,
            tensor: None,
        }
    }

    /// Creates a record holding a tensor chunk.
    pub fn tensor(tensor: TensorRecord) -> Self {
        Self {
            name: tensor.name.clone(),
            type_name: TENSOR_BLOB_TYPE.to_string(),
            content: Vec::new(),
            tensor: Some(tensor),
        }
    }

    /// Returns true if this is a tensor record.
    pub fn is_tensor(&self) -> bool {
        self.type_name == TENSOR_BLOB_TYPE
    }

    /// Encodes the record into wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Encode`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlobError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Parses a record from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Parse`] if the bytes are not exactly one record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlobError> {
        let (record, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(BlobError::Parse(bincode::error::DecodeError::OtherString(
                format!("{} trailing bytes after record", bytes.len() - read),
            )));
        }
        Ok(record)
    }

    /// Renders the record as JSON, for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::InvalidConfig`] if the record cannot be rendered.
    pub fn to_json(&self) -> Result<String, BlobError> {
        serde_json::to_string_pretty(self).map_err(|e| BlobError::invalid_config("json", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_record() -> TensorRecord {
        TensorRecord {
            name: "w".to_string(),
            dims: vec![2, 2],
            data_type: DataType::Float.code(),
            segment: Some(Segment { begin: 1, end: 3 }),
            device_detail: DeviceDetail {
                device_type: DeviceType::Cuda.code(),
                device_id: 3,
            },
            payload: Payload::Float(vec![1.0, 2.0]),
        }
    }

    #[test]
    fn test_data_type_codes() -> Result<(), BlobError> {
        for data_type in DataType::ALL {
            assert_eq!(DataType::try_from(data_type.code())?, data_type);
        }
        assert_eq!(DataType::Float16.code(), 12);
        assert!(matches!(DataType::try_from(11), Err(BlobError::UnknownDataType(11))));
        Ok(())
    }

    #[test]
    fn test_narrow_types_map_to_their_own_codes() {
        assert_eq!(DataType::from_element_type(ElementType::U8), DataType::Uint8);
        assert_eq!(DataType::from_element_type(ElementType::Bool), DataType::Bool);
        assert_eq!(DataType::from_element_type(ElementType::Unset), DataType::Undefined);
        assert_eq!(DataType::Byte.element_type(), Some(ElementType::U8));
    }

    #[test]
    fn test_record_bytes() -> Result<(), BlobError> {
        let record = BlobRecord::tensor(float_record());
        assert!(record.is_tensor());
        assert_eq!(record.name, "w");
        let bytes = record.to_bytes()?;
        assert_eq!(BlobRecord::from_bytes(&bytes)?, record);
        Ok(())
    }

    #[test]
    fn test_record_trailing_bytes() -> Result<(), BlobError> {
        let mut bytes = BlobRecord::opaque("s", "std::string", b"abc".to_vec()).to_bytes()?;
        bytes.push(0);
        let err = BlobRecord::from_bytes(&bytes).err();
        assert!(matches!(err, Some(BlobError::Parse(_))));
        Ok(())
    }

    #[test]
    fn test_record_garbage() {
        let err = BlobRecord::from_bytes(&[0xff, 0xff, 0xff]).err();
        assert!(err.is_some_and(|e| !e.is_fatal()));
    }

    #[test]
    fn test_tensor_record_accessors() -> Result<(), BlobError> {
        let mut record = float_record();
        assert_eq!(record.numel()?, 4);
        assert_eq!(record.shape()?, vec![2, 2]);
        assert_eq!(record.range(4)?, (1, 3));
        assert_eq!(record.device()?, Device::cuda(3));
        record.segment = None;
        assert_eq!(record.range(4)?, (0, 4));
        Ok(())
    }

    #[test]
    fn test_overflowing_dims() {
        let mut record = float_record();
        record.dims = vec![u64::MAX / 2, 4];
        assert!(matches!(record.numel(), Err(BlobError::InvalidShape(_))));
        assert!(matches!(record.shape(), Err(BlobError::InvalidShape(dims)) if dims == vec![u64::MAX / 2, 4]));
    }

    #[test]
    fn test_device_detail_roundtrip() -> Result<(), BlobError> {
        let detail = DeviceDetail::try_from(Device::new(DeviceType::Hip, 7))?;
        assert_eq!(detail.device_id, 7);
        assert_eq!(Device::try_from(detail)?, Device::new(DeviceType::Hip, 7));
        Ok(())
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_device_ordinal_does_not_wrap() {
        let device = Device::cuda(u32::MAX as usize + 1);
        let res = DeviceDetail::try_from(device);
        assert!(matches!(res, Err(BlobError::InvalidDeviceId(id)) if id == u64::from(u32::MAX) + 1));
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_segment_does_not_wrap() {
        let mut record = float_record();
        record.segment = Some(Segment { begin: 0, end: u64::from(u32::MAX) + 1 });
        assert!(matches!(record.range(4), Err(BlobError::InvalidSegment { .. })));
    }

    #[test]
    fn test_record_json() -> Result<(), BlobError> {
        let json = BlobRecord::tensor(float_record()).to_json()?;
        assert!(json.contains("\"type_name\": \"Tensor\""));
        Ok(())
    }
}
