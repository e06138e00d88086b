use num_traits::AsPrimitive;
use tensorblob_tensor::{
    f16, Blob, DeviceContext, DeviceCopy, Element, ElementType, TensorData, TypeTag, TypedBuffer,
};

use crate::codec::BlobCodec;
use crate::error::BlobError;
use crate::record::{BlobRecord, DataType, Payload, TensorRecord};

/// Returns true for the legacy shape-only record of a zero-element tensor
/// whose element type was never set.
///
/// # Errors
///
/// Returns [`BlobError::UnknownDataType`] for an unknown data type code.
pub fn is_legacy_empty(record: &TensorRecord) -> Result<bool, BlobError> {
    Ok(record.numel()? == 0 && record.data_type()? == DataType::Undefined)
}

/// Allocates a buffer able to receive every chunk of the tensor `record` belongs to.
///
/// The buffer takes the record's dims, element type and device. For
/// `UNDEFINED` records the element type is read from the first nested record.
/// A legacy zero-element `UNDEFINED` record yields a `[0]` float32 buffer.
///
/// # Errors
///
/// Returns an error if the device or data type is unknown, or if the element
/// type of an `UNDEFINED` record cannot be recovered. Dims that overflow give
/// [`BlobError::InvalidShape`]. A segment or payload that cannot belong to the
/// tensor is rejected before anything is allocated.
pub fn empty_tensor_from_record(
    codec: &BlobCodec,
    record: &TensorRecord,
) -> Result<TypedBuffer, BlobError> {
    let device = record.device()?;
    let mut ctx = codec.devices().create_context(device)?;
    ctx.switch_to_device(0)?;

    if is_legacy_empty(record)? {
        log::debug!("Deserializing an empty tensor {:?}", record.name);
        return Ok(TypedBuffer::zeros(vec![0], ElementType::F32, device)?);
    }

    let shape = record.shape()?;
    let numel = record.numel()?;
    check_chunk_fits(record, numel)?;

    let element_type = match record.data_type()?.element_type() {
        Some(element_type) => element_type,
        None => {
            let first = match &record.payload {
                Payload::Erased(nested) => nested.first(),
                _ => None,
            };
            let first = first.ok_or_else(|| BlobError::PayloadMismatch {
                data_type: DataType::Undefined.name(),
                expected: 1,
                actual: 0,
            })?;
            ElementType::Erased(nested_tag(codec, first)?.0)
        }
    };
    Ok(TypedBuffer::zeros(shape, element_type, device)?)
}

// rejects a chunk that cannot belong to a tensor of `numel` elements before
// anything is allocated for it
fn check_chunk_fits(record: &TensorRecord, numel: usize) -> Result<(), BlobError> {
    let (begin, end) = record.range(numel)?;
    if begin > end || end > numel {
        return Err(BlobError::invalid_chunk(begin, end, numel));
    }
    let data_type = record.data_type()?;
    if record.payload.is_empty() {
        return Ok(());
    }
    let expected = match (data_type, &record.payload) {
        (DataType::Float16, Payload::Bytes(_)) => (end - begin).saturating_mul(2),
        _ => end - begin,
    };
    check_len(data_type, expected, record.payload.len())
}

/// Decodes a full tensor from a single record.
///
/// # Errors
///
/// See [`empty_tensor_from_record`] and [`decode_into`].
pub fn decode_tensor(codec: &BlobCodec, record: &TensorRecord) -> Result<TypedBuffer, BlobError> {
    let mut buffer = empty_tensor_from_record(codec, record)?;
    if !is_legacy_empty(record)? {
        decode_into(codec, record, &mut buffer)?;
    }
    Ok(buffer)
}

/// Returns true if `buffer` has the shape, device and element type of the
/// tensor `record` belongs to, so that the chunk can be decoded in place.
pub fn matches_record(buffer: &TypedBuffer, record: &TensorRecord) -> bool {
    let same_type = match record.data_type() {
        Ok(DataType::Undefined) => matches!(buffer.element_type(), ElementType::Erased(_)),
        Ok(data_type) => data_type.element_type() == Some(buffer.element_type()),
        Err(_) => false,
    };
    same_type
        && buffer.is_filled()
        && record.shape().is_ok_and(|shape| buffer.shape() == shape.as_slice())
        && record.device().is_ok_and(|d| d == buffer.device())
}

/// Writes the chunk carried by `record` into `buffer`.
///
/// The chunk covers `record.segment`, or the whole tensor if the record has
/// no segment. Overlapping chunks are not detected: the last one applied wins.
///
/// # Errors
///
/// * [`BlobError::TensorNotInitialized`] if the buffer has no storage or element type.
/// * [`BlobError::InvalidChunk`] unless `begin <= end <= numel`.
/// * [`BlobError::TypeMismatch`] if the buffer holds another element type.
/// * [`BlobError::PayloadMismatch`] if the payload variant or length is wrong.
pub fn decode_into(
    codec: &BlobCodec,
    record: &TensorRecord,
    buffer: &mut TypedBuffer,
) -> Result<(), BlobError> {
    if !buffer.is_filled() || !buffer.element_type().is_initialized() {
        return Err(BlobError::TensorNotInitialized);
    }
    let numel = buffer.numel();
    let (begin, end) = record.range(numel)?;
    if begin > end || end > numel {
        return Err(BlobError::invalid_chunk(begin, end, numel));
    }
    let len = end - begin;
    let data_type = record.data_type()?;

    let mut ctx = codec.devices().create_context(record.device()?)?;
    ctx.switch_to_device(0)?;
    let ctx = ctx.as_mut();

    match (data_type, &record.payload) {
        (DataType::Float, Payload::Float(v)) => {
            copy_as_is(ctx, v, target::<f32>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Int32, Payload::Int32(v)) => {
            copy_as_is(ctx, v, target::<i32>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Int64, Payload::Int64(v)) => {
            copy_as_is(ctx, v, target::<i64>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Double, Payload::Double(v)) => {
            copy_as_is(ctx, v, target::<f64>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Byte, Payload::Bytes(v)) => {
            copy_as_is(ctx, v, target::<u8>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::String, Payload::Strings(v)) => {
            check_len(data_type, len, v.len())?;
            target::<String>(buffer, data_type, begin, end)?.clone_from_slice(v);
        }
        (DataType::Bool, Payload::Int32(v)) => {
            check_len(data_type, len, v.len())?;
            let staging: Vec<bool> = v.iter().map(|&x| x != 0).collect();
            bool::copy_from_host(ctx, &staging, target::<bool>(buffer, data_type, begin, end)?)?;
        }
        (DataType::Uint8, Payload::Int32(v)) => {
            copy_with_cast(ctx, v, target::<u8>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Int8, Payload::Int32(v)) => {
            copy_with_cast(ctx, v, target::<i8>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Uint16, Payload::Int32(v)) => {
            copy_with_cast(ctx, v, target::<u16>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Int16, Payload::Int32(v)) => {
            copy_with_cast(ctx, v, target::<i16>(buffer, data_type, begin, end)?, data_type)?
        }
        (DataType::Float16, Payload::Bytes(v)) => {
            if cfg!(target_endian = "big") {
                return Err(BlobError::BigEndianUnsupported);
            }
            check_len(data_type, 2 * len, v.len())?;
            let staging: Vec<f16> = v
                .chunks_exact(2)
                .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            f16::copy_from_host(ctx, &staging, target::<f16>(buffer, data_type, begin, end)?)?;
        }
        // int32 bit patterns, written by producers without byte-pair support
        (DataType::Float16, Payload::Int32(v)) => {
            check_len(data_type, len, v.len())?;
            let staging: Vec<f16> = v.iter().map(|&bits| f16::from_bits(bits as u16)).collect();
            f16::copy_from_host(ctx, &staging, target::<f16>(buffer, data_type, begin, end)?)?;
        }
        (DataType::Undefined, Payload::Erased(nested)) => {
            check_len(data_type, len, nested.len())?;
            decode_erased(codec, nested, buffer, begin)?;
        }
        (data_type, _) => {
            return Err(BlobError::PayloadMismatch {
                data_type: data_type.name(),
                expected: len,
                actual: 0,
            })
        }
    }
    ctx.finish_device_computation()?;
    Ok(())
}

fn check_len(data_type: DataType, expected: usize, actual: usize) -> Result<(), BlobError> {
    if expected != actual {
        return Err(BlobError::PayloadMismatch {
            data_type: data_type.name(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn target<T: Element>(
    buffer: &mut TypedBuffer,
    data_type: DataType,
    begin: usize,
    end: usize,
) -> Result<&mut [T], BlobError> {
    let element_type = buffer.element_type();
    buffer
        .as_slice_mut::<T>()
        .map(|data| &mut data[begin..end])
        .ok_or_else(|| BlobError::TypeMismatch {
            record: data_type.name().to_string(),
            tensor: element_type,
        })
}

fn copy_as_is<T: DeviceCopy>(
    ctx: &mut dyn DeviceContext,
    src: &[T],
    dst: &mut [T],
    data_type: DataType,
) -> Result<(), BlobError> {
    check_len(data_type, dst.len(), src.len())?;
    if !src.is_empty() {
        T::copy_from_host(ctx, src, dst)?;
    }
    Ok(())
}

fn copy_with_cast<T>(
    ctx: &mut dyn DeviceContext,
    src: &[i32],
    dst: &mut [T],
    data_type: DataType,
) -> Result<(), BlobError>
where
    T: DeviceCopy,
    i32: AsPrimitive<T>,
{
    check_len(data_type, dst.len(), src.len())?;
    let staging: Vec<T> = src.iter().map(|v| v.as_()).collect();
    copy_as_is(ctx, &staging, dst, data_type)
}

fn nested_tag(codec: &BlobCodec, record: &BlobRecord) -> Result<(TypeTag, Blob), BlobError> {
    let mut blob = Blob::empty();
    codec.deserialize_record(record, &mut blob)?;
    let tag = blob
        .tag()
        .ok_or_else(|| BlobError::EmptyBlob(record.name.clone()))?;
    Ok((tag, blob))
}

// the first element fixes the element type of the whole chunk
fn decode_erased(
    codec: &BlobCodec,
    nested: &[BlobRecord],
    buffer: &mut TypedBuffer,
    begin: usize,
) -> Result<(), BlobError> {
    let numel = buffer.numel();
    for (i, record) in nested.iter().enumerate() {
        let (tag, blob) = nested_tag(codec, record)?;
        if i == 0 && buffer.element_type() != ElementType::Erased(tag) {
            let data = TensorData::zeros(ElementType::Erased(tag), numel)?;
            buffer.set_data(data)?;
        }
        let element_type = buffer.element_type();
        match buffer.data_mut() {
            Some(TensorData::Erased(expected, slots)) if *expected == tag => {
                slots[begin + i] = blob;
            }
            _ => {
                return Err(BlobError::TypeMismatch {
                    record: tag.name().to_string(),
                    tensor: element_type,
                })
            }
        }
    }
    Ok(())
}
