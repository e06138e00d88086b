use std::sync::Mutex;
use std::time::{Duration, Instant};

use num_traits::AsPrimitive;
use tensorblob_tensor::{f16, DeviceContext, DeviceCopy, Element, TensorData, TypedBuffer};

use crate::chunk::{chunk_key, ChunkPlan, ChunkRange, ChunkSize};
use crate::codec::BlobCodec;
use crate::error::BlobError;
use crate::record::{BlobRecord, DataType, DeviceDetail, Payload, Segment, TensorRecord};
use crate::registry::RecordSink;
use crate::scheduler::{run_chunked, ExecutionStrategy};

const UNSET_WARN_INTERVAL: Duration = Duration::from_millis(1000);

static LAST_UNSET_WARN: Mutex<Option<Instant>> = Mutex::new(None);

fn warn_unset_tensor(name: &str) {
    let mut last = LAST_UNSET_WARN.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    if last.is_some_and(|t| now.duration_since(t) < UNSET_WARN_INTERVAL) {
        return;
    }
    *last = Some(now);
    log::warn!(
        "Serializing a tensor with zero elements and no element type. \
         This legacy behavior will be removed. Offending blob name: {name}"
    );
}

/// Serializes a whole tensor, handing one record per chunk to `sink`.
///
/// Chunks are encoded on a local worker pool when the tensor does not fit in
/// one chunk, and inline otherwise. Under [`ChunkSize::NoChunking`] the single
/// record is keyed by `name`, otherwise by `name#%<index>`.
///
/// # Errors
///
/// Returns the first error raised while encoding a chunk or accepting its
/// record. Records already handed to `sink` are not withdrawn.
pub fn encode_tensor(
    codec: &BlobCodec,
    buffer: &TypedBuffer,
    name: &str,
    chunk_size: ChunkSize,
    sink: &RecordSink<'_>,
) -> Result<(), BlobError> {
    let config = codec.config();
    let numel = buffer.numel();
    let plan = ChunkPlan::new(numel, chunk_size, config.chunk_size);
    let strategy = ExecutionStrategy::choose(numel, &plan, config.max_serializer_threads);

    log::debug!("Serializing blob {name}");
    run_chunked(strategy, &plan, |chunk| {
        let record = encode_chunk(codec, buffer, name, &chunk)?;
        let key = match chunk_size {
            ChunkSize::NoChunking => name.to_string(),
            _ => chunk_key(name, chunk.index),
        };
        sink(&key, BlobRecord::tensor(record))
    })
}

/// Encodes one chunk of `buffer` into a self-describing record.
///
/// The chunk end is clamped to the number of elements, so the single planned
/// chunk of an empty tensor yields a shape-only record with segment `[0, 0)`.
///
/// # Errors
///
/// * [`BlobError::InvalidChunk`] if the chunk starts past the end of the tensor.
/// * [`BlobError::TensorNotFilled`] if a non-empty chunk has no data behind it.
/// * [`BlobError::BigEndianUnsupported`] for FLOAT16 byte pairs on a big endian host.
/// * Device and nested serialization errors.
pub fn encode_chunk(
    codec: &BlobCodec,
    buffer: &TypedBuffer,
    name: &str,
    chunk: &ChunkRange,
) -> Result<TensorRecord, BlobError> {
    let numel = buffer.numel();
    if chunk.begin > numel {
        return Err(BlobError::invalid_chunk(chunk.begin, chunk.end, numel));
    }
    let (begin, end) = chunk.clamp(numel);
    let element_type = buffer.element_type();

    if begin != end {
        if !buffer.is_filled() {
            return Err(BlobError::TensorNotFilled {
                name: name.to_string(),
                numel,
            });
        }
    } else if !element_type.is_initialized() {
        warn_unset_tensor(name);
    }

    let data_type = DataType::from_element_type(element_type);
    let mut ctx = codec.devices().create_context(buffer.device())?;
    ctx.switch_to_device(0)?;
    let ctx = ctx.as_mut();

    let payload = match data_type {
        DataType::Float => Payload::Float(copy_as_is(ctx, chunk_of::<f32>(buffer, name, begin, end)?)?),
        DataType::Int32 => Payload::Int32(copy_as_is(ctx, chunk_of::<i32>(buffer, name, begin, end)?)?),
        DataType::Int64 => Payload::Int64(copy_as_is(ctx, chunk_of::<i64>(buffer, name, begin, end)?)?),
        DataType::Double => Payload::Double(copy_as_is(ctx, chunk_of::<f64>(buffer, name, begin, end)?)?),
        DataType::Byte => return Err(BlobError::DeprecatedByteType),
        DataType::String => Payload::Strings(chunk_of::<String>(buffer, name, begin, end)?.to_vec()),
        DataType::Bool => Payload::Int32(copy_with_cast(ctx, chunk_of::<bool>(buffer, name, begin, end)?)?),
        DataType::Uint8 => Payload::Int32(copy_with_cast(ctx, chunk_of::<u8>(buffer, name, begin, end)?)?),
        DataType::Int8 => Payload::Int32(copy_with_cast(ctx, chunk_of::<i8>(buffer, name, begin, end)?)?),
        DataType::Uint16 => Payload::Int32(copy_with_cast(ctx, chunk_of::<u16>(buffer, name, begin, end)?)?),
        DataType::Int16 => Payload::Int32(copy_with_cast(ctx, chunk_of::<i16>(buffer, name, begin, end)?)?),
        DataType::Float16 => {
            let halves = copy_as_is(ctx, chunk_of::<f16>(buffer, name, begin, end)?)?;
            if codec.config().serialize_fp16_as_bytes {
                if cfg!(target_endian = "big") {
                    return Err(BlobError::BigEndianUnsupported);
                }
                Payload::Bytes(halves.iter().flat_map(|h| h.to_le_bytes()).collect())
            } else {
                Payload::Int32(halves.iter().map(|h| h.to_bits() as i32).collect())
            }
        }
        DataType::Undefined => Payload::Erased(encode_erased(codec, buffer, name, begin, end)?),
    };
    ctx.finish_device_computation()?;

    Ok(TensorRecord {
        name: name.to_string(),
        dims: buffer.shape().iter().map(|&d| d as u64).collect(),
        data_type: data_type.code(),
        segment: Some(Segment {
            begin: begin as u64,
            end: end as u64,
        }),
        device_detail: DeviceDetail::try_from(buffer.device())?,
        payload,
    })
}

// an empty chunk needs no storage: unfilled zero-sized tensors still encode
fn chunk_of<'a, T: Element>(
    buffer: &'a TypedBuffer,
    name: &str,
    begin: usize,
    end: usize,
) -> Result<&'a [T], BlobError> {
    if begin == end {
        return Ok(&[]);
    }
    buffer
        .as_slice::<T>()
        .map(|data| &data[begin..end])
        .ok_or_else(|| BlobError::TensorNotFilled {
            name: name.to_string(),
            numel: buffer.numel(),
        })
}

fn copy_as_is<T: DeviceCopy>(ctx: &mut dyn DeviceContext, src: &[T]) -> Result<Vec<T>, BlobError> {
    let mut host = vec![T::default(); src.len()];
    if !src.is_empty() {
        T::copy_to_host(ctx, src, &mut host)?;
    }
    Ok(host)
}

fn copy_with_cast<T>(ctx: &mut dyn DeviceContext, src: &[T]) -> Result<Vec<i32>, BlobError>
where
    T: DeviceCopy + AsPrimitive<i32>,
{
    Ok(copy_as_is(ctx, src)?.into_iter().map(|v| v.as_()).collect())
}

fn encode_erased(
    codec: &BlobCodec,
    buffer: &TypedBuffer,
    name: &str,
    begin: usize,
    end: usize,
) -> Result<Vec<BlobRecord>, BlobError> {
    if begin == end {
        return Ok(Vec::new());
    }
    match buffer.data() {
        Some(TensorData::Erased(_, blobs)) => blobs[begin..end]
            .iter()
            .map(|blob| codec.serialize_to_record(blob, ""))
            .collect(),
        _ => Err(BlobError::TensorNotFilled {
            name: name.to_string(),
            numel: buffer.numel(),
        }),
    }
}
