use std::sync::Mutex;

use rand::Rng;
use tensorblob::{
    BlobCodec, BlobError, ChunkSize, DataType, Payload, SerializerConfig, TensorAssembler,
};
use tensorblob_tensor::{f16, Blob, Device, Element, ElementType, TensorData, TypeTag, TypedBuffer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn collect(
    codec: &BlobCodec,
    blob: &Blob,
    name: &str,
    chunk_size: ChunkSize,
) -> Result<Vec<(String, Vec<u8>)>, BlobError> {
    let records = Mutex::new(Vec::new());
    codec.serialize_blob(
        blob,
        name,
        &|key, bytes| records.lock().unwrap().push((key.to_string(), bytes)),
        chunk_size,
    )?;
    Ok(records.into_inner().unwrap())
}

fn roundtrip(codec: &BlobCodec, buffer: TypedBuffer) -> Result<TypedBuffer, BlobError> {
    let bytes = codec.serialize_blob_to_bytes(&Blob::new(buffer), "x")?;
    let mut blob = Blob::empty();
    codec.deserialize_blob(&bytes, &mut blob)?;
    blob.take::<TypedBuffer>().ok_or(BlobError::UnexpectedValue {
        expected: "TypedBuffer",
    })
}

fn assert_roundtrip<T: Element + Clone + PartialEq + std::fmt::Debug>(
    codec: &BlobCodec,
    shape: Vec<usize>,
    data: Vec<T>,
) -> Result<(), Box<dyn std::error::Error>> {
    let buffer = TypedBuffer::from_vec(shape.clone(), data.clone(), Device::cpu())?;
    let restored = roundtrip(codec, buffer)?;
    assert_eq!(restored.shape(), &shape[..]);
    assert_eq!(restored.element_type(), T::ELEMENT_TYPE);
    assert_eq!(restored.as_slice::<T>(), Some(&data[..]));
    Ok(())
}

#[test]
fn test_roundtrip_all_element_types() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let codec = BlobCodec::cpu();
    let mut rng = rand::rng();
    let n = 24;

    assert_roundtrip(&codec, vec![2, 3, 4], (0..n).map(|_| rng.random::<f32>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<f64>()).collect())?;
    assert_roundtrip(&codec, vec![4, 6], (0..n).map(|_| rng.random::<i32>()).collect())?;
    assert_roundtrip(&codec, vec![4, 6], (0..n).map(|_| rng.random::<i64>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<bool>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<u8>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<i8>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<u16>()).collect())?;
    assert_roundtrip(&codec, vec![n], (0..n).map(|_| rng.random::<i16>()).collect())?;
    assert_roundtrip(
        &codec,
        vec![3],
        vec!["".to_string(), "tensor".to_string(), "blob #%".to_string()],
    )?;
    Ok(())
}

#[test]
fn test_roundtrip_extreme_narrow_values() -> Result<(), Box<dyn std::error::Error>> {
    let codec = BlobCodec::cpu();
    assert_roundtrip(&codec, vec![2], vec![u8::MIN, u8::MAX])?;
    assert_roundtrip(&codec, vec![2], vec![i8::MIN, i8::MAX])?;
    assert_roundtrip(&codec, vec![2], vec![u16::MIN, u16::MAX])?;
    assert_roundtrip(&codec, vec![2], vec![i16::MIN, i16::MAX])?;
    assert_roundtrip(&codec, vec![2], vec![i64::MIN, i64::MAX])?;
    Ok(())
}

#[test]
fn test_roundtrip_fp16_both_wire_layouts() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = rand::rng();
    let data: Vec<f16> = (0..50)
        .map(|_| f16::from_f32(rng.random_range(-100.0..100.0)))
        .chain([f16::INFINITY, f16::NEG_ZERO, f16::MIN_POSITIVE_SUBNORMAL])
        .collect();

    for as_bytes in [false, true] {
        let config = SerializerConfig::default().with_serialize_fp16_as_bytes(as_bytes);
        let codec = BlobCodec::cpu().with_config(config)?;
        let buffer = TypedBuffer::from_vec(vec![data.len()], data.clone(), Device::cpu())?;
        let bytes = codec.serialize_blob_to_bytes(&Blob::new(buffer), "h")?;

        let record = codec.parse_record(&bytes)?;
        let tensor = record.tensor.as_ref().ok_or("expected a tensor record")?;
        assert_eq!(tensor.data_type()?, DataType::Float16);
        assert_eq!(matches!(tensor.payload, Payload::Bytes(_)), as_bytes);

        let mut blob = Blob::empty();
        codec.deserialize_blob(&bytes, &mut blob)?;
        let restored = blob.get::<TypedBuffer>().and_then(|b| b.as_slice::<f16>());
        let restored_bits: Option<Vec<u16>> = restored.map(|s| s.iter().map(|h| h.to_bits()).collect());
        let bits: Vec<u16> = data.iter().map(|h| h.to_bits()).collect();
        assert_eq!(restored_bits, Some(bits));
    }
    Ok(())
}

#[test]
fn test_fp16_bytes_readable_by_default_codec() -> Result<(), Box<dyn std::error::Error>> {
    let writer = BlobCodec::cpu().with_config(SerializerConfig::default().with_serialize_fp16_as_bytes(true))?;
    let reader = BlobCodec::cpu();
    let data = vec![f16::from_f32(1.5), f16::from_f32(-0.25)];
    let buffer = TypedBuffer::from_vec(vec![2], data.clone(), Device::cpu())?;
    let bytes = writer.serialize_blob_to_bytes(&Blob::new(buffer), "h")?;
    let mut blob = Blob::empty();
    reader.deserialize_blob(&bytes, &mut blob)?;
    assert_eq!(blob.get::<TypedBuffer>().and_then(|b| b.as_slice::<f16>()), Some(&data[..]));
    Ok(())
}

#[test]
fn test_empty_tensor_keeps_shape() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let codec = BlobCodec::cpu();
    let buffer = TypedBuffer::from_vec::<f32>(vec![0], Vec::new(), Device::cpu())?;
    let records = collect(&codec, &Blob::new(buffer), "empty", ChunkSize::Default)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "empty#%0");

    let record = codec.parse_record(&records[0].1)?;
    let tensor = record.tensor.as_ref().ok_or("expected a tensor record")?;
    assert_eq!(tensor.dims, vec![0]);
    assert_eq!(tensor.payload, Payload::Float(Vec::new()));
    assert_eq!(tensor.range(0)?, (0, 0));

    let mut blob = Blob::empty();
    codec.deserialize_record(&record, &mut blob)?;
    let restored = blob.get::<TypedBuffer>().ok_or("expected a buffer")?;
    assert_eq!(restored.shape(), &[0]);
    assert_eq!(restored.element_type(), ElementType::F32);
    Ok(())
}

#[test]
fn test_unset_empty_tensor_legacy_fallback() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let codec = BlobCodec::cpu();
    let buffer = TypedBuffer::unfilled(vec![0, 3], ElementType::Unset, Device::cpu());
    let bytes = codec.serialize_blob_to_bytes(&Blob::new(buffer), "legacy")?;

    let mut blob = Blob::empty();
    codec.deserialize_blob(&bytes, &mut blob)?;
    let restored = blob.get::<TypedBuffer>().ok_or("expected a buffer")?;
    assert_eq!(restored.shape(), &[0]);
    assert_eq!(restored.element_type(), ElementType::F32);
    Ok(())
}

#[test]
fn test_unfilled_tensor_is_rejected() {
    let codec = BlobCodec::cpu();
    let buffer = TypedBuffer::unfilled(vec![5], ElementType::I32, Device::cpu());
    let res = codec.serialize_blob_to_bytes(&Blob::new(buffer), "w");
    assert!(matches!(res, Err(BlobError::TensorNotFilled { numel: 5, .. })));
}

#[test]
fn test_no_chunking_single_record_keyed_by_name() -> Result<(), Box<dyn std::error::Error>> {
    let codec = BlobCodec::cpu().with_config(SerializerConfig::default().with_chunk_size(2))?;
    let buffer = TypedBuffer::from_vec(vec![10], vec![3i32; 10], Device::cpu())?;
    let records = collect(&codec, &Blob::new(buffer), "whole", ChunkSize::NoChunking)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "whole");
    let record = codec.parse_record(&records[0].1)?;
    assert_eq!(record.tensor.map(|t| t.payload.len()), Some(10));
    Ok(())
}

#[test]
fn test_chunked_records_rebuild_tensor() -> Result<(), Box<dyn std::error::Error>> {
    let codec = BlobCodec::cpu();
    let data: Vec<f64> = (0..37).map(|i| i as f64 * 0.5).collect();
    let buffer = TypedBuffer::from_vec(vec![37], data.clone(), Device::cpu())?;
    let mut records = collect(&codec, &Blob::new(buffer), "c", ChunkSize::Elements(5))?;
    assert_eq!(records.len(), 8);
    records.sort_by(|a, b| b.0.cmp(&a.0));

    let mut blob = Blob::empty();
    for (_, bytes) in &records {
        codec.deserialize_blob(bytes, &mut blob)?;
    }
    assert_eq!(blob.get::<TypedBuffer>().and_then(|b| b.as_slice::<f64>()), Some(&data[..]));

    let mut assembler = TensorAssembler::new(&codec).strict(true);
    for (_, bytes) in &records {
        assembler.add_bytes(bytes)?;
    }
    assert_eq!(assembler.finish()?.as_slice::<f64>(), Some(&data[..]));
    Ok(())
}

#[test]
fn test_erased_elements_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let codec = BlobCodec::cpu();
    let words = ["alpha", "beta", "gamma"];
    let blobs = words.iter().map(|w| Blob::new(w.to_string())).collect();
    let tag = TypeTag::of::<String>();
    let buffer = TypedBuffer::from_data(vec![3], TensorData::Erased(tag, blobs), Device::cpu())?;

    let restored = roundtrip(&codec, buffer)?;
    assert_eq!(restored.element_type(), ElementType::Erased(tag));
    let Some(TensorData::Erased(_, blobs)) = restored.data() else {
        return Err("expected erased storage".into());
    };
    let restored_words: Vec<_> = blobs.iter().filter_map(|b| b.get::<String>().map(String::as_str)).collect();
    assert_eq!(restored_words, words);
    Ok(())
}

#[test]
fn test_unregistered_type_aborts() {
    struct Opaque;

    let codec = BlobCodec::cpu();
    let calls = Mutex::new(0usize);
    let res = codec.serialize_blob(
        &Blob::new(Opaque),
        "o",
        &|_, _| *calls.lock().unwrap() += 1,
        ChunkSize::Default,
    );
    let err = res.err();
    assert!(matches!(err, Some(BlobError::NoSerializer(_))));
    assert!(err.is_some_and(|e| e.is_fatal() && e.is_registration_error()));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn test_malformed_bytes_are_a_parse_error() {
    let codec = BlobCodec::cpu();
    let res = codec.deserialize_blob(&[0xde, 0xad, 0xbe, 0xef, 0xff], &mut Blob::empty());
    let err = res.err();
    assert!(matches!(err, Some(BlobError::Parse(_))));
    assert!(err.is_some_and(|e| !e.is_fatal()));
}

#[test]
fn test_string_blob_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let codec = BlobCodec::cpu();
    let records = collect(&codec, &Blob::new("weights v2".to_string()), "meta", ChunkSize::Default)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "meta");

    let mut blob = Blob::empty();
    codec.deserialize_blob(&records[0].1, &mut blob)?;
    assert_eq!(blob.get::<String>().map(String::as_str), Some("weights v2"));
    Ok(())
}
