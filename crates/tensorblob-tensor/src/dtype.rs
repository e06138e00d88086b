use half::f16;

use crate::blob::{Blob, TypeTag};
use crate::error::TensorError;

/// Runtime element type of a [`crate::TypedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit float.
    F32,
    /// 32-bit signed integer.
    I32,
    /// Boolean.
    Bool,
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit unsigned integer.
    U16,
    /// 16-bit signed integer.
    I16,
    /// 64-bit signed integer.
    I64,
    /// IEEE half precision float.
    F16,
    /// 64-bit float.
    F64,
    /// Owned UTF-8 string.
    String,
    /// Blobs of a registered type, serialized one by one.
    Erased(TypeTag),
    /// The element type was never initialized.
    Unset,
}

impl ElementType {
    /// Size in bytes of one element, as stored on a device.
    ///
    /// Strings, erased values and unset buffers have no fixed item size.
    pub fn item_size(&self) -> Option<usize> {
        match self {
            ElementType::F32 | ElementType::I32 => Some(4),
            ElementType::Bool | ElementType::U8 | ElementType::I8 => Some(1),
            ElementType::U16 | ElementType::I16 | ElementType::F16 => Some(2),
            ElementType::I64 | ElementType::F64 => Some(8),
            ElementType::String | ElementType::Erased(_) | ElementType::Unset => None,
        }
    }

    /// Returns true once the element type has been set.
    pub fn is_initialized(&self) -> bool {
        !matches!(self, ElementType::Unset)
    }
}

/// Owned element storage, one variant per element type.
#[derive(Debug)]
pub enum TensorData {
    /// 32-bit floats.
    F32(Vec<f32>),
    /// 32-bit signed integers.
    I32(Vec<i32>),
    /// Booleans.
    Bool(Vec<bool>),
    /// 8-bit unsigned integers.
    U8(Vec<u8>),
    /// 8-bit signed integers.
    I8(Vec<i8>),
    /// 16-bit unsigned integers.
    U16(Vec<u16>),
    /// 16-bit signed integers.
    I16(Vec<i16>),
    /// 64-bit signed integers.
    I64(Vec<i64>),
    /// Half precision floats.
    F16(Vec<f16>),
    /// 64-bit floats.
    F64(Vec<f64>),
    /// Strings.
    String(Vec<String>),
    /// Type-erased values sharing one type tag.
    Erased(TypeTag, Vec<Blob>),
}

impl TensorData {
    /// Allocates default-initialized storage for `len` elements of `element_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::UnallocatableType`] for [`ElementType::Unset`],
    /// which has no storage, and [`TensorError::AllocationFailed`] if the
    /// allocator refuses `len` elements.
    pub fn zeros(element_type: ElementType, len: usize) -> Result<Self, TensorError> {
        let data = match element_type {
            ElementType::F32 => TensorData::F32(filled(len, || 0.0)?),
            ElementType::I32 => TensorData::I32(filled(len, || 0)?),
            ElementType::Bool => TensorData::Bool(filled(len, || false)?),
            ElementType::U8 => TensorData::U8(filled(len, || 0)?),
            ElementType::I8 => TensorData::I8(filled(len, || 0)?),
            ElementType::U16 => TensorData::U16(filled(len, || 0)?),
            ElementType::I16 => TensorData::I16(filled(len, || 0)?),
            ElementType::I64 => TensorData::I64(filled(len, || 0)?),
            ElementType::F16 => TensorData::F16(filled(len, || f16::ZERO)?),
            ElementType::F64 => TensorData::F64(filled(len, || 0.0)?),
            ElementType::String => TensorData::String(filled(len, String::new)?),
            ElementType::Erased(tag) => TensorData::Erased(tag, filled(len, Blob::empty)?),
            ElementType::Unset => return Err(TensorError::UnallocatableType(element_type)),
        };
        Ok(data)
    }

    /// Returns the element type of the storage.
    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::F32,
            TensorData::I32(_) => ElementType::I32,
            TensorData::Bool(_) => ElementType::Bool,
            TensorData::U8(_) => ElementType::U8,
            TensorData::I8(_) => ElementType::I8,
            TensorData::U16(_) => ElementType::U16,
            TensorData::I16(_) => ElementType::I16,
            TensorData::I64(_) => ElementType::I64,
            TensorData::F16(_) => ElementType::F16,
            TensorData::F64(_) => ElementType::F64,
            TensorData::String(_) => ElementType::String,
            TensorData::Erased(tag, _) => ElementType::Erased(*tag),
        }
    }

    /// Returns the number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::U16(v) => v.len(),
            TensorData::I16(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::String(v) => v.len(),
            TensorData::Erased(_, v) => v.len(),
        }
    }

    /// Returns true if no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// reserve first so an absurd length is an error instead of an abort
fn filled<T>(len: usize, value: impl FnMut() -> T) -> Result<Vec<T>, TensorError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| TensorError::AllocationFailed(len))?;
    data.resize_with(len, value);
    Ok(data)
}

/// A plain element type that can live in a [`TensorData`].
pub trait Element: Sized + Send + Sync + 'static {
    /// The runtime tag of the element type.
    const ELEMENT_TYPE: ElementType;

    /// Wraps a vector into the matching storage variant.
    fn into_data(data: Vec<Self>) -> TensorData;

    /// Borrows the storage if it holds this element type.
    fn slice(data: &TensorData) -> Option<&[Self]>;

    /// Mutably borrows the storage if it holds this element type.
    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn into_data(data: Vec<Self>) -> TensorData {
                TensorData::$variant(data)
            }

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, F32);
impl_element!(i32, I32);
impl_element!(bool, Bool);
impl_element!(u8, U8);
impl_element!(i8, I8);
impl_element!(u16, U16);
impl_element!(i16, I16);
impl_element!(i64, I64);
impl_element!(f16, F16);
impl_element!(f64, F64);
impl_element!(String, String);
