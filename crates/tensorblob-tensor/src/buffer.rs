use crate::{
    device::Device,
    dtype::{Element, ElementType, TensorData},
    error::TensorError,
};

/// A flat, row-major tensor buffer with a runtime element type.
///
/// The buffer may exist before its storage does: a buffer built with
/// [`TypedBuffer::unfilled`] has a shape and element type but no data, which
/// the encoder reports as an unfilled tensor.
///
/// # Examples
///
/// ```
/// use tensorblob_tensor::{Device, ElementType, TypedBuffer};
///
/// let buffer = TypedBuffer::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0], Device::cpu()).unwrap();
/// assert_eq!(buffer.numel(), 4);
/// assert_eq!(buffer.element_type(), ElementType::F32);
/// assert_eq!(buffer.as_slice::<f32>(), Some(&[1.0, 2.0, 3.0, 4.0][..]));
/// ```
#[derive(Debug)]
pub struct TypedBuffer {
    shape: Vec<usize>,
    element_type: ElementType,
    device: Device,
    storage: Option<TensorData>,
}

/// Returns the number of elements described by `shape`.
///
/// An empty shape describes a scalar and has one element. The count
/// saturates at `usize::MAX`; use [`checked_numel`] for untrusted shapes.
pub fn numel_of(shape: &[usize]) -> usize {
    shape.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
}

/// Returns the number of elements described by `shape`, or `None` if the
/// count overflows `usize`.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl TypedBuffer {
    /// Creates a buffer from a vector of elements.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if `data.len()` does not match the shape.
    pub fn from_vec<T: Element>(
        shape: Vec<usize>,
        data: Vec<T>,
        device: Device,
    ) -> Result<Self, TensorError> {
        Self::from_data(shape, T::into_data(data), device)
    }

    /// Creates a buffer from existing storage.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the storage length does not match the shape,
    /// or [`TensorError::ShapeOverflow`] if the shape overflows.
    pub fn from_data(
        shape: Vec<usize>,
        data: TensorData,
        device: Device,
    ) -> Result<Self, TensorError> {
        let numel = checked_numel(&shape).ok_or_else(|| TensorError::ShapeOverflow(shape.clone()))?;
        if data.len() != numel {
            return Err(TensorError::invalid_shape(numel, data.len()));
        }
        Ok(Self {
            shape,
            element_type: data.element_type(),
            device,
            storage: Some(data),
        })
    }

    /// Allocates a zero-filled buffer.
    ///
    /// # Errors
    ///
    /// * [`TensorError::ShapeOverflow`] if the element count overflows.
    /// * [`TensorError::UnallocatableType`] for [`ElementType::Unset`].
    /// * [`TensorError::AllocationFailed`] if the storage cannot be allocated.
    pub fn zeros(
        shape: Vec<usize>,
        element_type: ElementType,
        device: Device,
    ) -> Result<Self, TensorError> {
        let numel = checked_numel(&shape).ok_or_else(|| TensorError::ShapeOverflow(shape.clone()))?;
        let data = TensorData::zeros(element_type, numel)?;
        Self::from_data(shape, data, device)
    }

    /// Creates a buffer with a shape and element type but no storage.
    pub fn unfilled(shape: Vec<usize>, element_type: ElementType, device: Device) -> Self {
        Self {
            shape,
            element_type,
            device,
            storage: None,
        }
    }

    /// Returns the shape of the buffer.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of elements.
    #[inline]
    pub fn numel(&self) -> usize {
        numel_of(&self.shape)
    }

    /// Returns the element type.
    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Returns the device the storage lives on.
    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Returns true if the buffer has storage.
    #[inline]
    pub fn is_filled(&self) -> bool {
        self.storage.is_some()
    }

    /// Returns the storage, if any.
    #[inline]
    pub fn data(&self) -> Option<&TensorData> {
        self.storage.as_ref()
    }

    /// Returns the storage mutably, if any.
    #[inline]
    pub fn data_mut(&mut self) -> Option<&mut TensorData> {
        self.storage.as_mut()
    }

    /// Replaces the storage, re-typing the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the storage length does not match the shape.
    pub fn set_data(&mut self, data: TensorData) -> Result<(), TensorError> {
        if data.len() != self.numel() {
            return Err(TensorError::invalid_shape(self.numel(), data.len()));
        }
        self.element_type = data.element_type();
        self.storage = Some(data);
        Ok(())
    }

    /// Returns the elements as a slice if the buffer holds `T`.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.storage.as_ref().and_then(T::slice)
    }

    /// Returns the elements as a mutable slice if the buffer holds `T`.
    pub fn as_slice_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        self.storage.as_mut().and_then(T::slice_mut)
    }

    /// Consumes the buffer and returns its storage.
    pub fn into_data(self) -> Option<TensorData> {
        self.storage
    }
}
