use thiserror::Error;

use crate::dtype::ElementType;

/// An error type for device copy operations.
#[derive(Error, Debug, PartialEq)]
pub enum DeviceError {
    /// The wire code does not name a known device type.
    #[error("Unknown device type code {0}")]
    UnknownDeviceType(i32),

    /// No copy service is available for the requested device.
    #[error("Device {0} is not supported by this copy service")]
    UnsupportedDevice(String),

    /// Source and destination of a copy have different lengths.
    #[error("Copy size mismatch: source has {src} bytes, destination has {dst} bytes")]
    SizeMismatch {
        /// Number of bytes in the source buffer
        src: usize,
        /// Number of bytes in the destination buffer
        dst: usize,
    },

    /// The device reported a failure while copying or synchronizing.
    #[error("Device copy failed: {0}")]
    CopyFailed(String),
}

impl DeviceError {
    /// Returns a user-friendly suggestion for resolving the error.
    pub fn suggestion(&self) -> &str {
        match self {
            Self::UnknownDeviceType(_) => {
                "The record was written by a newer producer or is corrupted"
            }
            Self::UnsupportedDevice(_) => {
                "Build the codec with a DeviceCopyService that handles this device"
            }
            Self::SizeMismatch { .. } => "Check the element counts of both buffers",
            Self::CopyFailed(_) => "Check the device driver logs",
        }
    }
}

/// An error type for typed buffer operations.
#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
    /// Tensor shape does not match the provided data.
    #[error("Shape mismatch: expected {expected} elements for shape, but got {actual} elements in data")]
    InvalidShape {
        /// Expected number of elements based on shape
        expected: usize,
        /// Actual number of elements in the data
        actual: usize,
    },

    /// The buffer holds a different element type than requested.
    #[error("Type mismatch: buffer holds {actual:?}, requested {expected:?}")]
    TypeMismatch {
        /// The requested element type
        expected: ElementType,
        /// The element type of the buffer
        actual: ElementType,
    },

    /// The shape describes more elements than a buffer can address.
    #[error("Shape {0:?} overflows the addressable number of elements")]
    ShapeOverflow(Vec<usize>),

    /// The allocator refused the storage.
    #[error("Cannot allocate storage for {0} elements")]
    AllocationFailed(usize),

    /// The element type cannot back a storage allocation.
    #[error("Cannot allocate storage for element type {0:?}")]
    UnallocatableType(ElementType),

    /// Underlying device operation failed.
    #[error("Device error: {0}")]
    DeviceError(#[from] DeviceError),
}

impl TensorError {
    /// Creates an InvalidShape error with clear context.
    pub fn invalid_shape(expected: usize, actual: usize) -> Self {
        Self::InvalidShape { expected, actual }
    }

    /// Creates a TypeMismatch error.
    pub fn type_mismatch(expected: ElementType, actual: ElementType) -> Self {
        Self::TypeMismatch { expected, actual }
    }
}
