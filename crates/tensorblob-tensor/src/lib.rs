#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `tensorblob-tensor` holds the data model consumed by the `tensorblob`
//! serialization engine:
//!
//! - **TypedBuffer**: a flat tensor with a shape, a runtime element type and a device
//! - **TensorData**: closed enum of owned element storage
//! - **Blob**: a type-erased value tagged with its [`TypeTag`]
//! - **DeviceCopyService**: the device copy capability, with a CPU implementation
//!
//! # Quick Start
//!
//! ```rust
//! use tensorblob_tensor::{Blob, Device, TypedBuffer};
//!
//! let buffer = TypedBuffer::from_vec(vec![3], vec![1i32, 2, 3], Device::cpu()).unwrap();
//! let blob = Blob::new(buffer);
//! assert!(blob.is::<TypedBuffer>());
//! ```

/// backend module containing the device copy abstractions.
pub mod backend;

/// Blob module containing type-erased values and type tags.
pub mod blob;

/// Buffer module containing the typed tensor buffer.
pub mod buffer;

/// Device module containing device descriptors.
pub mod device;

/// Element types and owned storage.
pub mod dtype;

/// Error types for buffers and device copies.
pub mod error;

pub use crate::backend::{CpuContext, CpuCopyService, DeviceContext, DeviceCopy, DeviceCopyService};
pub use crate::blob::{Blob, TypeTag};
pub use crate::buffer::{checked_numel, numel_of, TypedBuffer};
pub use crate::device::{Device, DeviceType};
pub use crate::dtype::{Element, ElementType, TensorData};
pub use crate::error::{DeviceError, TensorError};

pub use half::f16;
