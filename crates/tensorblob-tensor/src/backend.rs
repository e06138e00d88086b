//! Device copy abstraction.
//!
//! The serializer never moves memory between devices itself. It asks a
//! [`DeviceCopyService`] for a scoped [`DeviceContext`] bound to one device and
//! copies through it. A context is created per chunk and dropped on every exit
//! path, so contexts are never shared between worker threads.

use half::f16;

use crate::{device::Device, dtype::Element, error::DeviceError};

/// A scoped handle able to copy bytes between one device and host memory.
pub trait DeviceContext {
    /// Returns the device this context is bound to.
    fn device(&self) -> Device;

    /// Makes the context's device current for the calling thread.
    ///
    /// For CPU, this is a no-op.
    fn switch_to_device(&mut self, _stream_id: usize) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Copies `src`, resident on the context's device, into host memory `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ or the device fails.
    fn copy_bytes_to_host(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Copies host memory `src` into `dst`, resident on the context's device.
    ///
    /// # Errors
    ///
    /// Returns an error if the lengths differ or the device fails.
    fn copy_bytes_from_host(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Blocks until every copy issued through this context has completed.
    fn finish_device_computation(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Produces device contexts. Shared by all serializer workers.
pub trait DeviceCopyService: Send + Sync + 'static {
    /// Creates a context bound to `device`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnsupportedDevice`] if the service cannot reach the device.
    fn create_context(&self, device: Device) -> Result<Box<dyn DeviceContext>, DeviceError>;
}

/// Host-only copy service.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuCopyService;

impl DeviceCopyService for CpuCopyService {
    fn create_context(&self, device: Device) -> Result<Box<dyn DeviceContext>, DeviceError> {
        if !device.is_cpu() {
            return Err(DeviceError::UnsupportedDevice(device.to_string()));
        }
        Ok(Box::new(CpuContext))
    }
}

/// Context for host memory: every copy is a plain `memcpy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuContext;

/// Copies between two host byte slices of equal length.
pub fn copy_host_bytes(src: &[u8], dst: &mut [u8]) -> Result<(), DeviceError> {
    if src.len() != dst.len() {
        return Err(DeviceError::SizeMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

impl DeviceContext for CpuContext {
    fn device(&self) -> Device {
        Device::cpu()
    }

    fn copy_bytes_to_host(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), DeviceError> {
        copy_host_bytes(src, dst)
    }

    fn copy_bytes_from_host(&mut self, src: &[u8], dst: &mut [u8]) -> Result<(), DeviceError> {
        copy_host_bytes(src, dst)
    }
}

/// Elements that can be moved through a [`DeviceContext`].
pub trait DeviceCopy: Element + Copy + Default {
    /// Copies device-resident `src` into host `dst`.
    fn copy_to_host(
        ctx: &mut dyn DeviceContext,
        src: &[Self],
        dst: &mut [Self],
    ) -> Result<(), DeviceError>;

    /// Copies host `src` into device-resident `dst`.
    fn copy_from_host(
        ctx: &mut dyn DeviceContext,
        src: &[Self],
        dst: &mut [Self],
    ) -> Result<(), DeviceError>;
}

macro_rules! impl_device_copy_pod {
    ($($ty:ty),*) => {
        $(
            impl DeviceCopy for $ty {
                fn copy_to_host(
                    ctx: &mut dyn DeviceContext,
                    src: &[Self],
                    dst: &mut [Self],
                ) -> Result<(), DeviceError> {
                    ctx.copy_bytes_to_host(
                        bytemuck::cast_slice(src),
                        bytemuck::cast_slice_mut(dst),
                    )
                }

                fn copy_from_host(
                    ctx: &mut dyn DeviceContext,
                    src: &[Self],
                    dst: &mut [Self],
                ) -> Result<(), DeviceError> {
                    ctx.copy_bytes_from_host(
                        bytemuck::cast_slice(src),
                        bytemuck::cast_slice_mut(dst),
                    )
                }
            }
        )*
    };
}

impl_device_copy_pod!(f32, f64, i8, i16, i32, i64, u8, u16, f16);

// bool has invalid bit patterns, so copies go through a byte staging buffer
impl DeviceCopy for bool {
    fn copy_to_host(
        ctx: &mut dyn DeviceContext,
        src: &[Self],
        dst: &mut [Self],
    ) -> Result<(), DeviceError> {
        let mut staging = vec![0u8; dst.len()];
        ctx.copy_bytes_to_host(bytemuck::cast_slice(src), &mut staging)?;
        dst.iter_mut()
            .zip(staging)
            .for_each(|(d, byte)| *d = byte != 0);
        Ok(())
    }

    fn copy_from_host(
        ctx: &mut dyn DeviceContext,
        src: &[Self],
        dst: &mut [Self],
    ) -> Result<(), DeviceError> {
        let mut staging = vec![0u8; dst.len()];
        ctx.copy_bytes_from_host(bytemuck::cast_slice(src), &mut staging)?;
        dst.iter_mut()
            .zip(staging)
            .for_each(|(d, byte)| *d = byte != 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn test_cpu_context_copy() -> Result<(), DeviceError> {
        let mut ctx = CpuCopyService.create_context(Device::cpu())?;
        let src = vec![1.5f32, 2.5, -3.0];
        let mut dst = vec![0.0f32; 3];
        f32::copy_to_host(ctx.as_mut(), &src, &mut dst)?;
        assert_eq!(dst, src);
        ctx.finish_device_computation()?;
        Ok(())
    }

    #[test]
    fn test_cpu_context_size_mismatch() {
        let mut ctx = CpuContext;
        let err = i32::copy_from_host(&mut ctx, &[1, 2, 3], &mut [0; 2]);
        assert_eq!(err, Err(DeviceError::SizeMismatch { src: 12, dst: 8 }));
    }

    #[test]
    fn test_cpu_service_rejects_other_devices() {
        let res = CpuCopyService.create_context(Device::new(DeviceType::Hip, 0));
        assert!(matches!(res, Err(DeviceError::UnsupportedDevice(_))));
    }

    #[test]
    fn test_bool_copy() -> Result<(), DeviceError> {
        let mut ctx = CpuContext;
        let src = [true, false, true];
        let mut dst = [false; 3];
        bool::copy_from_host(&mut ctx, &src, &mut dst)?;
        assert_eq!(dst, src);
        Ok(())
    }

    #[test]
    fn test_service_trait_object() -> Result<(), DeviceError> {
        let services: Vec<Box<dyn DeviceCopyService>> = vec![Box::new(CpuCopyService)];
        for service in services {
            let ctx = service.create_context(Device::cpu())?;
            assert_eq!(ctx.device(), Device::cpu());
        }
        Ok(())
    }
}
