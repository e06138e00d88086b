use crate::error::DeviceError;

/// Device type enumeration for tensor storage.
///
/// The discriminants are the stable codes written into serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum DeviceType {
    /// Host memory.
    #[default]
    Cpu = 0,
    /// NVIDIA CUDA device memory.
    Cuda = 1,
    /// MKL-DNN layout on the host.
    Mkldnn = 2,
    /// OpenGL texture memory.
    OpenGl = 3,
    /// OpenCL device memory.
    OpenCl = 4,
    /// IDEEP layout on the host.
    Ideep = 5,
    /// AMD HIP device memory.
    Hip = 6,
    /// FPGA device memory.
    Fpga = 7,
    /// MSNPU device memory.
    Msnpu = 8,
    /// XLA device memory.
    Xla = 9,
}

impl DeviceType {
    /// All known device types, in wire code order.
    pub const ALL: [DeviceType; 10] = [
        DeviceType::Cpu,
        DeviceType::Cuda,
        DeviceType::Mkldnn,
        DeviceType::OpenGl,
        DeviceType::OpenCl,
        DeviceType::Ideep,
        DeviceType::Hip,
        DeviceType::Fpga,
        DeviceType::Msnpu,
        DeviceType::Xla,
    ];

    /// Returns the upper-case device type name, e.g. `"CPU"` or `"CUDA"`.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Cuda => "CUDA",
            DeviceType::Mkldnn => "MKLDNN",
            DeviceType::OpenGl => "OPENGL",
            DeviceType::OpenCl => "OPENCL",
            DeviceType::Ideep => "IDEEP",
            DeviceType::Hip => "HIP",
            DeviceType::Fpga => "FPGA",
            DeviceType::Msnpu => "MSNPU",
            DeviceType::Xla => "XLA",
        }
    }

    /// Returns the wire code of the device type.
    #[inline]
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for DeviceType {
    type Error = DeviceError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        DeviceType::ALL
            .into_iter()
            .find(|d| d.code() == code)
            .ok_or(DeviceError::UnknownDeviceType(code))
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name().to_lowercase())
    }
}

/// Identifies where a tensor's storage lives: a device type plus an ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Device {
    device_type: DeviceType,
    device_id: usize,
}

impl Device {
    /// Creates a device from a type and an ordinal.
    pub fn new(device_type: DeviceType, device_id: usize) -> Self {
        Self {
            device_type,
            device_id,
        }
    }

    /// The host device.
    pub fn cpu() -> Self {
        Self::new(DeviceType::Cpu, 0)
    }

    /// Creates a CUDA device with the specified device ID.
    pub fn cuda(device_id: usize) -> Self {
        Self::new(DeviceType::Cuda, device_id)
    }

    /// Returns the device type.
    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Returns the device ordinal.
    #[inline]
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Returns true if the device is CPU.
    pub fn is_cpu(&self) -> bool {
        matches!(self.device_type, DeviceType::Cpu)
    }

    /// Returns true if the memory is not directly host-addressable.
    pub fn is_gpu(&self) -> bool {
        !self.is_cpu()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_cpu() {
            write!(f, "cpu")
        } else {
            write!(f, "{}:{}", self.device_type, self.device_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_cpu() {
        let device = Device::cpu();
        assert_eq!(device.device_type(), DeviceType::Cpu);
        assert_eq!(device.device_id(), 0);
        assert!(device.is_cpu());
        assert!(!device.is_gpu());
        assert_eq!(format!("{}", device), "cpu");
    }

    #[test]
    fn test_device_cuda() {
        let device = Device::cuda(1);
        assert_eq!(device.device_type().name(), "CUDA");
        assert_eq!(device.device_id(), 1);
        assert!(device.is_gpu());
        assert_eq!(format!("{}", device), "cuda:1");
    }

    #[test]
    fn test_device_default() {
        assert_eq!(Device::default(), Device::cpu());
    }

    #[test]
    fn test_device_type_codes() -> Result<(), DeviceError> {
        for device_type in DeviceType::ALL {
            assert_eq!(DeviceType::try_from(device_type.code())?, device_type);
        }
        assert_eq!(
            DeviceType::try_from(42),
            Err(DeviceError::UnknownDeviceType(42))
        );
        Ok(())
    }
}
