use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The stable error taxonomy for the library. Each variant maps to a
/// process exit code so callers can script against failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("input image could not be opened or decoded: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("vulkan call failed: {0}")]
    Gpu(#[from] vk::Result),

    #[error("vulkan loader failed: {0}")]
    GpuLoader(#[from] ash::LoadingError),

    #[error("gpu memory allocation failed: {0}")]
    GpuAllocation(#[from] gpu_allocator::AllocationError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec failure: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported format conversion: {0:?} -> {1:?}")]
    UnsupportedConversion(vk::Format, vk::Format),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InputNotFound(_) => 1,
            Self::InvalidArgument(_) => 2,
            Self::Gpu(_) | Self::GpuLoader(_) | Self::GpuAllocation(_) => 3,
            Self::Io(_) | Self::Image(_) => 4,
            Self::UnsupportedConversion(_, _) => 5,
            Self::Internal(_) => 6,
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(error: derive_builder::UninitializedFieldError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<std::ffi::FromBytesWithNulError> for Error {
    fn from(error: std::ffi::FromBytesWithNulError) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(Error::InputNotFound(PathBuf::from("x.hdr")).exit_code(), 1);
        assert_eq!(Error::invalid_argument("bad mip count").exit_code(), 2);
        assert_eq!(Error::Gpu(vk::Result::ERROR_DEVICE_LOST).exit_code(), 3);
        assert_eq!(
            Error::UnsupportedConversion(
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::E5B9G9R9_UFLOAT_PACK32
            )
            .exit_code(),
            5
        );
    }
}
