use crate::error::Error;
use ash::vk;
use std::{fmt, str::FromStr};

/// Importance-sampling distribution used when convolving the cubemap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// No convolution. The mipmapped source cube is written out as-is.
    None,
    Lambertian,
    Ggx,
    Charlie,
}

impl Distribution {
    /// Selector value handed to the filtering shader.
    pub fn shader_index(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Lambertian => 1,
            Self::Ggx => 2,
            Self::Charlie => 3,
        }
    }
}

impl FromStr for Distribution {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "lambertian" => Ok(Self::Lambertian),
            "ggx" => Ok(Self::Ggx),
            "charlie" => Ok(Self::Charlie),
            _ => Err(Error::invalid_argument(format!(
                "unknown distribution '{}', expected one of: none, lambertian, ggx, charlie",
                value
            ))),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Lambertian => "lambertian",
            Self::Ggx => "ggx",
            Self::Charlie => "charlie",
        };
        formatter.write_str(name)
    }
}

/// Pixel format of the serialized cubemap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    /// Packed E5B9G9R9 shared-exponent format. Not blit-compatible on
    /// the GPU, so conversion happens on the CPU after readback.
    SharedExponent,
}

impl TargetFormat {
    pub fn vk_format(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Self::SharedExponent => vk::Format::E5B9G9R9_UFLOAT_PACK32,
        }
    }

    /// The format the GPU renders and blits in before serialization.
    /// Shared-exponent stays in full float on the device and is packed
    /// after readback.
    pub fn device_format(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::Rgba32Float | Self::SharedExponent => vk::Format::R32G32B32A32_SFLOAT,
        }
    }

    pub fn needs_host_conversion(self) -> bool {
        self.vk_format() != self.device_format()
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rgba8" => Ok(Self::Rgba8Unorm),
            "rgba16f" => Ok(Self::Rgba16Float),
            "rgba32f" => Ok(Self::Rgba32Float),
            "rgb9e5" => Ok(Self::SharedExponent),
            _ => Err(Error::invalid_argument(format!(
                "unknown target format '{}', expected one of: rgba8, rgba16f, rgba32f, rgb9e5",
                value
            ))),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgba8Unorm => "rgba8",
            Self::Rgba16Float => "rgba16f",
            Self::Rgba32Float => "rgba32f",
            Self::SharedExponent => "rgb9e5",
        };
        formatter.write_str(name)
    }
}

/// Bytes per texel for the formats this tool serializes.
pub fn texel_size(format: vk::Format) -> u32 {
    channel_count(format) * channel_size(format)
}

pub fn channel_count(format: vk::Format) -> u32 {
    match format {
        vk::Format::E5B9G9R9_UFLOAT_PACK32 => 1,
        _ => 4,
    }
}

pub fn channel_size(format: vk::Format) -> u32 {
    match format {
        vk::Format::R8G8B8A8_UNORM => 1,
        vk::Format::R16G16B16A16_SFLOAT => 2,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::E5B9G9R9_UFLOAT_PACK32 => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), 4);
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), 8);
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(texel_size(vk::Format::E5B9G9R9_UFLOAT_PACK32), 4);
    }

    #[test]
    fn parse_round_trips() {
        for name in ["none", "lambertian", "ggx", "charlie"] {
            let parsed: Distribution = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        for name in ["rgba8", "rgba16f", "rgba32f", "rgb9e5"] {
            let parsed: TargetFormat = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert!("phong".parse::<Distribution>().is_err());
        assert!("rgb10a2".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn shared_exponent_renders_in_full_float() {
        assert_eq!(
            TargetFormat::SharedExponent.device_format(),
            vk::Format::R32G32B32A32_SFLOAT
        );
        assert!(TargetFormat::SharedExponent.needs_host_conversion());
        assert!(!TargetFormat::Rgba16Float.needs_host_conversion());
    }
}
