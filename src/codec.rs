//! CPU-side pixel conversion for formats the GPU cannot blit into,
//! following the EXT_texture_shared_exponent reconstruction rules.

use crate::error::{Error, Result};
use ash::vk;

const MANTISSA_BITS: i32 = 9;
const EXPONENT_BIAS: i32 = 15;
const MAX_EXPONENT: i32 = 31;

/// Largest value representable in E5B9G9R9: (2^9 - 1) / 2^9 * 2^(31 - 15).
pub const SHARED_EXPONENT_MAX: f32 = 65408.0;

/// Packs a linear RGBA texel into a shared-exponent E5B9G9R9 word.
/// Alpha is dropped. Out-of-range and non-finite channels clamp to the
/// representable range.
pub fn pack_shared_exponent(texel: [f32; 4]) -> u32 {
    let red = texel[0].clamp(0.0, SHARED_EXPONENT_MAX);
    let green = texel[1].clamp(0.0, SHARED_EXPONENT_MAX);
    let blue = texel[2].clamp(0.0, SHARED_EXPONENT_MAX);

    let max_channel = red.max(green).max(blue);

    // log2(0) is -inf; the max() collapses it to the smallest exponent.
    let mut shared_exponent =
        f32::max(-(EXPONENT_BIAS as f32) - 1.0, max_channel.log2().floor()) + EXPONENT_BIAS as f32 + 1.0;

    let scale = (shared_exponent - (EXPONENT_BIAS + MANTISSA_BITS) as f32).exp2();
    let max_mantissa = (max_channel / scale + 0.5).floor();
    if max_mantissa >= (1 << MANTISSA_BITS) as f32 {
        shared_exponent += 1.0;
    }
    debug_assert!(shared_exponent <= MAX_EXPONENT as f32);

    let scale = (shared_exponent - (EXPONENT_BIAS + MANTISSA_BITS) as f32).exp2();
    let quantize = |channel: f32| (channel / scale + 0.5).floor() as u32;

    quantize(red) | quantize(green) << 9 | quantize(blue) << 18 | (shared_exponent as u32) << 27
}

/// Reverses [`pack_shared_exponent`], reconstructing linear RGB.
pub fn unpack_shared_exponent(packed: u32) -> [f32; 3] {
    let exponent = (packed >> 27 & 0x1f) as i32;
    let scale = ((exponent - EXPONENT_BIAS - MANTISSA_BITS) as f32).exp2();
    [
        (packed & 0x1ff) as f32 * scale,
        (packed >> 9 & 0x1ff) as f32 * scale,
        (packed >> 18 & 0x1ff) as f32 * scale,
    ]
}

/// Converts one mip face worth of texels between serialization formats.
/// Identity when the formats already match; only the float-to-packed
/// shared-exponent path needs host work, everything else is expected to
/// have been blitted on the device.
pub fn convert_image(
    dst_format: vk::Format,
    src_format: vk::Format,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    if dst_format == src_format {
        return Ok(bytes.to_vec());
    }

    match (dst_format, src_format) {
        (vk::Format::E5B9G9R9_UFLOAT_PACK32, vk::Format::R32G32B32A32_SFLOAT) => {
            let texels: &[f32] = bytemuck::cast_slice(bytes);
            let mut packed = Vec::with_capacity(texels.len() / 4 * 4);
            for texel in texels.chunks_exact(4) {
                let word = pack_shared_exponent([texel[0], texel[1], texel[2], texel[3]]);
                packed.extend_from_slice(&word.to_le_bytes());
            }
            Ok(packed)
        }
        _ => Err(Error::UnsupportedConversion(src_format, dst_format)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_round_trips_exactly() {
        let packed = pack_shared_exponent([1.0, 1.0, 1.0, 1.0]);
        assert_eq!(unpack_shared_exponent(packed), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn black_packs_to_zero_mantissas() {
        let packed = pack_shared_exponent([0.0, 0.0, 0.0, 1.0]);
        assert_eq!(packed & 0x07ff_ffff, 0);
    }

    #[test]
    fn alpha_is_dropped() {
        let opaque = pack_shared_exponent([0.25, 0.5, 0.75, 1.0]);
        let transparent = pack_shared_exponent([0.25, 0.5, 0.75, 0.0]);
        assert_eq!(opaque, transparent);
    }

    #[test]
    fn overrange_clamps_to_max() {
        let packed = pack_shared_exponent([1.0e9, 0.0, 0.0, 1.0]);
        let [red, _, _] = unpack_shared_exponent(packed);
        assert_eq!(red, SHARED_EXPONENT_MAX);
    }

    #[test]
    fn small_values_stay_close() {
        let packed = pack_shared_exponent([0.125, 0.25, 0.0625, 1.0]);
        let [red, green, blue] = unpack_shared_exponent(packed);
        assert!((red - 0.125).abs() < 1.0e-3);
        assert!((green - 0.25).abs() < 1.0e-3);
        assert!((blue - 0.0625).abs() < 1.0e-3);
    }

    #[test]
    fn convert_identity_copies() {
        let bytes = [1_u8, 2, 3, 4, 5, 6, 7, 8];
        let out = convert_image(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R16G16B16A16_SFLOAT,
            &bytes,
        )
        .unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn convert_float_to_shared_exponent() {
        let texel = [1.0_f32, 0.5, 0.25, 1.0];
        let bytes: Vec<u8> = texel.iter().flat_map(|c| c.to_le_bytes()).collect();
        let out = convert_image(
            vk::Format::E5B9G9R9_UFLOAT_PACK32,
            vk::Format::R32G32B32A32_SFLOAT,
            &bytes,
        )
        .unwrap();
        assert_eq!(out.len(), 4);
        let word = u32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert_eq!(word, pack_shared_exponent(texel));
    }

    #[test]
    fn convert_rejects_unknown_pairs() {
        let result = convert_image(
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::R16G16B16A16_SFLOAT,
            &[0; 8],
        );
        assert!(matches!(
            result,
            Err(Error::UnsupportedConversion(
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R8G8B8A8_UNORM
            ))
        ));
    }
}
