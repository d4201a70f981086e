//! Khronos Data Format Descriptor synthesis for the container writer.
//!
//! Descriptors are built as little-endian `u32` words: one total-length
//! word followed by a basic descriptor block (6 header words plus 4
//! words per sample). The declared total length and the embedded block
//! size are always derived from the actual sample count, including the
//! six-sample shared-exponent layout.

use crate::error::{Error, Result};
use ash::vk;

const VENDOR_KHRONOS: u32 = 0;
const DESCRIPTOR_TYPE_BASIC: u32 = 0;
const VERSION_NUMBER: u32 = 2;
const MODEL_RGBSDA: u32 = 1;
const PRIMARIES_BT709: u32 = 1;
const TRANSFER_LINEAR: u32 = 1;
const TRANSFER_SRGB: u32 = 2;
const FLAGS_ALPHA_STRAIGHT: u32 = 0;

const CHANNEL_ALPHA: u32 = 15;
const DATATYPE_LINEAR: u32 = 0x10;
const DATATYPE_EXPONENT: u32 = 0x20;
const DATATYPE_SIGNED: u32 = 0x40;
const DATATYPE_FLOAT: u32 = 0x80;

const SAMPLE_START: usize = 6;
const WORDS_PER_SAMPLE: usize = 4;

/// Numeric interpretation of a format's channels, mirroring the Vulkan
/// format name suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    Unorm,
    Snorm,
    Uscaled,
    Sscaled,
    Uint,
    Sint,
    Sfloat,
    Ufloat,
    Srgb,
}

fn write_header(num_samples: usize, bytes_per_texel: u32, suffix: Suffix) -> Vec<u32> {
    let block_words = SAMPLE_START + num_samples * WORDS_PER_SAMPLE;
    let mut dfd = vec![0_u32; 1 + block_words];
    let transfer = match suffix {
        Suffix::Srgb => TRANSFER_SRGB,
        _ => TRANSFER_LINEAR,
    };
    dfd[0] = 4 * (1 + block_words) as u32;
    dfd[1] = VENDOR_KHRONOS | DESCRIPTOR_TYPE_BASIC << 17;
    dfd[2] = VERSION_NUMBER | (4 * block_words as u32) << 16;
    dfd[3] = MODEL_RGBSDA | PRIMARIES_BT709 << 8 | transfer << 16 | FLAGS_ALPHA_STRAIGHT << 24;
    dfd[4] = 0; // 1x1x1x1 texel blocks
    dfd[5] = bytes_per_texel; // bytesPlane0, planes 1..3 zero
    dfd[6] = 0; // bytesPlane4..7
    dfd
}

fn channel_flags(channel: u32, suffix: Suffix) -> u32 {
    match suffix {
        Suffix::Snorm | Suffix::Sscaled | Suffix::Sint => channel | DATATYPE_SIGNED,
        Suffix::Sfloat => channel | DATATYPE_FLOAT | DATATYPE_SIGNED,
        Suffix::Ufloat => channel | DATATYPE_FLOAT,
        Suffix::Srgb if channel & 0xf == CHANNEL_ALPHA => channel | DATATYPE_LINEAR,
        _ => channel,
    }
}

fn unorm_upper(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1_u32 << bits) - 1
    }
}

/// Writes one sample into `dfd`. A channel that straddles a byte
/// boundary in a big-endian layout is emitted as two samples; only the
/// top sample carries the sign bit and only the bottom sample anchors
/// the range lower bound.
#[allow(clippy::too_many_arguments)]
fn write_sample(
    dfd: &mut [u32],
    sample_no: usize,
    channel: u32,
    bits: u32,
    offset: u32,
    top_sample: bool,
    bottom_sample: bool,
    suffix: Suffix,
) {
    let channel = if channel & 0xf == 3 {
        channel & !0xf | CHANNEL_ALPHA
    } else {
        channel
    };
    let channel = channel_flags(channel, suffix);

    let base = 1 + SAMPLE_START + sample_no * WORDS_PER_SAMPLE;
    dfd[base] = offset | (bits - 1) << 16 | channel << 24;
    dfd[base + 1] = 0; // sample position

    let (lower, upper) = match suffix {
        Suffix::Unorm | Suffix::Srgb => (0, unorm_upper(bits)),
        Suffix::Snorm => {
            let upper = if bits >= 32 {
                0x7fff_ffff
            } else if top_sample {
                (1_u32 << (bits - 1)) - 1
            } else {
                (1_u32 << bits) - 1
            };
            let mut lower = !upper;
            if bottom_sample {
                lower = lower.wrapping_add(1);
            }
            (lower, upper)
        }
        Suffix::Uscaled | Suffix::Uint => (0, u32::from(bottom_sample)),
        Suffix::Sscaled | Suffix::Sint => (u32::MAX, u32::from(bottom_sample)),
        Suffix::Sfloat => ((-1.0_f32).to_bits(), 1.0_f32.to_bits()),
        Suffix::Ufloat => (0, 1.0_f32.to_bits()),
    };
    dfd[base + 2] = lower;
    dfd[base + 3] = upper;
}

/// Descriptor for an unpacked format of `num_channels` channels taking
/// `bytes_per_channel` each. Big-endian layouts are described one byte
/// per sample; `red_blue_swap` describes BGRA channel ordering.
pub fn create_dfd_unpacked(
    big_endian: bool,
    num_channels: u32,
    bytes_per_channel: u32,
    red_blue_swap: bool,
    suffix: Suffix,
) -> Vec<u32> {
    let bytes_per_texel = num_channels * bytes_per_channel;
    if big_endian {
        let mut dfd = write_header((num_channels * bytes_per_channel) as usize, bytes_per_texel, suffix);
        for channel_index in 0..num_channels {
            let channel = match channel_index {
                0 | 2 if red_blue_swap => channel_index ^ 2,
                other => other,
            };
            for channel_byte in 0..bytes_per_channel {
                write_sample(
                    &mut dfd,
                    (channel_index * bytes_per_channel + channel_byte) as usize,
                    channel,
                    8,
                    8 * (channel_index * bytes_per_channel + bytes_per_channel - channel_byte - 1),
                    channel_byte == bytes_per_channel - 1,
                    channel_byte == 0,
                    suffix,
                );
            }
        }
        dfd
    } else {
        let mut dfd = write_header(num_channels as usize, bytes_per_texel, suffix);
        for channel_index in 0..num_channels {
            let channel = match channel_index {
                0 | 2 if red_blue_swap => channel_index ^ 2,
                other => other,
            };
            write_sample(
                &mut dfd,
                channel_index as usize,
                channel,
                8 * bytes_per_channel,
                8 * channel_index * bytes_per_channel,
                true,
                true,
                suffix,
            );
        }
        dfd
    }
}

/// Descriptor for a packed format. `bits[i]` and `channels[i]` describe
/// the field starting at the accumulated bit offset. Six channel
/// entries select the hard-coded shared-exponent (E5B9G9R9) layout. In
/// big-endian layouts a field straddling a byte boundary splits into
/// two continuation samples.
pub fn create_dfd_packed(big_endian: bool, bits: &[u32], channels: &[u32], suffix: Suffix) -> Vec<u32> {
    if channels.len() == 6 {
        return create_dfd_shared_exponent();
    }

    if big_endian {
        // No packed format is larger than 32 bits and no channel
        // crosses more than two bytes.
        let mut channel_start = vec![0_u32; bits.len()];
        let mut total_bits = 0_u32;
        for (index, field_bits) in bits.iter().enumerate() {
            channel_start[index] = total_bits;
            total_bits += field_bits;
        }
        let be_mask = (total_bits - 1) & 0x18;

        let mut bit_channel = [-1_i32; 32];
        let mut num_samples = bits.len();
        let mut bit_offset = 0_u32;
        for (index, field_bits) in bits.iter().enumerate() {
            bit_channel[(bit_offset ^ be_mask) as usize] = index as i32;
            if (bit_offset + field_bits - 1) & !7 != bit_offset & !7 {
                bit_channel[(((bit_offset + field_bits - 1) & !7) ^ be_mask) as usize] = index as i32;
                num_samples += 1;
            }
            bit_offset += field_bits;
        }

        let mut dfd = write_header(num_samples, total_bits >> 3, suffix);
        let mut sample_no = 0;
        let mut bit_offset = 0_u32;
        while bit_offset < total_bits {
            if bit_channel[bit_offset as usize] == -1 {
                // Lower half of a split channel; skip to the next byte.
                bit_offset = (bit_offset + 8) & !7;
                continue;
            }
            let this_channel = bit_channel[bit_offset as usize] as usize;
            if channel_start[this_channel] ^ be_mask == bit_offset {
                write_sample(
                    &mut dfd,
                    sample_no,
                    channels[this_channel],
                    bits[this_channel],
                    bit_offset,
                    true,
                    true,
                    suffix,
                );
                sample_no += 1;
                bit_offset += bits[this_channel];
            } else {
                let first_sample_bits = 8 - (channel_start[this_channel] & 0x7);
                let second_sample_bits = bits[this_channel] - first_sample_bits;
                write_sample(
                    &mut dfd,
                    sample_no,
                    channels[this_channel],
                    first_sample_bits,
                    channel_start[this_channel] ^ be_mask,
                    false,
                    true,
                    suffix,
                );
                sample_no += 1;
                bit_channel[(channel_start[this_channel] ^ be_mask) as usize] = -1;
                write_sample(
                    &mut dfd,
                    sample_no,
                    channels[this_channel],
                    second_sample_bits,
                    bit_offset,
                    true,
                    false,
                    suffix,
                );
                sample_no += 1;
                bit_offset += second_sample_bits;
            }
        }
        dfd
    } else {
        let total_bits: u32 = bits.iter().sum();
        let mut dfd = write_header(bits.len(), total_bits >> 3, suffix);
        let mut bit_offset = 0_u32;
        for (index, field_bits) in bits.iter().enumerate() {
            write_sample(&mut dfd, index, channels[index], *field_bits, bit_offset, true, true, suffix);
            bit_offset += field_bits;
        }
        dfd
    }
}

/// The shared-exponent E5B9G9R9 descriptor: three 9-bit mantissa fields
/// interleaved with three copies of the 5-bit exponent field at bit 27.
/// The exponent samples span the biased range [15, 31]; the mantissa
/// upper bound 8448 encodes the largest representable channel value.
pub fn create_dfd_shared_exponent() -> Vec<u32> {
    let mut dfd = write_header(6, 4, Suffix::Ufloat);
    for channel in 0..3_u32 {
        let mantissa_sample = channel as usize * 2;
        write_sample(&mut dfd, mantissa_sample, channel, 9, channel * 9, true, true, Suffix::Unorm);
        dfd[1 + SAMPLE_START + mantissa_sample * WORDS_PER_SAMPLE + 3] = 8448;

        let exponent_sample = mantissa_sample + 1;
        write_sample(
            &mut dfd,
            exponent_sample,
            channel | DATATYPE_EXPONENT,
            5,
            27,
            true,
            true,
            Suffix::Unorm,
        );
        dfd[1 + SAMPLE_START + exponent_sample * WORDS_PER_SAMPLE + 2] = 15;
        dfd[1 + SAMPLE_START + exponent_sample * WORDS_PER_SAMPLE + 3] = 31;
    }
    dfd
}

/// Serialized descriptor bytes for the formats the container writer
/// accepts.
pub fn dfd_for_format(format: vk::Format) -> Result<Vec<u8>> {
    let words = match format {
        vk::Format::R32G32B32A32_SFLOAT => create_dfd_unpacked(false, 4, 4, false, Suffix::Sfloat),
        vk::Format::R16G16B16A16_SFLOAT => create_dfd_unpacked(false, 4, 2, false, Suffix::Sfloat),
        vk::Format::R8G8B8A8_UNORM => create_dfd_unpacked(false, 4, 1, false, Suffix::Unorm),
        vk::Format::E5B9G9R9_UFLOAT_PACK32 => create_dfd_shared_exponent(),
        _ => {
            return Err(Error::invalid_argument(format!(
                "no data format descriptor for {:?}",
                format
            )))
        }
    };
    Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_words(dfd: &[u32], sample_no: usize) -> [u32; 4] {
        let base = 1 + SAMPLE_START + sample_no * WORDS_PER_SAMPLE;
        [dfd[base], dfd[base + 1], dfd[base + 2], dfd[base + 3]]
    }

    #[test]
    fn rgba32f_descriptor_matches_reference() {
        let dfd = create_dfd_unpacked(false, 4, 4, false, Suffix::Sfloat);
        assert_eq!(dfd.len(), 1 + 6 + 4 * 4);
        assert_eq!(dfd[0], 92);
        assert_eq!(dfd[1], 0);
        assert_eq!(dfd[2], 2 | 88 << 16);
        assert_eq!(dfd[3], 0x0001_0101);
        assert_eq!(dfd[4], 0);
        assert_eq!(dfd[5], 16);
        assert_eq!(dfd[6], 0);
        for (index, channel) in [0_u32, 1, 2, 15].iter().enumerate() {
            let words = sample_words(&dfd, index);
            assert_eq!(words[0], 32 * index as u32 | 31 << 16 | (channel | 0xc0) << 24);
            assert_eq!(words[1], 0);
            assert_eq!(words[2], 0xbf80_0000);
            assert_eq!(words[3], 0x3f80_0000);
        }
    }

    #[test]
    fn rgba16f_descriptor_matches_reference() {
        let dfd = create_dfd_unpacked(false, 4, 2, false, Suffix::Sfloat);
        assert_eq!(dfd[0], 92);
        assert_eq!(dfd[5], 8);
        let words = sample_words(&dfd, 2);
        assert_eq!(words[0], 32 | 15 << 16 | 0xc2 << 24);
    }

    #[test]
    fn rgba8_descriptor_matches_reference() {
        let dfd = create_dfd_unpacked(false, 4, 1, false, Suffix::Unorm);
        assert_eq!(dfd[0], 92);
        assert_eq!(dfd[5], 4);
        for (index, channel) in [0_u32, 1, 2, 15].iter().enumerate() {
            let words = sample_words(&dfd, index);
            assert_eq!(words[0], 8 * index as u32 | 7 << 16 | channel << 24);
            assert_eq!(words[2], 0);
            assert_eq!(words[3], 255);
        }
    }

    #[test]
    fn shared_exponent_descriptor_is_length_consistent() {
        let dfd = create_dfd_shared_exponent();
        assert_eq!(dfd.len(), 1 + 6 + 4 * 6);
        // Declared total and block size follow the real sample count.
        assert_eq!(dfd[0], 124);
        assert_eq!(dfd[2], 2 | 120 << 16);
        assert_eq!(dfd[5], 4);

        let red_mantissa = sample_words(&dfd, 0);
        assert_eq!(red_mantissa[0], 0 | 8 << 16 | 0 << 24);
        assert_eq!(red_mantissa[2], 0);
        assert_eq!(red_mantissa[3], 8448);

        let red_exponent = sample_words(&dfd, 1);
        assert_eq!(red_exponent[0], 27 | 4 << 16 | 0x20 << 24);
        assert_eq!(red_exponent[2], 15);
        assert_eq!(red_exponent[3], 31);

        let blue_mantissa = sample_words(&dfd, 4);
        assert_eq!(blue_mantissa[0], 18 | 8 << 16 | 2 << 24);
        let blue_exponent = sample_words(&dfd, 5);
        assert_eq!(blue_exponent[0], 27 | 4 << 16 | 0x22 << 24);
    }

    #[test]
    fn packed_delegates_six_channels_to_shared_exponent() {
        let packed = create_dfd_packed(false, &[0; 6], &[0; 6], Suffix::Ufloat);
        assert_eq!(packed, create_dfd_shared_exponent());
    }

    #[test]
    fn packed_little_endian_565() {
        let dfd = create_dfd_packed(false, &[5, 6, 5], &[0, 1, 2], Suffix::Unorm);
        assert_eq!(dfd.len(), 1 + 6 + 4 * 3);
        assert_eq!(dfd[5], 2);
        assert_eq!(sample_words(&dfd, 0)[0], 0 | 4 << 16 | 0 << 24);
        assert_eq!(sample_words(&dfd, 0)[3], 31);
        assert_eq!(sample_words(&dfd, 1)[0], 5 | 5 << 16 | 1 << 24);
        assert_eq!(sample_words(&dfd, 1)[3], 63);
        assert_eq!(sample_words(&dfd, 2)[0], 11 | 4 << 16 | 2 << 24);
        assert_eq!(sample_words(&dfd, 2)[3], 31);
    }

    #[test]
    fn packed_big_endian_565_splits_straddling_channel() {
        // 16-bit layout swaps the two bytes; green straddles them and
        // splits into a 3-bit top and a 3-bit bottom sample.
        let dfd = create_dfd_packed(true, &[5, 6, 5], &[0, 1, 2], Suffix::Unorm);
        assert_eq!(dfd.len(), 1 + 6 + 4 * 4);
        assert_eq!(dfd[0], 4 * (7 + 16));

        let green_low = sample_words(&dfd, 0);
        assert_eq!(green_low[0], 13 | 2 << 16 | 1 << 24);
        assert_eq!(green_low[3], 7);

        let green_high = sample_words(&dfd, 1);
        assert_eq!(green_high[0], 0 | 2 << 16 | 1 << 24);
        assert_eq!(green_high[3], 7);

        let blue = sample_words(&dfd, 2);
        assert_eq!(blue[0], 3 | 4 << 16 | 2 << 24);

        let red = sample_words(&dfd, 3);
        assert_eq!(red[0], 8 | 4 << 16 | 0 << 24);
    }

    #[test]
    fn big_endian_unpacked_is_one_sample_per_byte() {
        let dfd = create_dfd_unpacked(true, 4, 2, false, Suffix::Sfloat);
        assert_eq!(dfd.len(), 1 + 6 + 4 * 8);
        // Red is stored high byte first.
        assert_eq!(sample_words(&dfd, 0)[0], 8 | 7 << 16 | 0xc0 << 24);
        assert_eq!(sample_words(&dfd, 1)[0], 0 | 7 << 16 | 0xc0 << 24);
    }

    #[test]
    fn dfd_bytes_report_declared_length() {
        for format in [
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Format::R32G32B32A32_SFLOAT,
            vk::Format::E5B9G9R9_UFLOAT_PACK32,
        ] {
            let bytes = dfd_for_format(format).unwrap();
            let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            assert_eq!(bytes.len() as u32, declared);
        }
        assert!(dfd_for_format(vk::Format::R5G6B5_UNORM_PACK16).is_err());
    }
}
