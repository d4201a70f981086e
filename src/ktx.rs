//! KTX2 container serialization and a minimal cubemap reader.
//!
//! The writer lays the whole file out up front: header, index block,
//! level index, data format descriptor, then the mip payload region.
//! Mip payloads are placed from the smallest level to level 0, each
//! aligned to 16 bytes, so the largest level sits physically last and
//! byte offsets decrease as the level number increases.

use crate::{
    dfd,
    error::{Error, Result},
    format::texel_size,
};
use ash::vk;
use log::info;
use std::path::Path;

pub const KTX2_IDENTIFIER: [u8; 12] = [
    0xab, 0x4b, 0x54, 0x58, 0x20, 0x32, 0x30, 0xbb, 0x0d, 0x0a, 0x1a, 0x0a,
];

const HEADER_SIZE: usize = 48;
const INDEX_SIZE: usize = 32;
const LEVEL_INDEX_OFFSET: usize = HEADER_SIZE + INDEX_SIZE;
const LEVEL_INDEX_ENTRY_SIZE: usize = 24;
const MIP_ALIGNMENT: u64 = 16;

#[derive(Debug, Clone, Copy, Default)]
struct LevelIndex {
    byte_offset: u64,
    byte_length: u64,
    uncompressed_byte_length: u64,
}

impl LevelIndex {
    fn to_bytes(self) -> [u8; LEVEL_INDEX_ENTRY_SIZE] {
        let mut bytes = [0_u8; LEVEL_INDEX_ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.byte_offset.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.byte_length.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.uncompressed_byte_length.to_le_bytes());
        bytes
    }
}

pub struct KtxImage {
    data: Vec<u8>,
    levels: Vec<LevelIndex>,
    width: u32,
    height: u32,
    format: vk::Format,
    level_count: u32,
    face_count: u32,
}

impl KtxImage {
    pub fn new(
        width: u32,
        height: u32,
        format: vk::Format,
        level_count: u32,
        is_cubemap: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 || level_count == 0 {
            return Err(Error::invalid_argument(
                "container dimensions and level count must be non-zero",
            ));
        }
        if width.min(height) >> (level_count - 1) == 0 {
            return Err(Error::invalid_argument(format!(
                "{} levels do not fit a {}x{} image",
                level_count, width, height
            )));
        }

        let face_count = if is_cubemap { 6 } else { 1 };
        let dfd_bytes = dfd::dfd_for_format(format)?;

        let mut data = Vec::new();
        data.extend_from_slice(&KTX2_IDENTIFIER);
        for word in [
            format.as_raw() as u32,
            4, // typeSize
            width,
            height,
            0, // pixelDepth
            0, // layerCount
            face_count,
            level_count,
            0, // supercompressionScheme
        ] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        debug_assert_eq!(data.len(), HEADER_SIZE);

        // Index block: dfd offset/length now, key/value and
        // supercompression global data stay empty.
        let dfd_byte_offset =
            (LEVEL_INDEX_OFFSET + level_count as usize * LEVEL_INDEX_ENTRY_SIZE) as u32;
        data.extend_from_slice(&dfd_byte_offset.to_le_bytes());
        data.extend_from_slice(&(dfd_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(&0_u32.to_le_bytes()); // kvdByteOffset
        data.extend_from_slice(&0_u32.to_le_bytes()); // kvdByteLength
        data.extend_from_slice(&0_u64.to_le_bytes()); // sgdByteOffset
        data.extend_from_slice(&0_u64.to_le_bytes()); // sgdByteLength
        debug_assert_eq!(data.len(), LEVEL_INDEX_OFFSET);

        // Placeholder level index, patched below once offsets are known.
        data.resize(data.len() + level_count as usize * LEVEL_INDEX_ENTRY_SIZE, 0);
        data.extend_from_slice(&dfd_bytes);

        let mut levels = vec![LevelIndex::default(); level_count as usize];
        for (level, index) in levels.iter_mut().enumerate() {
            let level_width = u64::from((width >> level).max(1));
            let level_height = u64::from((height >> level).max(1));
            let length =
                level_width * level_height * u64::from(face_count) * u64::from(texel_size(format));
            index.byte_length = length;
            index.uncompressed_byte_length = length;
        }

        let mut mip_offset = data.len() as u64;
        for index in levels.iter_mut().rev() {
            if mip_offset % MIP_ALIGNMENT != 0 {
                mip_offset += MIP_ALIGNMENT - mip_offset % MIP_ALIGNMENT;
            }
            index.byte_offset = mip_offset;
            mip_offset += index.byte_length;
        }

        for (level, index) in levels.iter().enumerate() {
            let start = LEVEL_INDEX_OFFSET + level * LEVEL_INDEX_ENTRY_SIZE;
            data[start..start + LEVEL_INDEX_ENTRY_SIZE].copy_from_slice(&index.to_bytes());
        }

        data.resize(mip_offset as usize, 0);

        Ok(Self {
            data,
            levels,
            width,
            height,
            format,
            level_count,
            face_count,
        })
    }

    /// Copies one face worth of pixels into the payload region. Index
    /// or size mismatches are upstream sizing bugs, not user errors,
    /// and abort.
    pub fn write_face(&mut self, pixels: &[u8], face: u32, level: u32) {
        assert!(face < self.face_count, "face index out of range");
        assert!(level < self.level_count, "mip level out of range");

        let index = &self.levels[level as usize];
        let face_size = index.uncompressed_byte_length / u64::from(self.face_count);
        assert_eq!(
            pixels.len() as u64,
            face_size,
            "face payload has an incorrect length"
        );

        let start = index.byte_offset + face_size * u64::from(face);
        self.data[start as usize..(start + face_size) as usize].copy_from_slice(pixels);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.data)?;
        info!(
            "wrote {} ({} levels, {} faces, {:?})",
            path.display(),
            self.level_count,
            self.face_count,
            self.format
        );
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn levels(&self) -> u32 {
        self.level_count
    }

    pub fn is_cubemap(&self) -> bool {
        self.face_count == 6
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[cfg(test)]
    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Level-0 payload of a KTX2 cubemap, decoded to linear RGBA32F texels
/// with the six faces concatenated in layer order.
pub struct CubemapSource {
    pub side: u32,
    pub pixels: Vec<f32>,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
        bytes[offset + 4],
        bytes[offset + 5],
        bytes[offset + 6],
        bytes[offset + 7],
    ])
}

/// Sniffs `path` for a KTX2 cubemap. Returns `Ok(None)` when the file
/// is not KTX2 at all so callers can fall back to panorama decoding;
/// a recognized container that is not an uncompressed RGBA32F cubemap
/// is an argument error. Only the top level is consumed; the mip chain
/// is regenerated on the GPU.
pub fn read_cubemap(path: &Path) -> Result<Option<CubemapSource>> {
    let bytes = std::fs::read(path).map_err(|_| Error::InputNotFound(path.to_path_buf()))?;
    if bytes.len() < LEVEL_INDEX_OFFSET || bytes[0..12] != KTX2_IDENTIFIER {
        return Ok(None);
    }

    let format = read_u32(&bytes, 12);
    let width = read_u32(&bytes, 20);
    let height = read_u32(&bytes, 24);
    let face_count = read_u32(&bytes, 36);
    let level_count = read_u32(&bytes, 40);
    let supercompression = read_u32(&bytes, 44);

    if face_count != 6 {
        return Err(Error::invalid_argument(
            "KTX2 input must be a cubemap with six faces",
        ));
    }
    if format != vk::Format::R32G32B32A32_SFLOAT.as_raw() as u32 {
        return Err(Error::invalid_argument(
            "KTX2 input must use uncompressed RGBA32F texels",
        ));
    }
    if supercompression != 0 {
        return Err(Error::invalid_argument(
            "supercompressed KTX2 inputs are not supported",
        ));
    }
    if width == 0 || width != height {
        return Err(Error::invalid_argument(
            "cubemap faces must be square and non-empty",
        ));
    }
    if level_count == 0 {
        return Err(Error::invalid_argument("KTX2 level index is inconsistent"));
    }

    let byte_offset = read_u64(&bytes, LEVEL_INDEX_OFFSET) as usize;
    let byte_length = read_u64(&bytes, LEVEL_INDEX_OFFSET + 8) as usize;
    let expected = width as usize * height as usize * 6 * 16;
    if byte_length != expected || byte_offset + byte_length > bytes.len() {
        return Err(Error::invalid_argument("KTX2 level index is inconsistent"));
    }

    let pixels = bytemuck::pod_collect_to_vec(&bytes[byte_offset..byte_offset + byte_length]);
    Ok(Some(CubemapSource {
        side: width,
        pixels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_serialized() {
        let image = KtxImage::new(64, 64, vk::Format::R16G16B16A16_SFLOAT, 3, true).unwrap();
        let data = image.data();
        assert_eq!(&data[0..12], &KTX2_IDENTIFIER);
        assert_eq!(read_u32(data, 12), 97); // VK_FORMAT_R16G16B16A16_SFLOAT
        assert_eq!(read_u32(data, 16), 4); // typeSize
        assert_eq!(read_u32(data, 20), 64);
        assert_eq!(read_u32(data, 24), 64);
        assert_eq!(read_u32(data, 28), 0);
        assert_eq!(read_u32(data, 32), 0);
        assert_eq!(read_u32(data, 36), 6); // faceCount
        assert_eq!(read_u32(data, 40), 3); // levelCount
        assert_eq!(read_u32(data, 44), 0); // supercompressionScheme
    }

    #[test]
    fn dfd_index_points_at_descriptor() {
        let image = KtxImage::new(64, 64, vk::Format::R32G32B32A32_SFLOAT, 2, true).unwrap();
        let data = image.data();
        let dfd_offset = read_u32(data, HEADER_SIZE) as usize;
        let dfd_length = read_u32(data, HEADER_SIZE + 4) as usize;
        assert_eq!(dfd_offset, LEVEL_INDEX_OFFSET + 2 * LEVEL_INDEX_ENTRY_SIZE);
        assert_eq!(dfd_length, 92);
        let declared = read_u32(data, dfd_offset) as usize;
        assert_eq!(declared, dfd_length);
    }

    #[test]
    fn shared_exponent_dfd_length_is_consistent() {
        let image = KtxImage::new(32, 32, vk::Format::E5B9G9R9_UFLOAT_PACK32, 1, true).unwrap();
        let data = image.data();
        let dfd_offset = read_u32(data, HEADER_SIZE) as usize;
        let dfd_length = read_u32(data, HEADER_SIZE + 4) as usize;
        assert_eq!(dfd_length, 124);
        assert_eq!(read_u32(data, dfd_offset) as usize, dfd_length);
    }

    #[test]
    fn mip_levels_are_aligned_and_reversed() {
        let image = KtxImage::new(256, 256, vk::Format::R32G32B32A32_SFLOAT, 4, true).unwrap();
        let data = image.data();

        let mut entries = Vec::new();
        for level in 0..4 {
            let base = LEVEL_INDEX_OFFSET + level * LEVEL_INDEX_ENTRY_SIZE;
            entries.push((
                read_u64(data, base),
                read_u64(data, base + 8),
                read_u64(data, base + 16),
            ));
        }

        for (level, (offset, length, uncompressed)) in entries.iter().enumerate() {
            let side = 256_u64 >> level;
            assert_eq!(*length, side * side * 6 * 16);
            assert_eq!(length, uncompressed);
            assert_eq!(offset % 16, 0);
        }

        // Smallest level first in the file, level 0 last.
        for window in entries.windows(2) {
            assert!(window[0].0 > window[1].0);
        }
        let (level0_offset, level0_length, _) = entries[0];
        assert_eq!(data.len() as u64, level0_offset + level0_length);
    }

    #[test]
    fn write_face_lands_in_level_payload() {
        let mut image = KtxImage::new(1, 1, vk::Format::R8G8B8A8_UNORM, 1, true).unwrap();
        for face in 0..6_u32 {
            let texel = [face as u8; 4];
            image.write_face(&texel, face, 0);
        }
        let offset = read_u64(image.data(), LEVEL_INDEX_OFFSET) as usize;
        let payload = &image.data()[offset..offset + 24];
        for face in 0..6 {
            assert!(payload[face * 4..face * 4 + 4]
                .iter()
                .all(|byte| *byte == face as u8));
        }
    }

    #[test]
    #[should_panic(expected = "incorrect length")]
    fn write_face_rejects_wrong_length() {
        let mut image = KtxImage::new(4, 4, vk::Format::R8G8B8A8_UNORM, 1, true).unwrap();
        image.write_face(&[0_u8; 3], 0, 0);
    }

    #[test]
    #[should_panic(expected = "face index out of range")]
    fn write_face_rejects_out_of_range_face() {
        let mut image = KtxImage::new(4, 4, vk::Format::R8G8B8A8_UNORM, 1, false).unwrap();
        image.write_face(&[0_u8; 64], 1, 0);
    }

    #[test]
    fn rejects_impossible_level_count() {
        assert!(matches!(
            KtxImage::new(4, 4, vk::Format::R8G8B8A8_UNORM, 4, true),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn reader_round_trips_written_cubemap() {
        let side = 2_u32;
        let mut image = KtxImage::new(side, side, vk::Format::R32G32B32A32_SFLOAT, 1, true).unwrap();
        for face in 0..6_u32 {
            let texels: Vec<f32> = (0..side * side * 4)
                .map(|index| face as f32 + index as f32 / 100.0)
                .collect();
            let bytes: Vec<u8> = texels.iter().flat_map(|value| value.to_le_bytes()).collect();
            image.write_face(&bytes, face, 0);
        }

        let path = std::env::temp_dir().join("envbake-reader-round-trip.ktx2");
        image.save(&path).unwrap();

        let source = read_cubemap(&path).unwrap().unwrap();
        assert_eq!(source.side, side);
        assert_eq!(source.pixels.len(), (side * side * 4 * 6) as usize);
        assert_eq!(source.pixels[0], 0.0);
        let face_stride = (side * side * 4) as usize;
        assert_eq!(source.pixels[face_stride * 5], 5.0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reader_rejects_flat_texture_with_six_levels() {
        // Six levels but one face; only the faceCount word decides.
        let image = KtxImage::new(64, 64, vk::Format::R32G32B32A32_SFLOAT, 6, false).unwrap();
        let path = std::env::temp_dir().join("envbake-reader-flat.ktx2");
        image.save(&path).unwrap();

        assert!(matches!(
            read_cubemap(&path),
            Err(Error::InvalidArgument(_))
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reader_passes_on_non_ktx_files() {
        let path = std::env::temp_dir().join("envbake-reader-not-ktx.bin");
        std::fs::write(&path, b"definitely not a container").unwrap();
        assert!(read_cubemap(&path).unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }
}
