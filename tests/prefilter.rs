//! End-to-end runs against a real Vulkan device. These are ignored by
//! default so the suite passes on machines without a GPU; run them with
//! `cargo test -- --ignored`.

use envbake::{filter_environment, Distribution, FilterRequestBuilder, TargetFormat};
use std::{fs, path::PathBuf};

const KTX2_MAGIC: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

fn write_test_panorama(path: &PathBuf) {
    let mut panorama = image::RgbImage::new(64, 32);
    for (x, y, pixel) in panorama.enumerate_pixels_mut() {
        *pixel = image::Rgb([(x * 4) as u8, (y * 8) as u8, 255]);
    }
    panorama.save(path).unwrap();
}

fn header_field(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

#[test]
#[ignore = "requires a Vulkan device"]
fn ggx_panorama_end_to_end() {
    let input = temp_path("envbake-e2e-panorama.png");
    let output = temp_path("envbake-e2e-out.ktx2");
    let lut = temp_path("envbake-e2e-lut.png");
    write_test_panorama(&input);

    let request = FilterRequestBuilder::default()
        .input(input.clone())
        .output_cubemap(output.clone())
        .output_lut(Some(lut.clone()))
        .resolution(32_u32)
        .mip_count(3_u32)
        .sample_count(32_u32)
        .build()
        .unwrap();
    filter_environment(&request).unwrap();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[0..12], &KTX2_MAGIC);
    assert_eq!(header_field(&bytes, 12), 97); // VK_FORMAT_R16G16B16A16_SFLOAT
    assert_eq!(header_field(&bytes, 20), 32); // width
    assert_eq!(header_field(&bytes, 24), 32); // height
    assert_eq!(header_field(&bytes, 36), 6); // face count
    assert_eq!(header_field(&bytes, 40), 3); // level count

    let lut_image = image::open(&lut).unwrap();
    assert_eq!(lut_image.width(), 32);
    assert_eq!(lut_image.height(), 32);

    for path in [&input, &output, &lut] {
        fs::remove_file(path).ok();
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn constant_panorama_fills_every_texel() {
    let input = temp_path("envbake-e2e-constant.png");
    let output = temp_path("envbake-e2e-constant.ktx2");
    let mut panorama = image::RgbImage::new(16, 8);
    for pixel in panorama.pixels_mut() {
        *pixel = image::Rgb([255, 0, 0]);
    }
    panorama.save(&input).unwrap();

    // No convolution and no format conversion, so every texel of every
    // face and level must come back as exactly the input color.
    let request = FilterRequestBuilder::default()
        .input(input.clone())
        .output_cubemap(output.clone())
        .distribution(Distribution::None)
        .target_format(TargetFormat::Rgba32Float)
        .build()
        .unwrap();
    filter_environment(&request).unwrap();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[0..12], &KTX2_MAGIC);
    assert_eq!(header_field(&bytes, 20), 4); // width, panorama height / 2
    assert_eq!(header_field(&bytes, 36), 6); // face count
    assert_eq!(header_field(&bytes, 40), 2); // level count

    for level in 0..2_usize {
        let entry = 80 + level * 24;
        let offset = u64::from_le_bytes(bytes[entry..entry + 8].try_into().unwrap()) as usize;
        let length = u64::from_le_bytes(bytes[entry + 8..entry + 16].try_into().unwrap()) as usize;
        let side = 4_usize >> level;
        assert_eq!(length, side * side * 6 * 16);

        for texel in bytes[offset..offset + length].chunks_exact(16) {
            let channel =
                |index: usize| f32::from_le_bytes(texel[index * 4..index * 4 + 4].try_into().unwrap());
            assert_eq!(
                [channel(0), channel(1), channel(2), channel(3)],
                [1.0, 0.0, 0.0, 1.0]
            );
        }
    }

    for path in [&input, &output] {
        fs::remove_file(path).ok();
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn lambertian_writes_a_single_level() {
    let input = temp_path("envbake-e2e-diffuse-panorama.png");
    let output = temp_path("envbake-e2e-diffuse.ktx2");
    write_test_panorama(&input);

    let request = FilterRequestBuilder::default()
        .input(input.clone())
        .output_cubemap(output.clone())
        .distribution(Distribution::Lambertian)
        .resolution(16_u32)
        .sample_count(32_u32)
        .build()
        .unwrap();
    filter_environment(&request).unwrap();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[0..12], &KTX2_MAGIC);
    assert_eq!(header_field(&bytes, 40), 1); // level count

    for path in [&input, &output] {
        fs::remove_file(path).ok();
    }
}
