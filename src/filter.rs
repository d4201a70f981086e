//! The GPU pass orchestrator: uploads the source environment, projects
//! panoramas onto a cubemap, builds the mip chain, convolves each level
//! under the requested distribution, converts to the serialization
//! format, and reads everything back into a KTX2 container.

use crate::{
    codec,
    core::{
        cube_view, face_view, flat_view, transition_image, AllocatedImage, BlitImageBuilder,
        BufferToImageCopyBuilder, CommandPool, Context, CpuToGpuBuffer, DescriptorPool,
        DescriptorSetLayout, Device, Framebuffer, GpuToCpuBuffer, GraphicsPipelineSettingsBuilder,
        ImageDescription, ImageLayoutTransitionBuilder, ImageToBufferCopyBuilder, ImageView,
        Pipeline, PipelineLayout, RenderPass, Sampler, Shader, ShaderSet,
    },
    error::{Error, Result},
    format::{texel_size, Distribution, TargetFormat},
    ktx::{self, KtxImage},
};
use ash::vk::{self, Handle};
use bytemuck::{Pod, Zeroable};
use derive_builder::Builder;
use log::info;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

const SHADER_DIRECTORY: &str = "assets/shaders";
const FULLSCREEN_VERTEX_SHADER: &str = "fullscreen.vert.spv";
const PANORAMA_FRAGMENT_SHADER: &str = "panorama_to_cubemap.frag.spv";
const FILTER_FRAGMENT_SHADER: &str = "filter_cubemap.frag.spv";

/// All device-side rendering happens in full float; the target format
/// only matters for conversion and serialization.
const CUBE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
const CUBE_FACES: u32 = 6;

#[derive(Builder, Clone, Debug)]
#[builder(setter(into), build_fn(error = "crate::error::Error"))]
pub struct FilterRequest {
    /// Panorama (anything the image decoder accepts, decoded to linear
    /// float) or a KTX2 RGBA32F cubemap.
    pub input: PathBuf,
    pub output_cubemap: PathBuf,
    #[builder(default)]
    pub output_lut: Option<PathBuf>,
    #[builder(default = "Distribution::Ggx")]
    pub distribution: Distribution,
    /// Cubemap face size. Zero derives it from the input.
    #[builder(default)]
    pub resolution: u32,
    /// Output mip count. Zero derives floor(log2(resolution)).
    #[builder(default)]
    pub mip_count: u32,
    #[builder(default = "1024")]
    pub sample_count: u32,
    #[builder(default = "TargetFormat::Rgba16Float")]
    pub target_format: TargetFormat,
    #[builder(default)]
    pub lod_bias: f32,
    #[builder(default)]
    pub debug: bool,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FilterPushConstants {
    roughness: f32,
    sample_count: u32,
    mip_level: u32,
    width: u32,
    lod_bias: f32,
    distribution: u32,
}

struct SourceImage {
    width: u32,
    height: u32,
    is_cubemap: bool,
    pixels: Vec<f32>,
}

/// The cubemap the filter passes sample from. When the input is
/// already a cubemap the source image itself is used; the variant keeps
/// ownership unambiguous so the aliased image is never freed twice.
enum WorkingCube {
    Owned(AllocatedImage),
    SourceAlias,
}

impl WorkingCube {
    fn image<'a>(&'a self, source: &'a AllocatedImage) -> &'a AllocatedImage {
        match self {
            Self::Owned(image) => image,
            Self::SourceAlias => source,
        }
    }
}

fn shader_path(file_name: &str) -> PathBuf {
    Path::new(SHADER_DIRECTORY).join(file_name)
}

fn load_source(path: &Path) -> Result<SourceImage> {
    if !path.exists() {
        return Err(Error::InputNotFound(path.to_path_buf()));
    }
    if let Some(cubemap) = ktx::read_cubemap(path)? {
        info!("Loaded KTX2 cubemap input with {0}x{0} faces", cubemap.side);
        return Ok(SourceImage {
            width: cubemap.side,
            height: cubemap.side,
            is_cubemap: true,
            pixels: cubemap.pixels,
        });
    }

    let image = image::open(path).map_err(|_| Error::InputNotFound(path.to_path_buf()))?;
    let buffer = image.to_rgba32f();
    let (width, height) = buffer.dimensions();
    info!("Loaded {}x{} panorama input", width, height);
    Ok(SourceImage {
        width,
        height,
        is_cubemap: false,
        pixels: buffer.into_raw(),
    })
}

/// Settings derived from the request and the decoded source.
#[derive(Debug, PartialEq, Eq)]
struct DerivedSettings {
    resolution: u32,
    output_mips: u32,
    input_mips: u32,
}

fn derive_settings(request: &FilterRequest, source: &SourceImage) -> Result<DerivedSettings> {
    let resolution = if request.resolution != 0 {
        request.resolution
    } else if source.is_cubemap {
        source.height
    } else {
        source.height / 2
    };
    if resolution == 0 {
        return Err(Error::invalid_argument(
            "could not derive a cubemap resolution from the input",
        ));
    }
    if request.sample_count == 0 {
        return Err(Error::invalid_argument("sample count must be at least 1"));
    }
    if source.is_cubemap && resolution != source.width {
        return Err(Error::invalid_argument(format!(
            "cubemap input has {}x{} faces but a resolution of {} was requested",
            source.width, source.width, resolution
        )));
    }
    if request.output_lut.is_some() && request.distribution == Distribution::None {
        return Err(Error::invalid_argument(
            "a BRDF lookup table requires a filtering distribution",
        ));
    }

    let requested_mips = if request.mip_count != 0 {
        request.mip_count
    } else {
        resolution.ilog2().max(1)
    };
    // Diffuse irradiance is stored as a single level, but the source
    // keeps its full chain so the convolution can still sample coarse
    // mips.
    let output_mips = if request.distribution == Distribution::Lambertian {
        1
    } else {
        requested_mips
    };
    if resolution >> (output_mips - 1) == 0 {
        return Err(Error::invalid_argument(format!(
            "{} mip levels do not fit a resolution of {}",
            output_mips, resolution
        )));
    }
    let input_mips = requested_mips.clamp(1, resolution.ilog2() + 1);

    Ok(DerivedSettings {
        resolution,
        output_mips,
        input_mips,
    })
}

/// Runs the whole pipeline for one request and writes the container
/// (and optional lookup-table PNG) to disk.
pub fn filter_environment(request: &FilterRequest) -> Result<()> {
    let source = load_source(&request.input)?;
    let DerivedSettings {
        resolution,
        output_mips,
        input_mips,
    } = derive_settings(request, &source)?;

    info!(
        "Filtering {} -> {} ({}, {}x{}, {} levels, {} samples)",
        request.input.display(),
        request.output_cubemap.display(),
        request.distribution,
        resolution,
        resolution,
        output_mips,
        request.sample_count
    );

    let context = Context::new(request.debug)?;
    context.ensure_linear_blitting_supported(CUBE_FORMAT)?;
    context.ensure_color_attachment_supported(CUBE_FORMAT)?;
    let device = context.device.clone();
    let pool = CommandPool::new(
        device.clone(),
        context.graphics_queue(),
        context.physical_device.graphics_queue_family_index,
    )?;

    let vertex_shader = Arc::new(Shader::from_file(
        shader_path(FULLSCREEN_VERTEX_SHADER),
        device.clone(),
    )?);

    // Stage 1: upload.
    info!("Uploading source image");
    let source_image = upload_source(&context, &pool, &source, input_mips, resolution)?;

    let working_cube = if source.is_cubemap {
        WorkingCube::SourceAlias
    } else {
        let description = ImageDescription::cubemap(
            resolution,
            CUBE_FORMAT,
            input_mips,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        );
        WorkingCube::Owned(AllocatedImage::new(
            device.clone(),
            context.allocator.clone(),
            description,
        )?)
    };

    if let Ok(debug) = context.debug() {
        debug.name_image("source_image", source_image.handle.as_raw())?;
        if let WorkingCube::Owned(image) = &working_cube {
            debug.name_image("working_cubemap", image.handle.as_raw())?;
        }
    }

    let projection = match &working_cube {
        WorkingCube::Owned(target) => Some(ProjectionPass::new(
            &context,
            vertex_shader.clone(),
            &source_image,
            target,
        )?),
        WorkingCube::SourceAlias => None,
    };

    let filtered_cube = if request.distribution == Distribution::None {
        None
    } else {
        let description = ImageDescription::cubemap(
            resolution,
            CUBE_FORMAT,
            output_mips,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
        );
        Some(AllocatedImage::new(
            device.clone(),
            context.allocator.clone(),
            description,
        )?)
    };

    let lut_image = match &request.output_lut {
        Some(_) => {
            let description = ImageDescription::texture_2d(
                resolution,
                resolution,
                CUBE_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            );
            Some(AllocatedImage::new(
                device.clone(),
                context.allocator.clone(),
                description,
            )?)
        }
        None => None,
    };

    let filter = match &filtered_cube {
        Some(target) => Some(FilterPass::new(
            &context,
            vertex_shader.clone(),
            working_cube.image(&source_image),
            target,
            lut_image.as_ref(),
            input_mips,
        )?),
        None => None,
    };

    // GPU blit conversion, unless the target renders natively or is
    // packed on the CPU after readback.
    let device_target_format = request.target_format.device_format();
    let converted_cube = if device_target_format != CUBE_FORMAT {
        let description = ImageDescription::cubemap(
            resolution,
            device_target_format,
            output_mips,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
        );
        context.ensure_linear_blitting_supported(device_target_format)?;
        Some(AllocatedImage::new(
            device.clone(),
            context.allocator.clone(),
            description,
        )?)
    } else {
        None
    };

    // Stage 2-5: projection, mip generation, filtering, conversion.
    pool.execute_once(|command_buffer| {
        if let Some(pass) = &projection {
            info!("Recording panorama projection");
            pass.record(command_buffer, resolution)?;
        }

        info!("Recording mip chain generation");
        let (base_layout, base_access, base_stage) = match &working_cube {
            WorkingCube::Owned(_) => (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            WorkingCube::SourceAlias => (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
        };
        record_mip_chain(
            &device.handle,
            command_buffer,
            working_cube.image(&source_image),
            base_layout,
            base_access,
            base_stage,
        )?;

        if let Some(pass) = &filter {
            info!("Recording {} filter passes", output_mips);
            pass.record(
                command_buffer,
                &device,
                FilterRecordInfo {
                    output_mips,
                    resolution,
                    sample_count: request.sample_count,
                    lod_bias: request.lod_bias,
                    distribution: request.distribution,
                },
            )?;
        }

        // Leave whichever image the readback consumes in TRANSFER_SRC.
        let (readback_image, old_layout, old_access, old_stage) = match (&filtered_cube, &working_cube) {
            (Some(filtered), _) => (
                filtered,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            (None, cube) => (
                cube.image(&source_image),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
        };
        let to_transfer_src = ImageLayoutTransitionBuilder::default()
            .level_count(output_mips)
            .layer_count(CUBE_FACES)
            .old_layout(old_layout)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_access_mask(old_access)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .src_stage_mask(old_stage)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .build()?;
        transition_image(
            &device.handle,
            command_buffer,
            readback_image.handle,
            &to_transfer_src,
        );

        if let Some(converted) = &converted_cube {
            info!("Recording format conversion to {:?}", device_target_format);
            record_conversion_blits(
                &device.handle,
                command_buffer,
                readback_image,
                converted,
                output_mips,
            )?;
        }

        Ok(())
    })?;

    // Stage 6: readback and serialization.
    let readback_image = match (&converted_cube, &filtered_cube, &working_cube) {
        (Some(converted), _, _) => converted,
        (None, Some(filtered), _) => filtered,
        (None, None, cube) => cube.image(&source_image),
    };
    info!("Reading back {} cubemap levels", output_mips);
    let mut container = KtxImage::new(
        resolution,
        resolution,
        request.target_format.vk_format(),
        output_mips,
        true,
    )?;
    download_cubemap(
        &context,
        &pool,
        readback_image,
        request.target_format,
        output_mips,
        &mut container,
    )?;
    container.save(&request.output_cubemap)?;

    if let (Some(lut_path), Some(lut)) = (&request.output_lut, &lut_image) {
        info!("Reading back BRDF lookup table");
        download_lut(&context, &pool, lut, lut_path)?;
    }

    info!("Done");
    Ok(())
}

fn upload_source(
    context: &Context,
    pool: &CommandPool,
    source: &SourceImage,
    input_mips: u32,
    resolution: u32,
) -> Result<AllocatedImage> {
    let device = context.device.clone();
    let description = if source.is_cubemap {
        ImageDescription::cubemap(
            source.width,
            CUBE_FORMAT,
            input_mips.min(resolution.ilog2() + 1),
            vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
        )
    } else {
        ImageDescription::texture_2d(
            source.width,
            source.height,
            CUBE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )
    };
    let layers = description.layers;
    let image = AllocatedImage::new(device.clone(), context.allocator.clone(), description)?;

    let byte_length = (source.pixels.len() * std::mem::size_of::<f32>()) as vk::DeviceSize;
    let mut staging =
        CpuToGpuBuffer::staging_buffer(device.clone(), context.allocator.clone(), byte_length)?;
    staging.upload_data(&source.pixels, 0)?;

    pool.execute_once(|command_buffer| {
        let to_transfer_dst = ImageLayoutTransitionBuilder::default()
            .level_count(1)
            .layer_count(layers)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .build()?;
        transition_image(&device.handle, command_buffer, image.handle, &to_transfer_dst);

        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .layer_count(layers)
            .build();
        let region = vk::BufferImageCopy::builder()
            .image_subresource(subresource)
            .image_extent(vk::Extent3D {
                width: source.width,
                height: source.height,
                depth: 1,
            })
            .build();
        let copy = BufferToImageCopyBuilder::default()
            .source(staging.handle())
            .destination(image.handle)
            .regions(vec![region])
            .build()?;
        copy.record(&device.handle, command_buffer);

        let to_shader_read = ImageLayoutTransitionBuilder::default()
            .level_count(1)
            .layer_count(layers)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .build()?;
        transition_image(&device.handle, command_buffer, image.handle, &to_shader_read);

        Ok(())
    })?;

    Ok(image)
}

/// Blits level 0 down the chain. The base level comes in with the
/// caller-provided layout and the whole chain leaves in
/// SHADER_READ_ONLY for the filter passes.
fn record_mip_chain(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: &AllocatedImage,
    base_old_layout: vk::ImageLayout,
    base_src_access: vk::AccessFlags,
    base_src_stage: vk::PipelineStageFlags,
) -> Result<()> {
    let mip_levels = image.description.mip_levels;
    let layers = image.description.layers;

    let base_to_transfer_src = ImageLayoutTransitionBuilder::default()
        .level_count(1)
        .layer_count(layers)
        .old_layout(base_old_layout)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_access_mask(base_src_access)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_stage_mask(base_src_stage)
        .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .build()?;
    transition_image(device, command_buffer, image.handle, &base_to_transfer_src);

    if mip_levels > 1 {
        let tail_to_transfer_dst = ImageLayoutTransitionBuilder::default()
            .base_mip_level(1)
            .level_count(mip_levels - 1)
            .layer_count(layers)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .build()?;
        transition_image(device, command_buffer, image.handle, &tail_to_transfer_dst);
    }

    for level in 1..mip_levels {
        let src_extent = image.description.mip_extent(level - 1);
        let dst_extent = image.description.mip_extent(level);

        let src_subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level - 1)
            .layer_count(layers)
            .build();
        let dst_subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level)
            .layer_count(layers)
            .build();
        let region = vk::ImageBlit::builder()
            .src_subresource(src_subresource)
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(dst_subresource)
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: 1,
                },
            ])
            .build();
        let blit = BlitImageBuilder::default()
            .src_image(image.handle)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(image.handle)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(vec![region])
            .filter(vk::Filter::LINEAR)
            .build()?;
        blit.record(device, command_buffer);

        // The level just written becomes the source of the next blit.
        let level_to_transfer_src = ImageLayoutTransitionBuilder::default()
            .base_mip_level(level)
            .level_count(1)
            .layer_count(layers)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .build()?;
        transition_image(device, command_buffer, image.handle, &level_to_transfer_src);
    }

    let chain_to_shader_read = ImageLayoutTransitionBuilder::default()
        .level_count(mip_levels)
        .layer_count(layers)
        .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_access_mask(vk::AccessFlags::TRANSFER_READ)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
        .build()?;
    transition_image(device, command_buffer, image.handle, &chain_to_shader_read);

    Ok(())
}

fn record_conversion_blits(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    source: &AllocatedImage,
    destination: &AllocatedImage,
    output_mips: u32,
) -> Result<()> {
    let to_transfer_dst = ImageLayoutTransitionBuilder::default()
        .level_count(output_mips)
        .layer_count(CUBE_FACES)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
        .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .build()?;
    transition_image(device, command_buffer, destination.handle, &to_transfer_dst);

    for level in 0..output_mips {
        let extent = source.description.mip_extent(level);
        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level)
            .layer_count(CUBE_FACES)
            .build();
        let offsets = [
            vk::Offset3D::default(),
            vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            },
        ];
        let region = vk::ImageBlit::builder()
            .src_subresource(subresource)
            .src_offsets(offsets)
            .dst_subresource(subresource)
            .dst_offsets(offsets)
            .build();
        let blit = BlitImageBuilder::default()
            .src_image(source.handle)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(destination.handle)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(vec![region])
            .filter(vk::Filter::NEAREST)
            .build()?;
        blit.record(device, command_buffer);
    }

    let to_transfer_src = ImageLayoutTransitionBuilder::default()
        .level_count(output_mips)
        .layer_count(CUBE_FACES)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .build()?;
    transition_image(device, command_buffer, destination.handle, &to_transfer_src);

    Ok(())
}

fn update_sampled_image_descriptor(
    device: &ash::Device,
    descriptor_set: vk::DescriptorSet,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::builder()
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image_view(view)
        .sampler(sampler)
        .build();
    let image_infos = [image_info];

    let sampler_write = vk::WriteDescriptorSet::builder()
        .dst_set(descriptor_set)
        .dst_binding(0)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_infos)
        .build();

    unsafe { device.update_descriptor_sets(&[sampler_write], &[]) }
}

fn sampled_image_descriptor_set_layout(device: Arc<Device>) -> Result<DescriptorSetLayout> {
    let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_count(1)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build();
    let bindings = [sampler_binding];
    let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    DescriptorSetLayout::new(device, create_info)
}

fn sampled_image_descriptor_pool(device: Arc<Device>) -> Result<DescriptorPool> {
    let sampler_pool_size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
    };
    let pool_sizes = [sampler_pool_size];
    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(1);
    DescriptorPool::new(device, create_info)
}

/// Renders the equirectangular panorama onto the six faces of the
/// working cube in a single fullscreen-triangle pass with one color
/// attachment per face.
struct ProjectionPass {
    render_pass: Arc<RenderPass>,
    framebuffer: Framebuffer,
    _face_views: Vec<ImageView>,
    _panorama_view: ImageView,
    _sampler: Sampler,
    _descriptor_pool: DescriptorPool,
    _descriptor_set_layout: Arc<DescriptorSetLayout>,
    descriptor_set: vk::DescriptorSet,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    target: vk::Image,
    device: Arc<Device>,
}

impl ProjectionPass {
    fn new(
        context: &Context,
        vertex_shader: Arc<Shader>,
        panorama: &AllocatedImage,
        target: &AllocatedImage,
    ) -> Result<Self> {
        let device = context.device.clone();

        let render_pass = Arc::new(RenderPass::with_color_attachments(
            device.clone(),
            CUBE_FORMAT,
            CUBE_FACES,
        )?);

        let face_views = (0..CUBE_FACES)
            .map(|face| face_view(device.clone(), target.handle, CUBE_FORMAT, 0, face))
            .collect::<Result<Vec<_>>>()?;
        let attachments = face_views
            .iter()
            .map(|view| view.handle)
            .collect::<Vec<_>>();
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle)
            .attachments(&attachments)
            .width(target.description.width)
            .height(target.description.height)
            .layers(1);
        let framebuffer = Framebuffer::new(device.clone(), create_info)?;

        let panorama_view = flat_view(device.clone(), panorama.handle, CUBE_FORMAT)?;
        let sampler = Sampler::filter_sampler(device.clone(), 1.0)?;

        let descriptor_set_layout = Arc::new(sampled_image_descriptor_set_layout(device.clone())?);
        let descriptor_pool = sampled_image_descriptor_pool(device.clone())?;
        let descriptor_set =
            descriptor_pool.allocate_descriptor_sets(descriptor_set_layout.handle, 1)?[0];
        update_sampled_image_descriptor(
            &device.handle,
            descriptor_set,
            panorama_view.handle,
            sampler.handle,
        );

        let fragment_shader = Arc::new(Shader::from_file(
            shader_path(PANORAMA_FRAGMENT_SHADER),
            device.clone(),
        )?);
        let shader_set = ShaderSet {
            vertex: vertex_shader,
            fragment: fragment_shader,
        };
        let settings = GraphicsPipelineSettingsBuilder::default()
            .render_pass(render_pass.clone())
            .descriptor_set_layout(descriptor_set_layout.clone())
            .shader_set(shader_set)
            .color_attachment_count(CUBE_FACES)
            .build()?;
        let (pipeline, pipeline_layout) = settings.create_pipeline(device.clone())?;

        Ok(Self {
            render_pass,
            framebuffer,
            _face_views: face_views,
            _panorama_view: panorama_view,
            _sampler: sampler,
            _descriptor_pool: descriptor_pool,
            _descriptor_set_layout: descriptor_set_layout,
            descriptor_set,
            pipeline,
            pipeline_layout,
            target: target.handle,
            device,
        })
    }

    fn record(&self, command_buffer: vk::CommandBuffer, side: u32) -> Result<()> {
        let to_color_attachment = ImageLayoutTransitionBuilder::default()
            .level_count(1)
            .layer_count(CUBE_FACES)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .build()?;
        transition_image(
            &self.device.handle,
            command_buffer,
            self.target,
            &to_color_attachment,
        );

        let extent = vk::Extent2D {
            width: side,
            height: side,
        };
        let clear_values = vec![vk::ClearValue::default(); CUBE_FACES as usize];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass.handle)
            .framebuffer(self.framebuffer.handle)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(&clear_values);

        self.render_pass.record(command_buffer, begin_info, |command_buffer| {
            self.device.update_viewport(command_buffer, extent);
            self.pipeline.bind(&self.device.handle, command_buffer);
            unsafe {
                self.device.handle.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout.handle,
                    0,
                    &[self.descriptor_set],
                    &[],
                );
                self.device.handle.cmd_draw(command_buffer, 3, 1, 0, 0);
            }
            Ok(())
        })
    }
}

struct FilterRecordInfo {
    output_mips: u32,
    resolution: u32,
    sample_count: u32,
    lod_bias: f32,
    distribution: Distribution,
}

/// Convolves the working cube into the filtered cube, one render pass
/// per output mip level from the smallest to level 0. The lookup table
/// shares the attachment list; because passes run coarse-to-fine and
/// each clears only its render area, the final full-resolution pass is
/// the only one whose LUT pixels survive.
struct FilterPass {
    render_pass: Arc<RenderPass>,
    framebuffers: Vec<Framebuffer>,
    _face_views: Vec<ImageView>,
    _lut_view: Option<ImageView>,
    _cubemap_view: ImageView,
    _sampler: Sampler,
    _descriptor_pool: DescriptorPool,
    _descriptor_set_layout: Arc<DescriptorSetLayout>,
    descriptor_set: vk::DescriptorSet,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    target: vk::Image,
    lut: Option<vk::Image>,
    device: Arc<Device>,
}

impl FilterPass {
    fn new(
        context: &Context,
        vertex_shader: Arc<Shader>,
        source_cube: &AllocatedImage,
        target: &AllocatedImage,
        lut: Option<&AllocatedImage>,
        input_mips: u32,
    ) -> Result<Self> {
        let device = context.device.clone();
        let attachment_count = CUBE_FACES + u32::from(lut.is_some());

        let render_pass = Arc::new(RenderPass::with_color_attachments(
            device.clone(),
            CUBE_FORMAT,
            attachment_count,
        )?);

        let lut_view = lut
            .map(|image| flat_view(device.clone(), image.handle, CUBE_FORMAT))
            .transpose()?;

        let output_mips = target.description.mip_levels;
        let mut face_views = Vec::new();
        let mut framebuffers = Vec::new();
        for level in 0..output_mips {
            let mut attachments = Vec::new();
            for face in 0..CUBE_FACES {
                let view = face_view(device.clone(), target.handle, CUBE_FORMAT, level, face)?;
                attachments.push(view.handle);
                face_views.push(view);
            }
            if let Some(view) = &lut_view {
                attachments.push(view.handle);
            }
            let extent = target.description.mip_extent(level);
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            framebuffers.push(Framebuffer::new(device.clone(), create_info)?);
        }

        let cubemap_view = cube_view(
            device.clone(),
            source_cube.handle,
            CUBE_FORMAT,
            source_cube.description.mip_levels,
        )?;
        let sampler = Sampler::filter_sampler(device.clone(), input_mips as f32)?;

        let descriptor_set_layout = Arc::new(sampled_image_descriptor_set_layout(device.clone())?);
        let descriptor_pool = sampled_image_descriptor_pool(device.clone())?;
        let descriptor_set =
            descriptor_pool.allocate_descriptor_sets(descriptor_set_layout.handle, 1)?[0];
        update_sampled_image_descriptor(
            &device.handle,
            descriptor_set,
            cubemap_view.handle,
            sampler.handle,
        );

        let fragment_shader = Arc::new(Shader::from_file(
            shader_path(FILTER_FRAGMENT_SHADER),
            device.clone(),
        )?);
        let shader_set = ShaderSet {
            vertex: vertex_shader,
            fragment: fragment_shader,
        };
        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .size(std::mem::size_of::<FilterPushConstants>() as u32)
            .build();
        let settings = GraphicsPipelineSettingsBuilder::default()
            .render_pass(render_pass.clone())
            .descriptor_set_layout(descriptor_set_layout.clone())
            .shader_set(shader_set)
            .color_attachment_count(attachment_count)
            .push_constant_range(push_constant_range)
            .build()?;
        let (pipeline, pipeline_layout) = settings.create_pipeline(device.clone())?;

        if let Ok(debug) = context.debug() {
            debug.name_image_view("filter_source_cubemap_view", cubemap_view.handle.as_raw())?;
        }

        Ok(Self {
            render_pass,
            framebuffers,
            _face_views: face_views,
            _lut_view: lut_view,
            _cubemap_view: cubemap_view,
            _sampler: sampler,
            _descriptor_pool: descriptor_pool,
            _descriptor_set_layout: descriptor_set_layout,
            descriptor_set,
            pipeline,
            pipeline_layout,
            target: target.handle,
            lut: lut.map(|image| image.handle),
            device,
        })
    }

    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        device: &Device,
        info: FilterRecordInfo,
    ) -> Result<()> {
        if let Some(lut) = self.lut {
            let to_color_attachment = ImageLayoutTransitionBuilder::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .build()?;
            transition_image(&device.handle, command_buffer, lut, &to_color_attachment);
        }

        let attachment_count = CUBE_FACES as usize + usize::from(self.lut.is_some());
        let clear_values = vec![vk::ClearValue::default(); attachment_count];

        // Coarse to fine, so the final pass is the full-resolution one.
        for level in (0..info.output_mips).rev() {
            let extent = vk::Extent2D {
                width: (info.resolution >> level).max(1),
                height: (info.resolution >> level).max(1),
            };

            let to_color_attachment = ImageLayoutTransitionBuilder::default()
                .base_mip_level(level)
                .level_count(1)
                .layer_count(CUBE_FACES)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .src_stage_mask(vk::PipelineStageFlags::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .build()?;
            transition_image(&device.handle, command_buffer, self.target, &to_color_attachment);

            let roughness = if info.output_mips > 1 {
                level as f32 / (info.output_mips - 1) as f32
            } else {
                0.0
            };
            let push_constants = FilterPushConstants {
                roughness,
                sample_count: info.sample_count,
                mip_level: level,
                width: info.resolution,
                lod_bias: info.lod_bias,
                distribution: info.distribution.shader_index(),
            };

            let begin_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.handle)
                .framebuffer(self.framebuffers[level as usize].handle)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                })
                .clear_values(&clear_values);

            self.render_pass.record(command_buffer, begin_info, |command_buffer| {
                device.update_viewport(command_buffer, extent);
                self.pipeline.bind(&device.handle, command_buffer);
                unsafe {
                    device.handle.cmd_push_constants(
                        command_buffer,
                        self.pipeline_layout.handle,
                        vk::ShaderStageFlags::FRAGMENT,
                        0,
                        bytemuck::bytes_of(&push_constants),
                    );
                    device.handle.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.pipeline_layout.handle,
                        0,
                        &[self.descriptor_set],
                        &[],
                    );
                    device.handle.cmd_draw(command_buffer, 3, 1, 0, 0);
                }
                Ok(())
            })?;
        }

        Ok(())
    }
}

/// Copies every level and face through a transient readback buffer,
/// converting on the CPU where the target format demands it, and writes
/// the payload into the container. Each staging buffer is dropped as
/// soon as its face has been copied out.
fn download_cubemap(
    context: &Context,
    pool: &CommandPool,
    image: &AllocatedImage,
    target_format: TargetFormat,
    output_mips: u32,
    container: &mut KtxImage,
) -> Result<()> {
    let device = context.device.clone();
    let readback_format = image.description.format;
    let texel_bytes = texel_size(readback_format);

    for level in 0..output_mips {
        let extent = image.description.mip_extent(level);
        let face_bytes = u64::from(extent.width) * u64::from(extent.height) * u64::from(texel_bytes);
        for face in 0..CUBE_FACES {
            let buffer = GpuToCpuBuffer::readback_buffer(
                device.clone(),
                context.allocator.clone(),
                face_bytes,
            )?;

            let subresource = vk::ImageSubresourceLayers::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(level)
                .base_array_layer(face)
                .layer_count(1)
                .build();
            let region = vk::BufferImageCopy::builder()
                .image_subresource(subresource)
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();
            let copy = ImageToBufferCopyBuilder::default()
                .source(image.handle)
                .destination(buffer.handle())
                .regions(vec![region])
                .build()?;
            pool.execute_once(|command_buffer| {
                copy.record(&device.handle, command_buffer);
                Ok(())
            })?;

            let bytes = buffer.read_data(face_bytes as usize)?;
            let converted =
                codec::convert_image(target_format.vk_format(), readback_format, &bytes)?;
            container.write_face(&converted, face, level);
        }
    }

    Ok(())
}

/// Reads the RGBA32F lookup table back, truncates it to three channels,
/// and writes an 8-bit PNG.
fn download_lut(
    context: &Context,
    pool: &CommandPool,
    image: &AllocatedImage,
    path: &Path,
) -> Result<()> {
    let device = context.device.clone();
    let width = image.description.width;
    let height = image.description.height;
    let byte_length = u64::from(width) * u64::from(height) * 16;

    let buffer =
        GpuToCpuBuffer::readback_buffer(device.clone(), context.allocator.clone(), byte_length)?;

    let to_transfer_src = ImageLayoutTransitionBuilder::default()
        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
        .build()?;

    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .layer_count(1)
        .build();
    let region = vk::BufferImageCopy::builder()
        .image_subresource(subresource)
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .build();
    let copy = ImageToBufferCopyBuilder::default()
        .source(image.handle)
        .destination(buffer.handle())
        .regions(vec![region])
        .build()?;

    pool.execute_once(|command_buffer| {
        transition_image(&device.handle, command_buffer, image.handle, &to_transfer_src);
        copy.record(&device.handle, command_buffer);
        Ok(())
    })?;

    let bytes = buffer.read_data(byte_length as usize)?;
    let texels: &[f32] = bytemuck::cast_slice(&bytes);
    write_lut_png(path, width, height, texels)
}

fn write_lut_png(path: &Path, width: u32, height: u32, rgba_texels: &[f32]) -> Result<()> {
    // Alpha carries nothing; the PNG keeps exactly three channels.
    let rgb: Vec<u8> = rgba_texels
        .chunks_exact(4)
        .flat_map(|texel| {
            [
                (texel[0].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
                (texel[1].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
                (texel[2].clamp(0.0, 1.0) * 255.0 + 0.5) as u8,
            ]
        })
        .collect();
    assert_eq!(
        rgb.len(),
        width as usize * height as usize * 3,
        "lookup table payload must be three channels"
    );
    let lut = image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::internal("lookup table dimensions do not match its payload"))?;
    lut.save(path)?;
    info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> FilterRequestBuilder {
        let mut builder = FilterRequestBuilder::default();
        builder
            .input("input.hdr")
            .output_cubemap("output.ktx2");
        builder
    }

    #[test]
    fn builder_applies_documented_defaults() {
        let request = base_request().build().unwrap();
        assert_eq!(request.distribution, Distribution::Ggx);
        assert_eq!(request.resolution, 0);
        assert_eq!(request.mip_count, 0);
        assert_eq!(request.sample_count, 1024);
        assert_eq!(request.target_format, TargetFormat::Rgba16Float);
        assert_eq!(request.lod_bias, 0.0);
        assert!(request.output_lut.is_none());
        assert!(!request.debug);
    }

    #[test]
    fn builder_requires_paths() {
        assert!(FilterRequestBuilder::default().build().is_err());
    }

    #[test]
    fn missing_input_maps_to_input_not_found() {
        let request = base_request()
            .input("does-not-exist.hdr")
            .build()
            .unwrap();
        assert!(matches!(
            filter_environment(&request),
            Err(Error::InputNotFound(_))
        ));
    }

    fn panorama(width: u32, height: u32) -> SourceImage {
        SourceImage {
            width,
            height,
            is_cubemap: false,
            pixels: Vec::new(),
        }
    }

    fn cubemap(side: u32) -> SourceImage {
        SourceImage {
            width: side,
            height: side,
            is_cubemap: true,
            pixels: Vec::new(),
        }
    }

    #[test]
    fn resolution_derives_from_panorama_height() {
        let request = base_request().build().unwrap();
        let derived = derive_settings(&request, &panorama(2048, 1024)).unwrap();
        assert_eq!(derived.resolution, 512);
        assert_eq!(derived.output_mips, 9);
        assert_eq!(derived.input_mips, 9);
    }

    #[test]
    fn resolution_derives_from_cubemap_face_size() {
        let request = base_request().build().unwrap();
        let derived = derive_settings(&request, &cubemap(256)).unwrap();
        assert_eq!(derived.resolution, 256);
        assert_eq!(derived.output_mips, 8);
    }

    #[test]
    fn lambertian_clamps_output_but_not_input_levels() {
        let request = base_request()
            .distribution(Distribution::Lambertian)
            .build()
            .unwrap();
        let derived = derive_settings(&request, &panorama(512, 256)).unwrap();
        assert_eq!(derived.output_mips, 1);
        assert_eq!(derived.input_mips, 7);
    }

    #[test]
    fn tiny_resolution_still_gets_one_level() {
        let request = base_request().build().unwrap();
        let derived = derive_settings(&request, &panorama(2, 2)).unwrap();
        assert_eq!(derived.resolution, 1);
        assert_eq!(derived.output_mips, 1);
    }

    #[test]
    fn impossible_mip_count_is_rejected() {
        let request = base_request().mip_count(8_u32).build().unwrap();
        assert!(matches!(
            derive_settings(&request, &panorama(8, 4)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_sample_count_is_rejected() {
        let request = base_request().sample_count(0_u32).build().unwrap();
        assert!(matches!(
            derive_settings(&request, &panorama(64, 32)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn lut_with_distribution_none_is_rejected() {
        let request = base_request()
            .output_lut(Some("lut.png".into()))
            .distribution(Distribution::None)
            .build()
            .unwrap();
        assert!(matches!(
            derive_settings(&request, &panorama(64, 32)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn cubemap_resolution_override_must_match_face_size() {
        let request = base_request().resolution(128_u32).build().unwrap();
        assert!(matches!(
            derive_settings(&request, &cubemap(256)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn push_constants_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<FilterPushConstants>(), 24);
    }

    #[test]
    fn lut_png_truncates_to_three_channels() {
        let path = std::env::temp_dir().join("envbake-lut-write.png");
        let texels = vec![0.5_f32; 2 * 2 * 4];
        write_lut_png(&path, 2, 2, &texels).unwrap();
        let written = image::open(&path).unwrap();
        assert_eq!(written.color(), image::ColorType::Rgb8);
        std::fs::remove_file(&path).ok();
    }
}
