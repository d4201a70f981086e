use crate::core::Device;
use crate::error::{Error, Result};
use ash::vk;
use derive_builder::Builder;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use std::sync::{Arc, RwLock};

/// Shape of a device image. Kept on the allocated image so passes can
/// derive extents, formats, and mip counts from the resource itself.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into), build_fn(error = "crate::error::Error"))]
pub struct ImageDescription {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    #[builder(default = "1")]
    pub mip_levels: u32,
    #[builder(default = "1")]
    pub layers: u32,
    pub usage: vk::ImageUsageFlags,
    #[builder(default)]
    pub flags: vk::ImageCreateFlags,
}

impl ImageDescription {
    pub fn cubemap(side: u32, format: vk::Format, mip_levels: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            width: side,
            height: side,
            mip_levels,
            layers: 6,
            usage,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
        }
    }

    pub fn texture_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            width,
            height,
            mip_levels: 1,
            layers: 1,
            usage,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    pub fn mip_extent(&self, mip_level: u32) -> vk::Extent2D {
        vk::Extent2D {
            width: (self.width >> mip_level).max(1),
            height: (self.height >> mip_level).max(1),
        }
    }

    fn create_info(&self) -> vk::ImageCreateInfoBuilder {
        let extent = vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        };
        vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.layers)
            .format(self.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1)
            .flags(self.flags)
    }
}

pub struct AllocatedImage {
    pub handle: vk::Image,
    pub description: ImageDescription,
    allocation: Option<Allocation>,
    allocator: Arc<RwLock<Allocator>>,
    device: Arc<Device>,
}

impl AllocatedImage {
    pub fn new(
        device: Arc<Device>,
        allocator: Arc<RwLock<Allocator>>,
        description: ImageDescription,
    ) -> Result<Self> {
        let create_info = description.create_info();
        let handle = unsafe { device.handle.create_image(&create_info, None) }?;
        let requirements = unsafe { device.handle.get_image_memory_requirements(handle) };
        let allocation = {
            let mut allocator = allocator
                .write()
                .map_err(|_| Error::internal("allocator lock poisoned"))?;
            allocator.allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };
        unsafe {
            device
                .handle
                .bind_image_memory(handle, allocation.memory(), allocation.offset())?
        };
        Ok(Self {
            handle,
            description,
            allocation: Some(allocation),
            allocator,
            device,
        })
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.allocator.write() {
                if let Err(error) = allocator.free(allocation) {
                    log::error!("failed to free image allocation: {}", error);
                }
            }
        }
        unsafe { self.device.handle.destroy_image(self.handle, None) };
    }
}

pub struct ImageView {
    pub handle: vk::ImageView,
    device: Arc<Device>,
}

impl ImageView {
    pub fn new(device: Arc<Device>, create_info: vk::ImageViewCreateInfoBuilder) -> Result<Self> {
        let handle = unsafe { device.handle.create_image_view(&create_info, None) }?;
        Ok(Self { handle, device })
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_image_view(self.handle, None);
        }
    }
}

/// View over all six faces and `level_count` mip levels of a cube image.
pub fn cube_view(
    device: Arc<Device>,
    image: vk::Image,
    format: vk::Format,
    level_count: u32,
) -> Result<ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .level_count(level_count)
        .layer_count(6)
        .build();
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::CUBE)
        .format(format)
        .subresource_range(subresource_range);
    ImageView::new(device, create_info)
}

/// 2D view over a single mip level of a single array layer, used as a
/// framebuffer attachment.
pub fn face_view(
    device: Arc<Device>,
    image: vk::Image,
    format: vk::Format,
    mip_level: u32,
    layer: u32,
) -> Result<ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(mip_level)
        .level_count(1)
        .base_array_layer(layer)
        .layer_count(1)
        .build();
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(subresource_range);
    ImageView::new(device, create_info)
}

pub fn flat_view(device: Arc<Device>, image: vk::Image, format: vk::Format) -> Result<ImageView> {
    face_view(device, image, format, 0, 0)
}

pub struct Sampler {
    pub handle: vk::Sampler,
    device: Arc<Device>,
}

impl Sampler {
    pub fn new(device: Arc<Device>, create_info: vk::SamplerCreateInfoBuilder) -> Result<Self> {
        let handle = unsafe { device.handle.create_sampler(&create_info, None) }?;
        Ok(Self { handle, device })
    }

    /// Linear clamp-to-edge sampler covering `max_lod` mip levels.
    pub fn filter_sampler(device: Arc<Device>, max_lod: f32) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(max_lod);
        Self::new(device, sampler_info)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle.destroy_sampler(self.handle, None) };
    }
}

/// One explicit layout transition over a contiguous level/layer range.
#[derive(Builder)]
#[builder(build_fn(error = "crate::error::Error"))]
pub struct ImageLayoutTransition {
    #[builder(default)]
    pub base_mip_level: u32,
    #[builder(default = "1")]
    pub level_count: u32,
    #[builder(default = "1")]
    pub layer_count: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
}

/// Records the barrier for `info` into an open command buffer.
pub fn transition_image(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    info: &ImageLayoutTransition,
) {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(info.base_mip_level)
        .level_count(info.level_count)
        .layer_count(info.layer_count)
        .build();
    let image_barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(info.old_layout)
        .new_layout(info.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .src_access_mask(info.src_access_mask)
        .dst_access_mask(info.dst_access_mask)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            info.src_stage_mask,
            info.dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[image_barrier],
        );
    }
}
