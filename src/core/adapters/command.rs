use crate::core::{Device, Fence};
use crate::error::Result;
use ash::vk;
use derive_builder::Builder;
use std::sync::Arc;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    queue: vk::Queue,
    device: Arc<Device>,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue: vk::Queue, queue_family_index: u32) -> Result<Self> {
        let create_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family_index);
        let handle = unsafe { device.handle.create_command_pool(&create_info, None)? };
        Ok(Self {
            handle,
            queue,
            device,
        })
    }

    pub fn allocate_command_buffers(
        &self,
        count: u32,
        level: vk::CommandBufferLevel,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(level)
            .command_buffer_count(count);
        let command_buffers =
            unsafe { self.device.handle.allocate_command_buffers(&allocate_info) }?;
        Ok(command_buffers)
    }

    /// Records a one-time-submit command buffer, submits it on the
    /// pool's queue, and blocks on a fence until the device is done.
    pub fn execute_once(
        &self,
        executor: impl FnMut(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let command_buffer = self.allocate_command_buffers(1, vk::CommandBufferLevel::PRIMARY)?[0];
        let command_buffers = [command_buffer];

        self.device.record_command_buffer(
            command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            executor,
        )?;

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();
        let submit_info_arr = [submit_info];

        let fence = Fence::new(self.device.clone(), vk::FenceCreateFlags::empty())?;

        let device = self.device.handle.clone();
        unsafe {
            device.queue_submit(self.queue, &submit_info_arr, fence.handle)?;
            device.wait_for_fences(
                &[fence.handle],
                true,
                std::time::Duration::from_secs(100).as_nanos() as _,
            )?;
            device.queue_wait_idle(self.queue)?;
            device.free_command_buffers(self.handle, &command_buffers);
        }

        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_command_pool(self.handle, None);
        }
    }
}

#[derive(Builder)]
#[builder(build_fn(error = "crate::error::Error"))]
pub struct BufferToImageCopy {
    pub source: vk::Buffer,
    pub destination: vk::Image,
    pub regions: Vec<vk::BufferImageCopy>,
    #[builder(default = "vk::ImageLayout::TRANSFER_DST_OPTIMAL")]
    pub dst_image_layout: vk::ImageLayout,
}

impl BufferToImageCopy {
    pub fn record(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                self.source,
                self.destination,
                self.dst_image_layout,
                &self.regions,
            );
        }
    }
}

#[derive(Builder)]
#[builder(build_fn(error = "crate::error::Error"))]
pub struct ImageToBufferCopy {
    pub source: vk::Image,
    pub destination: vk::Buffer,
    pub regions: Vec<vk::BufferImageCopy>,
    #[builder(default = "vk::ImageLayout::TRANSFER_SRC_OPTIMAL")]
    pub src_image_layout: vk::ImageLayout,
}

impl ImageToBufferCopy {
    pub fn record(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_copy_image_to_buffer(
                command_buffer,
                self.source,
                self.src_image_layout,
                self.destination,
                &self.regions,
            );
        }
    }
}

#[derive(Builder)]
#[builder(build_fn(error = "crate::error::Error"))]
pub struct BlitImage {
    pub src_image: vk::Image,
    pub src_image_layout: vk::ImageLayout,
    pub dst_image: vk::Image,
    pub dst_image_layout: vk::ImageLayout,
    pub regions: Vec<vk::ImageBlit>,
    pub filter: vk::Filter,
}

impl BlitImage {
    pub fn record(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_blit_image(
                command_buffer,
                self.src_image,
                self.src_image_layout,
                self.dst_image,
                self.dst_image_layout,
                &self.regions,
                self.filter,
            );
        }
    }
}
