use crate::core::Device;
use crate::error::Result;
use ash::vk;
use std::sync::Arc;

pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<Device>,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, create_info: &vk::RenderPassCreateInfo) -> Result<Self> {
        let handle = unsafe { device.handle.create_render_pass(create_info, None) }?;
        Ok(Self { handle, device })
    }

    /// Single-subpass pass with `count` color attachments of the same
    /// format. Attachments are cleared on load and kept in
    /// COLOR_ATTACHMENT_OPTIMAL; callers transition images in and out
    /// with explicit barriers.
    pub fn with_color_attachments(
        device: Arc<Device>,
        format: vk::Format,
        count: u32,
    ) -> Result<Self> {
        let attachment_description = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let attachments = vec![attachment_description; count as usize];

        let attachment_references = (0..count)
            .map(|index| {
                vk::AttachmentReference::builder()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build()
            })
            .collect::<Vec<_>>();

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&attachment_references)
            .build();
        let subpasses = [subpass];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);

        Self::new(device, &create_info)
    }

    pub fn record(
        &self,
        buffer: vk::CommandBuffer,
        begin_info: vk::RenderPassBeginInfoBuilder,
        mut action: impl FnMut(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        unsafe {
            self.device.handle.cmd_begin_render_pass(
                buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            )
        };

        action(buffer)?;

        unsafe {
            self.device.handle.cmd_end_render_pass(buffer);
        }

        Ok(())
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_render_pass(self.handle, None);
        }
    }
}

pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    device: Arc<Device>,
}

impl Framebuffer {
    pub fn new(device: Arc<Device>, create_info: vk::FramebufferCreateInfoBuilder) -> Result<Self> {
        let handle = unsafe { device.handle.create_framebuffer(&create_info, None) }?;
        Ok(Self { handle, device })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_framebuffer(self.handle, None);
        }
    }
}
