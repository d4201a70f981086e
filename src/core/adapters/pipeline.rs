use crate::core::{DescriptorSetLayout, Device, RenderPass, ShaderSet};
use crate::error::Result;
use ash::vk;
use derive_builder::Builder;
use std::sync::Arc;

pub struct Pipeline {
    pub handle: vk::Pipeline,
    device: Arc<Device>,
}

impl Pipeline {
    pub fn new_graphics(
        device: Arc<Device>,
        create_info: vk::GraphicsPipelineCreateInfoBuilder,
    ) -> Result<Self> {
        let handle = unsafe {
            let result = device.handle.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[create_info.build()],
                None,
            );
            match result {
                Ok(pipelines) => Ok(pipelines[0]),
                Err((_, error_code)) => Err(error_code),
            }
        }?;
        Ok(Self { handle, device })
    }

    pub fn bind(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.handle);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_pipeline(self.handle, None);
        }
    }
}

pub struct PipelineLayout {
    pub handle: vk::PipelineLayout,
    device: Arc<Device>,
}

impl PipelineLayout {
    pub fn new(device: Arc<Device>, create_info: vk::PipelineLayoutCreateInfo) -> Result<Self> {
        let handle = unsafe { device.handle.create_pipeline_layout(&create_info, None) }?;
        Ok(Self { handle, device })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle
                .destroy_pipeline_layout(self.handle, None);
        }
    }
}

/// Settings for the fullscreen-triangle pipelines used by every pass in
/// this crate: no vertex input, dynamic viewport and scissor, a
/// configurable number of color attachments, and an optional
/// push-constant range.
#[derive(Builder)]
#[builder(setter(into), build_fn(error = "crate::error::Error"))]
pub struct GraphicsPipelineSettings {
    pub render_pass: Arc<RenderPass>,
    pub descriptor_set_layout: Arc<DescriptorSetLayout>,
    pub shader_set: ShaderSet,

    #[builder(default = "1")]
    pub color_attachment_count: u32,

    #[builder(default)]
    pub push_constant_range: Option<vk::PushConstantRange>,

    #[builder(default = "vk::CullModeFlags::NONE")]
    pub cull_mode: vk::CullModeFlags,

    #[builder(default = "vk::FrontFace::COUNTER_CLOCKWISE")]
    pub front_face: vk::FrontFace,

    #[builder(default = "vk::PrimitiveTopology::TRIANGLE_LIST")]
    pub topology: vk::PrimitiveTopology,

    #[builder(default = "vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]")]
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl GraphicsPipelineSettings {
    pub fn create_pipeline(&self, device: Arc<Device>) -> Result<(Pipeline, PipelineLayout)> {
        let stages = self.shader_set.stages()?;
        let vertex_state_info = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly_create_info = self.input_assembly_create_info();
        let rasterizer_create_info = self.rasterizer_create_info();
        let multisampling_create_info = Self::multisampling_create_info();
        let depth_stencil_info = Self::depth_stencil_info();
        let blend_attachments =
            vec![Self::blend_attachment_opaque(); self.color_attachment_count as usize];
        let color_blend_state = Self::color_blend_state(&blend_attachments);
        let pipeline_layout = self.create_pipeline_layout(device.clone())?;
        let viewport_create_info = Self::viewport_create_info();
        let dynamic_state = self.dynamic_state();
        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_state_info)
            .input_assembly_state(&input_assembly_create_info)
            .rasterization_state(&rasterizer_create_info)
            .multisample_state(&multisampling_create_info)
            .depth_stencil_state(&depth_stencil_info)
            .color_blend_state(&color_blend_state)
            .viewport_state(&viewport_create_info)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout.handle)
            .render_pass(self.render_pass.handle)
            .subpass(0);
        let pipeline = Pipeline::new_graphics(device, pipeline_create_info)?;
        Ok((pipeline, pipeline_layout))
    }

    fn input_assembly_create_info<'a>(&self) -> vk::PipelineInputAssemblyStateCreateInfoBuilder<'a> {
        vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false)
    }

    fn rasterizer_create_info(&self) -> vk::PipelineRasterizationStateCreateInfoBuilder {
        vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
    }

    fn multisampling_create_info<'a>() -> vk::PipelineMultisampleStateCreateInfoBuilder<'a> {
        vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
    }

    fn depth_stencil_info<'a>() -> vk::PipelineDepthStencilStateCreateInfoBuilder<'a> {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false)
    }

    fn blend_attachment_opaque() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    }

    fn color_blend_state(
        attachments: &[vk::PipelineColorBlendAttachmentState],
    ) -> vk::PipelineColorBlendStateCreateInfoBuilder {
        vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0])
    }

    fn create_pipeline_layout(&self, device: Arc<Device>) -> Result<PipelineLayout> {
        let descriptor_set_layouts = [self.descriptor_set_layout.handle];

        if let Some(push_constant_range) = self.push_constant_range.as_ref() {
            let push_constant_ranges = [*push_constant_range];
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .push_constant_ranges(&push_constant_ranges)
                .set_layouts(&descriptor_set_layouts);
            PipelineLayout::new(device, *create_info)
        } else {
            let create_info =
                vk::PipelineLayoutCreateInfo::builder().set_layouts(&descriptor_set_layouts);
            PipelineLayout::new(device, *create_info)
        }
    }

    fn viewport_create_info<'a>() -> vk::PipelineViewportStateCreateInfoBuilder<'a> {
        vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
    }

    fn dynamic_state(&self) -> vk::PipelineDynamicStateCreateInfoBuilder {
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&self.dynamic_states)
    }
}
