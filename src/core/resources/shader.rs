use crate::core::Device;
use crate::error::Result;
use ash::vk;
use std::{
    ffi::CStr,
    path::{Path, PathBuf},
    sync::Arc,
};

pub struct Shader {
    pub module: vk::ShaderModule,
    device: Arc<Device>,
}

impl Shader {
    pub fn new(device: Arc<Device>, create_info: vk::ShaderModuleCreateInfoBuilder) -> Result<Self> {
        let module = unsafe { device.handle.create_shader_module(&create_info, None)? };
        Ok(Self { module, device })
    }

    pub fn from_file<P>(path: P, device: Arc<Device>) -> Result<Self>
    where
        P: AsRef<Path> + Into<PathBuf>,
    {
        let mut shader_file = std::fs::File::open(path)?;
        let shader_source = ash::util::read_spv(&mut shader_file)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&shader_source);
        Self::new(device, create_info)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle.destroy_shader_module(self.module, None);
        }
    }
}

/// The vertex/fragment pair every pipeline here uses.
#[derive(Clone)]
pub struct ShaderSet {
    pub vertex: Arc<Shader>,
    pub fragment: Arc<Shader>,
}

impl ShaderSet {
    pub fn entry_point_name() -> Result<&'static CStr> {
        Ok(CStr::from_bytes_with_nul(b"main\0")?)
    }

    pub fn stages(&self) -> Result<Vec<vk::PipelineShaderStageCreateInfo>> {
        let vertex_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(self.vertex.module)
            .name(Self::entry_point_name()?)
            .build();
        let fragment_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(self.fragment.module)
            .name(Self::entry_point_name()?)
            .build();
        Ok(vec![vertex_stage, fragment_stage])
    }
}
