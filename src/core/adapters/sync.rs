use crate::core::Device;
use crate::error::Result;
use ash::vk;
use std::sync::Arc;

pub struct Fence {
    pub handle: vk::Fence,
    device: Arc<Device>,
}

impl Fence {
    pub fn new(device: Arc<Device>, flags: vk::FenceCreateFlags) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = unsafe { device.handle.create_fence(&create_info, None) }?;
        Ok(Self { handle, device })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle.destroy_fence(self.handle, None) }
    }
}
