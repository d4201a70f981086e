use crate::core::Device;
use crate::error::{Error, Result};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use std::sync::{Arc, RwLock};

pub struct Buffer {
    pub handle: vk::Buffer,
    allocation: Option<Allocation>,
    allocator: Arc<RwLock<Allocator>>,
    device: Arc<Device>,
}

impl Buffer {
    pub fn new(
        name: &str,
        device: Arc<Device>,
        allocator: Arc<RwLock<Allocator>>,
        create_info: vk::BufferCreateInfoBuilder,
        location: MemoryLocation,
    ) -> Result<Self> {
        let handle = unsafe { device.handle.create_buffer(&create_info, None) }?;
        let requirements = unsafe { device.handle.get_buffer_memory_requirements(handle) };
        let allocation = {
            let mut allocator = allocator
                .write()
                .map_err(|_| Error::internal("allocator lock poisoned"))?;
            allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true, // Buffers are always linear
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };
        unsafe {
            device
                .handle
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
        }
        Ok(Self {
            handle,
            allocation: Some(allocation),
            allocator,
            device,
        })
    }

    fn mapped_slice(&self) -> Result<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| Error::internal("buffer memory is not host visible"))
    }

    fn mapped_slice_mut(&mut self) -> Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| Error::internal("buffer memory is not host visible"))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.allocator.write() {
                if let Err(error) = allocator.free(allocation) {
                    log::error!("failed to free buffer allocation: {}", error);
                }
            }
        }
        unsafe {
            self.device.handle.destroy_buffer(self.handle, None);
        }
    }
}

/// Host-visible staging buffer for uploads to the device.
pub struct CpuToGpuBuffer {
    buffer: Buffer,
}

impl CpuToGpuBuffer {
    pub fn staging_buffer(
        device: Arc<Device>,
        allocator: Arc<RwLock<Allocator>>,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = Buffer::new(
            "staging buffer",
            device,
            allocator,
            create_info,
            MemoryLocation::CpuToGpu,
        )?;
        Ok(Self { buffer })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle
    }

    pub fn upload_data<T: bytemuck::Pod>(&mut self, data: &[T], offset: usize) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self.buffer.mapped_slice_mut()?;
        mapped[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Host-visible readback buffer for downloads from the device.
pub struct GpuToCpuBuffer {
    buffer: Buffer,
}

impl GpuToCpuBuffer {
    pub fn readback_buffer(
        device: Arc<Device>,
        allocator: Arc<RwLock<Allocator>>,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = Buffer::new(
            "readback buffer",
            device,
            allocator,
            create_info,
            MemoryLocation::GpuToCpu,
        )?;
        Ok(Self { buffer })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle
    }

    pub fn read_data(&self, length: usize) -> Result<Vec<u8>> {
        let mapped = self.buffer.mapped_slice()?;
        Ok(mapped[..length].to_vec())
    }
}
