pub use self::{debug::*, device::*, physical_device::*};

mod debug;
mod device;
mod physical_device;

use crate::error::{Error, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::{
    ffi::CStr,
    os::raw::c_char,
    sync::{Arc, RwLock},
};

// The order the struct members are declared in
// determines the order they are 'Drop'ped in
// when this struct is dropped
pub struct Context {
    pub debug: Option<VulkanDebug>,
    pub allocator: Arc<RwLock<Allocator>>,
    pub device: Arc<Device>,
    pub physical_device: PhysicalDevice,
    pub instance: Instance,
    pub entry: ash::Entry,
}

impl Context {
    /// Creates a headless context: no surface or swapchain, just the
    /// first physical device with a graphics queue. The debug flag
    /// turns on the validation layer and a debug-utils messenger.
    pub fn new(debug_requested: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;
        let instance_extensions = Self::instance_extensions(debug_requested);
        let layers = Self::layers(debug_requested)?;
        let instance = Instance::new(&entry, &instance_extensions, &layers)?;
        let physical_device = PhysicalDevice::new(&instance.handle)?;

        let queue_priorities = [1.0_f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device.graphics_queue_family_index)
            .queue_priorities(&queue_priorities)
            .build();
        let queue_create_infos = [queue_create_info];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_layer_names(&layers);
        let device = Arc::new(Device::new(
            &instance.handle,
            physical_device.handle,
            create_info,
        )?);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle.clone(),
            device: device.handle.clone(),
            physical_device: physical_device.handle,
            debug_settings: Default::default(),
            buffer_device_address: false,
        })?;
        let allocator = Arc::new(RwLock::new(allocator));

        let debug = if debug_requested {
            Some(VulkanDebug::new(&entry, &instance.handle, device.clone())?)
        } else {
            None
        };

        Ok(Self {
            debug,
            allocator,
            device,
            physical_device,
            instance,
            entry,
        })
    }

    fn instance_extensions(debug_requested: bool) -> Vec<*const c_char> {
        let mut extensions = Vec::new();
        if debug_requested {
            extensions.push(VulkanDebug::extension_name().as_ptr());
        }
        extensions
    }

    fn layers(debug_requested: bool) -> Result<Vec<*const c_char>> {
        let mut layers = Vec::new();
        if debug_requested {
            layers.push(VulkanDebug::layer_name()?.as_ptr());
        }
        Ok(layers)
    }

    pub fn debug(&self) -> Result<&VulkanDebug> {
        self.debug
            .as_ref()
            .ok_or_else(|| Error::internal("context was constructed without debug utilities"))
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        let index = self.physical_device.graphics_queue_family_index;
        unsafe { self.device.handle.get_device_queue(index, 0) }
    }

    pub fn physical_device_format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .handle
                .get_physical_device_format_properties(self.physical_device.handle, format)
        }
    }

    pub fn ensure_linear_blitting_supported(&self, format: vk::Format) -> Result<()> {
        let properties = self.physical_device_format_properties(format);
        let supported = properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        if !supported {
            return Err(Error::Gpu(vk::Result::ERROR_FORMAT_NOT_SUPPORTED));
        }
        Ok(())
    }

    pub fn ensure_color_attachment_supported(&self, format: vk::Format) -> Result<()> {
        let properties = self.physical_device_format_properties(format);
        let supported = properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT);
        if !supported {
            return Err(Error::Gpu(vk::Result::ERROR_FORMAT_NOT_SUPPORTED));
        }
        Ok(())
    }
}

pub struct Instance {
    pub handle: ash::Instance,
}

impl Instance {
    pub fn new(
        entry: &ash::Entry,
        extensions: &[*const c_char],
        layers: &[*const c_char],
    ) -> Result<Self> {
        let application_name = CStr::from_bytes_with_nul(b"envbake\0")?;
        let application_info = vk::ApplicationInfo::builder()
            .application_name(application_name)
            .api_version(vk::make_api_version(0, 1, 1, 0));
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_extension_names(extensions)
            .enabled_layer_names(layers);
        let handle = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(Self { handle })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.handle.destroy_instance(None);
        }
    }
}
