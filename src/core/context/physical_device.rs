use crate::error::{Error, Result};
use ash::vk;
use log::info;
use std::ffi::CStr;

pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub graphics_queue_family_index: u32,
}

impl PhysicalDevice {
    /// Picks the first enumerated device with a graphics-capable queue
    /// family. Offscreen work has no presentation requirements, so no
    /// surface support is checked.
    pub fn new(instance: &ash::Instance) -> Result<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        for device in devices {
            if let Some(physical_device) = Self::check_device_viability(device, instance) {
                return Ok(physical_device);
            }
        }
        Err(Error::Gpu(vk::Result::ERROR_INITIALIZATION_FAILED))
    }

    fn check_device_viability(
        device: vk::PhysicalDevice,
        instance: &ash::Instance,
    ) -> Option<Self> {
        let device_name = Self::device_name(instance, device);
        let graphics_queue_family_index = Self::find_graphics_queue_family_index(instance, device)?;

        info!("Selected physical device: {:?}", device_name);
        Some(Self {
            handle: device,
            graphics_queue_family_index,
        })
    }

    fn device_name(instance: &ash::Instance, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        info!(
            "Physical device available: {:?} - {:?}",
            device_name, properties.device_type
        );
        device_name
    }

    fn find_graphics_queue_family_index(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
    ) -> Option<u32> {
        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        queue_family_properties
            .iter()
            .enumerate()
            .filter(|(_, family)| family.queue_count > 0)
            .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(index, _)| index as u32)
    }
}
