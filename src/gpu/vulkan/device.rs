//! Vulkan implementation of the device traits.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::dispatch::{QueueFamily, WorkTypeFlags};
use crate::gpu::traits::{GpuDevice, GpuError};

/// [`GpuDevice`] over a logical Vulkan device.
///
/// The `ash::Device` must outlive every queue, pool, and primitive handed
/// out here; holding it in an `Arc` shared with the rest of the renderer is
/// the expected arrangement.
pub struct VulkanDevice {
    device: Arc<ash::Device>,
}

impl VulkanDevice {
    /// Wrap a logical device.
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self { device }
    }

    /// The underlying `ash` device, for submission code.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

fn map_wait_error(result: vk::Result) -> GpuError {
    match result {
        vk::Result::TIMEOUT => GpuError::Timeout,
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        other => GpuError::Backend(format!("{:?}", other)),
    }
}

impl GpuDevice for VulkanDevice {
    type Queue = vk::Queue;
    type RawSemaphore = vk::Semaphore;
    type RawFence = vk::Fence;
    type CommandPool = vk::CommandPool;
    type CommandList = vk::CommandBuffer;

    fn queue(&self, family_index: u32, queue_index: u32) -> Result<vk::Queue, GpuError> {
        let queue = unsafe { self.device.get_device_queue(family_index, queue_index) };
        if queue == vk::Queue::null() {
            return Err(GpuError::QueueRetrieval);
        }
        Ok(queue)
    }

    fn create_command_pool(&self, family_index: u32) -> Result<vk::CommandPool, GpuError> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family_index);

        unsafe { self.device.create_command_pool(&info, None) }
            .map_err(|_| GpuError::CommandPoolCreation)
    }

    fn allocate_command_list(&self, pool: &vk::CommandPool) -> Result<vk::CommandBuffer, GpuError> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|_| GpuError::CommandListAllocation)?;
        Ok(buffers[0])
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&info, None) }
            .map_err(|_| GpuError::PrimitiveCreation)
    }

    fn create_fence(&self) -> Result<vk::Fence, GpuError> {
        let info = vk::FenceCreateInfo::builder();
        unsafe { self.device.create_fence(&info, None) }.map_err(|_| GpuError::PrimitiveCreation)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: Option<Duration>) -> Result<(), GpuError> {
        let timeout_ns = timeout.map_or(u64::MAX, |bound| {
            bound.as_nanos().min(u64::MAX as u128) as u64
        });

        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }.map_err(map_wait_error)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|result| GpuError::Backend(format!("{:?}", result)))
    }
}

/// Translate the device's queue family properties into [`QueueFamily`]
/// descriptors, in family order.
///
/// Presentation support is probed per family when a surface is given.
/// Families with no relevant capabilities are dropped, so the dispatcher's
/// routing priority is simply the device's family order.
pub fn enumerate_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::extensions::khr::Surface, vk::SurfaceKHR)>,
) -> Result<Vec<QueueFamily>, GpuError> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut families = Vec::with_capacity(properties.len());
    for (index, family) in properties.iter().enumerate() {
        let mut flags = WorkTypeFlags::NONE;
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            flags |= WorkTypeFlags::GRAPHICS;
        }
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            flags |= WorkTypeFlags::TRANSFER;
        }
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            flags |= WorkTypeFlags::COMPUTE;
        }

        if let Some((loader, surface_handle)) = surface {
            let presentable = unsafe {
                loader.get_physical_device_surface_support(
                    physical_device,
                    index as u32,
                    surface_handle,
                )
            }
            .map_err(|result| GpuError::Backend(format!("{:?}", result)))?;
            if presentable {
                flags |= WorkTypeFlags::PRESENTATION;
            }
        }

        if !flags.is_empty() {
            families.push(QueueFamily {
                index: index as u32,
                queue_count: family.queue_count,
                flags,
            });
        }
    }

    Ok(families)
}
