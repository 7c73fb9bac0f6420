// Driver seams
//
// The helpers only ever talk to Vulkan through these two traits. The
// real implementations forward straight to ash; tests swap in recording
// doubles so selection and submission logic runs without a GPU.

use ash::prelude::VkResult;
use ash::vk;

/// Physical-device queries used by device selection and format negotiation.
pub trait InstanceDriver {
    fn device_type(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceType;

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties;
}

impl InstanceDriver for ash::Instance {
    fn device_type(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceType {
        unsafe { self.get_physical_device_properties(physical_device) }.device_type
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.get_physical_device_queue_family_properties(physical_device) }
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe { self.get_physical_device_format_properties(physical_device, format) }
    }
}

/// Logical-device calls issued by shader construction and one-shot submission.
///
/// # Safety
/// Every method has the same contract as the ash call of the same name:
/// handles must belong to this device and be in a valid state.
pub trait DeviceDriver {
    unsafe fn create_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo,
    ) -> VkResult<vk::ShaderModule>;

    unsafe fn create_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo,
    ) -> VkResult<vk::CommandPool>;

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    unsafe fn allocate_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>>;

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()>;

    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()>;

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
}

impl DeviceDriver for ash::Device {
    unsafe fn create_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo,
    ) -> VkResult<vk::ShaderModule> {
        ash::Device::create_shader_module(self, create_info, None)
    }

    unsafe fn create_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo,
    ) -> VkResult<vk::CommandPool> {
        ash::Device::create_command_pool(self, create_info, None)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        ash::Device::destroy_command_pool(self, pool, None)
    }

    unsafe fn allocate_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        ash::Device::allocate_command_buffers(self, allocate_info)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        ash::Device::free_command_buffers(self, pool, buffers)
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        ash::Device::begin_command_buffer(self, buffer, begin_info)
    }

    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        ash::Device::end_command_buffer(self, buffer)
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        ash::Device::queue_submit(self, queue, submits, fence)
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        ash::Device::queue_wait_idle(self, queue)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};

    /// A fake physical device: type, queue families and per-format features.
    #[derive(Clone)]
    pub struct MockPhysicalDevice {
        pub device_type: vk::PhysicalDeviceType,
        pub queue_families: Vec<vk::QueueFamilyProperties>,
        pub depth_formats: Vec<vk::Format>,
    }

    impl MockPhysicalDevice {
        pub fn new(device_type: vk::PhysicalDeviceType, flags: &[vk::QueueFlags]) -> Self {
            Self {
                device_type,
                queue_families: flags
                    .iter()
                    .map(|&queue_flags| vk::QueueFamilyProperties {
                        queue_flags,
                        queue_count: 1,
                        ..Default::default()
                    })
                    .collect(),
                depth_formats: Vec::new(),
            }
        }

        pub fn graphics_compute(device_type: vk::PhysicalDeviceType) -> Self {
            Self::new(
                device_type,
                &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE],
            )
        }
    }

    /// Handles are 1-based indices into `devices`.
    #[derive(Default)]
    pub struct MockInstance {
        pub devices: Vec<MockPhysicalDevice>,
        pub format_queries: RefCell<Vec<vk::Format>>,
    }

    impl MockInstance {
        pub fn new(devices: Vec<MockPhysicalDevice>) -> Self {
            Self {
                devices,
                format_queries: RefCell::default(),
            }
        }

        pub fn handles(&self) -> Vec<vk::PhysicalDevice> {
            (1..=self.devices.len() as u64)
                .map(vk::PhysicalDevice::from_raw)
                .collect()
        }

        fn get(&self, physical_device: vk::PhysicalDevice) -> &MockPhysicalDevice {
            &self.devices[physical_device.as_raw() as usize - 1]
        }
    }

    impl InstanceDriver for MockInstance {
        fn device_type(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceType {
            self.get(physical_device).device_type
        }

        fn queue_family_properties(
            &self,
            physical_device: vk::PhysicalDevice,
        ) -> Vec<vk::QueueFamilyProperties> {
            self.get(physical_device).queue_families.clone()
        }

        fn format_properties(
            &self,
            physical_device: vk::PhysicalDevice,
            format: vk::Format,
        ) -> vk::FormatProperties {
            self.format_queries.borrow_mut().push(format);
            let optimal_tiling_features = if self.get(physical_device).depth_formats.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            };
            vk::FormatProperties {
                optimal_tiling_features,
                ..Default::default()
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        CreateShaderModule { code_size: usize },
        CreateCommandPool { family: u32, flags: vk::CommandPoolCreateFlags },
        DestroyCommandPool(vk::CommandPool),
        AllocateCommandBuffers { pool: vk::CommandPool, level: vk::CommandBufferLevel },
        FreeCommandBuffers(vk::CommandPool, vk::CommandBuffer),
        BeginCommandBuffer { buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags },
        EndCommandBuffer(vk::CommandBuffer),
        QueueSubmit { waits: u32, signals: u32, fence: vk::Fence },
        QueueWaitIdle(vk::Queue),
    }

    /// Records every call; individual entry points can be made to fail.
    #[derive(Default)]
    pub struct MockDevice {
        pub calls: RefCell<Vec<Call>>,
        pub fail_pool: Option<vk::Result>,
        pub fail_allocate: Option<vk::Result>,
        pub fail_begin: Option<vk::Result>,
        pub fail_end: Option<vk::Result>,
        pub fail_submit: Option<vk::Result>,
        pub fail_shader: Option<vk::Result>,
        pub next_handle: Cell<u64>,
    }

    impl MockDevice {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }

        fn handle(&self) -> u64 {
            let next = self.next_handle.get() + 1;
            self.next_handle.set(next);
            0x100 + next
        }
    }

    fn fail(result: Option<vk::Result>) -> VkResult<()> {
        result.map_or(Ok(()), Err)
    }

    impl DeviceDriver for MockDevice {
        unsafe fn create_shader_module(
            &self,
            create_info: &vk::ShaderModuleCreateInfo,
        ) -> VkResult<vk::ShaderModule> {
            self.record(Call::CreateShaderModule {
                code_size: create_info.code_size,
            });
            fail(self.fail_shader)?;
            Ok(vk::ShaderModule::from_raw(self.handle()))
        }

        unsafe fn create_command_pool(
            &self,
            create_info: &vk::CommandPoolCreateInfo,
        ) -> VkResult<vk::CommandPool> {
            self.record(Call::CreateCommandPool {
                family: create_info.queue_family_index,
                flags: create_info.flags,
            });
            fail(self.fail_pool)?;
            Ok(vk::CommandPool::from_raw(self.handle()))
        }

        unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
            self.record(Call::DestroyCommandPool(pool));
        }

        unsafe fn allocate_command_buffers(
            &self,
            allocate_info: &vk::CommandBufferAllocateInfo,
        ) -> VkResult<Vec<vk::CommandBuffer>> {
            self.record(Call::AllocateCommandBuffers {
                pool: allocate_info.command_pool,
                level: allocate_info.level,
            });
            fail(self.fail_allocate)?;
            Ok((0..allocate_info.command_buffer_count)
                .map(|_| vk::CommandBuffer::from_raw(self.handle()))
                .collect())
        }

        unsafe fn free_command_buffers(
            &self,
            pool: vk::CommandPool,
            buffers: &[vk::CommandBuffer],
        ) {
            for &buffer in buffers {
                self.record(Call::FreeCommandBuffers(pool, buffer));
            }
        }

        unsafe fn begin_command_buffer(
            &self,
            buffer: vk::CommandBuffer,
            begin_info: &vk::CommandBufferBeginInfo,
        ) -> VkResult<()> {
            self.record(Call::BeginCommandBuffer {
                buffer,
                flags: begin_info.flags,
            });
            fail(self.fail_begin)
        }

        unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
            self.record(Call::EndCommandBuffer(buffer));
            fail(self.fail_end)
        }

        unsafe fn queue_submit(
            &self,
            _queue: vk::Queue,
            submits: &[vk::SubmitInfo],
            fence: vk::Fence,
        ) -> VkResult<()> {
            let submit = &submits[0];
            self.record(Call::QueueSubmit {
                waits: submit.wait_semaphore_count,
                signals: submit.signal_semaphore_count,
                fence,
            });
            fail(self.fail_submit)
        }

        unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
            self.record(Call::QueueWaitIdle(queue));
            Ok(())
        }
    }
}
