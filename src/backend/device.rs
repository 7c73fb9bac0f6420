// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection (scored, graphics + compute required)
// - Feature negotiation against the config's required feature list
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::CStr;
use std::sync::Arc;

use super::error::BackendError;
use super::features::FeatureSet;
use super::selection;
use super::submit::QueueClosure;
use super::util::CStrArray;
use crate::config::DeviceConfig;

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Taken in Drop so it is freed before the device
    allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // One queue that does both graphics and compute
    pub queue: vk::Queue,
    pub queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub enabled_features: FeatureSet,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// Validation layers are only honoured in debug builds.
    pub fn new(config: &DeviceConfig) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", config.app_name);

        let enable_validation = cfg!(debug_assertions) && config.validation_layers;

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, config, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Pick physical device (GPU)
        let (physical_device, queue_family) = Self::pick_physical_device(&instance)?;

        // Step 5: Negotiate features
        let requested = FeatureSet::from_names(&config.required_features)?;
        let enabled_features = Self::negotiate_features(&instance, physical_device, &requested)?;

        // Step 6: Create logical device
        let (device, queue) = Self::create_logical_device(
            &instance,
            physical_device,
            queue_family,
            &enabled_features,
        )?;

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 8: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            queue,
            queue_family,
            debug_utils,
            properties,
            memory_properties,
            enabled_features,
        }))
    }

    fn create_instance(
        entry: &Entry,
        config: &DeviceConfig,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name = std::ffi::CString::new(config.app_name.as_str())?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkutil")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = CStrArray::new(config.instance_extensions.iter().map(String::as_str))
            .context("Invalid instance extension name")?;
        let mut layers = CStrArray::new(config.instance_layers.iter().map(String::as_str))
            .context("Invalid instance layer name")?;

        if enable_validation {
            extensions.push_cstr(ash::extensions::ext::DebugUtils::name());
            layers.push_cstr(c"VK_LAYER_KHRONOS_validation");
        }

        for layer in layers.iter() {
            log::debug!("Enabling instance layer {:?}", layer);
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions.as_ptrs())
            .enabled_layer_names(layers.as_ptrs());

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        selection::select_device_and_queue_family(instance, &devices)
            .context("No GPU has a queue family with both graphics and compute")
    }

    fn negotiate_features(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        requested: &FeatureSet,
    ) -> Result<FeatureSet> {
        let supported =
            FeatureSet::from(&unsafe { instance.get_physical_device_features(physical_device) });

        let missing = requested.missing(&supported);
        if !missing.is_empty() {
            return Err(BackendError::UnsupportedFeatures(missing).into());
        }

        Ok(requested.combine(&supported, |wanted, have, name| {
            if wanted {
                log::debug!("Enabling device feature {}", name);
            }
            wanted && have
        }))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        features: &FeatureSet,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let enabled_features = vk::PhysicalDeviceFeatures::from(features);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_features(&enabled_features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(allocator)
    }

    /// Lock the allocator. Do not hold the guard across a device wait.
    pub fn allocator(&self) -> MutexGuard<'_, Option<Allocator>> {
        self.allocator.lock()
    }

    /// Submission helper bound to this device's queue
    pub fn queue_closure(&self) -> QueueClosure<'_> {
        QueueClosure::new(&self.device, self.queue, self.queue_family)
    }

    pub fn select_depth_format(
        &self,
        preferred: vk::Format,
        require_stencil: bool,
    ) -> Result<vk::Format, BackendError> {
        selection::select_depth_format(
            &self.instance,
            self.physical_device,
            preferred,
            require_stencil,
        )
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Allocator owns device memory blocks, so it goes first
        drop(self.allocator.lock().take());

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
