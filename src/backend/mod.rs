// Backend module - Vulkan helper layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// The pure helpers (features, selection, shader, specialization, submit,
// result) go through the driver traits; the rest builds on VulkanDevice.

pub mod buffer;
pub mod device;
pub mod driver;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod result;
pub mod selection;
pub mod shader;
pub mod specialization;
pub mod submit;
pub mod sync;
pub mod util;

pub use device::VulkanDevice;
pub use driver::{DeviceDriver, InstanceDriver};
pub use error::BackendError;
pub use features::{combine_features, map_features, FeatureSet};
pub use result::result_str;
pub use selection::{select_depth_format, select_device_and_queue_family, select_physical_device};
pub use shader::{create_shader_module, load_shader_module, ShaderWatcher};
pub use specialization::{concat_specialization_info, SpecializationData};
pub use submit::{CommandPoolSource, OneShotCommands, QueueClosure, SubmitSync};
