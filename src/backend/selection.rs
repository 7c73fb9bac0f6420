// Physical device selection and depth format negotiation
//
// Scoring is by device class only; a device is disqualified unless its
// queue families together offer both graphics and compute.

use ash::vk;

use super::driver::InstanceDriver;
use super::error::BackendError;

/// Score of a device that cannot be used at all.
pub const DISQUALIFIED: i32 = -1;

/// Tried in order when the preferred depth format is rejected.
pub const DEPTH_FORMAT_FALLBACKS: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM,
];

const REQUIRED_QUEUE_FLAGS: vk::QueueFlags =
    vk::QueueFlags::from_raw(vk::QueueFlags::GRAPHICS.as_raw() | vk::QueueFlags::COMPUTE.as_raw());

fn device_type_score(device_type: vk::PhysicalDeviceType) -> i32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 3000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2000,
        vk::PhysicalDeviceType::CPU => 1000,
        _ => 0,
    }
}

/// True if the union of every non-empty queue family covers `flags`.
pub fn supports_queue_flags<I: InstanceDriver + ?Sized>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
    flags: vk::QueueFlags,
) -> bool {
    let covered = instance
        .queue_family_properties(physical_device)
        .iter()
        .filter(|family| family.queue_count > 0)
        .fold(vk::QueueFlags::empty(), |acc, family| {
            acc | (family.queue_flags & flags)
        });
    covered == flags
}

pub fn score_physical_device<I: InstanceDriver + ?Sized>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
) -> i32 {
    if !supports_queue_flags(instance, physical_device, REQUIRED_QUEUE_FLAGS) {
        return DISQUALIFIED;
    }
    device_type_score(instance.device_type(physical_device))
}

/// Pick the highest scoring device. Ties go to the earlier device.
///
/// Returns `None` for an empty list or when every device is disqualified.
pub fn select_physical_device<I: InstanceDriver + ?Sized>(
    instance: &I,
    devices: &[vk::PhysicalDevice],
) -> Option<vk::PhysicalDevice> {
    let mut best = None;
    let mut best_score = DISQUALIFIED;

    for &device in devices {
        let score = score_physical_device(instance, device);
        log::debug!("Physical device {:?} scored {}", device, score);
        if score > best_score {
            best_score = score;
            best = Some(device);
        }
    }

    best
}

/// First non-empty queue family that on its own offers every bit of `flags`.
pub fn find_queue_family<I: InstanceDriver + ?Sized>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
    flags: vk::QueueFlags,
) -> Option<u32> {
    instance
        .queue_family_properties(physical_device)
        .iter()
        .position(|family| family.queue_count > 0 && family.queue_flags.contains(flags))
        .map(|i| i as u32)
}

/// Pick a device that can run graphics and compute on one queue.
///
/// Devices without a combined family are dropped first, so a higher
/// scoring device with split families never shadows a usable one. The
/// remaining devices are ranked by [`select_physical_device`].
pub fn select_device_and_queue_family<I: InstanceDriver + ?Sized>(
    instance: &I,
    devices: &[vk::PhysicalDevice],
) -> Option<(vk::PhysicalDevice, u32)> {
    let candidates: Vec<_> = devices
        .iter()
        .copied()
        .filter(|&device| {
            let usable = find_queue_family(instance, device, REQUIRED_QUEUE_FLAGS).is_some();
            if !usable {
                log::debug!(
                    "Physical device {:?} has no queue family with graphics and compute",
                    device
                );
            }
            usable
        })
        .collect();

    let device = select_physical_device(instance, &candidates)?;
    let family = find_queue_family(instance, device, REQUIRED_QUEUE_FLAGS)?;
    Some((device, family))
}

/// Whether the format belongs to the combined depth/stencil range.
///
/// This is an ordinal comparison against `D16_UNORM_S8_UINT`, so every
/// enumerant numbered after it counts as having stencil.
pub fn format_has_stencil(format: vk::Format) -> bool {
    format.as_raw() >= vk::Format::D16_UNORM_S8_UINT.as_raw()
}

fn accepts_depth_format<I: InstanceDriver + ?Sized>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
    require_stencil: bool,
) -> bool {
    let props = instance.format_properties(physical_device, format);
    let attachable = props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
    attachable && (!require_stencil || format_has_stencil(format))
}

/// Use `preferred` if the device can attach it as depth, else the first
/// acceptable entry of [`DEPTH_FORMAT_FALLBACKS`].
pub fn select_depth_format<I: InstanceDriver + ?Sized>(
    instance: &I,
    physical_device: vk::PhysicalDevice,
    preferred: vk::Format,
    require_stencil: bool,
) -> Result<vk::Format, BackendError> {
    if accepts_depth_format(instance, physical_device, preferred, require_stencil) {
        return Ok(preferred);
    }

    DEPTH_FORMAT_FALLBACKS
        .iter()
        .copied()
        .find(|&format| accepts_depth_format(instance, physical_device, format, require_stencil))
        .map(|format| {
            log::info!("Depth format {:?} unsupported, falling back to {:?}", preferred, format);
            format
        })
        .ok_or(BackendError::NoDepthFormat {
            preferred,
            require_stencil,
        })
}
