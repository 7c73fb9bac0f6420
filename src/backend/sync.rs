// Synchronization primitives
//
// Fences for tracking asynchronous one-shot submissions from the CPU

use anyhow::{Context, Result};
use ash::vk;

pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::builder().flags(flags);

    unsafe { device.create_fence(&fence_info, None) }.context("Failed to create fence")
}

/// Block until `fence` signals or `timeout_ns` elapses, then destroy it.
pub fn wait_and_destroy_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    let waited = unsafe { device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) };
    unsafe { device.destroy_fence(fence, None) };
    waited.context("Failed waiting for fence")
}
