// =============================================================================
// VKUTIL PROBE - exercise the helper layer against a real driver
// =============================================================================
//
// FLOW:
// 1. Create the device (scored selection, feature negotiation)
// 2. Negotiate a depth format
// 3. Load every configured shader
// 4. Fill a buffer through a blocking one-shot submission
// 5. Dispatch a specialized compute shader through a fenced submission
// 6. Optionally keep watching shaders and reload them on change
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;
use vkutil::backend::buffer::HostBuffer;
use vkutil::backend::pipeline::{ComputePipeline, StorageBufferSet};
use vkutil::backend::sync;
use vkutil::config::Config;
use vkutil::{
    load_shader_module, result_str, SpecializationData, ShaderWatcher, SubmitSync, VulkanDevice,
};

const FENCE_TIMEOUT_NS: u64 = 5_000_000_000;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting vkutil probe");

    // ─────────────────────────────────────────────────────────────────────────
    // STEP 1: Device
    // ─────────────────────────────────────────────────────────────────────────
    let device = VulkanDevice::new(&config.device)?;

    // ─────────────────────────────────────────────────────────────────────────
    // STEP 2: Depth format (nothing can be drawn without one)
    // ─────────────────────────────────────────────────────────────────────────
    let depth_format = device
        .select_depth_format(config.preferred_depth_format(), config.depth.require_stencil)
        .context("Cannot continue without a depth format")?;
    log::info!("Depth format: {:?}", depth_format);

    // ─────────────────────────────────────────────────────────────────────────
    // STEP 3: Shaders
    // ─────────────────────────────────────────────────────────────────────────
    let mut failed = 0;
    for path in &config.shaders.paths {
        match load_shader_module(&device.device, path) {
            Ok(module) => unsafe { device.device.destroy_shader_module(module, None) },
            Err(e) => {
                log::error!("{:#}", anyhow::Error::from(e));
                failed += 1;
            }
        }
    }
    log::info!(
        "Shaders: {} loaded, {} failed",
        config.shaders.paths.len() - failed,
        failed
    );

    // ─────────────────────────────────────────────────────────────────────────
    // STEP 4 + 5: One-shot submissions
    // ─────────────────────────────────────────────────────────────────────────
    run_submission_probe(&device, &config)?;

    // ─────────────────────────────────────────────────────────────────────────
    // STEP 6: Hot reload
    // ─────────────────────────────────────────────────────────────────────────
    if config.shaders.watch {
        watch_shaders(&device, &config)?;
    }

    log::info!("Probe finished");
    Ok(())
}

/// Initialize logging, optionally writing to the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG still wins over the config file
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// SUBMISSION PROBE
// =============================================================================

fn run_submission_probe(device: &VulkanDevice, config: &Config) -> Result<()> {
    let size = config.probe.buffer_size()?;

    let mut buffer = HostBuffer::new(
        device,
        "probe readback",
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER,
    )?;

    let result = fill_probe(device, &buffer, config.probe.fill_value).and_then(|_| {
        match &config.shaders.compute {
            Some(path) => dispatch_probe(device, &buffer, path, config),
            None => Ok(()),
        }
    });

    buffer.destroy(device);
    result
}

/// Blocking submission on a transient pool
fn fill_probe(device: &VulkanDevice, buffer: &HostBuffer, value: u32) -> Result<()> {
    let queue = device.queue_closure();

    let result = queue.submit_once(None, &SubmitSync::blocking(), |cmd| unsafe {
        device.device.cmd_fill_buffer(cmd, buffer.buffer, 0, vk::WHOLE_SIZE, value);
        host_read_barrier(
            device,
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        );
    });
    if result != vk::Result::SUCCESS {
        anyhow::bail!("Fill submission failed: {}", result_str(result));
    }

    let words = buffer.read_u32s().context("Readback buffer is not mapped")?;
    let bad = words.iter().filter(|&&w| w != value).count();
    if bad > 0 {
        anyhow::bail!("Fill probe: {} of {} words wrong", bad, words.len());
    }
    log::info!("Fill probe OK ({} words = {:#x})", words.len(), value);
    Ok(())
}

/// Fenced submission on a caller-owned pool, running a specialized shader
fn dispatch_probe(
    device: &VulkanDevice,
    buffer: &HostBuffer,
    shader_path: &Path,
    config: &Config,
) -> Result<()> {
    let probe = &config.probe;

    let shader = match load_shader_module(&device.device, shader_path) {
        Ok(shader) => shader,
        Err(e) => {
            log::warn!("Skipping dispatch probe: {:#}", anyhow::Error::from(e));
            return Ok(());
        }
    };

    // Workgroup size and kernel parameters are built separately, then merged
    let mut workgroup = SpecializationData::new();
    workgroup.push_u32(0, probe.workgroup_size);
    let mut params = SpecializationData::new();
    params
        .push_u32(1, probe.fill_value)
        .push_u32(2, probe.buffer_elements);
    let constants = SpecializationData::concat(&workgroup, &params);

    let descriptors = StorageBufferSet::new(device, buffer.buffer, buffer.size)?;
    let pipeline = ComputePipeline::new(device, shader, &[descriptors.layout], &constants);
    unsafe { device.device.destroy_shader_module(shader, None) };
    let pipeline = match pipeline {
        Ok(pipeline) => pipeline,
        Err(e) => {
            descriptors.destroy(&device.device);
            return Err(e);
        }
    };

    let result = submit_dispatch(
        device,
        &pipeline,
        &descriptors,
        probe.buffer_elements,
        probe.workgroup_size,
    );

    pipeline.destroy(&device.device);
    descriptors.destroy(&device.device);
    result?;

    let words = buffer.read_u32s().context("Readback buffer is not mapped")?;
    let bad = words
        .iter()
        .enumerate()
        .filter(|&(i, &w)| w != probe.fill_value.wrapping_add(i as u32))
        .count();
    if bad > 0 {
        anyhow::bail!("Dispatch probe: {} of {} words wrong", bad, words.len());
    }
    log::info!("Dispatch probe OK ({} invocations)", words.len());
    Ok(())
}

fn submit_dispatch(
    device: &VulkanDevice,
    pipeline: &ComputePipeline,
    descriptors: &StorageBufferSet,
    elements: u32,
    workgroup_size: u32,
) -> Result<()> {
    let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue_family);
    let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")?;
    let fence = match sync::create_fence(&device.device, false) {
        Ok(fence) => fence,
        Err(e) => {
            unsafe { device.device.destroy_command_pool(pool, None) };
            return Err(e);
        }
    };

    let groups = elements.div_ceil(workgroup_size);
    let result = device.queue_closure().submit_once(
        Some(pool),
        &SubmitSync::with_fence(fence),
        |cmd| unsafe {
            device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
            device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &[descriptors.set],
                &[],
            );
            device.device.cmd_dispatch(cmd, groups, 1, 1);
            host_read_barrier(
                device,
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::AccessFlags::SHADER_WRITE,
            );
        },
    );

    let waited = if result == vk::Result::SUCCESS {
        sync::wait_and_destroy_fence(&device.device, fence, FENCE_TIMEOUT_NS)
    } else {
        unsafe { device.device.destroy_fence(fence, None) };
        Err(anyhow::anyhow!("Dispatch submission failed: {}", result_str(result)))
    };

    // The pool is ours, not the closure's
    unsafe { device.device.destroy_command_pool(pool, None) };
    waited
}

/// Make GPU writes from `src_stage` visible to host reads
unsafe fn host_read_barrier(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    src_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
) {
    let barrier = vk::MemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .build();
    device.device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        vk::PipelineStageFlags::HOST,
        vk::DependencyFlags::empty(),
        std::slice::from_ref(&barrier),
        &[],
        &[],
    );
}

// =============================================================================
// HOT RELOAD
// =============================================================================

fn watch_shaders(device: &VulkanDevice, config: &Config) -> Result<()> {
    let mut paths = config.shaders.paths.clone();
    if let Some(compute) = &config.shaders.compute {
        if !paths.contains(compute) {
            paths.push(compute.clone());
        }
    }

    let watcher = ShaderWatcher::new(&paths)?;
    log::info!("Watching {} shaders, Ctrl+C to stop", watcher.watched().len());

    while let Some(changed) = watcher.wait_changed(Duration::from_millis(500)) {
        for path in changed {
            match load_shader_module(&device.device, &path) {
                Ok(module) => {
                    log::info!("Reloaded {:?}", path);
                    unsafe { device.device.destroy_shader_module(module, None) };
                }
                // Already logged with the driver result
                Err(vkutil::BackendError::ShaderCreate { .. }) => {}
                Err(e) => log::error!("{:#}", anyhow::Error::from(e)),
            }
        }
    }

    Ok(())
}
