// One-shot command submission
//
// For uploads, layout transitions and other work that is recorded once,
// submitted once and thrown away. A QueueClosure binds a queue to its
// family; begin() hands out a command buffer in the recording state and
// finish() submits it and releases whatever begin() created.

use ash::vk;

use super::driver::DeviceDriver;
use super::result::result_str;

/// Where the command buffer of a one-shot submission came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPoolSource {
    /// Transient pool created by `begin`, destroyed by `finish`.
    Owned(vk::CommandPool),
    /// Caller's pool; never freed or destroyed here.
    Borrowed(vk::CommandPool),
}

impl CommandPoolSource {
    pub fn pool(self) -> vk::CommandPool {
        match self {
            Self::Owned(pool) | Self::Borrowed(pool) => pool,
        }
    }
}

/// A command buffer in the recording state, waiting for [`QueueClosure::finish`].
#[must_use = "one-shot commands leak their pool unless passed to finish()"]
#[derive(Debug)]
pub struct OneShotCommands {
    buffer: vk::CommandBuffer,
    pool: CommandPoolSource,
}

impl OneShotCommands {
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn pool(&self) -> CommandPoolSource {
        self.pool
    }
}

/// Synchronization for a one-shot submission.
///
/// The default waits on nothing, signals nothing, has no fence and does
/// not block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitSync<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    /// One stage per wait semaphore. Missing stages default to ALL_COMMANDS.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
    /// Block on queue idle after submitting. Ignored when `fence` is set.
    pub wait: bool,
}

impl SubmitSync<'_> {
    /// No semaphores, no fence, wait for the queue to drain.
    pub fn blocking() -> Self {
        Self {
            wait: true,
            ..Default::default()
        }
    }

    pub fn with_fence(fence: vk::Fence) -> Self {
        Self {
            fence,
            ..Default::default()
        }
    }
}

pub struct QueueClosure<'d, D: DeviceDriver + ?Sized = ash::Device> {
    device: &'d D,
    queue: vk::Queue,
    family_index: u32,
}

impl<'d, D: DeviceDriver + ?Sized> QueueClosure<'d, D> {
    pub fn new(device: &'d D, queue: vk::Queue, family_index: u32) -> Self {
        Self {
            device,
            queue,
            family_index,
        }
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Allocate a primary command buffer and begin recording it for one submit.
    ///
    /// With `pool == None` a transient pool is created for this buffer alone.
    ///
    /// # Panics
    /// If the driver cannot create the pool, allocate the buffer or begin
    /// recording. There is nothing useful a caller can do without the
    /// buffer.
    pub fn begin(&self, pool: Option<vk::CommandPool>) -> OneShotCommands {
        let pool = match pool {
            Some(pool) => CommandPoolSource::Borrowed(pool),
            None => {
                let create_info = vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(self.family_index)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT);
                let pool = unsafe { self.device.create_command_pool(&create_info) }
                    .unwrap_or_else(|e| fatal("create one-shot command pool", e));
                CommandPoolSource::Owned(pool)
            }
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { self.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                self.release_pool(pool);
                fatal("allocate one-shot command buffer", e)
            }
        };

        let commands = OneShotCommands { buffer, pool };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(e) = unsafe { self.device.begin_command_buffer(buffer, &begin_info) } {
            self.cleanup(&commands);
            fatal("begin one-shot command buffer", e);
        }

        commands
    }

    /// End recording, submit, optionally wait, and release what `begin` created.
    ///
    /// Returns the raw submission result. Cleanup runs whatever the
    /// outcome; with a fence or semaphores the caller must track
    /// completion before reusing anything the commands touched.
    pub fn finish(&self, commands: OneShotCommands, sync: &SubmitSync<'_>) -> vk::Result {
        let result = self.submit(&commands, sync);
        self.cleanup(&commands);
        result
    }

    /// Record with `record` and submit in one go.
    pub fn submit_once<F>(
        &self,
        pool: Option<vk::CommandPool>,
        sync: &SubmitSync<'_>,
        record: F,
    ) -> vk::Result
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let commands = self.begin(pool);
        record(commands.buffer());
        self.finish(commands, sync)
    }

    fn submit(&self, commands: &OneShotCommands, sync: &SubmitSync<'_>) -> vk::Result {
        if let Err(e) = unsafe { self.device.end_command_buffer(commands.buffer) } {
            log::error!("Failed to end one-shot command buffer: {}", result_str(e));
            return e;
        }

        let wait_stages: Vec<_> = (0..sync.wait_semaphores.len())
            .map(|i| {
                sync.wait_stages
                    .get(i)
                    .copied()
                    .unwrap_or(vk::PipelineStageFlags::ALL_COMMANDS)
            })
            .collect();

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(std::slice::from_ref(&commands.buffer))
            .wait_semaphores(sync.wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(sync.signal_semaphores)
            .build();

        let result = unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit_info), sync.fence)
        };

        match result {
            Ok(()) => {
                if sync.wait && sync.fence == vk::Fence::null() {
                    if let Err(e) = unsafe { self.device.queue_wait_idle(self.queue) } {
                        log::warn!("Queue wait after one-shot submit failed: {}", result_str(e));
                    }
                }
                vk::Result::SUCCESS
            }
            Err(e) => {
                log::error!("One-shot submit failed: {}", result_str(e));
                e
            }
        }
    }

    fn cleanup(&self, commands: &OneShotCommands) {
        if let CommandPoolSource::Owned(pool) = commands.pool {
            unsafe {
                self.device
                    .free_command_buffers(pool, std::slice::from_ref(&commands.buffer));
            }
        }
        self.release_pool(commands.pool);
    }

    fn release_pool(&self, pool: CommandPoolSource) {
        if let CommandPoolSource::Owned(pool) = pool {
            unsafe { self.device.destroy_command_pool(pool) };
        }
    }
}

fn fatal(what: &str, result: vk::Result) -> ! {
    log::error!("Failed to {}: {}", what, result_str(result));
    panic!("failed to {}: {}", what, result_str(result));
}
