// Compute pipeline creation
//
// A compute pipeline with a single storage-buffer binding, its behaviour
// otherwise driven by specialization constants.

use anyhow::{Context, Result};
use ash::vk;

use super::specialization::SpecializationData;
use super::util::total_descriptor_count;
use super::VulkanDevice;

/// Descriptor set with one storage buffer at binding 0, visible to compute.
pub struct StorageBufferSet {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl StorageBufferSet {
    pub fn new(device: &VulkanDevice, buffer: vk::Buffer, range: vk::DeviceSize) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build();

        let layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(std::slice::from_ref(&binding));
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(total_descriptor_count(&pool_sizes))
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
                return Err(e).context("Failed to create descriptor pool");
            }
        };

        let this = Self {
            layout,
            pool,
            set: vk::DescriptorSet::null(),
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&layout));
        let set = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                this.destroy(&device.device);
                return Err(e).context("Failed to allocate descriptor set");
            }
        };

        let buffer_info = vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();
        unsafe { device.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };

        Ok(Self { set, ..this })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            // Sets are freed with their pool
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Build a pipeline for `main` in `shader` with the given constants.
    pub fn new(
        device: &VulkanDevice,
        shader: vk::ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        specialization: &SpecializationData,
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        // The info borrows `specialization`; both outlive the create call
        let spec_info = specialization.info();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader)
            .name(c"main")
            .specialization_info(&spec_info);

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(*stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };

        match pipelines {
            Ok(pipelines) => Ok(Self {
                pipeline: pipelines[0],
                layout,
            }),
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(e).context("Failed to create compute pipeline")
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
