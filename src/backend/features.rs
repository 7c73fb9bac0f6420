// Device feature sets
//
// vk::PhysicalDeviceFeatures is 55 loose VkBool32 fields with no way to
// iterate them. FeatureSet mirrors it as a flat bool array indexed by a
// static name table so merging two sets is a single loop.

use ash::vk;

use super::error::BackendError;

pub const FEATURE_COUNT: usize = 55;

/// Flat, name-indexed copy of `vk::PhysicalDeviceFeatures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    flags: [bool; FEATURE_COUNT],
}

// Generates the name table and both struct conversions from one field list,
// so the three can never drift apart.
macro_rules! feature_table {
    ($($field:ident => $name:literal,)*) => {
        /// Vulkan names of every feature, in declaration order.
        pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [$($name,)*];

        impl From<&vk::PhysicalDeviceFeatures> for FeatureSet {
            fn from(features: &vk::PhysicalDeviceFeatures) -> Self {
                Self {
                    flags: [$(features.$field != vk::FALSE,)*],
                }
            }
        }

        impl From<&FeatureSet> for vk::PhysicalDeviceFeatures {
            fn from(set: &FeatureSet) -> Self {
                let [$($field,)*] = set.flags;
                vk::PhysicalDeviceFeatures {
                    $($field: vk::Bool32::from($field),)*
                }
            }
        }
    };
}

feature_table! {
    robust_buffer_access => "robustBufferAccess",
    full_draw_index_uint32 => "fullDrawIndexUint32",
    image_cube_array => "imageCubeArray",
    independent_blend => "independentBlend",
    geometry_shader => "geometryShader",
    tessellation_shader => "tessellationShader",
    sample_rate_shading => "sampleRateShading",
    dual_src_blend => "dualSrcBlend",
    logic_op => "logicOp",
    multi_draw_indirect => "multiDrawIndirect",
    draw_indirect_first_instance => "drawIndirectFirstInstance",
    depth_clamp => "depthClamp",
    depth_bias_clamp => "depthBiasClamp",
    fill_mode_non_solid => "fillModeNonSolid",
    depth_bounds => "depthBounds",
    wide_lines => "wideLines",
    large_points => "largePoints",
    alpha_to_one => "alphaToOne",
    multi_viewport => "multiViewport",
    sampler_anisotropy => "samplerAnisotropy",
    texture_compression_etc2 => "textureCompressionETC2",
    texture_compression_astc_ldr => "textureCompressionASTC_LDR",
    texture_compression_bc => "textureCompressionBC",
    occlusion_query_precise => "occlusionQueryPrecise",
    pipeline_statistics_query => "pipelineStatisticsQuery",
    vertex_pipeline_stores_and_atomics => "vertexPipelineStoresAndAtomics",
    fragment_stores_and_atomics => "fragmentStoresAndAtomics",
    shader_tessellation_and_geometry_point_size => "shaderTessellationAndGeometryPointSize",
    shader_image_gather_extended => "shaderImageGatherExtended",
    shader_storage_image_extended_formats => "shaderStorageImageExtendedFormats",
    shader_storage_image_multisample => "shaderStorageImageMultisample",
    shader_storage_image_read_without_format => "shaderStorageImageReadWithoutFormat",
    shader_storage_image_write_without_format => "shaderStorageImageWriteWithoutFormat",
    shader_uniform_buffer_array_dynamic_indexing => "shaderUniformBufferArrayDynamicIndexing",
    shader_sampled_image_array_dynamic_indexing => "shaderSampledImageArrayDynamicIndexing",
    shader_storage_buffer_array_dynamic_indexing => "shaderStorageBufferArrayDynamicIndexing",
    shader_storage_image_array_dynamic_indexing => "shaderStorageImageArrayDynamicIndexing",
    shader_clip_distance => "shaderClipDistance",
    shader_cull_distance => "shaderCullDistance",
    shader_float64 => "shaderFloat64",
    shader_int64 => "shaderInt64",
    shader_int16 => "shaderInt16",
    shader_resource_residency => "shaderResourceResidency",
    shader_resource_min_lod => "shaderResourceMinLod",
    sparse_binding => "sparseBinding",
    sparse_residency_buffer => "sparseResidencyBuffer",
    sparse_residency_image2_d => "sparseResidencyImage2D",
    sparse_residency_image3_d => "sparseResidencyImage3D",
    sparse_residency2_samples => "sparseResidency2Samples",
    sparse_residency4_samples => "sparseResidency4Samples",
    sparse_residency8_samples => "sparseResidency8Samples",
    sparse_residency16_samples => "sparseResidency16Samples",
    sparse_residency_aliased => "sparseResidencyAliased",
    variable_multisample_rate => "variableMultisampleRate",
    inherited_queries => "inheritedQueries",
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl FeatureSet {
    pub const fn empty() -> Self {
        Self {
            flags: [false; FEATURE_COUNT],
        }
    }

    /// Build a set with exactly the named features enabled.
    pub fn from_names<I, S>(names: I) -> Result<Self, BackendError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for name in names {
            let name = name.as_ref();
            if !set.set(name, true) {
                return Err(BackendError::UnknownFeature(name.to_string()));
            }
        }
        Ok(set)
    }

    fn index_of(name: &str) -> Option<usize> {
        FEATURE_NAMES.iter().position(|&n| n == name)
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        Self::index_of(name).map(|i| self.flags[i])
    }

    /// Returns false if `name` is not a known feature.
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        match Self::index_of(name) {
            Some(i) => {
                self.flags[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.flags.iter().copied())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.iter().filter(|&(_, on)| on).map(|(name, _)| name)
    }

    pub fn is_empty(&self) -> bool {
        !self.flags.iter().any(|&on| on)
    }

    /// Apply `op(self.x, other.x, "x")` to every feature.
    pub fn combine<F>(&self, other: &FeatureSet, mut op: F) -> FeatureSet
    where
        F: FnMut(bool, bool, &'static str) -> bool,
    {
        let mut out = FeatureSet::empty();
        for (i, &name) in FEATURE_NAMES.iter().enumerate() {
            out.flags[i] = op(self.flags[i], other.flags[i], name);
        }
        out
    }

    /// Apply `op(self.x, "x")` to every feature.
    pub fn map<F>(&self, mut op: F) -> FeatureSet
    where
        F: FnMut(bool, &'static str) -> bool,
    {
        let mut out = FeatureSet::empty();
        for (i, &name) in FEATURE_NAMES.iter().enumerate() {
            out.flags[i] = op(self.flags[i], name);
        }
        out
    }

    pub fn union(&self, other: &FeatureSet) -> FeatureSet {
        self.combine(other, |a, b, _| a || b)
    }

    pub fn intersection(&self, other: &FeatureSet) -> FeatureSet {
        self.combine(other, |a, b, _| a && b)
    }

    /// Names enabled in `self` but not in `supported`.
    pub fn missing(&self, supported: &FeatureSet) -> Vec<&'static str> {
        self.combine(supported, |wanted, have, _| wanted && !have)
            .enabled()
            .collect()
    }
}

/// Merge two feature records field by field.
pub fn combine_features<F>(
    a: &vk::PhysicalDeviceFeatures,
    b: &vk::PhysicalDeviceFeatures,
    op: F,
) -> vk::PhysicalDeviceFeatures
where
    F: FnMut(bool, bool, &'static str) -> bool,
{
    let merged = FeatureSet::from(a).combine(&FeatureSet::from(b), op);
    vk::PhysicalDeviceFeatures::from(&merged)
}

/// Transform one feature record field by field.
pub fn map_features<F>(features: &vk::PhysicalDeviceFeatures, op: F) -> vk::PhysicalDeviceFeatures
where
    F: FnMut(bool, &'static str) -> bool,
{
    vk::PhysicalDeviceFeatures::from(&FeatureSet::from(features).map(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_a() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            wide_lines: vk::TRUE,
            shader_float64: vk::TRUE,
            sparse_binding: vk::TRUE,
            ..Default::default()
        }
    }

    fn sample_b() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            wide_lines: vk::TRUE,
            sampler_anisotropy: vk::TRUE,
            inherited_queries: vk::TRUE,
            ..Default::default()
        }
    }

    #[test]
    fn names_are_unique() {
        let unique: HashSet<_> = FEATURE_NAMES.iter().collect();
        assert_eq!(unique.len(), FEATURE_COUNT);
    }

    #[test]
    fn combine_visits_every_field_once() {
        let mut seen = Vec::new();
        combine_features(&sample_a(), &sample_b(), |a, b, name| {
            seen.push(name);
            a && b
        });
        assert_eq!(seen, FEATURE_NAMES.to_vec());
    }

    #[test]
    fn map_visits_every_field_once() {
        let mut seen = Vec::new();
        map_features(&sample_a(), |value, name| {
            seen.push(name);
            value
        });
        assert_eq!(seen, FEATURE_NAMES.to_vec());
    }

    #[test]
    fn combine_applies_op_per_field() {
        let a = sample_a();
        let b = sample_b();
        let merged = combine_features(&a, &b, |x, y, _| x || y);
        assert_eq!(merged.wide_lines, vk::TRUE);
        assert_eq!(merged.shader_float64, vk::TRUE);
        assert_eq!(merged.sampler_anisotropy, vk::TRUE);
        assert_eq!(merged.inherited_queries, vk::TRUE);
        assert_eq!(merged.geometry_shader, vk::FALSE);

        let both = combine_features(&a, &b, |x, y, _| x && y);
        let both = FeatureSet::from(&both);
        assert_eq!(both.enabled().collect::<Vec<_>>(), vec!["wideLines"]);
    }

    #[test]
    fn merged_field_matches_op_on_inputs() {
        let a = FeatureSet::from(&sample_a());
        let b = FeatureSet::from(&sample_b());
        // xor makes every field depend on both inputs
        let merged = a.combine(&b, |x, y, _| x ^ y);
        for name in FEATURE_NAMES {
            let expected = a.get(name).unwrap() ^ b.get(name).unwrap();
            assert_eq!(merged.get(name), Some(expected), "{}", name);
        }
    }

    #[test]
    fn op_can_key_on_field_name() {
        let merged = map_features(&vk::PhysicalDeviceFeatures::default(), |_, name| {
            name == "sparseResidencyImage3D"
        });
        assert_eq!(merged.sparse_residency_image3_d, vk::TRUE);
        assert_eq!(FeatureSet::from(&merged).enabled().count(), 1);
    }

    #[test]
    fn nonzero_bool32_counts_as_enabled() {
        let raw = vk::PhysicalDeviceFeatures {
            depth_clamp: 7,
            ..Default::default()
        };
        let mapped = map_features(&raw, |v, _| v);
        assert_eq!(mapped.depth_clamp, vk::TRUE);
    }

    #[test]
    fn from_names_rejects_unknown() {
        let set = FeatureSet::from_names(["wideLines", "shaderInt64"]).unwrap();
        assert_eq!(set.get("wideLines"), Some(true));
        assert_eq!(set.get("shaderInt64"), Some(true));
        assert_eq!(set.get("shaderInt16"), Some(false));

        let err = FeatureSet::from_names(["wide_lines"]).unwrap_err();
        assert!(matches!(err, BackendError::UnknownFeature(name) if name == "wide_lines"));
    }

    #[test]
    fn missing_lists_unsupported_requests() {
        let wanted = FeatureSet::from_names(["wideLines", "shaderFloat64", "logicOp"]).unwrap();
        let supported = FeatureSet::from(&sample_a());
        assert_eq!(wanted.missing(&supported), vec!["logicOp"]);
        assert!(FeatureSet::empty().missing(&supported).is_empty());
    }

    #[test]
    fn round_trips_through_vulkan_struct() {
        let set = FeatureSet::from(&sample_b());
        let back = FeatureSet::from(&vk::PhysicalDeviceFeatures::from(&set));
        assert_eq!(set, back);
        assert_eq!(set.union(&FeatureSet::empty()), set);
        assert!(set.intersection(&FeatureSet::empty()).is_empty());
    }
}
