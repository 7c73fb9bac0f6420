// VkResult to text
//
// ash's own Display impl prints prose; logs here want the literal
// enumerant name so it can be grepped against the registry.

use ash::vk;

/// Returned for any code not listed in [`KNOWN_RESULTS`].
pub const INVALID_RESULT_STR: &str = "<!Invalid VkResult value!>";

/// Every result code [`result_str`] knows by name.
pub const KNOWN_RESULTS: &[vk::Result] = &[
    vk::Result::SUCCESS,
    vk::Result::NOT_READY,
    vk::Result::TIMEOUT,
    vk::Result::EVENT_SET,
    vk::Result::EVENT_RESET,
    vk::Result::INCOMPLETE,
    vk::Result::ERROR_OUT_OF_HOST_MEMORY,
    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
    vk::Result::ERROR_INITIALIZATION_FAILED,
    vk::Result::ERROR_DEVICE_LOST,
    vk::Result::ERROR_MEMORY_MAP_FAILED,
    vk::Result::ERROR_LAYER_NOT_PRESENT,
    vk::Result::ERROR_EXTENSION_NOT_PRESENT,
    vk::Result::ERROR_FEATURE_NOT_PRESENT,
    vk::Result::ERROR_INCOMPATIBLE_DRIVER,
    vk::Result::ERROR_TOO_MANY_OBJECTS,
    vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    vk::Result::ERROR_FRAGMENTED_POOL,
    vk::Result::ERROR_UNKNOWN,
    vk::Result::ERROR_OUT_OF_POOL_MEMORY,
    vk::Result::ERROR_INVALID_EXTERNAL_HANDLE,
    vk::Result::ERROR_FRAGMENTATION,
    vk::Result::ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS,
    vk::Result::PIPELINE_COMPILE_REQUIRED,
    vk::Result::ERROR_SURFACE_LOST_KHR,
    vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR,
    vk::Result::SUBOPTIMAL_KHR,
    vk::Result::ERROR_OUT_OF_DATE_KHR,
    vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR,
    vk::Result::ERROR_VALIDATION_FAILED_EXT,
    vk::Result::ERROR_INVALID_SHADER_NV,
    vk::Result::ERROR_INVALID_DRM_FORMAT_MODIFIER_PLANE_LAYOUT_EXT,
    vk::Result::ERROR_NOT_PERMITTED_EXT,
    vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT,
    vk::Result::THREAD_IDLE_KHR,
    vk::Result::THREAD_DONE_KHR,
    vk::Result::OPERATION_DEFERRED_KHR,
    vk::Result::OPERATION_NOT_DEFERRED_KHR,
];

/// Translate a result code into its enumerant name.
pub fn result_str(result: vk::Result) -> &'static str {
    match result {
        vk::Result::SUCCESS => "VK_SUCCESS",
        vk::Result::NOT_READY => "VK_NOT_READY",
        vk::Result::TIMEOUT => "VK_TIMEOUT",
        vk::Result::EVENT_SET => "VK_EVENT_SET",
        vk::Result::EVENT_RESET => "VK_EVENT_RESET",
        vk::Result::INCOMPLETE => "VK_INCOMPLETE",
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => "VK_ERROR_OUT_OF_HOST_MEMORY",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => "VK_ERROR_OUT_OF_DEVICE_MEMORY",
        vk::Result::ERROR_INITIALIZATION_FAILED => "VK_ERROR_INITIALIZATION_FAILED",
        vk::Result::ERROR_DEVICE_LOST => "VK_ERROR_DEVICE_LOST",
        vk::Result::ERROR_MEMORY_MAP_FAILED => "VK_ERROR_MEMORY_MAP_FAILED",
        vk::Result::ERROR_LAYER_NOT_PRESENT => "VK_ERROR_LAYER_NOT_PRESENT",
        vk::Result::ERROR_EXTENSION_NOT_PRESENT => "VK_ERROR_EXTENSION_NOT_PRESENT",
        vk::Result::ERROR_FEATURE_NOT_PRESENT => "VK_ERROR_FEATURE_NOT_PRESENT",
        vk::Result::ERROR_INCOMPATIBLE_DRIVER => "VK_ERROR_INCOMPATIBLE_DRIVER",
        vk::Result::ERROR_TOO_MANY_OBJECTS => "VK_ERROR_TOO_MANY_OBJECTS",
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => "VK_ERROR_FORMAT_NOT_SUPPORTED",
        vk::Result::ERROR_FRAGMENTED_POOL => "VK_ERROR_FRAGMENTED_POOL",
        vk::Result::ERROR_UNKNOWN => "VK_ERROR_UNKNOWN",
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => "VK_ERROR_OUT_OF_POOL_MEMORY",
        vk::Result::ERROR_INVALID_EXTERNAL_HANDLE => "VK_ERROR_INVALID_EXTERNAL_HANDLE",
        vk::Result::ERROR_FRAGMENTATION => "VK_ERROR_FRAGMENTATION",
        vk::Result::ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS => {
            "VK_ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS"
        }
        // Reported under its extension name
        vk::Result::PIPELINE_COMPILE_REQUIRED => "VK_PIPELINE_COMPILE_REQUIRED_EXT",
        vk::Result::ERROR_SURFACE_LOST_KHR => "VK_ERROR_SURFACE_LOST_KHR",
        vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => "VK_ERROR_NATIVE_WINDOW_IN_USE_KHR",
        vk::Result::SUBOPTIMAL_KHR => "VK_SUBOPTIMAL_KHR",
        vk::Result::ERROR_OUT_OF_DATE_KHR => "VK_ERROR_OUT_OF_DATE_KHR",
        vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR => "VK_ERROR_INCOMPATIBLE_DISPLAY_KHR",
        vk::Result::ERROR_VALIDATION_FAILED_EXT => "VK_ERROR_VALIDATION_FAILED_EXT",
        vk::Result::ERROR_INVALID_SHADER_NV => "VK_ERROR_INVALID_SHADER_NV",
        vk::Result::ERROR_INVALID_DRM_FORMAT_MODIFIER_PLANE_LAYOUT_EXT => {
            "VK_ERROR_INVALID_DRM_FORMAT_MODIFIER_PLANE_LAYOUT_EXT"
        }
        vk::Result::ERROR_NOT_PERMITTED_EXT => "VK_ERROR_NOT_PERMITTED_EXT",
        vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT => {
            "VK_ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT"
        }
        vk::Result::THREAD_IDLE_KHR => "VK_THREAD_IDLE_KHR",
        vk::Result::THREAD_DONE_KHR => "VK_THREAD_DONE_KHR",
        vk::Result::OPERATION_DEFERRED_KHR => "VK_OPERATION_DEFERRED_KHR",
        vk::Result::OPERATION_NOT_DEFERRED_KHR => "VK_OPERATION_NOT_DEFERRED_KHR",
        _ => INVALID_RESULT_STR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_code_has_a_name() {
        for &result in KNOWN_RESULTS {
            let name = result_str(result);
            assert!(!name.is_empty());
            assert_ne!(name, INVALID_RESULT_STR, "{:?} fell through", result);
            assert!(name.starts_with("VK_"));
        }
    }

    #[test]
    fn names_are_distinct() {
        let mut names: Vec<_> = KNOWN_RESULTS.iter().map(|&r| result_str(r)).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), KNOWN_RESULTS.len());
    }

    #[test]
    fn unknown_code_maps_to_placeholder() {
        assert_eq!(result_str(vk::Result::from_raw(12345)), INVALID_RESULT_STR);
        assert_eq!(result_str(vk::Result::from_raw(-999)), INVALID_RESULT_STR);
    }

    #[test]
    fn common_codes() {
        assert_eq!(result_str(vk::Result::SUCCESS), "VK_SUCCESS");
        assert_eq!(
            result_str(vk::Result::ERROR_DEVICE_LOST),
            "VK_ERROR_DEVICE_LOST"
        );
    }

    #[test]
    fn promoted_codes_keep_extension_names() {
        assert_eq!(
            result_str(vk::Result::PIPELINE_COMPILE_REQUIRED),
            "VK_PIPELINE_COMPILE_REQUIRED_EXT"
        );
        assert_eq!(
            result_str(vk::Result::ERROR_NOT_PERMITTED_EXT),
            "VK_ERROR_NOT_PERMITTED_EXT"
        );
    }
}
