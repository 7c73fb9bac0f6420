// Small conversions the Vulkan create-info structs keep asking for

use ash::vk;
use std::ffi::{c_char, CString, NulError};

/// Owned C strings plus the pointer array Vulkan wants for name lists
/// (layers, extensions). The pointers stay valid as long as this value lives.
#[derive(Debug, Default)]
pub struct CStrArray {
    strings: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl CStrArray {
    pub fn new<I, S>(names: I) -> Result<Self, NulError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let strings = names
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()?;
        let pointers = strings.iter().map(|s| s.as_ptr()).collect();
        Ok(Self { strings, pointers })
    }

    /// Append a name that is already a C string (e.g. an extension's `name()`).
    pub fn push_cstr(&mut self, name: &std::ffi::CStr) {
        let owned = name.to_owned();
        self.pointers.push(owned.as_ptr());
        self.strings.push(owned);
    }

    pub fn as_ptrs(&self) -> &[*const c_char] {
        &self.pointers
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &std::ffi::CStr> {
        self.strings.iter().map(|s| s.as_c_str())
    }
}

/// Sum of descriptor counts across pool sizes, for `max_sets`-style sizing.
pub fn total_descriptor_count(pool_sizes: &[vk::DescriptorPoolSize]) -> u32 {
    pool_sizes.iter().map(|size| size.descriptor_count).sum()
}
